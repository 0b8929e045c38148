//! Transfer protocol: the framing spoken over the data channel.
//!
//! One file on the wire is a JSON metadata frame followed by fixed-size
//! binary chunks. See [`codec`] for the framing and reassembly rules.

pub mod codec;
