pub mod code;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod session;
pub mod signaling;
pub mod store;
