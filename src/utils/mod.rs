pub mod format;
pub mod sos;
