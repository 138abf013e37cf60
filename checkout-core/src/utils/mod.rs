// src/utils/mod.rs
pub mod status_log;

pub use status_log::StatusLog;
