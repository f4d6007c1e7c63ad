//! Library crate for sps-rs: batched async TCP connect scanning of a single host.
pub mod logging;
pub mod ports;
pub mod probe;
pub mod prompt;
pub mod resolve;
pub mod scanner;
pub mod types;
