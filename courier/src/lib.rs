//! The courier relay: wires the record store, delivery processor and HTTP
//! server together from a single RON configuration file.

pub mod controller;

pub use controller::{Courier, LogsConfig, SHUTDOWN_BROADCAST};
