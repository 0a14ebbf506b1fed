//! Support code for the `aorctl` binary: configuration loading and the
//! reference worker.

pub mod config;
pub mod worker;

pub use config::{AppConfig, ConfigError, WorkerConfig};
pub use worker::Worker;
