//! Core module
//!
//! Configuration, structured logging and the error type shared by every
//! other module.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{BackendKind, CliArgs, Command, Config};
pub use error::{Result, VodError};
pub use logging::Logger;
