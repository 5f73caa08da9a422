//! Observability module
//!
//! This module provides:
//! - Structured logging with JSON format support
//! - Log level selection from configuration with `RUST_LOG` override

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat};
