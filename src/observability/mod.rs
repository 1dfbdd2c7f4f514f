//! Logging setup

pub mod logging;

pub use logging::{init_default_logging, init_logging, parse_level, session_span, LogFormat};
