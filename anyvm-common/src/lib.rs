//! # anyvm Common
//!
//! Shared utilities for the anyvm components.
//!
//! ## Logging
//!
//! ```rust,ignore
//! use anyvm_common::{init_logging, LogFormat};
//!
//! init_logging("info", LogFormat::Pretty).unwrap();
//! tracing::info!(provider = "aws", "Provider registered");
//! ```

pub mod logging;

pub use logging::{init_logging, LogFormat};
