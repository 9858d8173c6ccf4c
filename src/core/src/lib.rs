//! Image Packer Core - Foundational Types
//!
//! This crate provides the types shared by the packaging runtime and the
//! HTTP server: configuration, the error taxonomy, and the event protocol
//! streamed back to clients.

pub mod config;
pub mod error;
pub mod event;
pub mod log;

// Re-export commonly used types
pub use config::PackerConfig;
pub use error::{PackerError, Result};
pub use event::{ArtifactSummary, Event, EventEmitter, Level, Payload, Stage};
pub use log::LogFormat;

/// Image Packer version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
