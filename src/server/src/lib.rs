//! Image Packer HTTP server.
//!
//! Exposes the packaging pipeline as a server-sent-events endpoint and
//! serves the resulting artifacts for download.

pub mod routes;
pub mod server;

pub use routes::AppState;
pub use server::PackServer;
