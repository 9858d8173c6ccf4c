//! Seam between the packaging pipeline and the container engine.

use std::pin::Pin;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use packer_core::error::Result;

/// Unbounded byte stream produced by the engine (progress log or image archive).
pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;

/// Container engine operations the pipeline depends on.
///
/// Implementations must be safe to call from many requests at once.
#[async_trait]
pub trait ImageRuntime: Send + Sync {
    /// Pull an image into the local cache, returning the progress log.
    async fn pull(&self, reference: &str) -> Result<ByteStream>;

    /// Serialize local images into a single uncompressed tar stream.
    async fn export(&self, references: &[String]) -> Result<ByteStream>;
}
