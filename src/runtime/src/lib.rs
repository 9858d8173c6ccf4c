//! Image Packer Runtime - streaming image packaging.
//!
//! Pulls an image through the Docker daemon, exports it as a single-image
//! archive, gzips it on the fly into the artifact directory, and reports
//! progress through the event protocol. A background janitor evicts
//! artifacts past their retention window.

pub mod artifact;
pub mod compress;
pub mod docker;
pub mod engine;
pub mod janitor;
pub mod pipeline;
pub mod reference;
pub mod relay;

// Re-export common types
pub use artifact::ArtifactFile;
pub use compress::CompressionSink;
pub use docker::{DockerClient, DockerEndpoint};
pub use engine::{ByteStream, ImageRuntime};
pub use janitor::{RetentionJanitor, SweepReport};
pub use pipeline::{PackOutcome, PackagingPipeline};
pub use reference::ImageReference;

/// Image Packer Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
