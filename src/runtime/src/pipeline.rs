//! Packaging pipeline: pull → export + compress → finalize.
//!
//! One pipeline run serves one request. Every outcome is reported through
//! the event stream; nothing escapes [`PackagingPipeline::run`] as an error.

use std::sync::Arc;
use std::time::Instant;

use packer_core::config::PackerConfig;
use packer_core::error::PackerError;
use packer_core::event::{ArtifactSummary, Event, EventEmitter, Stage};

use crate::artifact::{format_size_mb, load_command, ArtifactFile};
use crate::compress::CompressionSink;
use crate::engine::ImageRuntime;
use crate::reference::ImageReference;
use crate::relay::{pipe, relay_events};

const LOAD_TIP: &str =
    "This file is already compressed. Do not extract it; load it directly with the command above.";

/// How a pipeline run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PackOutcome {
    /// Artifact written and advertised
    Completed(ArtifactSummary),
    /// A terminal error event was sent for `stage`
    Failed { stage: Stage, message: String },
    /// The client went away; remaining work was dropped
    Abandoned,
}

/// Why a run stopped early.
enum Halt {
    Failed(Stage, String),
    Abandoned(PackerError),
}

impl From<PackerError> for Halt {
    fn from(err: PackerError) -> Self {
        Halt::Abandoned(err)
    }
}

/// Drives one image through pull, export and compression.
#[derive(Clone)]
pub struct PackagingPipeline {
    runtime: Arc<dyn ImageRuntime>,
    config: Arc<PackerConfig>,
}

impl PackagingPipeline {
    pub fn new(runtime: Arc<dyn ImageRuntime>, config: Arc<PackerConfig>) -> Self {
        Self { runtime, config }
    }

    /// Run the whole pipeline for `raw_reference`, reporting through `emitter`.
    ///
    /// Ends with exactly one terminal event unless the client disconnected.
    pub async fn run(&self, raw_reference: &str, emitter: &EventEmitter) -> PackOutcome {
        let started = Instant::now();

        match self.execute(raw_reference, emitter).await {
            Ok(summary) => {
                tracing::info!(
                    image = raw_reference,
                    filename = %summary.filename,
                    size = %summary.size,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Image packed"
                );
                PackOutcome::Completed(summary)
            }
            Err(Halt::Failed(stage, message)) => {
                tracing::warn!(image = raw_reference, stage = %stage, error = %message, "Pack failed");
                if let Err(e) = emitter.error(stage, message.clone()).await {
                    tracing::debug!(error = %e, "Could not deliver error event");
                }
                PackOutcome::Failed { stage, message }
            }
            Err(Halt::Abandoned(reason)) => {
                tracing::debug!(
                    image = raw_reference,
                    reason = %reason,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Pack abandoned"
                );
                PackOutcome::Abandoned
            }
        }
    }

    async fn execute(
        &self,
        raw_reference: &str,
        emitter: &EventEmitter,
    ) -> std::result::Result<ArtifactSummary, Halt> {
        let reference = ImageReference::parse(raw_reference).map_err(|e| {
            tracing::debug!(error = %e, "Rejected image reference");
            Halt::Failed(
                Stage::Init,
                "Image name contains illegal characters".to_string(),
            )
        })?;

        if reference.tag_defaulted() {
            emitter
                .info(
                    Stage::Init,
                    format!("No tag specified, defaulting to: {}", reference),
                )
                .await?;
        }

        self.pull(&reference, emitter).await?;
        let summary = self.pack(&reference, emitter).await?;

        emitter
            .emit(Event::done(
                format!("Packed successfully! Size: {}", summary.size),
                summary.clone(),
            ))
            .await?;

        Ok(summary)
    }

    /// Stage 1: pull the image and relay daemon progress.
    async fn pull(
        &self,
        reference: &ImageReference,
        emitter: &EventEmitter,
    ) -> std::result::Result<(), Halt> {
        emitter
            .info(Stage::Pull, format!("Pulling {} from registry", reference))
            .await?;

        let mut progress = self
            .runtime
            .pull(reference.as_str())
            .await
            .map_err(|e| Halt::Failed(Stage::Pull, format!("Pull failed: {}", e)))?;

        tokio::select! {
            relayed = relay_events(&mut progress, emitter, Stage::Pull) => {
                let bytes = relayed?;
                tracing::debug!(image = %reference, bytes, "Pull progress stream ended");
            }
            _ = emitter.closed() => return Err(Halt::Abandoned(PackerError::ClientGone)),
        }

        emitter.success(Stage::Pull, "Image pull complete").await?;
        Ok(())
    }

    /// Stage 2 and 3: export into a compressed artifact and finalize it.
    async fn pack(
        &self,
        reference: &ImageReference,
        emitter: &EventEmitter,
    ) -> std::result::Result<ArtifactSummary, Halt> {
        emitter
            .info(Stage::Pack, "Building compressed archive...")
            .await?;

        let (artifact, file) =
            ArtifactFile::create(&self.config.output_dir, &reference.safe_name())
                .await
                .map_err(|e| {
                    tracing::warn!(dir = %self.config.output_dir.display(), error = %e, "Cannot create artifact");
                    Halt::Failed(Stage::Pack, "Failed to write to server disk".to_string())
                })?;

        // Export exactly the tagged reference so only one image is archived.
        let mut archive = self
            .runtime
            .export(&[reference.as_str().to_string()])
            .await
            .map_err(|e| Halt::Failed(Stage::Pack, format!("Docker export failed: {}", e)))?;

        let mut sink = CompressionSink::new(file);
        let copied = tokio::select! {
            copied = pipe(&mut archive, &mut sink) => copied.map_err(|e| {
                Halt::Failed(Stage::Pack, format!("I/O error during compression: {}", e))
            })?,
            _ = emitter.closed() => return Err(Halt::Abandoned(PackerError::ClientGone)),
        };
        drop(archive);

        let size = sink.finish().await.map_err(|e| {
            Halt::Failed(Stage::Pack, format!("I/O error during compression: {}", e))
        })?;

        tracing::debug!(
            image = %reference,
            path = %artifact.path().display(),
            uncompressed = copied,
            compressed = size,
            "Artifact finalized"
        );

        let filename = artifact.filename().to_string();
        drop(artifact);

        Ok(ArtifactSummary {
            url: self.config.download_url(&filename),
            size: format_size_mb(size),
            cmd_load: load_command(&filename),
            filename,
            tip: LOAD_TIP.to_string(),
        })
    }
}
