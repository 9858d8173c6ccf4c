//! Stream relays: daemon output → event stream, export stream → compressed file.

use tokio::io::{AsyncRead, AsyncReadExt};

use packer_core::error::Result;
use packer_core::event::{EventEmitter, Stage};

use crate::compress::CompressionSink;

/// Chunk size for relaying daemon output as events.
pub const EVENT_CHUNK_SIZE: usize = 1024;

/// Chunk size for piping archive bytes into the compressor.
pub const PIPE_CHUNK_SIZE: usize = 64 * 1024;

/// Forward every chunk read from `reader` as a `raw` event tagged with `stage`.
///
/// Chunks are emitted in read order as soon as they arrive. Reading stops at
/// end-of-stream or at the first read error; neither produces an event.
/// Returns the number of bytes relayed, or an error if the client is gone.
pub async fn relay_events<R>(reader: &mut R, emitter: &EventEmitter, stage: Stage) -> Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = vec![0u8; EVENT_CHUNK_SIZE];
    let mut relayed = 0u64;

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(stage = %stage, error = %e, "Daemon stream read failed");
                break;
            }
        };
        emitter
            .raw(stage, String::from_utf8_lossy(&buf[..n]))
            .await?;
        relayed += n as u64;
    }

    Ok(relayed)
}

/// Copy `reader` into the compression sink until end-of-stream.
///
/// Returns the number of uncompressed bytes copied.
pub async fn pipe<R>(reader: &mut R, sink: &mut CompressionSink) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = vec![0u8; PIPE_CHUNK_SIZE];
    let mut copied = 0u64;

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(copied);
        }
        sink.write(&buf[..n]).await?;
        copied += n as u64;
    }
}
