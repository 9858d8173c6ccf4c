//! Streaming gzip sink over an async file.

use std::io::{Error, ErrorKind, Write};

use flate2::write::GzEncoder;
use flate2::Compression;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// Gzip-compresses everything written to it into a destination file.
///
/// Compressed output accumulates in a small in-memory buffer that is drained
/// to the file after every write, so memory stays bounded by the encoder's
/// window regardless of the input size. Compression itself runs on the
/// blocking pool. Nothing written here may be treated as a complete artifact
/// until [`CompressionSink::finish`] returns.
pub struct CompressionSink {
    /// Taken while a chunk is being compressed; `None` after a failed write
    encoder: Option<GzEncoder<Vec<u8>>>,
    file: File,
}

impl CompressionSink {
    pub fn new(file: File) -> Self {
        Self {
            encoder: Some(GzEncoder::new(Vec::new(), Compression::default())),
            file,
        }
    }

    /// Compress a chunk and write the produced bytes to the file.
    pub async fn write(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        let mut encoder = self.take_encoder()?;
        let chunk = chunk.to_vec();
        let encoder = tokio::task::spawn_blocking(move || -> std::io::Result<_> {
            encoder.write_all(&chunk)?;
            Ok(encoder)
        })
        .await
        .map_err(|e| Error::new(ErrorKind::Other, e))??;
        self.encoder = Some(encoder);
        self.drain().await
    }

    /// Complete the gzip stream, flush and fsync the file.
    ///
    /// Returns the final on-disk size in bytes.
    pub async fn finish(mut self) -> std::io::Result<u64> {
        let encoder = self.take_encoder()?;
        let tail = tokio::task::spawn_blocking(move || encoder.finish())
            .await
            .map_err(|e| Error::new(ErrorKind::Other, e))??;
        self.file.write_all(&tail).await?;
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(self.file.metadata().await?.len())
    }

    fn take_encoder(&mut self) -> std::io::Result<GzEncoder<Vec<u8>>> {
        self.encoder.take().ok_or_else(|| {
            Error::new(ErrorKind::Other, "compression stream failed earlier")
        })
    }

    async fn drain(&mut self) -> std::io::Result<()> {
        if let Some(encoder) = self.encoder.as_mut() {
            let pending = encoder.get_mut();
            if !pending.is_empty() {
                self.file.write_all(pending).await?;
                pending.clear();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tempfile::TempDir;

    fn gunzip(path: &std::path::Path) -> Vec<u8> {
        let mut out = Vec::new();
        GzDecoder::new(std::fs::File::open(path).unwrap())
            .read_to_end(&mut out)
            .unwrap();
        out
    }

    #[tokio::test]
    async fn test_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("image.tar");
        let mut sink = CompressionSink::new(File::create(&path).await.unwrap());

        let data: Vec<u8> = (0..300_000u32).map(|i| (i % 251) as u8).collect();
        for chunk in data.chunks(4096) {
            sink.write(chunk).await.unwrap();
        }
        let size = sink.finish().await.unwrap();

        assert_eq!(size, std::fs::metadata(&path).unwrap().len());
        assert!(size < data.len() as u64);
        assert_eq!(gunzip(&path), data);
    }

    #[tokio::test]
    async fn test_empty_input_is_valid_gzip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.tar");
        let sink = CompressionSink::new(File::create(&path).await.unwrap());
        let size = sink.finish().await.unwrap();
        assert!(size > 0);
        assert!(gunzip(&path).is_empty());
    }

    #[tokio::test]
    async fn test_output_reaches_file_before_finish() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("streaming.tar");
        let mut sink = CompressionSink::new(File::create(&path).await.unwrap());

        // Incompressible input forces the encoder to emit as it goes.
        let mut state = 0x2545_f491u32;
        let data: Vec<u8> = (0..1_000_000)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state as u8
            })
            .collect();
        for chunk in data.chunks(64 * 1024) {
            sink.write(chunk).await.unwrap();
        }
        sink.file.flush().await.unwrap();
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
        assert!(sink.encoder.as_ref().unwrap().get_ref().is_empty());

        sink.finish().await.unwrap();
        assert_eq!(gunzip(&path), data);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_roundtrip_on_multi_thread_runtime() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("parallel.tar");
        let mut sink = CompressionSink::new(File::create(&path).await.unwrap());

        let data: Vec<u8> = (0..512 * 1024u32).map(|i| (i % 7) as u8).collect();
        for chunk in data.chunks(64 * 1024) {
            sink.write(chunk).await.unwrap();
        }
        sink.finish().await.unwrap();
        assert_eq!(gunzip(&path), data);
    }

    #[tokio::test]
    async fn test_sink_without_encoder_reports_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.tar");
        let mut sink = CompressionSink::new(File::create(&path).await.unwrap());
        sink.encoder = None;

        assert!(sink.write(b"data").await.is_err());
        assert!(sink.finish().await.is_err());
    }
}
