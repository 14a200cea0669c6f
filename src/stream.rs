//! Streaming hand-off of a converted PDF.
//!
//! A [`ConvertedPdf`] owns the open artifact and the request's
//! [`CleanupGuard`]. Turning it into a byte stream moves both into the
//! stream state, so the staged input and the PDF are deleted when the
//! stream ends: at EOF, on a read error, or when the consumer drops it
//! (client disconnect, response aborted).

use crate::pipeline::cleanup::CleanupGuard;
use bytes::{Bytes, BytesMut};
use futures::stream;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::io::AsyncReadExt;
use tokio_stream::Stream;
use tracing::{debug, warn};

/// Read size for the outgoing body.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// A boxed stream of PDF bytes.
pub type PdfStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// A validated, non-empty PDF ready to be sent to the caller.
pub struct ConvertedPdf {
    file: tokio::fs::File,
    path: PathBuf,
    size: u64,
    filename: String,
    guard: CleanupGuard,
}

impl std::fmt::Debug for ConvertedPdf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConvertedPdf")
            .field("path", &self.path)
            .field("size", &self.size)
            .field("filename", &self.filename)
            .finish()
    }
}

impl ConvertedPdf {
    pub(crate) fn new(
        file: tokio::fs::File,
        path: PathBuf,
        size: u64,
        filename: String,
        guard: CleanupGuard,
    ) -> Self {
        Self {
            file,
            path,
            size,
            filename,
            guard,
        }
    }

    /// Where the engine wrote the PDF. Deleted once the stream finishes.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size in bytes, checked to be non-zero.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Suggested download name, `<original stem>.pdf`.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Read the whole PDF into memory and clean up.
    pub async fn into_bytes(mut self) -> std::io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.size as usize);
        let result = self.file.read_to_end(&mut buf).await;
        drop(self.file);
        self.guard.run();
        result.map(|_| buf)
    }

    /// Stream the PDF in [`CHUNK_SIZE`] pieces, cleaning up when done.
    pub fn into_stream(self) -> PdfStream {
        let state = Some((self.file, self.guard));
        let s = stream::unfold(state, |state| async move {
            let (mut file, mut guard) = state?;
            let mut buf = BytesMut::zeroed(CHUNK_SIZE);
            match file.read(&mut buf).await {
                Ok(0) => {
                    debug!("PDF stream finished");
                    drop(file);
                    guard.run();
                    None
                }
                Ok(n) => {
                    buf.truncate(n);
                    Some((Ok(buf.freeze()), Some((file, guard))))
                }
                Err(e) => {
                    warn!("Error while streaming PDF: {}", e);
                    drop(file);
                    guard.run();
                    Some((Err(e), None))
                }
            }
        });
        Box::pin(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoopProgressCallback;
    use futures::StreamExt;
    use std::sync::Arc;

    async fn fixture(len: usize) -> (tempfile::TempDir, PathBuf, PathBuf, ConvertedPdf) {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.docx");
        let pdf = dir.path().join("in.pdf");
        std::fs::write(&input, b"doc").unwrap();
        std::fs::write(&pdf, vec![b'p'; len]).unwrap();

        let mut guard = CleanupGuard::new(Arc::new(NoopProgressCallback));
        guard.track_file(&input);
        guard.track_file(&pdf);
        let file = tokio::fs::File::open(&pdf).await.unwrap();
        let converted = ConvertedPdf::new(file, pdf.clone(), len as u64, "in.pdf".into(), guard);
        (dir, input, pdf, converted)
    }

    #[tokio::test]
    async fn stream_yields_all_bytes_then_cleans_up() {
        let len = CHUNK_SIZE * 2 + 17;
        let (_dir, input, pdf, converted) = fixture(len).await;
        assert_eq!(converted.size(), len as u64);

        let mut s = converted.into_stream();
        let mut total = 0;
        let mut chunks = 0;
        while let Some(chunk) = s.next().await {
            total += chunk.unwrap().len();
            chunks += 1;
        }
        assert_eq!(total, len);
        assert!(chunks >= 3);
        assert!(!input.exists());
        assert!(!pdf.exists());
    }

    #[tokio::test]
    async fn dropping_stream_early_cleans_up() {
        let (_dir, input, pdf, converted) = fixture(CHUNK_SIZE * 3).await;
        let mut s = converted.into_stream();
        let first = s.next().await.unwrap().unwrap();
        assert!(!first.is_empty());
        drop(s);
        assert!(!input.exists());
        assert!(!pdf.exists());
    }

    #[tokio::test]
    async fn into_bytes_reads_and_cleans_up() {
        let (_dir, input, pdf, converted) = fixture(10).await;
        let bytes = converted.into_bytes().await.unwrap();
        assert_eq!(bytes, vec![b'p'; 10]);
        assert!(!input.exists());
        assert!(!pdf.exists());
    }
}
