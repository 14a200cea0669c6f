//! Upload ingestion: stream a request body into the staging directory.
//!
//! Two transport strategies feed the same [`StagingWriter`]:
//!
//! * **multipart**: the HTTP layer validates the `file` part's MIME type and
//!   extension with [`validate_upload`], then pushes each chunk;
//! * **raw body**: the whole body is the document and the original filename
//!   travels in a header; [`ingest_stream`] drives the writer.
//!
//! The writer enforces the size ceiling as bytes arrive, so an oversized
//! upload is cut off after at most one chunk past the limit instead of after
//! it has filled the disk. A writer dropped before [`StagingWriter::finish`]
//! (ceiling hit, transport error, request cancelled) deletes its partial file.

use crate::config::ServiceConfig;
use crate::error::ConvertError;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Name used when the client did not declare one.
pub const DEFAULT_UPLOAD_NAME: &str = "unknown.docx";

/// Longest sanitised name kept. Leaves room for the uniqueness prefix under
/// the usual 255-byte filename limit.
pub const MAX_SAFE_NAME_LEN: usize = 200;

/// Extensions longer than this are truncated along with the stem.
const MAX_KEPT_EXTENSION_LEN: usize = 16;

static UNSAFE_FILENAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9.\-_]").unwrap());

/// An upload fully written to the staging directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    /// Absolute path of the staged bytes.
    pub path: PathBuf,
    /// Declared name after decoding and sanitisation.
    pub original_name: String,
    /// Bytes written to `path`.
    pub byte_size: u64,
    pub created_at: DateTime<Utc>,
}

impl StagedFile {
    /// The staged filename without its extension, as the engine will see it.
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Reinterpret a name that was decoded as Latin-1 but is really UTF-8.
///
/// Multipart parsers and header decoders commonly map each byte to one
/// code point. If every character fits in a byte and those bytes form valid
/// UTF-8, the UTF-8 reading is returned; otherwise the name is kept as-is.
pub fn decode_declared_name(raw: &str) -> String {
    if raw.is_ascii() {
        return raw.to_string();
    }
    let bytes: Option<Vec<u8>> = raw
        .chars()
        .map(|c| u8::try_from(u32::from(c)).ok())
        .collect();
    match bytes.map(String::from_utf8) {
        Some(Ok(utf8)) => utf8,
        _ => raw.to_string(),
    }
}

/// Decode a raw header value carrying a filename.
///
/// Valid UTF-8 is taken as-is; anything else is read as Latin-1.
pub fn decode_header_name(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| char::from(b)).collect(),
    }
}

/// Replace every character outside `[A-Za-z0-9.\-_]` with `_`.
///
/// Names longer than [`MAX_SAFE_NAME_LEN`] lose the end of their stem; the
/// extension is kept.
pub fn sanitize_filename(name: &str) -> String {
    let trimmed = name.trim();
    let name = if trimmed.is_empty() {
        DEFAULT_UPLOAD_NAME
    } else {
        trimmed
    };
    let safe = UNSAFE_FILENAME_CHARS.replace_all(name, "_").into_owned();
    truncate_safe_name(safe)
}

// `safe` is ASCII here, so byte offsets are char boundaries.
fn truncate_safe_name(mut safe: String) -> String {
    if safe.len() <= MAX_SAFE_NAME_LEN {
        return safe;
    }
    match safe.rfind('.') {
        Some(dot) if dot > 0 && safe.len() - dot <= MAX_KEPT_EXTENSION_LEN => {
            let ext = safe.split_off(dot);
            safe.truncate(MAX_SAFE_NAME_LEN - ext.len());
            safe + &ext
        }
        _ => {
            safe.truncate(MAX_SAFE_NAME_LEN);
            safe
        }
    }
}

/// `{unix_millis}-{random}-{safe_name}`; concurrent uploads never collide.
pub fn unique_staging_name(safe_name: &str) -> String {
    let millis = Utc::now().timestamp_millis();
    let nonce: u32 = rand::rng().random_range(0..1_000_000_000);
    format!("{millis}-{nonce}-{safe_name}")
}

/// Lower-cased extension including the dot, or an empty string.
pub fn extension_of(name: &str) -> String {
    Path::new(name)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

/// Accept an upload when its MIME type *or* its extension is allowed.
pub fn validate_upload(
    mime: Option<&str>,
    file_name: &str,
    config: &ServiceConfig,
) -> Result<(), ConvertError> {
    let extension = extension_of(file_name);
    let mime = mime.unwrap_or("").trim().to_lowercase();

    let mime_ok = !mime.is_empty() && config.allowed_mime_types.iter().any(|m| *m == mime);
    let ext_ok = !extension.is_empty() && config.allowed_extensions.iter().any(|e| *e == extension);

    if mime_ok || ext_ok {
        Ok(())
    } else {
        warn!("Rejected upload '{}': type {} / {:?}", file_name, mime, extension);
        Err(ConvertError::UnsupportedFileType { extension, mime })
    }
}

/// Incrementally writes one upload to the staging directory.
pub struct StagingWriter {
    path: PathBuf,
    original_name: String,
    file: Option<tokio::fs::File>,
    written: u64,
    limit: u64,
    finished: bool,
}

impl StagingWriter {
    /// Create the staging directory if needed and open a uniquely named file.
    pub async fn create(
        staging_dir: &Path,
        declared_name: Option<&str>,
        limit: u64,
    ) -> Result<Self, ConvertError> {
        tokio::fs::create_dir_all(staging_dir)
            .await
            .map_err(|e| ConvertError::io(staging_dir, e))?;

        let decoded = decode_declared_name(declared_name.unwrap_or(DEFAULT_UPLOAD_NAME));
        let safe = sanitize_filename(&decoded);
        let dir = std::path::absolute(staging_dir).map_err(|e| ConvertError::io(staging_dir, e))?;
        let path = dir.join(unique_staging_name(&safe));

        let file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| ConvertError::io(&path, e))?;

        info!("Staging upload '{}' → {}", decoded, path.display());

        Ok(Self {
            path,
            original_name: safe,
            file: Some(file),
            written: 0,
            limit,
            finished: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Append a chunk, failing with `SizeExceeded` if the ceiling would be
    /// crossed. On failure the partial file is removed before returning.
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), ConvertError> {
        let next = self.written.saturating_add(chunk.len() as u64);
        if next > self.limit {
            warn!(
                "Upload {} exceeded {} bytes; aborting",
                self.path.display(),
                self.limit
            );
            self.discard().await;
            return Err(ConvertError::SizeExceeded {
                limit_bytes: self.limit,
            });
        }

        let Some(file) = self.file.as_mut() else {
            return Err(ConvertError::UploadFailed {
                reason: "staging file already closed".to_string(),
            });
        };
        if let Err(e) = file.write_all(chunk).await {
            self.discard().await;
            return Err(ConvertError::io(&self.path, e));
        }
        self.written = next;
        Ok(())
    }

    /// Flush and close the file, handing ownership to the caller.
    pub async fn finish(mut self) -> Result<StagedFile, ConvertError> {
        if let Some(mut file) = self.file.take() {
            if let Err(e) = file.flush().await {
                self.discard().await;
                return Err(ConvertError::io(&self.path, e));
            }
        }
        self.finished = true;
        debug!("Staged {} bytes at {}", self.written, self.path.display());
        Ok(StagedFile {
            path: self.path.clone(),
            original_name: self.original_name.clone(),
            byte_size: self.written,
            created_at: Utc::now(),
        })
    }

    /// Close and delete the partial file.
    pub async fn discard(&mut self) {
        self.file.take();
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => debug!("Removed partial upload {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove partial upload {}: {}", self.path.display(), e),
        }
        self.finished = true;
    }
}

impl Drop for StagingWriter {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.file.take();
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed abandoned upload {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove abandoned upload {}: {}", self.path.display(), e),
        }
    }
}

/// Stream a whole body into the staging directory (raw-body strategy).
pub async fn ingest_stream<S, B, E>(
    stream: S,
    declared_name: Option<&str>,
    staging_dir: &Path,
    limit: u64,
) -> Result<StagedFile, ConvertError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    let mut writer = StagingWriter::create(staging_dir, declared_name, limit).await?;
    let mut stream = std::pin::pin!(stream);

    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => writer.write_chunk(bytes.as_ref()).await?,
            Err(e) => {
                writer.discard().await;
                return Err(ConvertError::UploadFailed {
                    reason: e.to_string(),
                });
            }
        }
    }

    writer.finish().await
}
