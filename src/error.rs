//! Error types for the office2pdf library.
//!
//! Every failure a conversion request can hit is one variant of
//! [`ConvertError`]. The orchestrator catches them at its boundary, runs
//! cleanup, and hands exactly one classified error to the caller; the HTTP
//! layer turns it into a `{success: false, error}` envelope.
//!
//! Two failure classes never reach the caller as errors:
//!
//! * Disk-space probe failures degrade into an advisory
//!   [`crate::pipeline::disk::ResolutionMethod::Unknown`] report.
//! * [`ConvertError::CleanupFailure`] is logged and swallowed so it can never
//!   mask the primary error.

use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the office2pdf library.
#[derive(Debug, Error)]
pub enum ConvertError {
    // ── Upload errors ─────────────────────────────────────────────────────
    /// The upload grew past the configured ceiling while streaming.
    #[error("File exceeds the {limit_bytes}-byte upload limit; please upload a smaller file")]
    SizeExceeded { limit_bytes: u64 },

    /// Neither the MIME type nor the extension is on the allow-list.
    #[error("Unsupported file type: '{extension}' ({mime}); only doc, docx, xls, xlsx, ppt, pptx files are accepted")]
    UnsupportedFileType { extension: String, mime: String },

    /// The request carried no file part.
    #[error("No file uploaded or the file format is not supported")]
    MissingFile,

    /// Reading the request body failed mid-stream.
    #[error("Upload failed: {reason}")]
    UploadFailed { reason: String },

    // ── Preflight errors ──────────────────────────────────────────────────
    /// Not enough free space for the input and the produced PDF.
    #[error("Insufficient disk space. Available: {free}, required: {required}")]
    InsufficientDiskSpace { free: String, required: String },

    // ── Conversion errors ─────────────────────────────────────────────────
    /// The engine did not finish within the invocation bound.
    #[error("Conversion timed out after {secs}s ({launcher})")]
    ConversionTimeout { launcher: String, secs: u64 },

    /// The engine could not be spawned or exited unsuccessfully.
    #[error("{launcher} conversion failed: {detail}")]
    ConversionFailed { launcher: String, detail: String },

    /// The engine exited cleanly but no new PDF appeared.
    #[error("Converted PDF not found in '{output_dir}'")]
    ArtifactNotFound { output_dir: PathBuf },

    /// The resolved artifact exists but has no content.
    #[error("Converted file is empty: '{path}'")]
    EmptyArtifact { path: PathBuf },

    /// The whole request outlived its deadline.
    #[error("Request timed out after {secs}s")]
    RequestTimeout { secs: u64 },

    // ── Housekeeping ──────────────────────────────────────────────────────
    /// Deleting a staged or produced file failed. Logged, never escalated.
    #[error("Failed to clean up '{path}': {source}")]
    CleanupFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Staging or output directory I/O failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ConvertError {
    /// Whether the failure was caused by the request rather than the host.
    ///
    /// The HTTP layer answers these with 400 and everything else with 500.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ConvertError::SizeExceeded { .. }
                | ConvertError::UnsupportedFileType { .. }
                | ConvertError::MissingFile
                | ConvertError::UploadFailed { .. }
        )
    }

    /// Short machine-friendly label used in logs and progress events.
    pub fn kind(&self) -> &'static str {
        match self {
            ConvertError::SizeExceeded { .. } => "size_exceeded",
            ConvertError::UnsupportedFileType { .. } => "unsupported_file_type",
            ConvertError::MissingFile => "missing_file",
            ConvertError::UploadFailed { .. } => "upload_failed",
            ConvertError::InsufficientDiskSpace { .. } => "insufficient_disk_space",
            ConvertError::ConversionTimeout { .. } => "conversion_timeout",
            ConvertError::ConversionFailed { .. } => "conversion_failed",
            ConvertError::ArtifactNotFound { .. } => "artifact_not_found",
            ConvertError::EmptyArtifact { .. } => "empty_artifact",
            ConvertError::RequestTimeout { .. } => "request_timeout",
            ConvertError::CleanupFailure { .. } => "cleanup_failure",
            ConvertError::Io { .. } => "io",
            ConvertError::InvalidConfig(_) => "invalid_config",
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConvertError::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_space_display() {
        let e = ConvertError::InsufficientDiskSpace {
            free: "10 MB".into(),
            required: "100 MB".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("10 MB"), "got: {msg}");
        assert!(msg.contains("100 MB"), "got: {msg}");
    }

    #[test]
    fn timeout_display_names_launcher() {
        let e = ConvertError::ConversionTimeout {
            launcher: "soffice".into(),
            secs: 120,
        };
        assert!(e.to_string().contains("120s"));
        assert!(e.to_string().contains("soffice"));
    }

    #[test]
    fn failure_display_carries_engine_output() {
        let e = ConvertError::ConversionFailed {
            launcher: "flatpak".into(),
            detail: "exit status 1: source file could not be loaded".into(),
        };
        assert!(e.to_string().contains("could not be loaded"));
    }

    #[test]
    fn client_errors_are_classified() {
        assert!(ConvertError::SizeExceeded { limit_bytes: 1 }.is_client_error());
        assert!(ConvertError::MissingFile.is_client_error());
        assert!(!ConvertError::EmptyArtifact {
            path: PathBuf::from("x.pdf")
        }
        .is_client_error());
        assert!(!ConvertError::ConversionTimeout {
            launcher: "soffice".into(),
            secs: 1
        }
        .is_client_error());
    }

    #[test]
    fn kind_labels_are_stable() {
        assert_eq!(ConvertError::MissingFile.kind(), "missing_file");
        assert_eq!(
            ConvertError::ArtifactNotFound {
                output_dir: PathBuf::from("converted")
            }
            .kind(),
            "artifact_not_found"
        );
    }
}
