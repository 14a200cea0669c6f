//! Configuration for the conversion service.
//!
//! Every knob lives in [`ServiceConfig`], built via [`ServiceConfigBuilder`].
//! The config is shared read-only (behind an `Arc`) by all concurrent
//! requests; nothing in it is mutated after startup.

use crate::error::ConvertError;
use crate::progress::{NoopProgressCallback, ProgressCallback};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default upload ceiling: 100 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;

/// MIME types accepted on the multipart strategy.
pub const DEFAULT_ALLOWED_MIME_TYPES: &[&str] = &[
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/msword",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "application/octet-stream",
];

/// File extensions accepted on the multipart strategy (lower-case, dotted).
pub const DEFAULT_ALLOWED_EXTENSIONS: &[&str] =
    &[".docx", ".doc", ".xls", ".xlsx", ".ppt", ".pptx"];

/// Configuration for the conversion service.
///
/// # Example
/// ```rust
/// use office2pdf::{LauncherKind, ServiceConfig};
/// use std::time::Duration;
///
/// let config = ServiceConfig::builder()
///     .staging_dir("/var/tmp/office2pdf/uploads")
///     .output_dir("/var/tmp/office2pdf/converted")
///     .conversion_timeout(Duration::from_secs(90))
///     .launcher(LauncherKind::Soffice)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_upload_bytes, 100 * 1024 * 1024);
/// ```
#[derive(Clone)]
pub struct ServiceConfig {
    /// Where uploads are written before conversion. Default: `uploads`.
    pub staging_dir: PathBuf,

    /// Where the engine writes PDFs. Default: `converted`.
    ///
    /// With `isolate_output` each request gets its own subdirectory here.
    pub output_dir: PathBuf,

    /// Upload ceiling in bytes, enforced while streaming. Default: 100 MiB.
    pub max_upload_bytes: u64,

    /// Wall-clock bound on one engine invocation. Default: 120 s.
    pub conversion_timeout: Duration,

    /// End-to-end bound on one HTTP conversion request. Default: 10 min.
    pub request_timeout: Duration,

    /// Bound on the startup `--version` probe. Default: 15 s.
    pub engine_check_timeout: Duration,

    /// Free space required, as a multiple of the input size. Default: 2.
    pub disk_space_factor: u64,

    /// Give every conversion its own output subdirectory. Default: true.
    ///
    /// A shared directory lets two concurrent conversions of identically
    /// named inputs pick up each other's PDF.
    pub isolate_output: bool,

    /// How the engine is launched. Default: [`LauncherKind::Auto`].
    pub launcher: LauncherKind,

    /// Program used by the direct launcher. Default: `soffice`.
    pub soffice_program: String,

    /// Flatpak application id used by the sandboxed launcher.
    pub flatpak_app_id: String,

    /// Value of the engine's `--convert-to` argument. Default: `pdf`.
    pub convert_to: String,

    /// MIME allow-list for multipart uploads.
    pub allowed_mime_types: Vec<String>,

    /// Extension allow-list for multipart uploads.
    pub allowed_extensions: Vec<String>,

    /// Receives step events. Default: no-op.
    pub progress_callback: ProgressCallback,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            staging_dir: PathBuf::from("uploads"),
            output_dir: PathBuf::from("converted"),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            conversion_timeout: Duration::from_secs(120),
            request_timeout: Duration::from_secs(600),
            engine_check_timeout: Duration::from_secs(15),
            disk_space_factor: 2,
            isolate_output: true,
            launcher: LauncherKind::default(),
            soffice_program: "soffice".to_string(),
            flatpak_app_id: "org.libreoffice.LibreOffice".to_string(),
            convert_to: "pdf".to_string(),
            allowed_mime_types: DEFAULT_ALLOWED_MIME_TYPES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            progress_callback: Arc::new(NoopProgressCallback),
        }
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("staging_dir", &self.staging_dir)
            .field("output_dir", &self.output_dir)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("conversion_timeout", &self.conversion_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("disk_space_factor", &self.disk_space_factor)
            .field("isolate_output", &self.isolate_output)
            .field("launcher", &self.launcher)
            .field("soffice_program", &self.soffice_program)
            .field("flatpak_app_id", &self.flatpak_app_id)
            .field("convert_to", &self.convert_to)
            .field("progress_callback", &"<dyn ConversionProgressCallback>")
            .finish()
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.staging_dir = dir.into();
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn max_upload_bytes(mut self, bytes: u64) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    pub fn conversion_timeout(mut self, timeout: Duration) -> Self {
        self.config.conversion_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn engine_check_timeout(mut self, timeout: Duration) -> Self {
        self.config.engine_check_timeout = timeout;
        self
    }

    pub fn disk_space_factor(mut self, factor: u64) -> Self {
        self.config.disk_space_factor = factor;
        self
    }

    pub fn isolate_output(mut self, v: bool) -> Self {
        self.config.isolate_output = v;
        self
    }

    pub fn launcher(mut self, kind: LauncherKind) -> Self {
        self.config.launcher = kind;
        self
    }

    pub fn soffice_program(mut self, program: impl Into<String>) -> Self {
        self.config.soffice_program = program.into();
        self
    }

    pub fn flatpak_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.config.flatpak_app_id = app_id.into();
        self
    }

    pub fn convert_to(mut self, filter: impl Into<String>) -> Self {
        self.config.convert_to = filter.into();
        self
    }

    pub fn allowed_mime_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.allowed_mime_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Extensions are normalised to lower-case with a leading dot.
    pub fn allowed_extensions<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.allowed_extensions = exts
            .into_iter()
            .map(|e| {
                let e = e.into().to_lowercase();
                if e.starts_with('.') {
                    e
                } else {
                    format!(".{e}")
                }
            })
            .collect();
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = cb;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, ConvertError> {
        let c = &self.config;
        if c.max_upload_bytes == 0 {
            return Err(ConvertError::InvalidConfig(
                "max upload size must be > 0".into(),
            ));
        }
        if c.conversion_timeout.is_zero() || c.request_timeout.is_zero() {
            return Err(ConvertError::InvalidConfig(
                "timeouts must be > 0".into(),
            ));
        }
        if c.conversion_timeout > c.request_timeout {
            return Err(ConvertError::InvalidConfig(format!(
                "conversion timeout ({}s) must not exceed request timeout ({}s)",
                c.conversion_timeout.as_secs(),
                c.request_timeout.as_secs()
            )));
        }
        if c.disk_space_factor == 0 {
            return Err(ConvertError::InvalidConfig(
                "disk space factor must be ≥ 1".into(),
            ));
        }
        if c.staging_dir.as_os_str().is_empty() || c.output_dir.as_os_str().is_empty() {
            return Err(ConvertError::InvalidConfig(
                "staging and output directories must be set".into(),
            ));
        }
        if c.convert_to.trim().is_empty() {
            return Err(ConvertError::InvalidConfig(
                "convert-to filter must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Which engine launcher to use.
///
/// `Auto` picks once at startup from the host OS: Linux hosts run the
/// engine through its Flatpak sandbox, every other OS calls `soffice`
/// directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LauncherKind {
    /// Detect from the host platform. (default)
    #[default]
    Auto,
    /// `flatpak run <app-id> ...`
    Flatpak,
    /// `soffice ...`
    Soffice,
}

impl LauncherKind {
    /// Collapse `Auto` into a concrete kind for the given OS name
    /// (as reported by `std::env::consts::OS`).
    pub fn resolve_for(self, os: &str) -> LauncherKind {
        match self {
            LauncherKind::Auto if os == "linux" => LauncherKind::Flatpak,
            LauncherKind::Auto => LauncherKind::Soffice,
            concrete => concrete,
        }
    }
}

impl fmt::Display for LauncherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LauncherKind::Auto => "auto",
            LauncherKind::Flatpak => "flatpak",
            LauncherKind::Soffice => "soffice",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_limits() {
        let c = ServiceConfig::default();
        assert_eq!(c.max_upload_bytes, 100 * 1024 * 1024);
        assert_eq!(c.conversion_timeout, Duration::from_secs(120));
        assert_eq!(c.request_timeout, Duration::from_secs(600));
        assert_eq!(c.disk_space_factor, 2);
        assert!(c.isolate_output);
        assert!(c.allowed_extensions.contains(&".docx".to_string()));
    }

    #[test]
    fn builder_rejects_zero_limit() {
        let err = ServiceConfig::builder().max_upload_bytes(0).build();
        assert!(matches!(err, Err(ConvertError::InvalidConfig(_))));
    }

    #[test]
    fn builder_rejects_inverted_timeouts() {
        let err = ServiceConfig::builder()
            .conversion_timeout(Duration::from_secs(900))
            .request_timeout(Duration::from_secs(60))
            .build();
        assert!(matches!(err, Err(ConvertError::InvalidConfig(_))));
    }

    #[test]
    fn builder_normalises_extensions() {
        let c = ServiceConfig::builder()
            .allowed_extensions(["DOCX", ".Odt"])
            .build()
            .unwrap();
        assert_eq!(c.allowed_extensions, vec![".docx", ".odt"]);
    }

    #[test]
    fn auto_launcher_resolves_per_platform() {
        assert_eq!(LauncherKind::Auto.resolve_for("linux"), LauncherKind::Flatpak);
        assert_eq!(LauncherKind::Auto.resolve_for("windows"), LauncherKind::Soffice);
        assert_eq!(LauncherKind::Auto.resolve_for("macos"), LauncherKind::Soffice);
        assert_eq!(
            LauncherKind::Soffice.resolve_for("linux"),
            LauncherKind::Soffice
        );
    }

    #[test]
    fn debug_does_not_require_callback_debug() {
        let s = format!("{:?}", ServiceConfig::default());
        assert!(s.contains("ServiceConfig"));
        assert!(s.contains("<dyn ConversionProgressCallback>"));
    }
}
