//! # office2pdf
//!
//! Convert uploaded office documents (doc, docx, xls, xlsx, ppt, pptx) to PDF
//! by driving a headless LibreOffice, and serve the result over HTTP.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload
//!  │
//!  ├─ 1. Ingest    stream into the staging dir under a size ceiling
//!  ├─ 2. Preflight free space ≥ 2 × input size (statvfs → df/wmic → unknown)
//!  ├─ 3. Invoke    flatpak / soffice --headless --convert-to pdf, with timeout
//!  ├─ 4. Resolve   diff the output dir, exact name → similar name → any PDF
//!  ├─ 5. Validate  the PDF exists and is non-empty
//!  └─ 6. Stream    hand the bytes to the caller, then delete input and PDF
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use office2pdf::{server, Converter, ServiceConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServiceConfig::builder()
//!         .staging_dir("uploads")
//!         .output_dir("converted")
//!         .build()?;
//!     let converter = Converter::new(config);
//!     server::serve(converter, "0.0.0.0:3001".parse()?).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `office2pdf` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when embedding the router in another service:
//! ```toml
//! office2pdf = { version = "0.2", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod server;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{LauncherKind, ServiceConfig, ServiceConfigBuilder};
pub use convert::Converter;
pub use error::ConvertError;
pub use pipeline::disk::{DiskSpaceProbe, DiskSpaceReport, SpaceCheck, SpaceProbe};
pub use pipeline::ingest::StagedFile;
pub use pipeline::launcher::{FlatpakLauncher, Launcher, SofficeLauncher};
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use stream::ConvertedPdf;
