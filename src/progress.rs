//! Progress-callback trait for per-request conversion events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ServiceConfigBuilder::progress_callback`] to observe each
//! step of a conversion without depending on where logs are written. The
//! pipeline also logs every step through `tracing`; the callback is for hosts
//! that want structured events (metrics, audit records, tests).
//!
//! # Example
//!
//! ```rust
//! use office2pdf::{ConversionProgressCallback, ServiceConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     cleaned: Arc<AtomicUsize>,
//! }
//!
//! impl ConversionProgressCallback for CountingCallback {
//!     fn on_cleanup(&self, path: &std::path::Path) {
//!         self.cleaned.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("removed {}", path.display());
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     cleaned: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = ServiceConfig::builder()
//!     .progress_callback(counter as Arc<dyn ConversionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::pipeline::disk::SpaceCheck;
use std::path::Path;
use std::sync::Arc;

/// Called by the pipeline as a request moves through its steps.
///
/// Implementations must be `Send + Sync`: concurrent requests call into the
/// same instance from different tasks. All methods default to no-ops.
pub trait ConversionProgressCallback: Send + Sync {
    /// An upload finished streaming into the staging directory.
    fn on_upload_staged(&self, original_name: &str, byte_size: u64) {
        let _ = (original_name, byte_size);
    }

    /// The disk-space preflight completed.
    fn on_disk_check(&self, check: &SpaceCheck) {
        let _ = check;
    }

    /// The engine is about to be spawned with this command line.
    fn on_invoke(&self, launcher: &str, command_line: &str) {
        let _ = (launcher, command_line);
    }

    /// The produced PDF was identified.
    fn on_artifact_resolved(&self, path: &Path, size: u64) {
        let _ = (path, size);
    }

    /// A staged or produced file was removed (or was already gone).
    fn on_cleanup(&self, path: &Path) {
        let _ = path;
    }

    /// The request failed with a classified error.
    fn on_failure(&self, kind: &str, message: &str) {
        let _ = (kind, message);
    }
}

/// A no-op implementation for callers that don't need events.
///
/// This is the default when no callback is configured.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ServiceConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;
