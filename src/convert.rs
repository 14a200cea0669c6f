//! The conversion orchestrator.
//!
//! [`Converter::convert`] takes a [`StagedFile`] and runs the steps strictly
//! in order:
//!
//! ```text
//! preflight disk ─▶ invoke engine ─▶ resolve artifact ─▶ validate size ─▶ ConvertedPdf
//! ```
//!
//! Every path the request creates is registered with one [`CleanupGuard`]
//! as soon as it exists. On failure the guard runs before the error is
//! returned; on success it travels inside the [`ConvertedPdf`] and runs when
//! the caller finishes (or abandons) the stream. Either way the staged input
//! and the produced PDF are removed exactly once.

use crate::config::ServiceConfig;
use crate::error::ConvertError;
use crate::pipeline::cleanup::CleanupGuard;
use crate::pipeline::disk::{DiskSpaceProbe, DiskSpaceReport, SpaceCheck, SpaceProbe};
use crate::pipeline::ingest::StagedFile;
use crate::pipeline::invoke::{check_engine, Invoker};
use crate::pipeline::launcher::{select_launcher, Launcher};
use crate::pipeline::resolve;
use crate::stream::ConvertedPdf;
use chrono::Utc;
use rand::Rng;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Shared, cheaply cloneable conversion service.
#[derive(Clone)]
pub struct Converter {
    config: Arc<ServiceConfig>,
    probe: Arc<dyn SpaceProbe>,
    launcher: Arc<dyn Launcher>,
    invoker: Invoker,
}

impl Converter {
    /// Build a converter with the host's disk probe and launcher.
    pub fn new(config: ServiceConfig) -> Self {
        let launcher = select_launcher(&config);
        Self::with_parts(Arc::new(config), Arc::new(DiskSpaceProbe), launcher)
    }

    /// Build a converter from explicit collaborators.
    pub fn with_parts(
        config: Arc<ServiceConfig>,
        probe: Arc<dyn SpaceProbe>,
        launcher: Arc<dyn Launcher>,
    ) -> Self {
        let invoker = Invoker::new(
            Arc::clone(&launcher),
            config.conversion_timeout,
            Arc::clone(&config.progress_callback),
        );
        Self {
            config,
            probe,
            launcher,
            invoker,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn launcher_name(&self) -> &str {
        self.launcher.name()
    }

    /// Report free space where PDFs are written. Never fails.
    pub async fn disk_report(&self) -> DiskSpaceReport {
        let probe = Arc::clone(&self.probe);
        let dir = self.config.output_dir.clone();
        match tokio::task::spawn_blocking(move || probe.probe(&dir)).await {
            Ok(report) => report,
            Err(e) => DiskSpaceReport::unknown(
                &self.config.output_dir,
                format!("disk probe task failed: {e}"),
            ),
        }
    }

    /// Check there is room for `disk_space_factor × input_size` bytes.
    pub async fn preflight(&self, input_size: u64) -> Result<SpaceCheck, ConvertError> {
        let required = input_size.saturating_mul(self.config.disk_space_factor);
        let report = self.disk_report().await;
        let check = report.check(required);
        self.config.progress_callback.on_disk_check(&check);

        if let Some(w) = &check.warning {
            warn!("Disk space check: {}", w);
        }
        info!(
            "Disk space: {} free, {} required ({:?})",
            check.free_display(),
            check.required_display(),
            check.method
        );

        if !check.sufficient {
            return Err(ConvertError::InsufficientDiskSpace {
                free: check.free_display(),
                required: check.required_display(),
            });
        }
        Ok(check)
    }

    /// Run the engine's version command under `engine_check_timeout`.
    pub async fn check_engine(&self) -> Result<String, ConvertError> {
        check_engine(self.launcher.as_ref(), self.config.engine_check_timeout).await
    }

    /// Convert a staged upload into a streamable PDF.
    ///
    /// The staged file is owned from here on: it is deleted on every path,
    /// including failures.
    pub async fn convert(&self, staged: StagedFile) -> Result<ConvertedPdf, ConvertError> {
        let mut guard = CleanupGuard::new(Arc::clone(&self.config.progress_callback));
        guard.track_file(&staged.path);

        match self.convert_inner(&staged, &mut guard).await {
            Ok((file, path, size)) => Ok(ConvertedPdf::new(
                file,
                path,
                size,
                download_name(&staged.original_name),
                guard,
            )),
            Err(e) => {
                warn!("Conversion of '{}' failed: {}", staged.original_name, e);
                self.config.progress_callback.on_failure(e.kind(), &e.to_string());
                guard.run();
                Err(e)
            }
        }
    }

    async fn convert_inner(
        &self,
        staged: &StagedFile,
        guard: &mut CleanupGuard,
    ) -> Result<(tokio::fs::File, PathBuf, u64), ConvertError> {
        let start = Instant::now();
        info!(
            "Converting '{}' ({} bytes) with {}",
            staged.original_name,
            staged.byte_size,
            self.invoker.launcher_name()
        );

        // ── Step 1: Output directory ─────────────────────────────────────────
        let base = &self.config.output_dir;
        tokio::fs::create_dir_all(base)
            .await
            .map_err(|e| ConvertError::io(base, e))?;

        // ── Step 2: Preflight ────────────────────────────────────────────────
        self.preflight(staged.byte_size).await?;

        // ── Step 3: Per-request output directory ─────────────────────────────
        let out_dir = if self.config.isolate_output {
            let dir = std::path::absolute(base.join(job_dir_name()))
                .map_err(|e| ConvertError::io(base, e))?;
            tokio::fs::create_dir(&dir)
                .await
                .map_err(|e| ConvertError::io(&dir, e))?;
            guard.track_dir(&dir);
            dir
        } else {
            std::path::absolute(base).map_err(|e| ConvertError::io(base, e))?
        };
        debug!("Engine output directory: {}", out_dir.display());

        // ── Step 4: Invoke ───────────────────────────────────────────────────
        let outcome = self.invoker.run(&staged.path, &out_dir).await?;

        // ── Step 5: Resolve ──────────────────────────────────────────────────
        let pdf_path = resolve::resolve(&out_dir, &staged.stem(), &outcome.before, &outcome.after)
            .ok_or_else(|| ConvertError::ArtifactNotFound {
                output_dir: out_dir.clone(),
            })?;
        // Track before validating so a rejected artifact is still removed.
        guard.track_file(&pdf_path);

        // ── Step 6: Validate ─────────────────────────────────────────────────
        let (file, size) = open_non_empty(&pdf_path).await?;
        self.config
            .progress_callback
            .on_artifact_resolved(&pdf_path, size);
        info!(
            "Converted '{}' → {} ({} bytes) in {:.2}s",
            staged.original_name,
            pdf_path.display(),
            size,
            start.elapsed().as_secs_f64()
        );

        Ok((file, pdf_path, size))
    }
}

async fn open_non_empty(path: &Path) -> Result<(tokio::fs::File, u64), ConvertError> {
    let meta = match tokio::fs::metadata(path).await {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConvertError::ArtifactNotFound {
                output_dir: path.parent().map(Path::to_path_buf).unwrap_or_default(),
            })
        }
        Err(e) => return Err(ConvertError::io(path, e)),
    };
    if meta.len() == 0 {
        return Err(ConvertError::EmptyArtifact {
            path: path.to_path_buf(),
        });
    }
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| ConvertError::io(path, e))?;
    Ok((file, meta.len()))
}

fn job_dir_name() -> String {
    let millis = Utc::now().timestamp_millis();
    let nonce: u32 = rand::rng().random_range(0..1_000_000_000);
    format!("job-{millis}-{nonce}")
}

/// `<stem of the original name>.pdf`, or `converted.pdf` if there is none.
pub fn download_name(original_name: &str) -> String {
    match Path::new(original_name).file_stem() {
        Some(stem) if !stem.is_empty() => format!("{}.pdf", stem.to_string_lossy()),
        _ => "converted.pdf".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_name_swaps_extension() {
        assert_eq!(download_name("Meeting_Notes.docx"), "Meeting_Notes.pdf");
        assert_eq!(download_name("deck.v2.pptx"), "deck.v2.pdf");
        assert_eq!(download_name(""), "converted.pdf");
    }

    #[test]
    fn job_dirs_are_distinct() {
        assert_ne!(job_dir_name(), job_dir_name());
    }

    #[tokio::test]
    async fn empty_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("x.pdf");
        std::fs::write(&p, b"").unwrap();
        let err = open_non_empty(&p).await.unwrap_err();
        assert!(matches!(err, ConvertError::EmptyArtifact { .. }));

        let missing = dir.path().join("y.pdf");
        let err = open_non_empty(&missing).await.unwrap_err();
        assert!(matches!(err, ConvertError::ArtifactNotFound { .. }));
    }
}
