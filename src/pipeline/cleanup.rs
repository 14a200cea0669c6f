//! Exactly-once removal of staged inputs and produced PDFs.
//!
//! Deletion is idempotent: a path that is already gone counts as cleaned.
//! Any other failure is logged as [`ConvertError::CleanupFailure`] and then
//! dropped, so it can never replace the error (or the PDF) the caller is
//! actually waiting for.

use crate::error::ConvertError;
use crate::progress::ProgressCallback;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Remove one file. Returns `Ok(false)` if it did not exist.
pub fn cleanup_file(path: &Path) -> Result<bool, ConvertError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(source) => Err(ConvertError::CleanupFailure {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Remove a directory and everything in it. Returns `Ok(false)` if absent.
pub fn cleanup_dir(path: &Path) -> Result<bool, ConvertError> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(source) => Err(ConvertError::CleanupFailure {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Owns every path a request created and deletes them once.
///
/// Runs on [`CleanupGuard::run`] or, failing that, on drop: whichever way a
/// request ends (success, classified error, cancelled future, client
/// disconnect) the files go away.
pub struct CleanupGuard {
    files: Vec<PathBuf>,
    dirs: Vec<PathBuf>,
    progress: ProgressCallback,
    done: bool,
}

impl CleanupGuard {
    pub fn new(progress: ProgressCallback) -> Self {
        Self {
            files: Vec::new(),
            dirs: Vec::new(),
            progress,
            done: false,
        }
    }

    pub fn track_file(&mut self, path: impl Into<PathBuf>) {
        self.files.push(path.into());
    }

    /// Directories are removed after files, recursively.
    pub fn track_dir(&mut self, path: impl Into<PathBuf>) {
        self.dirs.push(path.into());
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Delete everything tracked. Later calls do nothing.
    pub fn run(&mut self) {
        if self.done {
            return;
        }
        self.done = true;

        for path in self.files.drain(..) {
            report(&self.progress, &path, cleanup_file(&path));
        }
        for path in self.dirs.drain(..) {
            report(&self.progress, &path, cleanup_dir(&path));
        }
    }
}

fn report(progress: &ProgressCallback, path: &Path, result: Result<bool, ConvertError>) {
    match result {
        Ok(true) => {
            debug!("Cleaned up {}", path.display());
            progress.on_cleanup(path);
        }
        Ok(false) => {
            debug!("Already gone: {}", path.display());
            progress.on_cleanup(path);
        }
        Err(e) => warn!("{}", e),
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        self.run();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{ConversionProgressCallback, NoopProgressCallback};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn cleanup_file_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.docx");
        std::fs::write(&path, b"x").unwrap();

        assert!(cleanup_file(&path).unwrap());
        assert!(!cleanup_file(&path).unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn cleanup_dir_removes_contents() {
        let dir = tempfile::tempdir().unwrap();
        let job = dir.path().join("job");
        std::fs::create_dir(&job).unwrap();
        std::fs::write(job.join("out.pdf"), b"%PDF").unwrap();

        assert!(cleanup_dir(&job).unwrap());
        assert!(!job.exists());
        assert!(!cleanup_dir(&job).unwrap());
    }

    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl ConversionProgressCallback for Counter {
        fn on_cleanup(&self, _path: &Path) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn guard_runs_once_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.docx");
        let job = dir.path().join("job");
        std::fs::write(&input, b"x").unwrap();
        std::fs::create_dir(&job).unwrap();

        let counter = Arc::new(Counter::default());
        {
            let mut guard = CleanupGuard::new(counter.clone());
            guard.track_file(&input);
            guard.track_dir(&job);
            guard.run();
            assert!(guard.is_done());
        }
        assert!(!input.exists());
        assert!(!job.exists());
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn guard_tolerates_missing_paths() {
        let dir = tempfile::tempdir().unwrap();
        let mut guard = CleanupGuard::new(Arc::new(NoopProgressCallback));
        guard.track_file(dir.path().join("never-created.pdf"));
        guard.run();
        guard.run();
    }
}
