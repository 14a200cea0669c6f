//! Run the conversion engine once, under a timeout.
//!
//! An invocation walks a small state machine:
//!
//! ```text
//! Idle ─▶ SnapshotTaken ─▶ Invoking ─┬▶ Succeeded
//!                                     ├▶ TimedOut
//!                                     └▶ Failed
//! ```
//!
//! The output directory is listed before the engine starts so the resolver
//! can diff it afterwards. The child is spawned with `kill_on_drop`, so
//! dropping the invocation future (inner timeout or an outer request
//! deadline) kills the engine.

use crate::error::ConvertError;
use crate::pipeline::launcher::{describe, Launcher};
use crate::pipeline::resolve::DirectorySnapshot;
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Longest slice of engine output carried into an error message.
const MAX_DETAIL_CHARS: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationState {
    Idle,
    SnapshotTaken,
    Invoking,
    Succeeded,
    TimedOut,
    Failed,
}

impl InvocationState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            InvocationState::Succeeded | InvocationState::TimedOut | InvocationState::Failed
        )
    }
}

impl fmt::Display for InvocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InvocationState::Idle => "idle",
            InvocationState::SnapshotTaken => "snapshot_taken",
            InvocationState::Invoking => "invoking",
            InvocationState::Succeeded => "succeeded",
            InvocationState::TimedOut => "timed_out",
            InvocationState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What a successful invocation leaves behind for the resolver.
#[derive(Debug, Clone)]
pub struct InvocationOutcome {
    pub state: InvocationState,
    pub before: DirectorySnapshot,
    pub after: DirectorySnapshot,
    pub elapsed: Duration,
    /// Engine stdout, trimmed. Usually a `convert ... -> ...` line.
    pub stdout: String,
}

/// Drives one [`Launcher`] with a fixed timeout.
#[derive(Clone)]
pub struct Invoker {
    launcher: Arc<dyn Launcher>,
    timeout: Duration,
    progress: ProgressCallback,
}

impl Invoker {
    pub fn new(launcher: Arc<dyn Launcher>, timeout: Duration, progress: ProgressCallback) -> Self {
        Self {
            launcher,
            timeout,
            progress,
        }
    }

    pub fn launcher_name(&self) -> &str {
        self.launcher.name()
    }

    /// Convert `input` into `output_dir`.
    ///
    /// Returns the before/after listings on a zero exit status. A spawn
    /// error or non-zero exit is [`ConvertError::ConversionFailed`]; running
    /// past the timeout is [`ConvertError::ConversionTimeout`].
    pub async fn run(&self, input: &Path, output_dir: &Path) -> Result<InvocationOutcome, ConvertError> {
        let mut state = InvocationState::Idle;
        let name = self.launcher.name().to_string();

        let before = DirectorySnapshot::capture(output_dir)
            .await
            .map_err(|e| ConvertError::io(output_dir, e))?;
        transition(&mut state, InvocationState::SnapshotTaken, &name);
        debug!("{} entries in {} before conversion", before.len(), output_dir.display());

        let mut cmd = self.launcher.conversion_command(input, output_dir);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let command_line = describe(&cmd);
        info!("Executing: {}", command_line);
        self.progress.on_invoke(&name, &command_line);

        let start = Instant::now();
        let child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                transition(&mut state, InvocationState::Failed, &name);
                error!("Failed to start {}: {}", name, e);
                return Err(ConvertError::ConversionFailed {
                    launcher: name,
                    detail: format!("failed to start engine: {e}"),
                });
            }
        };
        transition(&mut state, InvocationState::Invoking, &name);

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                transition(&mut state, InvocationState::Failed, &name);
                return Err(ConvertError::ConversionFailed {
                    launcher: name,
                    detail: format!("failed waiting for engine: {e}"),
                });
            }
            Err(_) => {
                // The child was owned by the dropped future and is killed.
                transition(&mut state, InvocationState::TimedOut, &name);
                warn!(
                    "{} conversion of {} exceeded {}s",
                    name,
                    input.display(),
                    self.timeout.as_secs()
                );
                return Err(ConvertError::ConversionTimeout {
                    launcher: name,
                    secs: self.timeout.as_secs(),
                });
            }
        };
        let elapsed = start.elapsed();

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            transition(&mut state, InvocationState::Failed, &name);
            let detail = failure_detail(output.status, &stderr, &stdout);
            error!("{} conversion failed: {}", name, detail);
            return Err(ConvertError::ConversionFailed {
                launcher: name,
                detail,
            });
        }

        if !stderr.is_empty() {
            warn!("{} stderr: {}", name, stderr);
        }
        if !stdout.is_empty() {
            debug!("{} stdout: {}", name, stdout);
        }

        let after = DirectorySnapshot::capture(output_dir)
            .await
            .map_err(|e| ConvertError::io(output_dir, e))?;
        transition(&mut state, InvocationState::Succeeded, &name);
        info!(
            "{} finished in {:.2}s; {} entries in output",
            name,
            elapsed.as_secs_f64(),
            after.len()
        );

        Ok(InvocationOutcome {
            state,
            before,
            after,
            elapsed,
            stdout,
        })
    }
}

fn transition(state: &mut InvocationState, next: InvocationState, launcher: &str) {
    debug_assert!(!state.is_terminal(), "transition out of terminal state {state}");
    debug!("[{}] {} -> {}", launcher, state, next);
    *state = next;
}

fn failure_detail(status: std::process::ExitStatus, stderr: &str, stdout: &str) -> String {
    let code = match status.code() {
        Some(c) => format!("exit status {c}"),
        None => "terminated by signal".to_string(),
    };
    let text = if !stderr.is_empty() { stderr } else { stdout };
    if text.is_empty() {
        code
    } else {
        let clipped: String = text.chars().take(MAX_DETAIL_CHARS).collect();
        format!("{code}: {clipped}")
    }
}

/// Run the launcher's version command and return its first output line.
///
/// Used as a startup health check; callers decide whether failure is fatal.
pub async fn check_engine(launcher: &dyn Launcher, timeout: Duration) -> Result<String, ConvertError> {
    let mut cmd = launcher.version_command();
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let name = launcher.name().to_string();

    let child = cmd.spawn().map_err(|e| ConvertError::ConversionFailed {
        launcher: name.clone(),
        detail: format!("failed to start engine: {e}"),
    })?;
    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| ConvertError::ConversionTimeout {
            launcher: name.clone(),
            secs: timeout.as_secs(),
        })?
        .map_err(|e| ConvertError::ConversionFailed {
            launcher: name.clone(),
            detail: e.to_string(),
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !output.status.success() {
        return Err(ConvertError::ConversionFailed {
            launcher: name,
            detail: failure_detail(output.status, stderr.trim(), stdout.trim()),
        });
    }
    Ok(stdout.lines().next().unwrap_or_default().trim().to_string())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::progress::NoopProgressCallback;
    use tokio::process::Command;

    /// Runs `sh -c <script> sh <input> <output_dir>`.
    struct ShellLauncher {
        script: &'static str,
    }

    impl Launcher for ShellLauncher {
        fn name(&self) -> &str {
            "sh"
        }

        fn conversion_command(&self, input: &Path, output_dir: &Path) -> Command {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(self.script).arg("sh").arg(input).arg(output_dir);
            cmd
        }

        fn version_command(&self) -> Command {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(self.script);
            cmd
        }
    }

    fn invoker(script: &'static str, timeout: Duration) -> Invoker {
        Invoker::new(
            Arc::new(ShellLauncher { script }),
            timeout,
            Arc::new(NoopProgressCallback),
        )
    }

    #[tokio::test]
    async fn success_reports_new_listing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("old.pdf"), b"old").unwrap();
        let inv = invoker(
            r#"echo "%PDF-1.4" > "$2/$(basename "$1" .docx).pdf"; echo converted"#,
            Duration::from_secs(10),
        );
        let out = inv
            .run(Path::new("/tmp/report.docx"), dir.path())
            .await
            .unwrap();
        assert_eq!(out.state, InvocationState::Succeeded);
        assert_eq!(out.before.names(), &["old.pdf".to_string()]);
        assert!(out.after.contains("report.pdf"));
        assert_eq!(out.stdout, "converted");
    }

    #[tokio::test]
    async fn nonzero_exit_is_failure_with_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let inv = invoker(
            "echo 'source file could not be loaded' >&2; exit 3",
            Duration::from_secs(10),
        );
        let err = inv.run(Path::new("in.docx"), dir.path()).await.unwrap_err();
        match err {
            ConvertError::ConversionFailed { launcher, detail } => {
                assert_eq!(launcher, "sh");
                assert!(detail.contains("exit status 3"), "{detail}");
                assert!(detail.contains("could not be loaded"), "{detail}");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_engine_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let inv = invoker("sleep 5", Duration::from_millis(200));
        let start = Instant::now();
        let err = inv.run(Path::new("in.docx"), dir.path()).await.unwrap_err();
        assert!(matches!(err, ConvertError::ConversionTimeout { .. }));
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn missing_program_is_failure() {
        struct Missing;
        impl Launcher for Missing {
            fn name(&self) -> &str {
                "missing"
            }
            fn conversion_command(&self, _: &Path, _: &Path) -> Command {
                Command::new("/nonexistent/office2pdf-engine")
            }
            fn version_command(&self) -> Command {
                Command::new("/nonexistent/office2pdf-engine")
            }
        }
        let dir = tempfile::tempdir().unwrap();
        let inv = Invoker::new(
            Arc::new(Missing),
            Duration::from_secs(1),
            Arc::new(NoopProgressCallback),
        );
        let err = inv.run(Path::new("in.docx"), dir.path()).await.unwrap_err();
        assert_eq!(err.kind(), "conversion_failed");
        assert!(check_engine(&Missing, Duration::from_secs(1)).await.is_err());
    }

    #[tokio::test]
    async fn check_engine_returns_first_line() {
        let l = ShellLauncher {
            script: "echo 'LibreOffice 7.6.4.1'; echo build",
        };
        let v = check_engine(&l, Duration::from_secs(5)).await.unwrap();
        assert_eq!(v, "LibreOffice 7.6.4.1");
    }

    #[test]
    fn detail_prefers_stderr_and_clips() {
        use std::os::unix::process::ExitStatusExt;
        let status = std::process::ExitStatus::from_raw(1 << 8);
        assert_eq!(failure_detail(status, "bad", "ignored"), "exit status 1: bad");
        assert_eq!(failure_detail(status, "", "out"), "exit status 1: out");
        assert_eq!(failure_detail(status, "", ""), "exit status 1");
        let long = "x".repeat(MAX_DETAIL_CHARS + 50);
        assert_eq!(
            failure_detail(status, &long, "").len(),
            "exit status 1: ".len() + MAX_DETAIL_CHARS
        );
    }
}
