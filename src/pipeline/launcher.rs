//! Engine launchers: turn `(input, output_dir)` into a concrete command.
//!
//! LibreOffice is installed differently per platform. Linux hosts usually
//! run it from its Flatpak sandbox; Windows and macOS call `soffice`
//! directly. Each form is one [`Launcher`] implementation and the choice is
//! made once, at startup, by [`select_launcher`]. The invoker never branches
//! on the OS itself.
//!
//! Both launchers pass the same semantic arguments:
//!
//! ```text
//! --headless --convert-to pdf --outdir <output_dir> <input>
//! ```

use crate::config::{LauncherKind, ServiceConfig};
use std::path::Path;
use std::sync::Arc;
use tokio::process::Command;
use tracing::info;

/// Builds the command lines used to drive the conversion engine.
pub trait Launcher: Send + Sync {
    /// Short name used in logs and error messages.
    fn name(&self) -> &str;

    /// The command converting `input` into a PDF inside `output_dir`.
    fn conversion_command(&self, input: &Path, output_dir: &Path) -> Command;

    /// The command printing the engine version, used by the startup check.
    fn version_command(&self) -> Command;
}

/// Runs the engine through `flatpak run <app-id>`.
#[derive(Debug, Clone)]
pub struct FlatpakLauncher {
    pub app_id: String,
    pub convert_to: String,
}

impl Launcher for FlatpakLauncher {
    fn name(&self) -> &str {
        "flatpak"
    }

    fn conversion_command(&self, input: &Path, output_dir: &Path) -> Command {
        let mut cmd = Command::new("flatpak");
        cmd.arg("run").arg(&self.app_id);
        push_conversion_args(&mut cmd, &self.convert_to, input, output_dir);
        cmd
    }

    fn version_command(&self) -> Command {
        let mut cmd = Command::new("flatpak");
        cmd.arg("run").arg(&self.app_id).arg("--version");
        cmd
    }
}

/// Runs the engine's own command-line entry point.
#[derive(Debug, Clone)]
pub struct SofficeLauncher {
    pub program: String,
    pub convert_to: String,
}

impl Launcher for SofficeLauncher {
    fn name(&self) -> &str {
        "soffice"
    }

    fn conversion_command(&self, input: &Path, output_dir: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        push_conversion_args(&mut cmd, &self.convert_to, input, output_dir);
        cmd
    }

    fn version_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--version");
        cmd
    }
}

fn push_conversion_args(cmd: &mut Command, convert_to: &str, input: &Path, output_dir: &Path) {
    cmd.arg("--headless")
        .arg("--convert-to")
        .arg(convert_to)
        .arg("--outdir")
        .arg(output_dir)
        .arg(input);
}

/// Pick the launcher for this host according to the configuration.
pub fn select_launcher(config: &ServiceConfig) -> Arc<dyn Launcher> {
    let kind = config.launcher.resolve_for(std::env::consts::OS);
    info!(
        "Using {} launcher (configured: {}, os: {})",
        kind,
        config.launcher,
        std::env::consts::OS
    );
    match kind {
        LauncherKind::Flatpak => Arc::new(FlatpakLauncher {
            app_id: config.flatpak_app_id.clone(),
            convert_to: config.convert_to.clone(),
        }),
        LauncherKind::Soffice | LauncherKind::Auto => Arc::new(SofficeLauncher {
            program: config.soffice_program.clone(),
            convert_to: config.convert_to.clone(),
        }),
    }
}

/// Render a command as a single shell-like line for logging.
pub fn describe(cmd: &Command) -> String {
    let std_cmd = cmd.as_std();
    let mut parts = vec![std_cmd.get_program().to_string_lossy().into_owned()];
    parts.extend(std_cmd.get_args().map(|a| {
        let a = a.to_string_lossy();
        if a.contains(' ') {
            format!("\"{a}\"")
        } else {
            a.into_owned()
        }
    }));
    parts.join(" ")
}
