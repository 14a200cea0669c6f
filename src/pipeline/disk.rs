//! Disk-space preflight: how much room is left where the PDFs land?
//!
//! ## Layered resolution
//!
//! 1. **Native**: `statvfs(2)` through `nix` on Unix hosts.
//! 2. **External command**: `df -P -k` on POSIX, `wmic logicaldisk` on
//!    Windows, with platform-specific output parsing.
//! 3. **Unknown**: every size field is `None` and a warning explains why.
//!
//! The probe never fails. An `Unknown` report is advisory: [`DiskSpaceReport::check`]
//! treats it as "sufficient, with a warning" so a host without `df` can still
//! convert documents.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};

/// How a [`DiskSpaceReport`] was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    /// Filesystem statistics syscall.
    Native,
    /// `df` / `wmic` output.
    ExternalCommand,
    /// Nothing worked; sizes are unknown.
    Unknown,
}

/// Storage figures for the filesystem holding `path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskSpaceReport {
    pub path: PathBuf,
    pub total_bytes: Option<u64>,
    pub free_bytes: Option<u64>,
    pub used_bytes: Option<u64>,
    /// `used / total * 100`, rounded to two decimals.
    pub usage_percentage: Option<f64>,
    pub method: ResolutionMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl DiskSpaceReport {
    /// Build a report from raw figures; `used` is derived.
    pub fn from_totals(path: &Path, total: u64, free: u64, method: ResolutionMethod) -> Self {
        let used = total.saturating_sub(free);
        Self {
            path: path.to_path_buf(),
            total_bytes: Some(total),
            free_bytes: Some(free),
            used_bytes: Some(used),
            usage_percentage: Some(usage_percentage(used, total)),
            method,
            warning: None,
        }
    }

    /// The degraded report returned when no strategy worked.
    pub fn unknown(path: &Path, warning: impl Into<String>) -> Self {
        Self {
            path: path.to_path_buf(),
            total_bytes: None,
            free_bytes: None,
            used_bytes: None,
            usage_percentage: None,
            method: ResolutionMethod::Unknown,
            warning: Some(warning.into()),
        }
    }

    /// Compare the free space against a requirement.
    pub fn check(&self, required_bytes: u64) -> SpaceCheck {
        match (self.method, self.free_bytes) {
            (ResolutionMethod::Unknown, _) | (_, None) => SpaceCheck {
                sufficient: true,
                required_bytes,
                free_bytes: None,
                deficit_bytes: 0,
                method: self.method,
                warning: Some(
                    self.warning
                        .clone()
                        .unwrap_or_else(|| "Disk space could not be determined".to_string()),
                ),
            },
            (method, Some(free)) => SpaceCheck {
                sufficient: free >= required_bytes,
                required_bytes,
                free_bytes: Some(free),
                deficit_bytes: required_bytes.saturating_sub(free),
                method,
                warning: self.warning.clone(),
            },
        }
    }
}

/// Outcome of checking a [`DiskSpaceReport`] against a requirement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpaceCheck {
    pub sufficient: bool,
    pub required_bytes: u64,
    pub free_bytes: Option<u64>,
    /// Zero when sufficient.
    pub deficit_bytes: u64,
    pub method: ResolutionMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl SpaceCheck {
    pub fn free_display(&self) -> String {
        self.free_bytes
            .map(format_bytes)
            .unwrap_or_else(|| "N/A".to_string())
    }

    pub fn required_display(&self) -> String {
        format_bytes(self.required_bytes)
    }
}

/// Anything that can report disk space for a path.
///
/// The orchestrator holds an `Arc<dyn SpaceProbe>` so tests can substitute
/// fixed figures. Implementations may block; callers run them on the
/// blocking pool.
pub trait SpaceProbe: Send + Sync {
    fn probe(&self, path: &Path) -> DiskSpaceReport;
}

/// The layered native → command → unknown probe.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiskSpaceProbe;

impl SpaceProbe for DiskSpaceProbe {
    fn probe(&self, path: &Path) -> DiskSpaceReport {
        match probe_native(path) {
            Some(report) => return report,
            None => debug!("statvfs unavailable for {}, trying disk-usage command", path.display()),
        }

        match probe_command(path) {
            Ok(report) => report,
            Err(reason) => {
                warn!("Disk-usage command failed for {}: {}", path.display(), reason);
                DiskSpaceReport::unknown(
                    path,
                    format!("Could not determine disk space ({reason}); check system permissions"),
                )
            }
        }
    }
}

#[cfg(unix)]
fn probe_native(path: &Path) -> Option<DiskSpaceReport> {
    let stats = match nix::sys::statvfs::statvfs(path) {
        Ok(s) => s,
        Err(e) => {
            debug!("statvfs({}) failed: {}", path.display(), e);
            return None;
        }
    };
    // Field widths differ between platforms (u32 on macOS, u64 on Linux).
    #[allow(clippy::unnecessary_cast)]
    let unit = stats.fragment_size() as u64;
    #[allow(clippy::unnecessary_cast)]
    let total = (stats.blocks() as u64).saturating_mul(unit);
    #[allow(clippy::unnecessary_cast)]
    let free = (stats.blocks_available() as u64).saturating_mul(unit);
    if total == 0 {
        return None;
    }
    Some(DiskSpaceReport::from_totals(
        path,
        total,
        free,
        ResolutionMethod::Native,
    ))
}

#[cfg(not(unix))]
fn probe_native(_path: &Path) -> Option<DiskSpaceReport> {
    None
}

fn probe_command(path: &Path) -> Result<DiskSpaceReport, String> {
    if cfg!(windows) {
        let drive = drive_letter(path).ok_or_else(|| "no drive letter in path".to_string())?;
        let output = Command::new("wmic")
            .args([
                "logicaldisk",
                "where",
                &format!("DeviceID='{drive}'"),
                "get",
                "Size,FreeSpace",
            ])
            .output()
            .map_err(|e| format!("wmic: {e}"))?;
        if !output.status.success() {
            return Err(format!("wmic exited with {}", output.status));
        }
        let (total, free) = parse_windows_wmic(&String::from_utf8_lossy(&output.stdout))
            .ok_or_else(|| "unexpected wmic output".to_string())?;
        Ok(DiskSpaceReport::from_totals(
            path,
            total,
            free,
            ResolutionMethod::ExternalCommand,
        ))
    } else {
        let output = Command::new("df")
            .arg("-P")
            .arg("-k")
            .arg(path)
            .output()
            .map_err(|e| format!("df: {e}"))?;
        if !output.status.success() {
            return Err(format!(
                "df exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        let (total, used, free) = parse_unix_df(&String::from_utf8_lossy(&output.stdout))
            .ok_or_else(|| "unexpected df output".to_string())?;
        let mut report =
            DiskSpaceReport::from_totals(path, total, free, ResolutionMethod::ExternalCommand);
        // df reports used directly; it can differ from total - free by the
        // reserved blocks.
        report.used_bytes = Some(used);
        report.usage_percentage = Some(usage_percentage(used, total));
        Ok(report)
    }
}

/// Parse `df -k` output into `(total, used, free)` bytes.
///
/// The data line's columns are `filesystem 1K-blocks used available ...`.
/// Long device names may wrap the data onto a second line, so every line
/// after the header is joined before splitting.
pub fn parse_unix_df(output: &str) -> Option<(u64, u64, u64)> {
    let mut lines = output.trim().lines();
    lines.next()?;
    let data: Vec<&str> = lines.flat_map(str::split_whitespace).collect();
    if data.len() < 4 {
        return None;
    }
    let kib = |s: &str| s.parse::<u64>().ok().map(|v| v.saturating_mul(1024));
    Some((kib(data[1])?, kib(data[2])?, kib(data[3])?))
}

/// Parse `wmic logicaldisk get Size,FreeSpace` output into `(total, free)`.
///
/// wmic prints columns alphabetically, so the value line is `FreeSpace Size`.
pub fn parse_windows_wmic(output: &str) -> Option<(u64, u64)> {
    let line = output
        .trim()
        .lines()
        .skip(1)
        .find(|l| !l.trim().is_empty())?;
    let mut cols = line.split_whitespace();
    let free = cols.next()?.parse::<u64>().ok()?;
    let total = cols.next()?.parse::<u64>().ok()?;
    Some((total, free))
}

fn drive_letter(path: &Path) -> Option<String> {
    let absolute = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let s = absolute.to_string_lossy();
    // canonicalize yields `\\?\C:\...` on Windows.
    let s = s.trim_start_matches(r"\\?\");
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(letter), Some(':')) if letter.is_ascii_alphabetic() => Some(format!("{letter}:")),
        _ => None,
    }
}

fn usage_percentage(used: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    ((used as f64 / total as f64) * 100.0 * 100.0).round() / 100.0
}

/// Render a byte count with 1024-based units: `0 Bytes`, `1.5 KB`, `100 MB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["Bytes", "KB", "MB", "GB", "TB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = (value * 100.0).round() / 100.0;
    let mut text = format!("{rounded:.2}");
    while text.ends_with('0') {
        text.pop();
    }
    if text.ends_with('.') {
        text.pop();
    }
    format!("{} {}", text, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1024 * 1024;

    #[test]
    fn format_bytes_trims_trailing_zeros() {
        assert_eq!(format_bytes(0), "0 Bytes");
        assert_eq!(format_bytes(512), "512 Bytes");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(100 * MB), "100 MB");
        assert_eq!(format_bytes(5 * 1024 * MB / 4), "1.25 GB");
    }

    #[test]
    fn parse_df_single_line() {
        let out = "Filesystem     1024-blocks      Used Available Capacity Mounted on\n\
                   /dev/sda1         41152736  20576368  18462832      53% /\n";
        let (total, used, free) = parse_unix_df(out).unwrap();
        assert_eq!(total, 41_152_736 * 1024);
        assert_eq!(used, 20_576_368 * 1024);
        assert_eq!(free, 18_462_832 * 1024);
    }

    #[test]
    fn parse_df_wrapped_device_name() {
        let out = "Filesystem 1K-blocks Used Available Use% Mounted on\n\
                   /dev/mapper/very-long-volume-group-name\n\
                   1000 400 600 40% /data\n";
        assert_eq!(parse_unix_df(out), Some((1000 * 1024, 400 * 1024, 600 * 1024)));
    }

    #[test]
    fn parse_df_rejects_garbage() {
        assert_eq!(parse_unix_df(""), None);
        assert_eq!(parse_unix_df("Filesystem\n"), None);
        assert_eq!(parse_unix_df("h\nfs a b c\n"), None);
    }

    #[test]
    fn parse_wmic_output() {
        let out = "FreeSpace     Size\r\n\r\n52428800000   256000000000  \r\n\r\n";
        assert_eq!(
            parse_windows_wmic(out),
            Some((256_000_000_000, 52_428_800_000))
        );
        assert_eq!(parse_windows_wmic("FreeSpace Size\n"), None);
    }

    #[test]
    fn report_derives_used_and_percentage() {
        let r = DiskSpaceReport::from_totals(
            Path::new("/"),
            300,
            100,
            ResolutionMethod::Native,
        );
        assert_eq!(r.used_bytes, Some(200));
        assert_eq!(r.usage_percentage, Some(66.67));
    }

    #[test]
    fn check_sufficient_and_deficit() {
        let r = DiskSpaceReport::from_totals(
            Path::new("/"),
            1000 * MB,
            200 * MB,
            ResolutionMethod::Native,
        );
        let ok = r.check(100 * MB);
        assert!(ok.sufficient);
        assert_eq!(ok.deficit_bytes, 0);

        let short = r.check(300 * MB);
        assert!(!short.sufficient);
        assert_eq!(short.deficit_bytes, 100 * MB);
        assert_eq!(short.free_display(), "200 MB");
        assert_eq!(short.required_display(), "300 MB");
    }

    #[test]
    fn unknown_report_is_advisory() {
        let r = DiskSpaceReport::unknown(Path::new("/nowhere"), "no df");
        assert_eq!(r.free_bytes, None);
        let c = r.check(u64::MAX);
        assert!(c.sufficient);
        assert_eq!(c.free_display(), "N/A");
        assert_eq!(c.warning.as_deref(), Some("no df"));
    }

    #[test]
    fn probe_never_fails_on_missing_path() {
        let r = DiskSpaceProbe.probe(Path::new("/definitely/not/a/real/dir"));
        // Whatever layer answered, the report is well-formed.
        if r.method == ResolutionMethod::Unknown {
            assert!(r.warning.is_some());
            assert!(r.total_bytes.is_none());
        } else {
            assert!(r.total_bytes.is_some());
        }
    }

    #[cfg(unix)]
    #[test]
    fn native_probe_reports_temp_dir() {
        let dir = tempfile::tempdir().unwrap();
        let r = DiskSpaceProbe.probe(dir.path());
        assert_eq!(r.method, ResolutionMethod::Native);
        let total = r.total_bytes.unwrap();
        let free = r.free_bytes.unwrap();
        assert!(total >= free);
        assert!(r.check(0).sufficient);
        assert!(!r.check(total.saturating_add(1)).sufficient);
    }
}
