//! CLI binary for office2pdf.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ServiceConfig`, installs the log sinks and serves HTTP.

use anyhow::{Context, Result};
use clap::Parser;
use office2pdf::{server, Converter, LauncherKind, ServiceConfig};
use std::fs::OpenOptions;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const AFTER_HELP: &str = r#"EXAMPLES:
  # Serve on the default port, engine picked from the host OS
  office2pdf

  # Force the direct soffice launcher and log to a file as well
  office2pdf --launcher soffice --log-file /var/log/office2pdf.log

  # Convert a document (multipart)
  curl -F "file=@Meeting Notes.docx" -o notes.pdf \
       http://localhost:3001/api/convert-docx-to-pdf

  # Convert a document (raw body)
  curl -H "Content-Type: application/octet-stream" \
       -H "X-File-Name: report.docx" --data-binary @report.docx \
       -o report.pdf http://localhost:3001/api/convert-docx-to-pdf

ENDPOINTS:
  POST /api/convert-docx-to-pdf   upload a document, receive the PDF
  POST /api/test-convert          upload check, no conversion
  GET  /api/info                  service description
  GET  /health                    liveness and disk report

LAUNCHERS:
  auto      flatpak on Linux, soffice elsewhere (default)
  flatpak   flatpak run org.libreoffice.LibreOffice --headless ...
  soffice   soffice --headless ...
"#;

/// Convert office documents to PDF over HTTP using headless LibreOffice.
#[derive(Parser, Debug)]
#[command(
    name = "office2pdf",
    version,
    about = "Convert office documents to PDF over HTTP using headless LibreOffice",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Address to bind.
    #[arg(long, env = "OFFICE2PDF_HOST", default_value = "0.0.0.0")]
    host: IpAddr,

    /// Port to listen on.
    #[arg(short, long, env = "OFFICE2PDF_PORT", default_value_t = 3001)]
    port: u16,

    /// Directory uploads are staged in.
    #[arg(long, env = "OFFICE2PDF_STAGING_DIR", default_value = "uploads")]
    staging_dir: PathBuf,

    /// Directory the engine writes PDFs to.
    #[arg(long, env = "OFFICE2PDF_OUTPUT_DIR", default_value = "converted")]
    output_dir: PathBuf,

    /// Upload ceiling in MiB.
    #[arg(long, env = "OFFICE2PDF_MAX_UPLOAD_MB", default_value_t = 100)]
    max_upload_mb: u64,

    /// Engine timeout per conversion, in seconds.
    #[arg(long, env = "OFFICE2PDF_CONVERSION_TIMEOUT", default_value_t = 120)]
    conversion_timeout: u64,

    /// End-to-end timeout per request, in seconds.
    #[arg(long, env = "OFFICE2PDF_REQUEST_TIMEOUT", default_value_t = 600)]
    request_timeout: u64,

    /// Free space required as a multiple of the input size.
    #[arg(long, env = "OFFICE2PDF_DISK_FACTOR", default_value_t = 2)]
    disk_factor: u64,

    /// Write every PDF into the shared output directory instead of a
    /// per-request subdirectory.
    #[arg(long, env = "OFFICE2PDF_SHARED_OUTPUT")]
    shared_output: bool,

    /// How to launch the engine.
    #[arg(long, env = "OFFICE2PDF_LAUNCHER", value_enum, default_value = "auto")]
    launcher: LauncherArg,

    /// Program used by the soffice launcher.
    #[arg(long, env = "OFFICE2PDF_SOFFICE", default_value = "soffice")]
    soffice_program: String,

    /// Flatpak application id used by the flatpak launcher.
    #[arg(
        long,
        env = "OFFICE2PDF_FLATPAK_APP",
        default_value = "org.libreoffice.LibreOffice"
    )]
    flatpak_app: String,

    /// Also append logs to this file (no colours).
    #[arg(long, env = "OFFICE2PDF_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Check the engine and exit.
    #[arg(long)]
    check_engine: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "OFFICE2PDF_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "OFFICE2PDF_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum LauncherArg {
    Auto,
    Flatpak,
    Soffice,
}

impl From<LauncherArg> for LauncherKind {
    fn from(v: LauncherArg) -> Self {
        match v {
            LauncherArg::Auto => LauncherKind::Auto,
            LauncherArg::Flatpak => LauncherKind::Flatpak,
            LauncherArg::Soffice => LauncherKind::Soffice,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let default_level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{default_level},tower_http=info")));

    let file_layer = match &cli.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .init();

    // ── Configuration ────────────────────────────────────────────────────
    let config = ServiceConfig::builder()
        .staging_dir(&cli.staging_dir)
        .output_dir(&cli.output_dir)
        .max_upload_bytes(cli.max_upload_mb.saturating_mul(1024 * 1024))
        .conversion_timeout(Duration::from_secs(cli.conversion_timeout))
        .request_timeout(Duration::from_secs(cli.request_timeout))
        .disk_space_factor(cli.disk_factor)
        .isolate_output(!cli.shared_output)
        .launcher(cli.launcher.into())
        .soffice_program(cli.soffice_program.clone())
        .flatpak_app_id(cli.flatpak_app.clone())
        .build()
        .context("Invalid configuration")?;

    for dir in [&config.staging_dir, &config.output_dir] {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let converter = Converter::new(config);

    // ── Engine check ─────────────────────────────────────────────────────
    match converter.check_engine().await {
        Ok(version) => info!("Conversion engine ready: {}", version),
        Err(e) if cli.check_engine => return Err(e).context("Conversion engine check failed"),
        Err(e) => warn!("Conversion engine check failed, serving anyway: {}", e),
    }
    if cli.check_engine {
        return Ok(());
    }

    // ── Serve ────────────────────────────────────────────────────────────
    let addr = SocketAddr::new(cli.host, cli.port);
    info!("Health check: http://{}/health", addr);
    info!("Service info: http://{}/api/info", addr);
    server::serve(converter, addr)
        .await
        .with_context(|| format!("Server on {addr} failed"))?;

    info!("office2pdf stopped");
    Ok(())
}
