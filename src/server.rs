//! HTTP boundary: axum routes around the [`Converter`].
//!
//! | Route                          | Purpose                                  |
//! |--------------------------------|------------------------------------------|
//! | `POST /api/convert-docx-to-pdf`| upload a document, receive the PDF       |
//! | `POST /api/test-convert`       | upload check without conversion          |
//! | `GET  /api/info`               | service description                      |
//! | `GET  /health`                 | liveness plus disk report                |
//!
//! Failures are answered with `{"success": false, "error": "..."}`: 400 for
//! problems with the request, 500 for everything else.

use crate::config::ServiceConfig;
use crate::convert::Converter;
use crate::error::ConvertError;
use crate::pipeline::cleanup::cleanup_file;
use crate::pipeline::disk::format_bytes;
use crate::pipeline::ingest::{
    decode_declared_name, decode_header_name, ingest_stream, validate_upload, StagedFile,
    StagingWriter, DEFAULT_UPLOAD_NAME,
};
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, FromRequest, Multipart, Request, State},
    http::{
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
        HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::path::Path;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

/// Header carrying the original filename on raw-body uploads.
pub const FILE_NAME_HEADER: &str = "x-file-name";

/// Multipart field holding the document.
pub const FILE_FIELD: &str = "file";

/// Error response body shared by every route.
#[derive(Debug)]
pub(crate) struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    fn not_found() -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            kind: "not_found",
            message: "Endpoint not found".to_string(),
        }
    }
}

impl From<ConvertError> for ApiError {
    fn from(e: ConvertError) -> Self {
        let status = if e.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self {
            status,
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("{} ({}): {}", self.status, self.kind, self.message);
        } else {
            warn!("{} ({}): {}", self.status, self.kind, self.message);
        }
        let body = Json(json!({ "success": false, "error": self.message }));
        (self.status, body).into_response()
    }
}

/// Build the service router.
pub fn router(converter: Converter) -> Router {
    Router::new()
        .route("/api/convert-docx-to-pdf", post(convert_document))
        .route("/api/test-convert", post(test_convert))
        .route("/api/info", get(info_handler))
        .route("/health", get(health))
        .fallback(not_found)
        .layer(DefaultBodyLimit::disable())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(converter)
}

/// Bind `addr` and serve until Ctrl-C.
pub async fn serve(converter: Converter, addr: SocketAddr) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("office2pdf listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(converter).into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, draining connections");
}

async fn convert_document(State(converter): State<Converter>, request: Request) -> Response {
    let deadline = converter.config().request_timeout;
    match tokio::time::timeout(deadline, convert_request(&converter, request)).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => ApiError::from(e).into_response(),
        Err(_) => ApiError::from(ConvertError::RequestTimeout {
            secs: deadline.as_secs(),
        })
        .into_response(),
    }
}

async fn convert_request(converter: &Converter, request: Request) -> Result<Response, ConvertError> {
    let staged = stage_upload(converter.config(), request).await?;
    converter
        .config()
        .progress_callback
        .on_upload_staged(&staged.original_name, staged.byte_size);
    info!(
        "Received '{}' ({} bytes) at {}",
        staged.original_name,
        staged.byte_size,
        staged.path.display()
    );

    let pdf = converter.convert(staged).await?;

    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", pdf.filename()))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment; filename=\"converted.pdf\""));
    let headers = [
        (CONTENT_TYPE, HeaderValue::from_static("application/pdf")),
        (CONTENT_DISPOSITION, disposition),
        (CONTENT_LENGTH, HeaderValue::from(pdf.size())),
    ];
    Ok((headers, Body::from_stream(pdf.into_stream())).into_response())
}

/// Pick the ingestion strategy from the request's content type.
async fn stage_upload(config: &ServiceConfig, request: Request) -> Result<StagedFile, ConvertError> {
    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if content_type.contains("application/octet-stream") {
        let declared = request
            .headers()
            .get(FILE_NAME_HEADER)
            .map(|v| decode_header_name(v.as_bytes()));
        let body = request.into_body().into_data_stream();
        ingest_stream(
            body,
            declared.as_deref(),
            &config.staging_dir,
            config.max_upload_bytes,
        )
        .await
    } else {
        stage_multipart_request(config, request).await
    }
}

async fn stage_multipart_request(
    config: &ServiceConfig,
    request: Request,
) -> Result<StagedFile, ConvertError> {
    let multipart = Multipart::from_request(request, &())
        .await
        .map_err(|e| ConvertError::UploadFailed {
            reason: e.body_text(),
        })?;
    stage_multipart(multipart, config).await
}

/// Stream the `file` part of a multipart body into the staging directory.
async fn stage_multipart(
    mut multipart: Multipart,
    config: &ServiceConfig,
) -> Result<StagedFile, ConvertError> {
    let upload_failed = |e: axum::extract::multipart::MultipartError| ConvertError::UploadFailed {
        reason: e.body_text(),
    };

    while let Some(mut field) = multipart.next_field().await.map_err(upload_failed)? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let raw_name = field.file_name().unwrap_or(DEFAULT_UPLOAD_NAME).to_string();
        let mime = field.content_type().map(str::to_string);
        validate_upload(mime.as_deref(), &decode_declared_name(&raw_name), config)?;

        let mut writer =
            StagingWriter::create(&config.staging_dir, Some(&raw_name), config.max_upload_bytes)
                .await?;
        while let Some(chunk) = field.chunk().await.map_err(upload_failed)? {
            writer.write_chunk(&chunk).await?;
        }
        return writer.finish().await;
    }

    Err(ConvertError::MissingFile)
}

/// Stage a multipart upload, report on it, then delete it.
///
/// `uploadPath` is informational: the staged file no longer exists once the
/// response is sent.
async fn test_convert(State(converter): State<Converter>, request: Request) -> Response {
    let staged = match stage_multipart_request(converter.config(), request).await {
        Ok(s) => s,
        Err(e) => return ApiError::from(e).into_response(),
    };
    let size = match tokio::fs::metadata(&staged.path).await {
        Ok(m) => m.len(),
        Err(e) => {
            discard_staged(&staged.path);
            return ApiError::from(ConvertError::Io {
                path: staged.path.clone(),
                source: e,
            })
            .into_response();
        }
    };
    let body = json!({
        "success": true,
        "message": "File received",
        "fileInfo": {
            "originalName": staged.original_name,
            "size": size,
            "uploadPath": staged.path,
        }
    });
    discard_staged(&staged.path);
    Json(body).into_response()
}

/// Delete a staged upload, logging instead of failing.
fn discard_staged(path: &Path) -> bool {
    match cleanup_file(path) {
        Ok(removed) => removed,
        Err(e) => {
            warn!("{}", e);
            false
        }
    }
}

async fn info_handler(State(converter): State<Converter>) -> Json<serde_json::Value> {
    let config = converter.config();
    let formats: Vec<&str> = config
        .allowed_extensions
        .iter()
        .map(|e| e.trim_start_matches('.'))
        .collect();
    Json(json!({
        "service": "Office to PDF Converter",
        "version": env!("CARGO_PKG_VERSION"),
        "supportedFormats": formats,
        "maxFileSize": format_bytes(config.max_upload_bytes),
        "conversionMethod": "LibreOffice Command Line",
        "launcher": converter.launcher_name(),
    }))
}

async fn health(State(converter): State<Converter>) -> Json<serde_json::Value> {
    let disk = converter.disk_report().await;
    Json(json!({
        "status": "ok",
        "engine": converter.launcher_name(),
        "disk": disk,
    }))
}

async fn not_found() -> ApiError {
    ApiError::not_found()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_map_to_400() {
        let e = ApiError::from(ConvertError::SizeExceeded { limit_bytes: 10 });
        assert_eq!(e.status, StatusCode::BAD_REQUEST);
        assert_eq!(e.kind, "size_exceeded");
    }

    #[test]
    fn host_errors_map_to_500() {
        let e = ApiError::from(ConvertError::InsufficientDiskSpace {
            free: "10 MB".into(),
            required: "100 MB".into(),
        });
        assert_eq!(e.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(e.message.contains("10 MB"));
    }

    #[test]
    fn discard_staged_swallows_cleanup_failures() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("staged.docx");
        std::fs::write(&file, b"x").unwrap();
        assert!(discard_staged(&file));
        assert!(!file.exists());
        assert!(!discard_staged(&file));

        // Removing a directory as a file fails; the failure is only logged.
        let sub = dir.path().join("not-a-file");
        std::fs::create_dir(&sub).unwrap();
        assert!(!discard_staged(&sub));
        assert!(sub.exists());
    }

    #[test]
    fn fallback_is_404() {
        let resp = ApiError::not_found().into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
