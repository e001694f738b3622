//! Upload, download and format listing handlers.

use super::{error_response, AppContext};
use crate::batch::StagedUpload;
use crate::config::Config;
use crate::convert::format::content_type_for_path;
use crate::convert::TargetFormat;
use crate::models::ConversionRequest;
use crate::storage::{self, Storage};
use crate::{Error, Result};
use axum::{
    body::Body,
    extract::{multipart::Field, Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::io::ErrorKind;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

// ============================================================================
// Request types
// ============================================================================

/// Text fields of the upload form, as sent.
#[derive(Debug, Default)]
struct UploadForm {
    format: Option<String>,
    quality: Option<String>,
    width: Option<String>,
    height: Option<String>,
    maintain_aspect: Option<String>,
    ico_multi_size: Option<String>,
    ico_size: Option<String>,
}

impl UploadForm {
    fn set(&mut self, name: &str, value: String) {
        let slot = match name {
            "format" => &mut self.format,
            "quality" => &mut self.quality,
            "width" => &mut self.width,
            "height" => &mut self.height,
            "maintain_aspect" => &mut self.maintain_aspect,
            "ico_multi_size" => &mut self.ico_multi_size,
            "ico_size" => &mut self.ico_size,
            other => {
                tracing::debug!("Ignoring unknown form field '{}'", other);
                return;
            }
        };
        *slot = Some(value);
    }

    /// Build a validated request, filling gaps from the config.
    fn into_request(self, config: &Config) -> Result<ConversionRequest> {
        let format = match non_empty(self.format) {
            Some(raw) => raw.parse()?,
            None => config.default_format,
        };
        let quality = match non_empty(self.quality) {
            Some(raw) => parse_number::<u8>("quality", &raw)?,
            None => config.default_quality,
        };
        let mut width = non_empty(self.width)
            .map(|raw| parse_number::<u32>("width", &raw))
            .transpose()?;
        let mut height = non_empty(self.height)
            .map(|raw| parse_number::<u32>("height", &raw))
            .transpose()?;

        if format == TargetFormat::Ico && width.is_none() && height.is_none() {
            let side = match non_empty(self.ico_size) {
                Some(raw) => parse_number::<u32>("ico_size", &raw)?,
                None => 256,
            };
            width = Some(side);
            height = Some(side);
        }

        let request = ConversionRequest::new(format)
            .with_size(width, height)
            .with_quality(quality)
            .with_maintain_aspect(flag(self.maintain_aspect.as_deref(), true))
            .with_ico_multi_size(flag(self.ico_multi_size.as_deref(), false));
        request.validate(&config.conversion)?;
        Ok(request)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| Error::InvalidRequest(format!("{} must be a number, got '{}'", name, raw)))
}

fn flag(value: Option<&str>, default: bool) -> bool {
    value
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

// ============================================================================
// Handlers
// ============================================================================

/// Formats and limits the upload form can offer.
pub async fn list_formats(State(ctx): State<AppContext>) -> impl IntoResponse {
    let formats: Vec<&str> = TargetFormat::ALL.iter().map(|f| f.name()).collect();
    Json(serde_json::json!({
        "formats": formats,
        "ico_sizes": ctx.config.conversion.ico_sizes,
        "default_quality": ctx.config.default_quality,
        "default_format": ctx.config.default_format,
        "max_image_dimension": ctx.config.conversion.max_image_dimension,
    }))
}

/// Accept one or more images and convert them with the submitted options.
pub async fn upload(State(ctx): State<AppContext>, multipart: Multipart) -> Response {
    let storage = ctx.batch.storage();
    let mut staged = Vec::new();

    let parsed = read_upload(&ctx.config, storage, multipart, &mut staged).await;
    let request = match parsed.and_then(|form| {
        form.into_request(&ctx.config)
            .map_err(IntoResponse::into_response)
    }) {
        Ok(request) => request,
        Err(response) => {
            discard(storage, &staged).await;
            return response;
        }
    };

    if staged.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "No files were selected");
    }

    match ctx.batch.process(staged, &request).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Stream every file part to the staging folder and collect the text fields.
async fn read_upload(
    config: &Config,
    storage: &Storage,
    mut multipart: Multipart,
    staged: &mut Vec<StagedUpload>,
) -> std::result::Result<UploadForm, Response> {
    let mut form = UploadForm::default();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return Err(error_response(e.status(), e.body_text())),
        };
        let name = field.name().unwrap_or_default().to_string();

        if name == "files" {
            let original_name = field.file_name().unwrap_or_default().to_string();
            if original_name.is_empty() {
                continue;
            }
            if !config.is_allowed_file(&original_name) {
                return Err(error_response(
                    StatusCode::BAD_REQUEST,
                    format!("File type not allowed: {}", original_name),
                ));
            }
            let Some(filename) = storage::sanitize_filename(&original_name) else {
                return Err(error_response(
                    StatusCode::BAD_REQUEST,
                    format!("Invalid filename: {}", original_name),
                ));
            };

            let path = storage.staging_path(&filename);
            // Track the path first so a partial write is still discarded.
            staged.push(StagedUpload {
                path: path.clone(),
                filename,
                original_name,
            });
            stage_field(field, &path).await?;
        } else {
            let value = field
                .text()
                .await
                .map_err(|e| error_response(e.status(), e.body_text()))?;
            form.set(&name, value);
        }
    }

    Ok(form)
}

async fn stage_field(
    mut field: Field<'_>,
    path: &std::path::Path,
) -> std::result::Result<(), Response> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| Error::Io(e).into_response())?;

    loop {
        match field.chunk().await {
            Ok(Some(chunk)) => file
                .write_all(&chunk)
                .await
                .map_err(|e| Error::Io(e).into_response())?,
            Ok(None) => break,
            Err(e) => return Err(error_response(e.status(), e.body_text())),
        }
    }

    file.flush()
        .await
        .map_err(|e| Error::Io(e).into_response())
}

async fn discard(storage: &Storage, staged: &[StagedUpload]) {
    for upload in staged {
        if tokio::fs::try_exists(&upload.path).await.unwrap_or(false) {
            storage.remove_staged(&upload.path).await;
        }
    }
}

/// Serve a converted file or archive as an attachment.
pub async fn download(State(ctx): State<AppContext>, Path(path): Path<String>) -> Response {
    let file_path = match ctx.batch.storage().resolve_download(&path) {
        Ok(p) => p,
        Err(e) => return e.into_response(),
    };

    let file = match tokio::fs::File::open(&file_path).await {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return error_response(StatusCode::NOT_FOUND, "File not found")
        }
        Err(e) => return Error::Io(e).into_response(),
    };

    let download_name = file_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());

    (
        StatusCode::OK,
        [
            (
                header::CONTENT_TYPE,
                content_type_for_path(&file_path).to_string(),
            ),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", download_name),
            ),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response()
}
