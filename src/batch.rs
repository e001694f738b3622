//! Batch orchestration: convert every staged upload with one request, store
//! the outputs, and bundle them into a zip archive when there is more than one.

use crate::convert::ConverterService;
use crate::models::{ConversionRequest, ConversionResult};
use crate::storage::{self, Storage};
use crate::{Error, Result};
use chrono::Local;
use serde::Serialize;
use std::io::{Cursor, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// An upload already written to the staging folder.
#[derive(Debug, Clone)]
pub struct StagedUpload {
    pub path: PathBuf,
    /// Sanitized name used to derive the output filename.
    pub filename: String,
    /// Name as sent by the client.
    pub original_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchEntry {
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(flatten)]
    pub result: ConversionResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveSummary {
    pub success: bool,
    pub batch: bool,
    pub zip_filename: String,
    pub download_url: String,
    pub results: Vec<BatchEntry>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum BatchOutcome {
    Single(BatchEntry),
    Archive(ArchiveSummary),
}

pub struct BatchProcessor {
    converter: Arc<dyn ConverterService>,
    storage: Arc<Storage>,
}

impl BatchProcessor {
    pub fn new(converter: Arc<dyn ConverterService>, storage: Arc<Storage>) -> Self {
        Self { converter, storage }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Convert every upload concurrently. Per-file failures are reported in the
    /// entries and never abort the batch.
    pub async fn process(
        &self,
        uploads: Vec<StagedUpload>,
        request: &ConversionRequest,
    ) -> Result<BatchOutcome> {
        if uploads.is_empty() {
            return Err(Error::InvalidRequest("no files were uploaded".to_string()));
        }

        let session_id = Uuid::new_v4().to_string();
        let total = uploads.len();
        info!(
            "[{}] Converting {} file(s) to {}",
            session_id, total, request.format
        );

        let mut tasks = JoinSet::new();
        for (index, upload) in uploads.into_iter().enumerate() {
            let converter = Arc::clone(&self.converter);
            let storage = Arc::clone(&self.storage);
            let request = request.clone();
            tasks.spawn(async move {
                let converted = convert_one(converter.as_ref(), &storage, &upload, request).await;
                (index, upload, converted)
            });
        }

        let mut converted = Vec::with_capacity(total);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(item) => converted.push(item),
                Err(e) => {
                    error!("[{}] Conversion task join error: {}", session_id, e);
                    return Err(Error::Invariant(format!("conversion task join error: {}", e)));
                }
            }
        }
        converted.sort_by_key(|(index, _, _)| *index);

        let mut entries = Vec::with_capacity(total);
        let mut archived = Vec::new();
        for (_, upload, result) in converted {
            let entry = self
                .store_result(&session_id, upload, result, request.format.extension())
                .await;
            if let (Some(name), ConversionResult::Success(converted)) =
                (&entry.output_filename, &entry.result)
            {
                archived.push((name.clone(), converted.data.clone()));
            }
            entries.push(entry);
        }

        let succeeded = entries.iter().filter(|e| e.result.is_success()).count();
        info!(
            "[{}] {} of {} conversions succeeded",
            session_id, succeeded, total
        );

        if total == 1 {
            let entry = entries
                .pop()
                .ok_or_else(|| Error::Invariant("missing single batch entry".to_string()))?;
            return Ok(BatchOutcome::Single(entry));
        }

        let archive = tokio::task::spawn_blocking(move || build_archive(&archived))
            .await
            .map_err(|e| Error::Invariant(format!("archive task join error: {}", e)))??;
        let archive_name = format!(
            "converted_images_{}.zip",
            Local::now().format("%Y%m%d_%H%M%S")
        );
        let zip_filename = self
            .storage
            .write_output(None, &archive_name, &archive)
            .await?;
        info!("[{}] Wrote archive {}", session_id, zip_filename);

        Ok(BatchOutcome::Archive(ArchiveSummary {
            success: true,
            batch: true,
            download_url: format!("/download/{}", zip_filename),
            zip_filename,
            results: entries,
        }))
    }

    async fn store_result(
        &self,
        session_id: &str,
        upload: StagedUpload,
        result: ConversionResult,
        extension: &str,
    ) -> BatchEntry {
        let mut entry = BatchEntry {
            filename: upload.original_name,
            output_filename: None,
            download_url: None,
            session_id: None,
            result,
        };

        let wanted = storage::output_filename(&upload.filename, extension);
        let written = match &entry.result {
            ConversionResult::Success(converted) => Some(
                self.storage
                    .write_output(Some(session_id), &wanted, &converted.data)
                    .await,
            ),
            ConversionResult::Failure(_) => None,
        };

        match written {
            Some(Ok(name)) => {
                entry.download_url = Some(format!("/download/{}/{}", session_id, name));
                entry.output_filename = Some(name);
                entry.session_id = Some(session_id.to_string());
            }
            Some(Err(e)) => {
                warn!("[{}] Failed to store {}: {}", session_id, wanted, e);
                entry.result = ConversionResult::from_error(e);
            }
            None => {}
        }

        entry
    }
}

async fn convert_one(
    converter: &dyn ConverterService,
    storage: &Storage,
    upload: &StagedUpload,
    request: ConversionRequest,
) -> ConversionResult {
    let result = match tokio::fs::read(&upload.path).await {
        Ok(bytes) => converter.convert(bytes, request).await,
        Err(e) => ConversionResult::from_error(Error::Io(e)),
    };
    storage.remove_staged(&upload.path).await;
    result
}

/// Zip the given `(name, bytes)` pairs with deflate compression.
pub fn build_archive(files: &[(String, Vec<u8>)]) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for (name, data) in files {
        writer.start_file(name.as_str(), options)?;
        writer.write_all(data)?;
    }

    Ok(writer.finish()?.into_inner())
}
