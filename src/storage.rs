//! Temporary file storage for uploads and converted output
//!
//! Uploads are staged under the upload folder until converted; results live
//! in per-request session folders (and batch archives) under the converted
//! folder until the cleanup sweep removes them.

use crate::{Error, Result};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

pub struct Storage {
    upload_dir: PathBuf,
    converted_dir: PathBuf,
}

impl Storage {
    pub fn new(upload_dir: &Path, converted_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(upload_dir)?;
        std::fs::create_dir_all(converted_dir)?;
        Ok(Self {
            upload_dir: upload_dir.to_path_buf(),
            converted_dir: converted_dir.to_path_buf(),
        })
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn converted_dir(&self) -> &Path {
        &self.converted_dir
    }

    /// Path for a new staged upload; the name is unique per call.
    pub fn staging_path(&self, filename: &str) -> PathBuf {
        self.upload_dir
            .join(format!("temp_{}_{}", short_id(), filename))
    }

    /// Write an output file, returning the name it was stored under.
    ///
    /// Names are claimed with `create_new`, so concurrent writers asking for
    /// the same name each end up with their own file.
    pub async fn write_output(
        &self,
        session_id: Option<&str>,
        filename: &str,
        data: &[u8],
    ) -> Result<String> {
        let dir = match session_id {
            Some(session) => self.converted_dir.join(session),
            None => self.converted_dir.clone(),
        };
        fs::create_dir_all(&dir).await?;

        let mut name = filename.to_string();
        loop {
            let opened = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(dir.join(&name))
                .await;
            match opened {
                Ok(mut file) => {
                    file.write_all(data).await?;
                    file.flush().await?;
                    return Ok(name);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    name = suffixed_filename(filename);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Map a download key onto a file inside the converted folder.
    pub fn resolve_download(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let is_plain = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if key.is_empty() || !is_plain {
            return Err(Error::InvalidRequest(format!(
                "invalid download path: {}",
                key
            )));
        }
        Ok(self.converted_dir.join(relative))
    }

    pub async fn remove_staged(&self, path: &Path) {
        if let Err(e) = fs::remove_file(path).await {
            tracing::warn!("Failed to remove staged upload {}: {}", path.display(), e);
        }
    }
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// `<stem>_<8 hex>.<ext>`, used when `filename` is already taken.
fn suffixed_filename(filename: &str) -> String {
    let path = Path::new(filename);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("file");
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}_{}.{}", stem, short_id(), ext),
        None => format!("{}_{}", stem, short_id()),
    }
}

/// Reduce a client supplied filename to a safe single path component.
///
/// Keeps ASCII letters, digits, `.`, `-` and `_`; whitespace becomes `_`.
/// Returns `None` when nothing usable is left.
pub fn sanitize_filename(name: &str) -> Option<String> {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();

    let cleaned: String = base
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == '.' || c == '_').to_string();

    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// Output filename: the upload's stem with the target extension.
pub fn output_filename(filename: &str, extension: &str) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("image");
    format!("{}.{}", stem, extension)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn storage() -> (TempDir, Storage) {
        let dir = TempDir::new().unwrap();
        let storage =
            Storage::new(&dir.path().join("uploads"), &dir.path().join("converted")).unwrap();
        (dir, storage)
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("photo.png").as_deref(), Some("photo.png"));
        assert_eq!(
            sanitize_filename("../../etc/passwd").as_deref(),
            Some("passwd")
        );
        assert_eq!(
            sanitize_filename("C:\\Users\\me\\My Logo.PNG").as_deref(),
            Some("My_Logo.PNG")
        );
        assert_eq!(
            sanitize_filename("fotó (1).jpg").as_deref(),
            Some("fot_1.jpg")
        );
        assert_eq!(sanitize_filename(".."), None);
        assert_eq!(sanitize_filename("ñ"), None);
    }

    #[test]
    fn test_output_filename() {
        assert_eq!(output_filename("photo.png", "webp"), "photo.webp");
        assert_eq!(output_filename("archive.tar.gif", "jpg"), "archive.tar.jpg");
        assert_eq!(output_filename("noext", "ico"), "noext.ico");
    }

    #[test]
    fn test_staging_paths_are_unique() {
        let (_dir, storage) = storage();
        let a = storage.staging_path("a.png");
        let b = storage.staging_path("a.png");

        assert_ne!(a, b);
        assert!(a.starts_with(storage.upload_dir()));
        assert!(a.file_name().unwrap().to_string_lossy().ends_with("_a.png"));
    }

    #[tokio::test]
    async fn test_write_output_avoids_collisions() {
        let (_dir, storage) = storage();

        let first = storage
            .write_output(Some("session"), "logo.png", b"one")
            .await
            .unwrap();
        let second = storage
            .write_output(Some("session"), "logo.png", b"two")
            .await
            .unwrap();

        assert_eq!(first, "logo.png");
        assert_ne!(second, first);
        assert!(second.starts_with("logo_") && second.ends_with(".png"));

        let session = storage.converted_dir().join("session");
        assert_eq!(std::fs::read(session.join(&first)).unwrap(), b"one");
        assert_eq!(std::fs::read(session.join(&second)).unwrap(), b"two");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_never_share_a_name() {
        let (_dir, storage) = storage();
        let storage = std::sync::Arc::new(storage);

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..16u8 {
            let storage = std::sync::Arc::clone(&storage);
            tasks.spawn(async move {
                let name = storage
                    .write_output(None, "converted_images_20240101_120000.zip", &[i; 64])
                    .await
                    .unwrap();
                (i, name)
            });
        }

        let mut names = HashSet::new();
        while let Some(joined) = tasks.join_next().await {
            let (i, name) = joined.unwrap();
            assert!(names.insert(name.clone()), "{} handed out twice", name);
            let data = std::fs::read(storage.converted_dir().join(&name)).unwrap();
            assert_eq!(data, vec![i; 64]);
        }
        assert_eq!(names.len(), 16);
        assert!(names.contains("converted_images_20240101_120000.zip"));
    }

    #[test]
    fn test_resolve_download_rejects_traversal() {
        let (_dir, storage) = storage();

        let path = storage.resolve_download("abc/logo.png").unwrap();
        assert_eq!(path, storage.converted_dir().join("abc").join("logo.png"));

        assert!(storage.resolve_download("../secret").is_err());
        assert!(storage.resolve_download("/etc/passwd").is_err());
        assert!(storage.resolve_download("a/./b").is_ok());
        assert!(storage.resolve_download("").is_err());
    }
}
