use std::{
    path::{Component, Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use mime::Mime;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::utils::now;

/// Public URL prefix under which [`MediaStore`] files are served.
pub const UPLOADS_PREFIX: &str = "/uploads";

/// A file received from a multipart form.
#[derive(Debug, Clone, Default)]
pub struct Upload {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

impl Upload {
    pub fn mime(&self) -> Option<Mime> {
        self.content_type.as_deref()?.parse().ok()
    }

    /// Checks the top-level media type, e.g. `image` for thumbnails.
    pub fn ensure_kind(&self, kind: mime::Name<'_>, label: &str) -> AppResult<()> {
        match self.mime() {
            Some(m) if m.type_() == kind => Ok(()),
            _ => Err(AppError::validation(format!(
                "Only {} files are allowed for {}",
                kind, label
            ))),
        }
    }

    fn extension(&self) -> Option<String> {
        let name = self.file_name.as_deref()?;
        let ext = Path::new(name).extension()?.to_str()?;
        if ext.is_empty() || ext.len() > 8 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

/// Local-disk storage for lesson media, thumbnails and similar assets.
#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
    seq: Arc<AtomicU64>,
}

impl MediaStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes the upload under `folder` and returns its public URL.
    pub async fn save(&self, folder: &str, upload: &Upload) -> AppResult<String> {
        if upload.data.is_empty() {
            return Err(AppError::validation("Uploaded file is empty"));
        }
        let dir = self.root.join(folder);
        tokio::fs::create_dir_all(&dir).await?;
        let mut name = format!(
            "{}-{}",
            now().unix_timestamp_nanos() / 1_000_000,
            self.seq.fetch_add(1, Ordering::Relaxed)
        );
        if let Some(ext) = upload.extension() {
            name.push('.');
            name.push_str(&ext);
        }
        tokio::fs::write(dir.join(&name), &upload.data).await?;
        Ok(format!("{}/{}/{}", UPLOADS_PREFIX, folder, name))
    }

    /// Resolves a public URL back to a file inside the store; `None` for foreign URLs.
    pub fn local_path(&self, url: &str) -> Option<PathBuf> {
        let rel = url.strip_prefix(UPLOADS_PREFIX)?.strip_prefix('/')?;
        let rel = Path::new(rel);
        if rel.as_os_str().is_empty() || !rel.components().all(|c| matches!(c, Component::Normal(_))) {
            return None;
        }
        Some(self.root.join(rel))
    }

    /// Best-effort removal that never fails the caller; errors are only logged.
    pub fn remove_detached(&self, urls: Vec<String>) -> JoinHandle<()> {
        let paths: Vec<PathBuf> = urls.iter().filter_map(|u| self.local_path(u)).collect();
        tokio::spawn(async move {
            for path in paths {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => info!("removed media file {}", path.display()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => warn!("failed to remove media file {}: {}", path.display(), e),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(name: &str, content_type: &str) -> Upload {
        Upload {
            file_name: Some(name.to_string()),
            content_type: Some(content_type.to_string()),
            data: b"data".to_vec(),
        }
    }

    #[tokio::test]
    async fn save_then_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaStore::new(dir.path());
        let url = store.save("lessons", &upload("intro.MP4", "video/mp4")).await.unwrap();
        assert!(url.starts_with("/uploads/lessons/"));
        assert!(url.ends_with(".mp4"));
        let path = store.local_path(&url).unwrap();
        assert!(path.exists());

        store.remove_detached(vec![url.clone()]).await.unwrap();
        assert!(!path.exists());
        // already gone is not an error
        store.remove_detached(vec![url]).await.unwrap();
    }

    #[tokio::test]
    async fn unique_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaStore::new(dir.path());
        let a = store.save("lessons", &upload("a.pdf", "application/pdf")).await.unwrap();
        let b = store.save("lessons", &upload("a.pdf", "application/pdf")).await.unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn local_path_rejects_escapes() {
        let store = MediaStore::new("/srv/media");
        assert_eq!(
            store.local_path("/uploads/lessons/1.mp4"),
            Some(PathBuf::from("/srv/media/lessons/1.mp4"))
        );
        assert!(store.local_path("/uploads/../etc/passwd").is_none());
        assert!(store.local_path("https://cdn.example.com/1.mp4").is_none());
        assert!(store.local_path("/uploads/").is_none());
    }

    #[test]
    fn kind_check() {
        assert!(upload("t.png", "image/png").ensure_kind(mime::IMAGE, "thumbnails").is_ok());
        assert!(upload("t.mp4", "video/mp4").ensure_kind(mime::IMAGE, "thumbnails").is_err());
        let untyped = Upload::default();
        assert!(untyped.ensure_kind(mime::VIDEO, "lesson videos").is_err());
    }
}
