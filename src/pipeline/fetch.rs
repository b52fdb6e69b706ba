//! Byte retrieval for classified images.
//!
//! Each [`ImageSource`](super::classify::ImageSource) has its own channel:
//!
//! * stored files go through the [`FileStore`] capability, which hides how the
//!   site keeps its files (hashed content directories, object storage, ...);
//! * STACK plots are read from the plot cache directory on disk;
//! * everything else is downloaded with a plain HTTP GET.
//!
//! All three return `Result<Vec<u8>, InlineError>` so the caller can treat a
//! failure on any channel the same way: mark the element and move on.

use super::classify::StoredFileRef;
use crate::config::ArchiverConfig;
use crate::error::{ArchiverError, InlineError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// Read access to the site's file storage.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Content of the stored file, `Ok(None)` when no such file exists.
    async fn get_file(&self, file: &StoredFileRef) -> io::Result<Option<Vec<u8>>>;
}

/// File store backed by a plain directory tree:
/// `<root>/<contextid>/<component>/<filearea>/<itemid><filepath><filename>`.
#[derive(Debug, Clone)]
pub struct DirectoryFileStore {
    root: PathBuf,
}

impl DirectoryFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// On-disk location of `file`, `None` if any segment would escape the root.
    pub fn path_for(&self, file: &StoredFileRef) -> Option<PathBuf> {
        let mut path = self.root.join(file.contextid.to_string());
        let segments = [file.component.as_str(), file.filearea.as_str()]
            .into_iter()
            .map(str::to_string)
            .chain(std::iter::once(file.itemid.to_string()))
            .chain(file.filepath.split('/').map(str::to_string))
            .chain(std::iter::once(file.filename.clone()));

        for segment in segments {
            match segment.as_str() {
                "" => continue,
                "." | ".." => return None,
                s if s.contains('\\') => return None,
                s => path.push(s),
            }
        }
        Some(path)
    }
}

#[async_trait]
impl FileStore for DirectoryFileStore {
    async fn get_file(&self, file: &StoredFileRef) -> io::Result<Option<Vec<u8>>> {
        let Some(path) = self.path_for(file) else {
            return Ok(None);
        };
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// In-memory file store, keyed by the full [`StoredFileRef`].
#[derive(Debug, Default)]
pub struct MemoryFileStore {
    files: RwLock<HashMap<StoredFileRef, Vec<u8>>>,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, file: StoredFileRef, bytes: impl Into<Vec<u8>>) {
        self.files.write().await.insert(file, bytes.into());
    }
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn get_file(&self, file: &StoredFileRef) -> io::Result<Option<Vec<u8>>> {
        Ok(self.files.read().await.get(file).cloned())
    }
}

/// Look up a stored file; a missing file or a storage error rejects the image.
pub async fn fetch_stored_file(
    store: &dyn FileStore,
    file: &StoredFileRef,
    url: &str,
) -> Result<Vec<u8>, InlineError> {
    match store.get_file(file).await {
        Ok(Some(bytes)) => Ok(bytes),
        Ok(None) => Err(InlineError::FileNotFound {
            url: url.to_string(),
        }),
        Err(e) => {
            debug!("File store error for {}: {}", url, e);
            Err(InlineError::FileNotFound {
                url: url.to_string(),
            })
        }
    }
}

/// Keep only characters that are safe in a plain file name.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect()
}

/// Read a cached STACK plot from `plot_dir`.
pub async fn read_stack_plot(plot_dir: &Path, filename: &str) -> Result<Vec<u8>, InlineError> {
    let path = plot_dir.join(sanitize_filename(filename));
    tokio::fs::read(&path)
        .await
        .map_err(|e| InlineError::StackPlotUnreadable {
            path,
            detail: e.to_string(),
        })
}

/// Build the HTTP client used for generic image downloads.
pub fn build_image_client(config: &ArchiverConfig) -> Result<reqwest::Client, ArchiverError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.image_fetch_timeout_secs))
        .redirect(reqwest::redirect::Policy::limited(10))
        .danger_accept_invalid_certs(config.insecure_image_fetch)
        .build()
        .map_err(|e| ArchiverError::Internal(format!("Failed to build image HTTP client: {e}")))
}

/// Download `url` with a plain GET.
pub async fn fetch_generic(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, InlineError> {
    let failed = |detail: String| InlineError::FetchFailed {
        url: url.to_string(),
        detail,
    };

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| failed(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(failed(format!("HTTP {status}")));
    }

    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
    Ok(bytes.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_ref(filename: &str) -> StoredFileRef {
        StoredFileRef {
            contextid: 7,
            component: "mod_quiz".into(),
            filearea: "intro".into(),
            itemid: 0,
            filepath: "/".into(),
            filename: filename.into(),
        }
    }

    #[test]
    fn test_sanitize_strips_path_characters() {
        assert_eq!(sanitize_filename("plot-1_a.png"), "plot-1_a.png");
        assert_eq!(sanitize_filename("../../etc/passwd"), "....etcpasswd");
        assert_eq!(sanitize_filename("a b%20c.svg"), "ab20c.svg");
    }

    #[test]
    fn test_directory_store_layout() {
        let store = DirectoryFileStore::new("/files");
        assert_eq!(
            store.path_for(&file_ref("x.png")),
            Some(PathBuf::from("/files/7/mod_quiz/intro/0/x.png"))
        );
    }

    #[test]
    fn test_directory_store_refuses_traversal() {
        let store = DirectoryFileStore::new("/files");
        let mut file = file_ref("x.png");
        file.filearea = "..".into();
        assert_eq!(store.path_for(&file), None);
    }

    #[tokio::test]
    async fn test_directory_store_reads_and_misses() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryFileStore::new(dir.path());
        let file = file_ref("x.png");
        let path = store.path_for(&file).unwrap();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"\x89PNG").unwrap();

        assert_eq!(store.get_file(&file).await.unwrap(), Some(b"\x89PNG".to_vec()));
        assert_eq!(store.get_file(&file_ref("missing.png")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_missing_stored_file_is_rejected() {
        let store = MemoryFileStore::new();
        let err = fetch_stored_file(&store, &file_ref("x.png"), "http://h/x.png")
            .await
            .unwrap_err();
        assert!(matches!(err, InlineError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn test_stack_plot_read_from_cache_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("plot1.svg"), b"<svg/>").unwrap();

        let bytes = read_stack_plot(dir.path(), "plot1.svg").await.unwrap();
        assert_eq!(bytes, b"<svg/>");

        let err = read_stack_plot(dir.path(), "nope.svg").await.unwrap_err();
        assert!(matches!(err, InlineError::StackPlotUnreadable { .. }));
    }
}
