//! Filesystem-backed asset store.
//!
//! Objects live at `{root}/{key}`. Writes go to a temp file in the target
//! directory and are renamed into place, so a reader never sees a partially
//! written page.

use super::{check_key, AssetStore};
use crate::error::CatalogError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

const TEMP_SUFFIX: &str = ".part";

/// Stores objects as files under a root directory.
pub struct FilesystemAssetStore {
    root: PathBuf,
    public_base_url: String,
}

impl FilesystemAssetStore {
    /// `public_base_url` is prepended to keys to form object URLs, e.g.
    /// `http://localhost:8080/assets`.
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Read an object back.
    pub async fn get(&self, key: &str) -> Result<Vec<u8>, CatalogError> {
        check_key(key)?;
        fs::read(self.full_path(key))
            .await
            .map_err(|e| CatalogError::storage(key, e))
    }
}

#[async_trait]
impl AssetStore for FilesystemAssetStore {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<String, CatalogError> {
        check_key(key)?;
        let full_path = self.full_path(key);
        debug!(key, size = bytes.len(), content_type, "asset_store: put");

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                warn!(parent = %parent.display(), error = %e, "asset_store: create_dir_all failed");
                CatalogError::storage(key, e)
            })?;
        }

        let mut temp_name = full_path.as_os_str().to_owned();
        temp_name.push(TEMP_SUFFIX);
        let temp_path = PathBuf::from(temp_name);

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| CatalogError::storage(key, e))?;
        file.write_all(bytes)
            .await
            .map_err(|e| CatalogError::storage(key, e))?;
        file.sync_all()
            .await
            .map_err(|e| CatalogError::storage(key, e))?;
        drop(file);

        if let Err(e) = fs::rename(&temp_path, &full_path).await {
            warn!(from = %temp_path.display(), error = %e, "asset_store: rename failed");
            let _ = fs::remove_file(&temp_path).await;
            return Err(CatalogError::storage(key, e));
        }

        Ok(self.url_for(key))
    }

    async fn delete(&self, key: &str) -> Result<(), CatalogError> {
        check_key(key)?;
        match fs::remove_file(self.full_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CatalogError::storage(key, e)),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, CatalogError> {
        check_key(key)?;
        fs::try_exists(self.full_path(key))
            .await
            .map_err(|e| CatalogError::storage(key, e))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, CatalogError> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(CatalogError::storage(prefix, e)),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| CatalogError::storage(prefix, e))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| CatalogError::storage(prefix, e))?;
                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.ends_with(TEMP_SUFFIX) {
                    continue;
                }
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key)
    }
}
