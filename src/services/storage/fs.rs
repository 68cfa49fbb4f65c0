use async_trait::async_trait;
use image::DynamicImage;
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    decode_blocking, encode_png_blocking, validate_component, ArtifactStore, DocumentScan,
    DocumentStore, SkippedDocument,
};
use crate::core::errors::{StoreError, StoreResult};
use crate::core::types::ArtifactRef;

const DOCUMENT_FILE: &str = "session.json";

/// Filesystem store.
///
/// Layout: `<root>/<key>/session.json` for documents and
/// `<root>/<namespace>/<name>` for artifacts, so one directory holds everything
/// belonging to a session. The empty namespace writes into `<root>` itself.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Open (creating if needed) a store rooted at `root`
    pub async fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await.map_err(|e| {
            StoreError::Unavailable(format!("cannot create {}: {}", root.display(), e))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn document_path(&self, key: &str) -> StoreResult<PathBuf> {
        validate_component(key)?;
        Ok(self.root.join(key).join(DOCUMENT_FILE))
    }

    fn namespace_dir(&self, namespace: &str) -> StoreResult<PathBuf> {
        if namespace.is_empty() {
            return Ok(self.root.clone());
        }
        validate_component(namespace)?;
        Ok(self.root.join(namespace))
    }

    fn artifact_path(&self, namespace: &str, name: &str) -> StoreResult<PathBuf> {
        validate_component(name)?;
        Ok(self.namespace_dir(namespace)?.join(name))
    }

    async fn ensure_parent(path: &Path) -> StoreResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent, e))?;
        }
        Ok(())
    }

    /// Write via a temp file and rename so readers never see half a document
    async fn write_atomic(path: &Path, bytes: &[u8]) -> StoreResult<()> {
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes)
            .await
            .map_err(|e| StoreError::io(&tmp, e))?;
        fs::rename(&tmp, path)
            .await
            .map_err(|e| StoreError::io(path, e))
    }

    async fn read_document(path: &Path) -> StoreResult<Option<Value>> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }
}

#[async_trait]
impl DocumentStore for FsStore {
    async fn put(&self, key: &str, document: &Value) -> StoreResult<()> {
        let path = self.document_path(key)?;
        Self::ensure_parent(&path).await?;
        let bytes = serde_json::to_vec_pretty(document)?;
        Self::write_atomic(&path, &bytes).await?;
        debug!("Stored document {}", key);
        Ok(())
    }

    async fn put_new(&self, key: &str, document: &Value) -> StoreResult<bool> {
        let path = self.document_path(key)?;
        Self::ensure_parent(&path).await?;
        let bytes = serde_json::to_vec_pretty(document)?;

        // Fully written before it becomes visible; the link fails if the key is taken
        let tmp = path.with_extension(format!("json.{}.tmp", Uuid::new_v4().simple()));
        fs::write(&tmp, &bytes)
            .await
            .map_err(|e| StoreError::io(&tmp, e))?;
        let linked = fs::hard_link(&tmp, &path).await;
        if let Err(e) = fs::remove_file(&tmp).await {
            warn!("Could not remove {}: {}", tmp.display(), e);
        }
        match linked {
            Ok(()) => {
                debug!("Stored new document {}", key);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        Self::read_document(&self.document_path(key)?).await
    }

    async fn list_all(&self) -> StoreResult<DocumentScan> {
        let mut scan = DocumentScan::default();
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|e| StoreError::io(&self.root, e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&self.root, e))?
        {
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }
            let key = entry.file_name().to_string_lossy().into_owned();
            let path = entry.path().join(DOCUMENT_FILE);

            match Self::read_document(&path).await {
                Ok(Some(document)) => scan.documents.push((key, document)),
                Ok(None) => {}
                Err(e) => {
                    warn!("Skipping unreadable document {}: {}", path.display(), e);
                    scan.skipped.push(SkippedDocument {
                        key,
                        reason: e.to_string(),
                    });
                }
            }
        }

        scan.documents.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(scan)
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let path = self.document_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }
}

#[async_trait]
impl ArtifactStore for FsStore {
    fn artifact_ref(&self, namespace: &str, name: &str) -> StoreResult<ArtifactRef> {
        let path = self.artifact_path(namespace, name)?;
        Ok(ArtifactRef(path.to_string_lossy().into_owned()))
    }

    async fn put_file(
        &self,
        namespace: &str,
        name: &str,
        source: &Path,
    ) -> StoreResult<ArtifactRef> {
        let dest = self.artifact_path(namespace, name)?;
        Self::ensure_parent(&dest).await?;
        fs::copy(source, &dest)
            .await
            .map_err(|e| StoreError::io(source, e))?;
        Ok(ArtifactRef(dest.to_string_lossy().into_owned()))
    }

    async fn put_image(
        &self,
        namespace: &str,
        name: &str,
        image: DynamicImage,
    ) -> StoreResult<ArtifactRef> {
        let dest = self.artifact_path(namespace, name)?;
        Self::ensure_parent(&dest).await?;
        let bytes = encode_png_blocking(name, image).await?;
        fs::write(&dest, bytes)
            .await
            .map_err(|e| StoreError::io(&dest, e))?;
        Ok(ArtifactRef(dest.to_string_lossy().into_owned()))
    }

    async fn load_image(&self, artifact: &ArtifactRef) -> StoreResult<DynamicImage> {
        let path = Path::new(artifact.as_str());
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::ArtifactMissing(artifact.to_string()))
            }
            Err(e) => return Err(StoreError::io(path, e)),
        };
        decode_blocking(artifact.as_str(), Arc::new(bytes)).await
    }

    async fn remove_all(&self, namespace: &str) -> StoreResult<()> {
        if namespace.is_empty() {
            return Err(StoreError::Unavailable(
                "refusing to remove the store root".to_string(),
            ));
        }
        let dir = self.namespace_dir(namespace)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(&dir, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_document_roundtrip_and_delete() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::open(dir.path()).await.unwrap();

        store.put("edit_a", &json!({"n": 1})).await.unwrap();
        assert_eq!(store.get("edit_a").await.unwrap(), Some(json!({"n": 1})));
        assert_eq!(store.get("edit_missing").await.unwrap(), None);

        assert!(store.delete("edit_a").await.unwrap());
        assert!(!store.delete("edit_a").await.unwrap());
    }

    #[tokio::test]
    async fn test_put_new_refuses_existing_key() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::open(dir.path()).await.unwrap();

        assert!(store.put_new("edit_a", &json!({"v": 1})).await.unwrap());
        assert!(!store.put_new("edit_a", &json!({"v": 2})).await.unwrap());
        assert_eq!(store.get("edit_a").await.unwrap(), Some(json!({"v": 1})));

        // Only the document itself remains in the key's directory
        let files: Vec<_> = std::fs::read_dir(dir.path().join("edit_a"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(files, vec![DOCUMENT_FILE.to_string()]);
    }

    #[tokio::test]
    async fn test_concurrent_put_new_has_one_winner() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::open(dir.path()).await.unwrap();

        let attempts = (0..8).map(|v| {
            let store = store.clone();
            tokio::spawn(async move { store.put_new("edit_race", &json!({ "v": v })).await })
        });
        let won = futures::future::join_all(attempts)
            .await
            .into_iter()
            .filter(|r| *r.as_ref().unwrap().as_ref().unwrap())
            .count();

        assert_eq!(won, 1);
        assert!(store.get("edit_race").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_list_all_skips_malformed() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::open(dir.path()).await.unwrap();
        store.put("edit_good", &json!({"ok": true})).await.unwrap();

        std::fs::create_dir_all(dir.path().join("edit_bad")).unwrap();
        std::fs::write(dir.path().join("edit_bad").join(DOCUMENT_FILE), b"{not json").unwrap();
        // Directories without a document are ignored
        std::fs::create_dir_all(dir.path().join("stray")).unwrap();

        let scan = store.list_all().await.unwrap();
        assert_eq!(scan.documents.len(), 1);
        assert_eq!(scan.documents[0].0, "edit_good");
        assert_eq!(scan.skipped.len(), 1);
        assert_eq!(scan.skipped[0].key, "edit_bad");
    }

    #[tokio::test]
    async fn test_image_artifacts() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::open(dir.path()).await.unwrap();
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 3, Rgba([9, 8, 7, 255])));

        let artifact = store.put_image("edit_a", "repaired.png", img).await.unwrap();
        let loaded = store.load_image(&artifact).await.unwrap();
        assert_eq!(loaded.to_rgba8().get_pixel(0, 0), &Rgba([9, 8, 7, 255]));

        store.remove_all("edit_a").await.unwrap();
        assert!(matches!(
            store.load_image(&artifact).await,
            Err(StoreError::ArtifactMissing(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::open(dir.path()).await.unwrap();
        assert!(store.put("../escape", &json!({})).await.is_err());
    }
}
