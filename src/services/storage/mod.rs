// Durable storage interfaces: JSON documents and binary artifacts
//
// Sessions persist through `DocumentStore`; images they reference go through
// `ArtifactStore`. Both are async traits so a remote back-end can slot in.

pub mod fs;
pub mod memory;

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat};
use serde_json::Value;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use crate::core::errors::{StoreError, StoreResult};
use crate::core::types::ArtifactRef;

pub use fs::FsStore;
pub use memory::MemoryStore;

/// A document that could not be read during a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedDocument {
    pub key: String,
    pub reason: String,
}

/// Result of listing every stored document
#[derive(Debug, Default)]
pub struct DocumentScan {
    pub documents: Vec<(String, Value)>,
    pub skipped: Vec<SkippedDocument>,
}

/// Key-value store of JSON documents
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn put(&self, key: &str, document: &Value) -> StoreResult<()>;

    /// Store only if `key` is free. Returns `false` when it was taken.
    async fn put_new(&self, key: &str, document: &Value) -> StoreResult<bool> {
        if self.get(key).await?.is_some() {
            return Ok(false);
        }
        self.put(key, document).await?;
        Ok(true)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Value>>;

    /// Every readable document; unreadable ones are reported, not fatal
    async fn list_all(&self) -> StoreResult<DocumentScan>;

    /// Returns whether a document was removed
    async fn delete(&self, key: &str) -> StoreResult<bool>;
}

/// Named binary artifacts grouped by namespace
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Reference `put_file`/`put_image` will return for this name, computed
    /// without touching storage
    fn artifact_ref(&self, namespace: &str, name: &str) -> StoreResult<ArtifactRef>;

    /// Copy a local file into the store
    async fn put_file(&self, namespace: &str, name: &str, source: &Path)
        -> StoreResult<ArtifactRef>;

    /// Encode `image` as PNG and store it
    async fn put_image(
        &self,
        namespace: &str,
        name: &str,
        image: DynamicImage,
    ) -> StoreResult<ArtifactRef>;

    async fn load_image(&self, artifact: &ArtifactRef) -> StoreResult<DynamicImage>;

    /// Drop every artifact in `namespace`
    async fn remove_all(&self, namespace: &str) -> StoreResult<()>;
}

pub(crate) async fn encode_png_blocking(name: &str, image: DynamicImage) -> StoreResult<Vec<u8>> {
    let owned = name.to_string();
    tokio::task::spawn_blocking(move || {
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|source| StoreError::Image { name: owned, source })?;
        Ok(bytes)
    })
    .await
    .map_err(|e| StoreError::Unavailable(format!("PNG encode task failed: {e}")))?
}

pub(crate) async fn decode_blocking(name: &str, bytes: Arc<Vec<u8>>) -> StoreResult<DynamicImage> {
    let owned = name.to_string();
    tokio::task::spawn_blocking(move || {
        image::load_from_memory(&bytes).map_err(|source| StoreError::Image { name: owned, source })
    })
    .await
    .map_err(|e| StoreError::Unavailable(format!("image decode task failed: {e}")))?
}

/// Encode `image` as PNG at a local path
pub async fn write_png(path: &Path, image: DynamicImage) -> StoreResult<()> {
    let bytes = encode_png_blocking(&path.display().to_string(), image).await?;
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| StoreError::io(path, e))
}

/// Keys and names become single path components
pub(crate) fn validate_component(value: &str) -> StoreResult<()> {
    let bad = value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\'])
        || value.contains('\0');
    if bad {
        return Err(StoreError::Unavailable(format!(
            "invalid storage key '{value}'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_validation() {
        assert!(validate_component("edit_abc").is_ok());
        assert!(validate_component("page 01.png").is_ok());
        assert!(validate_component("../etc").is_err());
        assert!(validate_component("").is_err());
        assert!(validate_component("..").is_err());
    }
}
