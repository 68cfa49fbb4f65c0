use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use image::DynamicImage;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

use super::{decode_blocking, encode_png_blocking, ArtifactStore, DocumentScan, DocumentStore};
use crate::core::errors::{StoreError, StoreResult};
use crate::core::types::ArtifactRef;

const SCHEME: &str = "mem://";

/// In-process store for tests and throwaway runs
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    documents: Arc<DashMap<String, Value>>,
    artifacts: Arc<DashMap<String, Arc<Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn artifact_key(namespace: &str, name: &str) -> String {
        format!("{SCHEME}{namespace}/{name}")
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    pub fn artifact_count(&self) -> usize {
        self.artifacts.len()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn put(&self, key: &str, document: &Value) -> StoreResult<()> {
        self.documents.insert(key.to_string(), document.clone());
        Ok(())
    }

    async fn put_new(&self, key: &str, document: &Value) -> StoreResult<bool> {
        match self.documents.entry(key.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(document.clone());
                Ok(true)
            }
        }
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        Ok(self.documents.get(key).map(|doc| doc.value().clone()))
    }

    async fn list_all(&self) -> StoreResult<DocumentScan> {
        let mut documents: Vec<(String, Value)> = self
            .documents
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        documents.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(DocumentScan {
            documents,
            skipped: Vec::new(),
        })
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        Ok(self.documents.remove(key).is_some())
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    fn artifact_ref(&self, namespace: &str, name: &str) -> StoreResult<ArtifactRef> {
        Ok(ArtifactRef(Self::artifact_key(namespace, name)))
    }

    async fn put_file(
        &self,
        namespace: &str,
        name: &str,
        source: &Path,
    ) -> StoreResult<ArtifactRef> {
        let bytes = tokio::fs::read(source)
            .await
            .map_err(|e| StoreError::io(source, e))?;
        let key = Self::artifact_key(namespace, name);
        self.artifacts.insert(key.clone(), Arc::new(bytes));
        Ok(ArtifactRef(key))
    }

    async fn put_image(
        &self,
        namespace: &str,
        name: &str,
        image: DynamicImage,
    ) -> StoreResult<ArtifactRef> {
        let bytes = encode_png_blocking(name, image).await?;
        let key = Self::artifact_key(namespace, name);
        self.artifacts.insert(key.clone(), Arc::new(bytes));
        Ok(ArtifactRef(key))
    }

    async fn load_image(&self, artifact: &ArtifactRef) -> StoreResult<DynamicImage> {
        let bytes = self
            .artifacts
            .get(artifact.as_str())
            .map(|b| Arc::clone(b.value()))
            .ok_or_else(|| StoreError::ArtifactMissing(artifact.to_string()))?;
        decode_blocking(artifact.as_str(), bytes).await
    }

    async fn remove_all(&self, namespace: &str) -> StoreResult<()> {
        let prefix = Self::artifact_key(namespace, "");
        self.artifacts.retain(|key, _| !key.starts_with(&prefix));
        Ok(())
    }
}
