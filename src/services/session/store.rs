use chrono::Utc;
use image::DynamicImage;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::cache::SessionCache;
use crate::core::config::SessionConfig;
use crate::core::errors::{SessionError, SessionResult, StoreError};
use crate::core::types::{
    ArtifactRef, GroupMember, NewSession, Session, SessionView, StylePatch,
};
use crate::services::storage::{ArtifactStore, DocumentStore, FsStore, SkippedDocument};
use crate::utils::Metrics;

/// Fresh ids tried before giving up on a collision
const MAX_ID_ATTEMPTS: usize = 3;

const REPAIRED_NAME: &str = "repaired.png";
const BUBBLE_MASK_NAME: &str = "bubble_mask.png";
const TEXT_MASK_NAME: &str = "text_mask.png";

/// Sessions removed by `cleanup_older_than`
#[derive(Debug, Default, Clone)]
pub struct CleanupReport {
    pub removed: Vec<String>,
    pub skipped: Vec<SkippedDocument>,
}

/// Result of a full group index rebuild
#[derive(Debug, Default, Clone)]
pub struct IndexReport {
    pub sessions: usize,
    pub groups: usize,
    pub skipped: Vec<SkippedDocument>,
}

/// Durable editing sessions with a bounded cache-aside layer.
///
/// The document store is the source of truth. The cache and the group index
/// are accelerators guarded by one mutex; the lock is never held across I/O.
pub struct SessionStore {
    documents: Arc<dyn DocumentStore>,
    artifacts: Arc<dyn ArtifactStore>,
    state: Mutex<SessionCache>,
    // Serializes read-modify-write of persisted documents
    write_lock: tokio::sync::Mutex<()>,
    metrics: Option<Metrics>,
}

pub fn new_session_id() -> String {
    format!("edit_{}", Uuid::new_v4().simple())
}

fn parse_session(key: &str, document: Value) -> Result<Session, String> {
    let session: Session = serde_json::from_value(document).map_err(|e| e.to_string())?;
    if session.session_id != key {
        return Err(format!(
            "document id '{}' does not match key",
            session.session_id
        ));
    }
    Ok(session)
}

fn sort_members(members: &mut [GroupMember]) {
    members.sort_by(|a, b| {
        a.ordinal
            .cmp(&b.ordinal)
            .then_with(|| a.session_id.cmp(&b.session_id))
    });
}

impl SessionStore {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        artifacts: Arc<dyn ArtifactStore>,
        config: &SessionConfig,
    ) -> Self {
        Self {
            documents,
            artifacts,
            state: Mutex::new(SessionCache::new(config.cache_capacity, config.eviction_batch)),
            write_lock: tokio::sync::Mutex::new(()),
            metrics: None,
        }
    }

    /// Filesystem-backed store under `config.sessions_dir`
    pub async fn open(config: &SessionConfig) -> SessionResult<Self> {
        let fs = Arc::new(FsStore::open(&config.sessions_dir).await?);
        info!("Session store at {}", config.sessions_dir.display());
        Ok(Self::new(fs.clone(), fs, config))
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn cache_insert(&self, session: Session) {
        let (evicted, size) = {
            let mut state = self.state.lock();
            let evicted = state.insert(session);
            (evicted, state.len())
        };
        if evicted > 0 {
            debug!("Session cache full, evicted {} oldest entries", evicted);
        }
        if let Some(metrics) = &self.metrics {
            if evicted > 0 {
                metrics.record_session_evictions(evicted);
            }
            metrics.update_session_cache_size(size);
        }
    }

    /// Persist a composed page as a new editable session. Returns its id.
    #[instrument(skip(self, new), fields(ordinal = new.ordinal, source = %new.source_name))]
    pub async fn create_session(&self, new: NewSession) -> SessionResult<String> {
        let original_name = format!(
            "original.{}",
            new.original
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("png")
        );

        let mut reserved = None;
        for attempt in 1..=MAX_ID_ATTEMPTS {
            let session_id = new_session_id();
            let session = Session {
                group_id: new.group_id.clone().unwrap_or_else(|| session_id.clone()),
                ordinal: new.ordinal,
                created_at: Utc::now(),
                source_name: new.source_name.clone(),
                source_language: new.source_language.clone(),
                target_language: new.target_language.clone(),
                original_ref: self.artifacts.artifact_ref(&session_id, &original_name)?,
                repaired_ref: self.artifacts.artifact_ref(&session_id, REPAIRED_NAME)?,
                bubble_mask_ref: self.artifacts.artifact_ref(&session_id, BUBBLE_MASK_NAME)?,
                text_mask_ref: self.artifacts.artifact_ref(&session_id, TEXT_MASK_NAME)?,
                blocks: new.blocks.clone(),
                session_id,
            };

            let document = serde_json::to_value(&session).map_err(StoreError::from)?;
            if self.documents.put_new(&session.session_id, &document).await? {
                reserved = Some(session);
                break;
            }
            warn!(
                "Session id {} already taken (attempt {}/{})",
                session.session_id, attempt, MAX_ID_ATTEMPTS
            );
        }
        let Some(session) = reserved else {
            return Err(SessionError::IdCollision(new.source_name));
        };

        if let Err(e) = self.store_artifacts(&session, &new, &original_name).await {
            warn!("Rolling back session {}: {}", session.session_id, e);
            if let Err(rollback) = self.documents.delete(&session.session_id).await {
                warn!(
                    "Rollback left document {} behind: {}",
                    session.session_id, rollback
                );
            }
            if let Err(rollback) = self.artifacts.remove_all(&session.session_id).await {
                warn!(
                    "Rollback left artifacts of {} behind: {}",
                    session.session_id, rollback
                );
            }
            return Err(e);
        }

        let session_id = session.session_id.clone();
        {
            let mut state = self.state.lock();
            state.index_member(&session.group_id, session.member(), new.group_id.is_none());
        }
        self.cache_insert(session);
        if let Some(metrics) = &self.metrics {
            metrics.record_session_created();
        }

        info!("Created session {}", session_id);
        Ok(session_id)
    }

    async fn store_artifacts(
        &self,
        session: &Session,
        new: &NewSession,
        original_name: &str,
    ) -> SessionResult<()> {
        let ns = &session.session_id;
        self.artifacts.put_file(ns, original_name, &new.original).await?;
        self.artifacts.put_file(ns, REPAIRED_NAME, &new.repaired).await?;
        self.artifacts
            .put_image(ns, BUBBLE_MASK_NAME, DynamicImage::ImageLuma8(new.masks.bubble.clone()))
            .await?;
        self.artifacts
            .put_image(ns, TEXT_MASK_NAME, DynamicImage::ImageLuma8(new.masks.text.clone()))
            .await?;
        Ok(())
    }

    async fn load_from_store(&self, session_id: &str) -> SessionResult<Option<Session>> {
        let Some(document) = self.documents.get(session_id).await? else {
            return Ok(None);
        };
        let session = parse_session(session_id, document).map_err(|reason| {
            StoreError::Unavailable(format!("malformed session {session_id}: {reason}"))
        })?;
        Ok(Some(session))
    }

    /// Fetch a session and its group.
    ///
    /// `force_reload` bypasses the cache and rescans the group.
    #[instrument(skip(self))]
    pub async fn get_session(
        &self,
        session_id: &str,
        force_reload: bool,
    ) -> SessionResult<Option<SessionView>> {
        let cached = if force_reload {
            None
        } else {
            self.state.lock().get(session_id).cloned()
        };

        let session = match cached {
            Some(session) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_session_cache_hit();
                }
                session
            }
            None => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_session_cache_miss();
                }
                let Some(session) = self.load_from_store(session_id).await? else {
                    debug!("Session {} not found", session_id);
                    return Ok(None);
                };
                self.state
                    .lock()
                    .index_member(&session.group_id, session.member(), false);
                self.cache_insert(session.clone());
                session
            }
        };

        let mut members = self.resolve_group(&session, force_reload).await?;
        if !members.iter().any(|m| m.session_id == session.session_id) {
            members.push(session.member());
        }
        sort_members(&mut members);
        let siblings = members
            .iter()
            .filter(|m| m.session_id != session.session_id)
            .cloned()
            .collect();

        Ok(Some(SessionView {
            session,
            members,
            siblings,
        }))
    }

    async fn resolve_group(
        &self,
        session: &Session,
        force_reload: bool,
    ) -> SessionResult<Vec<GroupMember>> {
        if !force_reload {
            if let Some(members) = self.state.lock().complete_group(&session.group_id) {
                return Ok(members);
            }
        }

        let (sessions, _) = self.scan().await?;
        let members: Vec<GroupMember> = sessions
            .iter()
            .filter(|s| s.group_id == session.group_id)
            .map(Session::member)
            .collect();
        debug!(
            "Scanned group {}: {} members",
            session.group_id,
            members.len()
        );
        self.state
            .lock()
            .replace_group(&session.group_id, members.clone());
        Ok(members)
    }

    /// Every parseable session plus the documents that were skipped
    async fn scan(&self) -> SessionResult<(Vec<Session>, Vec<SkippedDocument>)> {
        let scan = self.documents.list_all().await?;
        let mut skipped = scan.skipped;
        let mut sessions = Vec::with_capacity(scan.documents.len());

        for (key, document) in scan.documents {
            match parse_session(&key, document) {
                Ok(session) => sessions.push(session),
                Err(reason) => {
                    warn!("Skipping malformed session document {}: {}", key, reason);
                    skipped.push(SkippedDocument { key, reason });
                }
            }
        }
        Ok((sessions, skipped))
    }

    /// Replace a block's translation and merge the given style fields.
    ///
    /// Returns `false` without touching anything when the session or block is unknown.
    #[instrument(skip(self, text, style))]
    pub async fn update_translation(
        &self,
        session_id: &str,
        block_id: u32,
        text: String,
        style: Option<StylePatch>,
    ) -> SessionResult<bool> {
        let _guard = self.write_lock.lock().await;

        let Some(view) = self.get_session(session_id, false).await? else {
            return Ok(false);
        };
        let mut session = view.session;
        let Some(block) = session.block_mut(block_id) else {
            debug!("Block {} not in session {}", block_id, session_id);
            return Ok(false);
        };

        block.translated_text = Some(text);
        if let Some(patch) = style {
            block.style.merge(&patch);
        }

        let document = serde_json::to_value(&session).map_err(StoreError::from)?;
        self.documents.put(session_id, &document).await?;
        self.cache_insert(session);
        Ok(true)
    }

    /// Delete sessions created more than `max_age_hours` ago, with their artifacts
    #[instrument(skip(self))]
    pub async fn cleanup_older_than(&self, max_age_hours: u64) -> SessionResult<CleanupReport> {
        let _guard = self.write_lock.lock().await;
        // An age beyond the representable range means nothing is old enough
        let Some(cutoff) = i64::try_from(max_age_hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            debug!("Age limit {}h predates any session; nothing to reap", max_age_hours);
            return Ok(CleanupReport::default());
        };
        let (sessions, skipped) = self.scan().await?;
        let mut report = CleanupReport {
            removed: Vec::new(),
            skipped,
        };

        for session in sessions.into_iter().filter(|s| s.created_at < cutoff) {
            self.documents.delete(&session.session_id).await?;
            self.artifacts.remove_all(&session.session_id).await?;
            {
                let mut state = self.state.lock();
                state.remove(&session.session_id);
                state.unindex_member(&session.group_id, &session.session_id);
            }
            report.removed.push(session.session_id);
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_sessions_reaped(report.removed.len());
            metrics.update_session_cache_size(self.cache_len());
        }
        info!(
            "Reaped {} sessions older than {}h",
            report.removed.len(),
            max_age_hours
        );
        Ok(report)
    }

    /// Evict one session, or everything when `session_id` is `None`.
    /// The group index is left intact.
    pub fn clear_cache(&self, session_id: Option<&str>) {
        let mut state = self.state.lock();
        match session_id {
            Some(id) => {
                state.remove(id);
            }
            None => state.clear(),
        }
    }

    /// Rebuild the whole group index from a full scan
    #[instrument(skip(self))]
    pub async fn rebuild_group_index(&self) -> SessionResult<IndexReport> {
        let (sessions, skipped) = self.scan().await?;
        let mut groups: HashMap<String, Vec<GroupMember>> = HashMap::new();
        for session in &sessions {
            groups
                .entry(session.group_id.clone())
                .or_default()
                .push(session.member());
        }

        let report = IndexReport {
            sessions: sessions.len(),
            groups: groups.len(),
            skipped,
        };
        self.state.lock().replace_index(groups);
        info!(
            "Rebuilt group index: {} sessions in {} groups ({} skipped)",
            report.sessions,
            report.groups,
            report.skipped.len()
        );
        Ok(report)
    }

    pub fn is_cached(&self, session_id: &str) -> bool {
        self.state.lock().contains(session_id)
    }

    pub fn cache_len(&self) -> usize {
        self.state.lock().len()
    }

    pub async fn load_artifact(&self, artifact: &ArtifactRef) -> SessionResult<DynamicImage> {
        Ok(self.artifacts.load_image(artifact).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{
        BackgroundClass, BackgroundMasks, BoundingBox, HorizontalAlign, TextBlock,
    };
    use crate::core::errors::StoreResult;
    use crate::services::storage::{write_png, DocumentScan, MemoryStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use image::{Rgba, RgbaImage};
    use serde_json::json;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        original: std::path::PathBuf,
        repaired: std::path::PathBuf,
        memory: MemoryStore,
        store: SessionStore,
    }

    async fn fixture(capacity: usize, eviction_batch: usize) -> Fixture {
        let dir = TempDir::new().unwrap();
        let original = dir.path().join("source.png");
        let repaired = dir.path().join("repaired.png");
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 8, Rgba([200, 200, 200, 255])));
        write_png(&original, img.clone()).await.unwrap();
        write_png(&repaired, img).await.unwrap();

        let memory = MemoryStore::new();
        let config = SessionConfig {
            cache_capacity: capacity,
            eviction_batch,
            ..SessionConfig::default()
        };
        let store = SessionStore::new(Arc::new(memory.clone()), Arc::new(memory.clone()), &config);
        Fixture {
            _dir: dir,
            original,
            repaired,
            memory,
            store,
        }
    }

    fn new_session(fx: &Fixture, group: Option<&str>, ordinal: usize) -> NewSession {
        let mut block = TextBlock::new(0, BoundingBox::new(1, 1, 6, 6), BackgroundClass::Bubble);
        block.source_text = "こんにちは".to_string();
        block.translated_text = Some("Hello".to_string());
        NewSession {
            group_id: group.map(str::to_string),
            ordinal,
            source_name: format!("page{ordinal}.png"),
            source_language: "ja".to_string(),
            target_language: "en".to_string(),
            original: fx.original.clone(),
            repaired: fx.repaired.clone(),
            blocks: vec![block],
            masks: BackgroundMasks::empty(8, 8),
        }
    }

    #[tokio::test]
    async fn test_create_and_get_singleton_group() {
        let fx = fixture(100, 10).await;
        let id = fx.store.create_session(new_session(&fx, None, 0)).await.unwrap();

        assert!(id.starts_with("edit_"));
        assert_eq!(id.len(), "edit_".len() + 32);

        let view = fx.store.get_session(&id, false).await.unwrap().unwrap();
        assert_eq!(view.session.group_id, id);
        assert!(view.siblings.is_empty());
        assert_eq!(view.members.len(), 1);
        // original, repaired and both masks
        assert_eq!(fx.memory.artifact_count(), 4);
    }

    #[tokio::test]
    async fn test_unknown_session_is_none() {
        let fx = fixture(100, 10).await;
        assert!(fx.store.get_session("edit_nope", false).await.unwrap().is_none());
        assert!(fx.store.get_session("edit_nope", true).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_siblings_sorted_by_ordinal_excluding_self() {
        let fx = fixture(100, 10).await;
        let third = fx.store.create_session(new_session(&fx, Some("grp"), 2)).await.unwrap();
        let first = fx.store.create_session(new_session(&fx, Some("grp"), 0)).await.unwrap();
        let second = fx.store.create_session(new_session(&fx, Some("grp"), 1)).await.unwrap();
        fx.store.create_session(new_session(&fx, Some("other"), 0)).await.unwrap();

        let view = fx.store.get_session(&second, false).await.unwrap().unwrap();
        let siblings: Vec<&str> = view.siblings.iter().map(|m| m.session_id.as_str()).collect();
        assert_eq!(siblings, vec![first.as_str(), third.as_str()]);
        assert_eq!(view.members.len(), 3);
    }

    #[tokio::test]
    async fn test_group_scan_finds_sessions_from_other_writers() {
        let fx = fixture(100, 10).await;
        let mine = fx.store.create_session(new_session(&fx, Some("grp"), 1)).await.unwrap();

        // A second store over the same documents writes another member
        let other = SessionStore::new(
            Arc::new(fx.memory.clone()),
            Arc::new(fx.memory.clone()),
            &SessionConfig::default(),
        );
        let theirs = other.create_session(new_session(&fx, Some("grp"), 0)).await.unwrap();

        let view = fx.store.get_session(&mine, false).await.unwrap().unwrap();
        assert_eq!(view.siblings.len(), 1);
        assert_eq!(view.siblings[0].session_id, theirs);
    }

    #[tokio::test]
    async fn test_eviction_keeps_everything_reloadable() {
        let fx = fixture(100, 10).await;
        let mut ids = Vec::new();
        for i in 0..110 {
            ids.push(fx.store.create_session(new_session(&fx, Some("big"), i)).await.unwrap());
        }

        assert!(fx.store.cache_len() <= 100);
        let cached = ids.iter().filter(|id| fx.store.is_cached(id)).count();
        assert!(cached <= 100);
        assert!(!fx.store.is_cached(&ids[0]));

        for id in &ids {
            let view = fx.store.get_session(id, true).await.unwrap();
            assert_eq!(view.map(|v| v.session.session_id), Some(id.clone()));
        }
        assert!(fx.store.cache_len() <= 100);
    }

    #[tokio::test]
    async fn test_update_translation_merges_style() {
        let fx = fixture(100, 10).await;
        let id = fx.store.create_session(new_session(&fx, None, 0)).await.unwrap();

        let patch = StylePatch {
            align: Some(HorizontalAlign::Left),
            ..StylePatch::default()
        };
        assert!(fx
            .store
            .update_translation(&id, 0, "Hi there".to_string(), Some(patch))
            .await
            .unwrap());
        let patch = StylePatch {
            font_size: Some(24),
            ..StylePatch::default()
        };
        assert!(fx
            .store
            .update_translation(&id, 0, "Hi there".to_string(), Some(patch))
            .await
            .unwrap());

        // Durable copy reflects both updates
        fx.store.clear_cache(None);
        let view = fx.store.get_session(&id, false).await.unwrap().unwrap();
        let block = &view.session.blocks[0];
        assert_eq!(block.translated_text.as_deref(), Some("Hi there"));
        assert_eq!(block.style.align, HorizontalAlign::Left);
        assert_eq!(block.style.font_size, 24);
        assert!(!block.style.italic);
    }

    #[tokio::test]
    async fn test_update_unknown_targets_is_false() {
        let fx = fixture(100, 10).await;
        let id = fx.store.create_session(new_session(&fx, None, 0)).await.unwrap();
        let before = fx.memory.get(&id).await.unwrap();

        assert!(!fx
            .store
            .update_translation("edit_missing", 0, "x".to_string(), None)
            .await
            .unwrap());
        assert!(!fx
            .store
            .update_translation(&id, 99, "x".to_string(), None)
            .await
            .unwrap());
        assert_eq!(fx.memory.get(&id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_cleanup_removes_old_sessions_and_artifacts() {
        let fx = fixture(100, 10).await;
        let old = fx.store.create_session(new_session(&fx, Some("g"), 0)).await.unwrap();
        let fresh = fx.store.create_session(new_session(&fx, Some("g"), 1)).await.unwrap();

        // Backdate one document by two days
        let mut doc = fx.memory.get(&old).await.unwrap().unwrap();
        doc["created_at"] = json!((Utc::now() - chrono::Duration::hours(48)).to_rfc3339());
        fx.memory.put(&old, &doc).await.unwrap();

        let report = fx.store.cleanup_older_than(24).await.unwrap();
        assert_eq!(report.removed, vec![old.clone()]);
        assert!(!fx.store.is_cached(&old));
        assert!(fx.store.get_session(&old, true).await.unwrap().is_none());
        assert_eq!(fx.memory.artifact_count(), 4);

        let view = fx.store.get_session(&fresh, false).await.unwrap().unwrap();
        assert!(view.siblings.is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_with_huge_age_keeps_everything() {
        let fx = fixture(100, 10).await;
        let id = fx.store.create_session(new_session(&fx, None, 0)).await.unwrap();

        for hours in [u64::MAX, i64::MAX as u64, i64::MAX as u64 / 2] {
            let report = fx.store.cleanup_older_than(hours).await.unwrap();
            assert!(report.removed.is_empty(), "{hours}h removed {:?}", report.removed);
        }
        assert!(fx.store.get_session(&id, true).await.unwrap().is_some());
    }

    /// Document store where every id is already taken
    struct TakenIds {
        inner: MemoryStore,
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl DocumentStore for TakenIds {
        async fn put(&self, key: &str, document: &Value) -> StoreResult<()> {
            self.inner.put(key, document).await
        }

        async fn put_new(&self, _: &str, _: &Value) -> StoreResult<bool> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Ok(false)
        }

        async fn get(&self, key: &str) -> StoreResult<Option<Value>> {
            self.inner.get(key).await
        }

        async fn list_all(&self) -> StoreResult<DocumentScan> {
            self.inner.list_all().await
        }

        async fn delete(&self, key: &str) -> StoreResult<bool> {
            self.inner.delete(key).await
        }
    }

    #[tokio::test]
    async fn test_id_collision_gives_up_after_retries() {
        let fx = fixture(100, 10).await;
        let documents = Arc::new(TakenIds {
            inner: MemoryStore::new(),
            attempts: AtomicUsize::new(0),
        });
        let store = SessionStore::new(
            documents.clone(),
            Arc::new(fx.memory.clone()),
            &SessionConfig::default(),
        );

        let err = store.create_session(new_session(&fx, None, 0)).await.unwrap_err();
        assert!(matches!(err, SessionError::IdCollision(ref name) if name == "page0.png"));
        assert_eq!(documents.attempts.load(Ordering::SeqCst), MAX_ID_ATTEMPTS);
        assert_eq!(fx.memory.artifact_count(), 0);
        assert_eq!(store.cache_len(), 0);
    }

    #[tokio::test]
    async fn test_failed_artifact_upload_rolls_back() {
        let fx = fixture(100, 10).await;
        // The original copies fine, then the repaired page is missing
        let mut new = new_session(&fx, Some("grp"), 0);
        new.repaired = fx._dir.path().join("missing.png");

        let err = fx.store.create_session(new).await.unwrap_err();
        assert!(matches!(err, SessionError::Store(StoreError::Io { .. })));
        assert_eq!(fx.memory.document_count(), 0);
        assert_eq!(fx.memory.artifact_count(), 0);
        assert_eq!(fx.store.cache_len(), 0);
        assert_eq!(fx.store.rebuild_group_index().await.unwrap().sessions, 0);
    }

    #[tokio::test]
    async fn test_rebuild_index_skips_malformed() {
        let fx = fixture(100, 10).await;
        fx.store.create_session(new_session(&fx, Some("a"), 0)).await.unwrap();
        fx.store.create_session(new_session(&fx, Some("b"), 0)).await.unwrap();
        fx.memory.put("edit_broken", &json!({"nope": 1})).await.unwrap();

        let report = fx.store.rebuild_group_index().await.unwrap();
        assert_eq!(report.sessions, 2);
        assert_eq!(report.groups, 2);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].key, "edit_broken");
    }

    #[tokio::test]
    async fn test_clear_cache_single_entry() {
        let fx = fixture(100, 10).await;
        let a = fx.store.create_session(new_session(&fx, None, 0)).await.unwrap();
        let b = fx.store.create_session(new_session(&fx, None, 1)).await.unwrap();

        fx.store.clear_cache(Some(&a));
        assert!(!fx.store.is_cached(&a));
        assert!(fx.store.is_cached(&b));
        assert!(fx.store.get_session(&a, false).await.unwrap().is_some());
        assert!(fx.store.is_cached(&a));
    }
}
