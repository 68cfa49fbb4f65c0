use image::{DynamicImage, RgbaImage};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument};

use super::store::SessionStore;
use crate::core::errors::{SessionError, SessionResult};
use crate::core::types::{ArtifactRef, BackgroundMasks};
use crate::services::rendering::LayoutEngine;
use crate::services::storage::{encode_png_blocking, ArtifactStore};
use crate::utils::to_data_url;

/// Editing API: re-renders sessions after their text was changed
pub struct SessionEditor {
    sessions: Arc<SessionStore>,
    engine: Arc<LayoutEngine>,
    output: Arc<dyn ArtifactStore>,
}

impl SessionEditor {
    pub fn new(
        sessions: Arc<SessionStore>,
        engine: Arc<LayoutEngine>,
        output: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            sessions,
            engine,
            output,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Current blocks drawn onto the session's repaired background
    pub async fn render(&self, session_id: &str) -> SessionResult<Option<RgbaImage>> {
        let Some(view) = self.sessions.get_session(session_id, false).await? else {
            return Ok(None);
        };
        let session = view.session;

        let repaired = self.sessions.load_artifact(&session.repaired_ref).await?.to_rgba8();
        let masks = BackgroundMasks {
            bubble: self.sessions.load_artifact(&session.bubble_mask_ref).await?.to_luma8(),
            text: self.sessions.load_artifact(&session.text_mask_ref).await?.to_luma8(),
        };

        let engine = Arc::clone(&self.engine);
        let task_id = session.session_id;
        let blocks = session.blocks;
        let rendered = tokio::task::spawn_blocking(move || engine.redraw(&repaired, &blocks, &masks))
            .await
            .map_err(|e| SessionError::TaskJoinFailed(e.to_string()))?
            .map_err(|source| SessionError::Rendering {
                session_id: task_id,
                source,
            })?;
        Ok(Some(rendered))
    }

    /// Re-rendered page as a `data:image/png;base64,...` URL
    #[instrument(skip(self))]
    pub async fn generate_preview(&self, session_id: &str) -> SessionResult<Option<String>> {
        let Some(rendered) = self.render(session_id).await? else {
            return Ok(None);
        };
        let png = encode_png_blocking(session_id, DynamicImage::ImageRgba8(rendered)).await?;
        Ok(Some(to_data_url(&png)))
    }

    /// Write the re-rendered page to the output store.
    ///
    /// `name` defaults to `edited_<source stem>.png`.
    #[instrument(skip(self))]
    pub async fn save_edited_image(
        &self,
        session_id: &str,
        name: Option<&str>,
    ) -> SessionResult<Option<ArtifactRef>> {
        let Some(view) = self.sessions.get_session(session_id, false).await? else {
            return Ok(None);
        };
        let Some(rendered) = self.render(session_id).await? else {
            return Ok(None);
        };

        let file_name = match name {
            Some(name) => name.to_string(),
            None => {
                let stem = Path::new(&view.session.source_name)
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| session_id.to_string());
                format!("edited_{stem}.png")
            }
        };

        let artifact = self
            .output
            .put_image("", &file_name, DynamicImage::ImageRgba8(rendered))
            .await?;
        info!("Saved edited page {} for session {}", artifact, session_id);
        Ok(Some(artifact))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::SessionConfig;
    use crate::core::types::{BackgroundClass, BoundingBox, NewSession, TextBlock};
    use crate::services::rendering::test_support::engine;
    use crate::services::storage::{write_png, MemoryStore};
    use image::Rgba;
    use tempfile::TempDir;

    async fn editor_with_session() -> (TempDir, SessionEditor, MemoryStore, String) {
        let dir = TempDir::new().unwrap();
        let original = dir.path().join("source.png");
        let repaired = dir.path().join("repaired.png");
        let page = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            64,
            64,
            Rgba([255, 255, 255, 255]),
        ));
        write_png(&original, page.clone()).await.unwrap();
        write_png(&repaired, page).await.unwrap();

        let memory = MemoryStore::new();
        let sessions = Arc::new(SessionStore::new(
            Arc::new(memory.clone()),
            Arc::new(memory.clone()),
            &SessionConfig::default(),
        ));
        let mut block = TextBlock::new(0, BoundingBox::new(4, 4, 60, 60), BackgroundClass::Bubble);
        block.translated_text = Some("Hey".to_string());
        let id = sessions
            .create_session(NewSession {
                group_id: None,
                ordinal: 0,
                source_name: "chapter1_p3.jpg".to_string(),
                source_language: "ja".to_string(),
                target_language: "en".to_string(),
                original,
                repaired,
                blocks: vec![block],
                masks: BackgroundMasks::empty(64, 64),
            })
            .await
            .unwrap();

        let output = MemoryStore::new();
        let editor = SessionEditor::new(sessions, Arc::new(engine()), Arc::new(output.clone()));
        (dir, editor, output, id)
    }

    #[tokio::test]
    async fn test_preview_reflects_updated_text() {
        let (_dir, editor, _, id) = editor_with_session().await;
        let before = editor.render(&id).await.unwrap().unwrap();

        editor
            .sessions()
            .update_translation(&id, 0, "A much longer line".to_string(), None)
            .await
            .unwrap();
        let after = editor.render(&id).await.unwrap().unwrap();
        assert_ne!(before, after);

        let url = editor.generate_preview(&id).await.unwrap().unwrap();
        assert!(url.starts_with("data:image/png;base64,"));
    }

    #[tokio::test]
    async fn test_save_uses_source_stem() {
        let (_dir, editor, output, id) = editor_with_session().await;
        let artifact = editor.save_edited_image(&id, None).await.unwrap().unwrap();
        assert_eq!(artifact.as_str(), "mem:///edited_chapter1_p3.png");
        assert_eq!(output.artifact_count(), 1);

        assert!(editor.save_edited_image("edit_missing", None).await.unwrap().is_none());
    }
}
