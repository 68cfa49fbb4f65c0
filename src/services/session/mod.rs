//! Editing sessions: durable per-page snapshots that can be re-rendered after edits.

mod cache;
pub mod editor;
pub mod store;

pub use editor::SessionEditor;
pub use store::{new_session_id, CleanupReport, IndexReport, SessionStore};
