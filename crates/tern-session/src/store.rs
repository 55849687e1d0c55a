// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::session::{Session, SessionError};

/// Loads and lists persisted sessions from a chats directory.
///
/// One file per session: `chat.<id>.json`.  The store is not safe for
/// concurrent writers on the same id; callers keep one live driver per
/// session.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

/// Summary row returned by [`SessionStore::list`].
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub id: String,
    pub title: Option<String>,
    pub model_name: String,
    pub message_count: usize,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load one session.  An absent file is `Ok(None)`, not an error;
    /// malformed JSON is an explicit error.
    pub fn load(&self, id: &str) -> Result<Option<Session>, SessionError> {
        let path = self.dir.join(format!("chat.{id}.json"));
        let text = match std::fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut session: Session = serde_json::from_str(&text)?;
        session.persistent = true;
        session.chats_dir = Some(self.dir.clone());
        debug!(id = %session.id, messages = session.messages.len(), "session loaded");
        Ok(Some(session))
    }

    /// List all sessions in the directory.  A malformed file is skipped with
    /// a warning so one corrupt session never hides the rest.
    pub fn list(&self) -> Result<Vec<SessionSummary>, SessionError> {
        let mut out = Vec::new();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let id = match name
                .strip_prefix("chat.")
                .and_then(|rest| rest.strip_suffix(".json"))
            {
                Some(id) => id.to_string(),
                None => continue,
            };
            let text = match std::fs::read_to_string(entry.path()) {
                Ok(t) => t,
                Err(e) => {
                    warn!(file = %name, error = %e, "skipping unreadable session file");
                    continue;
                }
            };
            match serde_json::from_str::<Session>(&text) {
                Ok(s) => out.push(SessionSummary {
                    id,
                    title: s.title,
                    model_name: s.model_name,
                    message_count: s.messages.len(),
                }),
                Err(e) => {
                    warn!(file = %name, error = %e, "skipping malformed session file");
                }
            }
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use tern_model::Message;

    use super::*;

    #[test]
    fn load_absent_session_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        assert!(store.load("0123456789abcdef0123").unwrap().is_none());
    }

    #[test]
    fn save_then_load_round_trips_and_restores_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = Session::new_chat("main");
        s.enable_persistence(dir.path()).unwrap();
        s.add_message(Message::user("persisted?")).unwrap();

        let store = SessionStore::new(dir.path());
        let loaded = store.load(&s.id).unwrap().expect("session should exist");
        assert!(loaded.persistent);
        assert_eq!(loaded.messages.len(), 1);
        assert_eq!(loaded.messages[0].as_text(), Some("persisted?"));
    }

    #[test]
    fn loaded_session_keeps_saving_to_the_same_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = Session::new_chat("main");
        s.enable_persistence(dir.path()).unwrap();
        let id = s.id.clone();

        let store = SessionStore::new(dir.path());
        let mut loaded = store.load(&id).unwrap().unwrap();
        loaded.add_message(Message::user("second write")).unwrap();

        let reloaded = store.load(&id).unwrap().unwrap();
        assert_eq!(reloaded.messages.len(), 1);
    }

    #[test]
    fn list_skips_malformed_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut good = Session::new_chat("main");
        good.enable_persistence(dir.path()).unwrap();
        std::fs::write(dir.path().join("chat.deadbeef.json"), "{not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let store = SessionStore::new(dir.path());
        let rows = store.list().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, good.id);
    }

    #[test]
    fn load_malformed_session_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("chat.abc.json"), "{broken").unwrap();
        let store = SessionStore::new(dir.path());
        assert!(store.load("abc").is_err());
    }

    #[test]
    fn list_missing_directory_is_empty() {
        let store = SessionStore::new("/no/such/chats/dir");
        assert!(store.list().unwrap().is_empty());
    }
}
