// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use tern_model::{ContentBlock, Message, MessageContent};

use crate::ids;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("asset not found: {0}")]
    NotFound(String),
    #[error("asset {0} is corrupt: {1}")]
    Corrupt(String, String),
    #[error("session io: {0}")]
    Io(#[from] std::io::Error),
    #[error("session json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Where an asset came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    /// Supplied by the user as input to a generation flow.
    Reference,
    /// Produced by a model.
    Generated,
    /// Synthesized narration audio.
    Voiceover,
}

/// A binary asset carried inside the session JSON as base64.
/// Assets never exist as separate files on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: String,
    pub kind: AssetKind,
    pub mime_type: String,
    pub data_b64: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reference_images: Vec<String>,
    /// The provider's raw model message, kept verbatim so a generation flow
    /// can replay it as conversation history.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_model_message: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioRecord {
    pub id: String,
    pub kind: AssetKind,
    pub mime_type: String,
    pub data_b64: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Todo {
    pub id: String,
    pub status: TodoStatus,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub title: String,
    pub knowledge_to_store: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-edit diff captured from a tool's side-effect channel, keyed by the
/// tool call id that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffRecord {
    pub diff: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_command: Option<String>,
    pub tool_name: String,
}

/// Tool-side scratch state persisted with the session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionData {
    #[serde(default)]
    pub todos: Vec<Todo>,
    #[serde(default)]
    pub memories: Vec<MemoryEntry>,
    /// First-seen content of every file a tool has touched, keyed by
    /// workspace-relative path.
    #[serde(default)]
    pub file_originals: BTreeMap<String, String>,
    #[serde(default)]
    pub diffs: BTreeMap<String, DiffRecord>,
    /// Raw model messages from prior Gemini image-generation turns, replayed
    /// as history on the next generation call.
    #[serde(default)]
    pub gemini_image_history: Vec<serde_json::Value>,
    #[serde(default)]
    pub gemini_video_history: Vec<serde_json::Value>,
}

/// Ids removed/kept by an image sweep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanupReport {
    pub removed_ids: Vec<String>,
    pub kept_ids: Vec<String>,
}

/// A conversation session: the message journal plus its asset maps and
/// tool scratch state.
///
/// Transient until [`Session::enable_persistence`] is called; afterwards
/// every public mutator performs a full-file rewrite of
/// `<chats_dir>/chat.<id>.json`.  There is no incremental journaling, and
/// concurrent writers must be serialized by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub model_name: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub images: BTreeMap<String, ImageRecord>,
    #[serde(default)]
    pub audio: BTreeMap<String, AudioRecord>,
    #[serde(default)]
    pub data: SessionData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<PathBuf>,
    #[serde(skip)]
    pub persistent: bool,
    #[serde(skip)]
    pub(crate) chats_dir: Option<PathBuf>,
}

impl Session {
    /// Create a transient session.
    pub fn new_chat(model_name: impl Into<String>) -> Self {
        Self {
            id: ids::new_id(),
            title: None,
            model_name: model_name.into(),
            messages: Vec::new(),
            images: BTreeMap::new(),
            audio: BTreeMap::new(),
            data: SessionData::default(),
            base_dir: None,
            persistent: false,
            chats_dir: None,
        }
    }

    /// Turn persistence on and write the current state immediately.
    pub fn enable_persistence(&mut self, chats_dir: impl Into<PathBuf>) -> Result<(), SessionError> {
        self.chats_dir = Some(chats_dir.into());
        self.persistent = true;
        self.save()
    }

    /// Full-file rewrite.  A no-op for transient sessions.
    pub fn save(&self) -> Result<(), SessionError> {
        if !self.persistent {
            return Ok(());
        }
        let dir = match &self.chats_dir {
            Some(d) => d,
            None => return Ok(()),
        };
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("chat.{}.json", self.id));
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;
        debug!(path = %path.display(), "session saved");
        Ok(())
    }

    pub fn add_message(&mut self, message: Message) -> Result<(), SessionError> {
        self.messages.push(message);
        self.save()
    }

    pub fn set_title(&mut self, title: impl Into<String>) -> Result<(), SessionError> {
        self.title = Some(title.into());
        self.save()
    }

    // ── Assets ────────────────────────────────────────────────────────────────

    pub fn add_image(&mut self, record: ImageRecord) -> Result<(), SessionError> {
        self.images.insert(record.id.clone(), record);
        self.save()
    }

    pub fn image(&self, id: &str) -> Option<&ImageRecord> {
        self.images.get(id)
    }

    /// Images filtered by kind; `None` lists everything.
    pub fn list_images(&self, kind: Option<AssetKind>) -> Vec<&ImageRecord> {
        self.images
            .values()
            .filter(|r| kind.map_or(true, |k| r.kind == k))
            .collect()
    }

    /// Raw bytes of an image, decoded from its base64 payload.
    pub fn image_data(&self, id: &str) -> Result<Vec<u8>, SessionError> {
        let record = self
            .images
            .get(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        if record.data_b64.is_empty() {
            return Err(SessionError::Corrupt(id.to_string(), "empty payload".into()));
        }
        B64.decode(&record.data_b64)
            .map_err(|e| SessionError::Corrupt(id.to_string(), e.to_string()))
    }

    pub fn add_audio(&mut self, record: AudioRecord) -> Result<(), SessionError> {
        self.audio.insert(record.id.clone(), record);
        self.save()
    }

    pub fn audio_record(&self, id: &str) -> Option<&AudioRecord> {
        self.audio.get(id)
    }

    pub fn audio_data(&self, id: &str) -> Result<Vec<u8>, SessionError> {
        let record = self
            .audio
            .get(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        if record.data_b64.is_empty() {
            return Err(SessionError::Corrupt(id.to_string(), "empty payload".into()));
        }
        B64.decode(&record.data_b64)
            .map_err(|e| SessionError::Corrupt(id.to_string(), e.to_string()))
    }

    /// Delete image records no message references.
    ///
    /// The reachable set is computed from every structured content block's
    /// `images`, `reference_images`, `reference_image_ids`, and asset `id`
    /// fields.  This never runs automatically: generation flows stage assets
    /// before any message references them, and an auto-sweep on save would
    /// delete the staged records.
    pub fn cleanup_images(&mut self) -> Result<CleanupReport, SessionError> {
        let reachable = self.reachable_image_ids();
        let mut report = CleanupReport::default();
        let all_ids: Vec<String> = self.images.keys().cloned().collect();
        for id in all_ids {
            if reachable.contains(&id) {
                report.kept_ids.push(id);
            } else {
                self.images.remove(&id);
                report.removed_ids.push(id);
            }
        }
        if !report.removed_ids.is_empty() {
            debug!(
                removed = report.removed_ids.len(),
                kept = report.kept_ids.len(),
                "image sweep"
            );
            self.save()?;
        }
        Ok(report)
    }

    fn reachable_image_ids(&self) -> HashSet<String> {
        let mut reachable = HashSet::new();
        for m in &self.messages {
            if let MessageContent::Block(block) = &m.content {
                match block {
                    ContentBlock::ImagePrompt {
                        images,
                        reference_image_ids,
                        ..
                    } => {
                        reachable.extend(images.iter().cloned());
                        reachable.extend(reference_image_ids.iter().cloned());
                    }
                    ContentBlock::Image {
                        id,
                        reference_images,
                    } => {
                        reachable.insert(id.clone());
                        reachable.extend(reference_images.iter().cloned());
                    }
                    ContentBlock::VideoPrompt { images, .. } => {
                        reachable.extend(images.iter().cloned());
                    }
                    ContentBlock::Video { id } => {
                        reachable.insert(id.clone());
                    }
                }
            }
        }
        reachable
    }

    // ── Tool scratch state ────────────────────────────────────────────────────

    pub fn record_diff(&mut self, call_id: &str, record: DiffRecord) -> Result<(), SessionError> {
        self.data.diffs.insert(call_id.to_string(), record);
        self.save()
    }

    /// Snapshot the original content of `path` the first time a tool touches
    /// it.  Later writes keep the first snapshot.
    pub fn record_file_original(
        &mut self,
        path: &str,
        content: &str,
    ) -> Result<(), SessionError> {
        if !self.data.file_originals.contains_key(path) {
            self.data
                .file_originals
                .insert(path.to_string(), content.to_string());
            self.save()?;
        }
        Ok(())
    }

    /// Clear a stale responses-dialect continuation token wherever it is
    /// stored.  Returns true when a message was modified.
    pub fn clear_response_id(&mut self, response_id: &str) -> Result<bool, SessionError> {
        let mut cleared = false;
        for m in &mut self.messages {
            if m.response_id.as_deref() == Some(response_id) {
                m.response_id = None;
                cleared = true;
            }
        }
        if cleared {
            self.save()?;
        }
        Ok(cleared)
    }

    /// The most recent continuation token in the journal, if any.
    pub fn last_response_id(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find_map(|m| m.response_id.as_deref())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
