// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod ids;
mod session;
mod store;

pub use session::{
    AssetKind, AudioRecord, CleanupReport, DiffRecord, ImageRecord, MemoryEntry, Session,
    SessionData, SessionError, Todo, TodoStatus,
};
pub use store::SessionStore;
