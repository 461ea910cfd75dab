//! Per-upload progress tracking
//!
//! One mutex guards the whole session map. It is held only for the
//! constant-time map operation itself, never across `.await`, file I/O or
//! encoder invocation. Sessions are retained for the life of the process;
//! only the two early-abort paths (empty payload, missing file part) remove
//! them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::models::{SessionUpdate, UploadSession, UploadStatus};

/// Shared registry of upload sessions
#[derive(Debug, Clone, Default)]
pub struct SessionTracker {
    sessions: Arc<Mutex<HashMap<Uuid, UploadSession>>>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, UploadSession>> {
        // A panic while holding the guard cannot leave a half-applied map
        // operation behind, so a poisoned lock is still usable.
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a new session in the UPLOADING state
    ///
    /// An id whose session is still in progress is left alone and `false`
    /// returned; a finished session with the same id is replaced.
    pub fn create(&self, id: Uuid, filename: Option<String>, total_bytes: Option<u64>) -> bool {
        {
            let mut sessions = self.lock();
            if sessions.get(&id).is_some_and(|s| !s.status.is_terminal()) {
                drop(sessions);
                tracing::warn!(session_id = %id, "Upload session id already in use");
                return false;
            }
            sessions.insert(id, UploadSession::new(id, filename, total_bytes));
        }
        tracing::debug!(session_id = %id, ?total_bytes, "Upload session created");
        true
    }

    /// Record receipt progress; unknown ids are ignored
    pub fn update_bytes(&self, id: Uuid, received: u64, total: Option<u64>) {
        if let Some(session) = self.lock().get_mut(&id) {
            session.update_bytes(received, total);
        }
    }

    /// Apply a status transition; returns false for unknown ids
    pub fn transition(&self, id: Uuid, status: UploadStatus, update: SessionUpdate) -> bool {
        let applied = match self.lock().get_mut(&id) {
            Some(session) => {
                session.transition_to(status, update);
                true
            }
            None => false,
        };

        if applied {
            tracing::debug!(session_id = %id, ?status, "Upload session transition");
        } else {
            tracing::warn!(session_id = %id, ?status, "Transition for unknown upload session");
        }
        applied
    }

    /// Snapshot of one session
    pub fn get(&self, id: Uuid) -> Option<UploadSession> {
        self.lock().get(&id).cloned()
    }

    /// Drop a session (early-abort paths only)
    pub fn remove(&self, id: Uuid) -> Option<UploadSession> {
        self.lock().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
