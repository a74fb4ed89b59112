use crate::{
    error::{ApiError, Result},
    models::ChatMessage,
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

const MAX_SESSION_ID_LEN: usize = 64;
const CLEANUP_THRESHOLD: usize = 1000;

struct Session {
    messages: Vec<ChatMessage>,
    last_active: Instant,
}

/// Bounded, expiring chat transcripts keyed by session id.
#[derive(Clone)]
pub struct ChatSessionStore {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    history_limit: usize,
    ttl: Duration,
}

impl ChatSessionStore {
    pub fn new(history_limit: usize, ttl_secs: u64) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            history_limit: history_limit.max(2),
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    /// Validates a caller-supplied id, or mints a new one.
    pub fn resolve_id(requested: Option<&str>) -> Result<String> {
        match requested.map(str::trim) {
            None | Some("") => Ok(Uuid::new_v4().to_string()),
            Some(id)
                if id.len() <= MAX_SESSION_ID_LEN
                    && id
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') =>
            {
                Ok(id.to_string())
            }
            Some(_) => Err(ApiError::InvalidInput("Invalid session id".to_string())),
        }
    }

    /// Live history for `id`, or empty when the session is unknown or expired.
    pub fn recent(&self, id: &str) -> Vec<ChatMessage> {
        match self.sessions.read() {
            Ok(sessions) => sessions
                .get(id)
                .filter(|s| s.last_active.elapsed() < self.ttl)
                .map(|s| s.messages.clone())
                .unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }

    pub fn history(&self, id: &str) -> Result<Vec<ChatMessage>> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| ApiError::InternalError("Chat session lock poisoned".to_string()))?;

        sessions
            .get(id)
            .filter(|s| s.last_active.elapsed() < self.ttl)
            .map(|s| s.messages.clone())
            .ok_or_else(|| ApiError::NotFound(format!("Chat session {} not found", id)))
    }

    /// Appends turns, dropping the oldest beyond the history limit, and
    /// returns the stored transcript.
    pub fn append(&self, id: &str, turns: Vec<ChatMessage>) -> Result<Vec<ChatMessage>> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| ApiError::InternalError("Chat session lock poisoned".to_string()))?;

        let session = sessions.entry(id.to_string()).or_insert_with(|| Session {
            messages: Vec::new(),
            last_active: Instant::now(),
        });
        if session.last_active.elapsed() >= self.ttl {
            debug!("Chat session {} expired, starting over", id);
            session.messages.clear();
        }

        session.messages.extend(turns);
        let overflow = session.messages.len().saturating_sub(self.history_limit);
        session.messages.drain(..overflow);
        session.last_active = Instant::now();
        let transcript = session.messages.clone();

        if sessions.len() > CLEANUP_THRESHOLD {
            self.cleanup(&mut sessions);
        }

        Ok(transcript)
    }

    pub fn clear(&self, id: &str) -> Result<()> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| ApiError::InternalError("Chat session lock poisoned".to_string()))?;
        sessions
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ApiError::NotFound(format!("Chat session {} not found", id)))
    }

    pub fn purge_expired(&self) {
        if let Ok(mut sessions) = self.sessions.write() {
            self.cleanup(&mut sessions);
        }
    }

    fn cleanup(&self, sessions: &mut HashMap<String, Session>) {
        sessions.retain(|_, s| s.last_active.elapsed() < self.ttl);
        info!("Cleaned up chat sessions, remaining: {}", sessions.len());
    }
}
