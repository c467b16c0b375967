//! Storage trait for sessions.
//!
//! The budgeting core never writes to disk; it mutates a [`Session`] in
//! memory and hands it back to a [`SessionStore`] to persist.
//!
//! # Built-in Implementation
//!
//! [`InMemorySessionStore`] is suitable for testing and single-process
//! deployments. For production, implement the trait over your own backend
//! (JSONL files, Postgres, Redis).

use crate::session::Session;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

/// Trait for loading and saving sessions.
///
/// Callers hold a single writer per session key; the store does not
/// serialize concurrent turns on the same session.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session by key.
    ///
    /// # Errors
    /// Returns an error if the session cannot be read.
    async fn load(&self, key: &str) -> Result<Option<Session>>;

    /// Persist a session, replacing any previous copy.
    ///
    /// # Errors
    /// Returns an error if the session cannot be written.
    async fn save(&self, session: &Session) -> Result<()>;

    /// Delete a session.
    ///
    /// # Errors
    /// Returns an error if the session cannot be removed.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Load a session, starting an empty one when none exists.
    ///
    /// # Errors
    /// Returns an error if the session cannot be read.
    async fn load_or_create(&self, key: &str) -> Result<Session> {
        Ok(self.load(key).await?.unwrap_or_else(|| Session::new(key)))
    }
}

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl InMemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, key: &str) -> Result<Option<Session>> {
        Ok(self
            .sessions
            .read()
            .ok()
            .context("lock poisoned")?
            .get(key)
            .cloned())
    }

    async fn save(&self, session: &Session) -> Result<()> {
        self.sessions
            .write()
            .ok()
            .context("lock poisoned")?
            .insert(session.key.clone(), session.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.sessions
            .write()
            .ok()
            .context("lock poisoned")?
            .remove(key);
        Ok(())
    }
}
