//! Session persistence.
//!
//! [`KvStore`] is the durable key-value boundary. [`SessionStore`] layers the
//! session lifecycle on top of it: create-vs-update saves, loading, deletion
//! and publishing read-only copies into a separate namespace.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::error::{DebateError, StorageError, ValidationError};
use crate::session::DebateSession;

/// Record collections kept apart from each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// The user's own sessions, keyed by session id.
    Sessions,
    /// Published snapshots, keyed by share id.
    Published,
    /// Persisted timer state, keyed by timer key.
    Timers,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Sessions => "sessions",
            Namespace::Published => "published",
            Namespace::Timers => "timers",
        }
    }
}

/// Durable key-value store.
#[async_trait]
pub trait KvStore: Send + Sync {
    fn name(&self) -> &str;

    async fn put(
        &self,
        namespace: Namespace,
        key: &str,
        record: serde_json::Value,
    ) -> Result<(), StorageError>;

    async fn get(
        &self,
        namespace: Namespace,
        key: &str,
    ) -> Result<Option<serde_json::Value>, StorageError>;

    /// Returns whether a record was removed.
    async fn delete(&self, namespace: Namespace, key: &str) -> Result<bool, StorageError>;

    async fn list_all(&self, namespace: Namespace) -> Result<Vec<serde_json::Value>, StorageError>;
}

/// Typed access on top of [`KvStore`].
#[async_trait]
pub trait KvStoreExt {
    async fn put_typed<T: Serialize + Send + Sync>(
        &self,
        namespace: Namespace,
        key: &str,
        value: &T,
    ) -> Result<(), StorageError>;

    async fn get_typed<T: DeserializeOwned>(
        &self,
        namespace: Namespace,
        key: &str,
    ) -> Result<Option<T>, StorageError>;
}

#[async_trait]
impl<S: KvStore + ?Sized> KvStoreExt for S {
    async fn put_typed<T: Serialize + Send + Sync>(
        &self,
        namespace: Namespace,
        key: &str,
        value: &T,
    ) -> Result<(), StorageError> {
        let json = serde_json::to_value(value)?;
        self.put(namespace, key, json).await
    }

    async fn get_typed<T: DeserializeOwned>(
        &self,
        namespace: Namespace,
        key: &str,
    ) -> Result<Option<T>, StorageError> {
        match self.get(namespace, key).await? {
            Some(json) => Ok(Some(serde_json::from_value(json)?)),
            None => Ok(None),
        }
    }
}

/// In-memory store. Contents are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: tokio::sync::RwLock<HashMap<(Namespace, String), serde_json::Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn put(
        &self,
        namespace: Namespace,
        key: &str,
        record: serde_json::Value,
    ) -> Result<(), StorageError> {
        self.data
            .write()
            .await
            .insert((namespace, key.to_string()), record);
        Ok(())
    }

    async fn get(
        &self,
        namespace: Namespace,
        key: &str,
    ) -> Result<Option<serde_json::Value>, StorageError> {
        let data = self.data.read().await;
        Ok(data.get(&(namespace, key.to_string())).cloned())
    }

    async fn delete(&self, namespace: Namespace, key: &str) -> Result<bool, StorageError> {
        Ok(self
            .data
            .write()
            .await
            .remove(&(namespace, key.to_string()))
            .is_some())
    }

    async fn list_all(&self, namespace: Namespace) -> Result<Vec<serde_json::Value>, StorageError> {
        let data = self.data.read().await;
        Ok(data
            .iter()
            .filter(|((ns, _), _)| *ns == namespace)
            .map(|(_, v)| v.clone())
            .collect())
    }
}

/// One pretty-printed JSON file per record under `<root>/<namespace>/<key>.json`.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir(&self, namespace: Namespace) -> PathBuf {
        self.root.join(namespace.as_str())
    }

    /// `None` for keys that could not have been written by `put`.
    fn path(&self, namespace: Namespace, key: &str) -> Option<PathBuf> {
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return None;
        }
        Some(self.dir(namespace).join(format!("{}.json", key)))
    }
}

#[async_trait]
impl KvStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn put(
        &self,
        namespace: Namespace,
        key: &str,
        record: serde_json::Value,
    ) -> Result<(), StorageError> {
        let path = self
            .path(namespace, key)
            .ok_or_else(|| StorageError::InvalidKey(key.to_string()))?;
        tokio::fs::create_dir_all(self.dir(namespace)).await?;
        let body = serde_json::to_vec_pretty(&record)?;
        // Write then rename so a crash never leaves a truncated record.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn get(
        &self,
        namespace: Namespace,
        key: &str,
    ) -> Result<Option<serde_json::Value>, StorageError> {
        let Some(path) = self.path(namespace, key) else {
            return Ok(None);
        };
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, namespace: Namespace, key: &str) -> Result<bool, StorageError> {
        let Some(path) = self.path(namespace, key) else {
            return Ok(false);
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_all(&self, namespace: Namespace) -> Result<Vec<serde_json::Value>, StorageError> {
        let mut entries = match tokio::fs::read_dir(self.dir(namespace)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            records.push(serde_json::from_slice(&bytes)?);
        }
        Ok(records)
    }
}

/// Whether a save inserted a new record or replaced an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Created,
    Updated,
}

#[derive(Debug, Clone)]
pub struct SavedSession {
    pub outcome: SaveOutcome,
    /// The snapshot as stored, including its id and any share fields.
    pub session: DebateSession,
}

impl SavedSession {
    pub fn id(&self) -> &str {
        self.session.id.as_deref().unwrap_or_default()
    }
}

/// Result of publishing a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub share_id: String,
    pub public_url: String,
}

/// Derive the public URL for a share id.
pub fn public_url(origin: &str, share_id: &str) -> String {
    format!("{}/share/{}", origin.trim_end_matches('/'), share_id)
}

/// Session lifecycle over a [`KvStore`].
pub struct SessionStore {
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    share_origin: String,
}

impl SessionStore {
    pub fn new(kv: Arc<dyn KvStore>, share_origin: impl Into<String>) -> Self {
        Self {
            kv,
            clock: Arc::new(SystemClock),
            share_origin: share_origin.into(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn kv(&self) -> &Arc<dyn KvStore> {
        &self.kv
    }

    /// Insert the session or update its existing record.
    ///
    /// Whether this is a create or an update depends only on whether a record
    /// with the session's id exists in the store. An update keeps the stored
    /// share fields.
    pub async fn save(&self, session: &DebateSession) -> Result<SavedSession, DebateError> {
        if session.topic.trim().is_empty() && session.debate_log.is_empty() {
            return Err(ValidationError::NothingToSave.into());
        }

        let mut record = session.clone();
        record.updated_at = self.clock.now();

        let existing: Option<DebateSession> = match &session.id {
            Some(id) => self.kv.get_typed(Namespace::Sessions, id).await?,
            None => None,
        };

        let outcome = match existing {
            Some(existing) => {
                if existing.share_id.is_some() {
                    record.share_id = existing.share_id;
                    record.public_url = existing.public_url;
                }
                SaveOutcome::Updated
            }
            None => {
                if record.id.is_none() {
                    record.id = Some(Uuid::new_v4().to_string());
                }
                SaveOutcome::Created
            }
        };

        let id = record.id.clone().unwrap_or_default();
        self.kv.put_typed(Namespace::Sessions, &id, &record).await?;
        info!(session_id = %id, ?outcome, turns = record.debate_log.len(), "Saved session");

        Ok(SavedSession {
            outcome,
            session: record,
        })
    }

    pub async fn load(&self, id: &str) -> Result<Option<DebateSession>, DebateError> {
        let session = self.kv.get_typed(Namespace::Sessions, id).await?;
        if session.is_none() {
            debug!(session_id = %id, "Session not found");
        }
        Ok(session)
    }

    /// All saved sessions, most recently updated first.
    pub async fn list(&self) -> Result<Vec<DebateSession>, DebateError> {
        let mut sessions = self
            .kv
            .list_all(Namespace::Sessions)
            .await?
            .into_iter()
            .map(serde_json::from_value::<DebateSession>)
            .collect::<Result<Vec<_>, _>>()
            .map_err(StorageError::from)?;
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }

    /// Remove a private session. A published copy is unaffected.
    pub async fn delete(&self, id: &str) -> Result<bool, DebateError> {
        let removed = self.kv.delete(Namespace::Sessions, id).await?;
        info!(session_id = %id, removed, "Deleted session");
        Ok(removed)
    }

    pub async fn delete_all(&self) -> Result<usize, DebateError> {
        let mut removed = 0;
        for id in self.list().await?.into_iter().filter_map(|s| s.id) {
            if self.kv.delete(Namespace::Sessions, &id).await? {
                removed += 1;
            }
        }
        info!(removed, "Deleted all sessions");
        Ok(removed)
    }

    /// Publish a read-only, point-in-time copy of the session.
    ///
    /// A session can be published once. Publishing again is a
    /// [`DebateError::StaleWrite`] and leaves the first share id in place.
    pub async fn publish(&self, session: &DebateSession) -> Result<PublishReceipt, DebateError> {
        if let Some(share_id) = &session.share_id {
            return Err(DebateError::StaleWrite {
                share_id: share_id.clone(),
            });
        }

        let stored: Option<DebateSession> = match &session.id {
            Some(id) => self.kv.get_typed(Namespace::Sessions, id).await?,
            None => None,
        };
        if let Some(share_id) = stored.as_ref().and_then(|s| s.share_id.clone()) {
            return Err(DebateError::StaleWrite { share_id });
        }

        let share_id = format!("shared_{}", Uuid::new_v4().simple());
        let receipt = PublishReceipt {
            public_url: public_url(&self.share_origin, &share_id),
            share_id,
        };

        let mut public_copy = session.mark_published(&receipt);
        public_copy.id = Some(receipt.share_id.clone());
        public_copy.updated_at = self.clock.now();
        self.kv
            .put_typed(Namespace::Published, &receipt.share_id, &public_copy)
            .await?;

        if let Some(mut private) = stored {
            private.share_id = Some(receipt.share_id.clone());
            private.public_url = Some(receipt.public_url.clone());
            if let Some(id) = private.id.clone() {
                self.kv.put_typed(Namespace::Sessions, &id, &private).await?;
            }
        }

        info!(share_id = %receipt.share_id, url = %receipt.public_url, "Published session");
        Ok(receipt)
    }

    /// Look up a published session. Private sessions are never returned.
    pub async fn fetch_public(&self, share_id: &str) -> Result<Option<DebateSession>, DebateError> {
        Ok(self.kv.get_typed(Namespace::Published, share_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::session::{DebateTurn, ReasoningSkill, Speaker};

    fn store() -> SessionStore {
        SessionStore::new(Arc::new(MemoryStore::new()), "https://argumentace.example")
    }

    fn session(topic: &str) -> DebateSession {
        DebateSession::new(topic, ReasoningSkill::Intermediate)
    }

    #[tokio::test]
    async fn test_save_creates_then_updates() {
        let store = store();
        let created = store.save(&session("Ban homework")).await.unwrap();
        assert_eq!(created.outcome, SaveOutcome::Created);
        let id = created.id().to_string();
        assert!(!id.is_empty());

        let mut edited = created.session.clone();
        edited.topic = "Ban all homework".to_string();
        let updated = store.save(&edited).await.unwrap();
        assert_eq!(updated.outcome, SaveOutcome::Updated);
        assert_eq!(updated.id(), id);

        let loaded = store.load(&id).await.unwrap().unwrap();
        assert_eq!(loaded.topic, "Ban all homework");
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_save_with_unknown_id_recreates_under_same_id() {
        let store = store();
        let mut orphan = session("Orphan");
        orphan.id = Some("kept-id".to_string());
        let saved = store.save(&orphan).await.unwrap();
        assert_eq!(saved.outcome, SaveOutcome::Created);
        assert_eq!(saved.id(), "kept-id");
    }

    #[tokio::test]
    async fn test_save_rejects_empty_session() {
        let err = store().save(&session("  ")).await.unwrap_err();
        assert!(matches!(
            err,
            DebateError::Validation(ValidationError::NothingToSave)
        ));
    }

    #[tokio::test]
    async fn test_update_preserves_share_id() {
        let store = store();
        let saved = store.save(&session("Space exploration")).await.unwrap();
        let receipt = store.publish(&saved.session).await.unwrap();

        // The caller's snapshot never learned about the share id.
        let updated = store.save(&saved.session).await.unwrap();
        assert_eq!(updated.session.share_id.as_deref(), Some(receipt.share_id.as_str()));
        assert_eq!(updated.session.public_url.as_deref(), Some(receipt.public_url.as_str()));
    }

    #[tokio::test]
    async fn test_publish_twice_is_rejected() {
        let store = store();
        let saved = store.save(&session("Universal basic income")).await.unwrap();
        let first = store.publish(&saved.session).await.unwrap();
        assert_ne!(Some(first.share_id.as_str()), saved.session.id.as_deref());
        assert_eq!(
            first.public_url,
            format!("https://argumentace.example/share/{}", first.share_id)
        );

        let local = saved.session.mark_published(&first);
        let err = store.publish(&local).await.unwrap_err();
        assert!(matches!(err, DebateError::StaleWrite { ref share_id } if *share_id == first.share_id));

        // A snapshot that missed the first receipt is caught via the stored record.
        let err = store.publish(&saved.session).await.unwrap_err();
        assert!(matches!(err, DebateError::StaleWrite { .. }));

        let stored = store.load(saved.id()).await.unwrap().unwrap();
        assert_eq!(stored.share_id.as_deref(), Some(first.share_id.as_str()));
    }

    #[tokio::test]
    async fn test_public_copy_is_a_snapshot() {
        let store = store();
        let saved = store.save(&session("Nuclear power")).await.unwrap();
        let receipt = store.publish(&saved.session).await.unwrap();

        let mut local = saved.session.mark_published(&receipt);
        local.debate_log.push(DebateTurn::new(Speaker::User, "later edit", chrono::Utc::now()));
        store.save(&local).await.unwrap();

        let public = store.fetch_public(&receipt.share_id).await.unwrap().unwrap();
        assert!(public.debate_log.is_empty());
        assert_eq!(public.share_id.as_deref(), Some(receipt.share_id.as_str()));

        store.delete(saved.id()).await.unwrap();
        assert!(store.fetch_public(&receipt.share_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_fetch_public_does_not_leak_private_sessions() {
        let store = store();
        let saved = store.save(&session("Private")).await.unwrap();
        assert!(store.fetch_public(saved.id()).await.unwrap().is_none());
        assert!(store.load("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_orders_by_recency_and_delete_all() {
        let clock = Arc::new(ManualClock::default());
        let store = store().with_clock(clock.clone());
        let first = store.save(&session("First")).await.unwrap();
        clock.advance_secs(10);
        store.save(&session("Second")).await.unwrap();
        clock.advance_secs(10);
        store.save(&first.session).await.unwrap();

        let topics: Vec<String> = store.list().await.unwrap().into_iter().map(|s| s.topic).collect();
        assert_eq!(topics, vec!["First", "Second"]);

        assert_eq!(store.delete_all().await.unwrap(), 2);
        assert!(store.list().await.unwrap().is_empty());
        assert!(!store.delete(first.id()).await.unwrap());
    }

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let kv = FileStore::new(dir.path());
        let value = serde_json::json!({"topic": "x"});
        kv.put(Namespace::Sessions, "abc-1", value.clone()).await.unwrap();
        assert_eq!(kv.get(Namespace::Sessions, "abc-1").await.unwrap(), Some(value));
        assert!(kv.get(Namespace::Published, "abc-1").await.unwrap().is_none());
        assert_eq!(kv.list_all(Namespace::Sessions).await.unwrap().len(), 1);
        assert!(kv.delete(Namespace::Sessions, "abc-1").await.unwrap());
        assert!(kv.list_all(Namespace::Sessions).await.unwrap().is_empty());
        assert!(matches!(
            kv.put(Namespace::Sessions, "../escape", serde_json::json!({})).await,
            Err(StorageError::InvalidKey(_))
        ));
        assert!(kv.get(Namespace::Sessions, "../escape").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_malformed_ids_are_not_found_on_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(Arc::new(FileStore::new(dir.path())), "http://localhost");
        assert!(matches!(store.fetch_public("shared_abc.def").await, Ok(None)));
        assert!(matches!(store.load("some id").await, Ok(None)));
        assert!(matches!(store.load("").await, Ok(None)));
        assert!(matches!(store.delete("../etc/passwd").await, Ok(false)));
    }

    #[tokio::test]
    async fn test_sessions_survive_a_new_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = SessionStore::new(Arc::new(FileStore::new(dir.path())), "http://localhost");
            store.save(&session("Durable")).await.unwrap().id().to_string()
        };
        let store = SessionStore::new(Arc::new(FileStore::new(dir.path())), "http://localhost");
        assert_eq!(store.load(&id).await.unwrap().unwrap().topic, "Durable");
    }
}
