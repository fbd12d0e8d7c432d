//! Best-effort conversation persistence.
//!
//! [`PersistentChatStore`] keeps every conversation in a single JSON record
//! under [`STORAGE_KEY`], ordered most-recent-first and capped at
//! [`MAX_CONVERSATIONS`] entries. Each save rewrites the whole record.
//!
//! The record lives in a [`KeyValueBackend`]: [`FsKeyValue`] writes
//! `{data_dir}/{key}.json` atomically (temp file + fsync + rename),
//! [`MemoryKeyValue`] is for tests and ephemeral use.
//!
//! Corrupt or missing data loads as an empty list. A failed read is not
//! absence: saves and deletes abort without writing. Storage failures are
//! logged and swallowed by [`PersistentChatStore::save`]; in-memory state
//! stays authoritative.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use super::types::Conversation;
use crate::error::{FreddieError, Result};

/// Maximum number of conversations retained.
pub const MAX_CONVERSATIONS: usize = 50;

/// Key of the conversation record.
pub const STORAGE_KEY: &str = "freddie_chats";

/// Synchronous string key-value storage.
pub trait KeyValueBackend: Send + Sync {
    /// Read a value. `Ok(None)` when the key is absent.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Overwrite a value.
    fn put(&self, key: &str, value: &str) -> Result<()>;
}

/// Filesystem-backed key-value storage, one file per key.
#[derive(Debug, Clone)]
pub struct FsKeyValue {
    data_dir: PathBuf,
}

impl FsKeyValue {
    /// Create the backend, creating `data_dir` if needed.
    ///
    /// # Errors
    ///
    /// Returns [`FreddieError::Storage`] if the directory cannot be created.
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir).map_err(|e| {
            FreddieError::Storage(format!(
                "failed to create data directory {}: {e}",
                data_dir.display()
            ))
        })?;
        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Path of the file holding `key`.
    pub fn key_path(&self, key: &str) -> PathBuf {
        self.data_dir.join(format!("{key}.json"))
    }
}

impl KeyValueBackend for FsKeyValue {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.key_path(key);
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(FreddieError::Storage(format!(
                "failed to read {}: {e}",
                path.display()
            ))),
        }
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        let path = self.key_path(key);
        let tmp_path = self.data_dir.join(format!(".{key}.tmp"));
        std::fs::write(&tmp_path, value.as_bytes()).map_err(|e| {
            FreddieError::Storage(format!(
                "failed to write temp file {}: {e}",
                tmp_path.display()
            ))
        })?;

        if let Ok(file) = std::fs::File::open(&tmp_path) {
            let _ = file.sync_all();
        }

        std::fs::rename(&tmp_path, &path).map_err(|e| {
            FreddieError::Storage(format!(
                "failed to rename temp file to {}: {e}",
                path.display()
            ))
        })
    }
}

/// In-memory key-value storage. Cheap to clone; clones share contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyValue {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryKeyValue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueBackend for MemoryKeyValue {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| FreddieError::Storage("memory store lock poisoned".to_owned()))?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| FreddieError::Storage("memory store lock poisoned".to_owned()))?;
        entries.insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

/// Conversation archive over a [`KeyValueBackend`].
///
/// Single logical writer: concurrent saves from several owners may lose
/// updates because each save rewrites the whole record.
pub struct PersistentChatStore {
    backend: Arc<dyn KeyValueBackend>,
    capacity: usize,
}

impl std::fmt::Debug for PersistentChatStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentChatStore")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl PersistentChatStore {
    /// Store with the default capacity of [`MAX_CONVERSATIONS`].
    pub fn new(backend: Arc<dyn KeyValueBackend>) -> Self {
        Self::with_capacity(backend, MAX_CONVERSATIONS)
    }

    /// Store keeping at most `capacity` conversations (minimum 1).
    pub fn with_capacity(backend: Arc<dyn KeyValueBackend>, capacity: usize) -> Self {
        Self {
            backend,
            capacity: capacity.max(1),
        }
    }

    /// In-memory store for tests and ephemeral sessions.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKeyValue::new()))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// All stored conversations, most recent first.
    ///
    /// Missing or unparseable data yields an empty list, as does a read
    /// failure (logged).
    pub fn load(&self) -> Vec<Conversation> {
        self.read_all().unwrap_or_else(|e| {
            warn!(error = %e, "failed to read stored conversations");
            Vec::new()
        })
    }

    /// Look up one conversation by id.
    pub fn get(&self, id: &str) -> Option<Conversation> {
        self.load().into_iter().find(|c| c.id == id)
    }

    /// Upsert `conversation`, logging and swallowing any storage error.
    pub fn save(&self, conversation: &Conversation) {
        if let Err(e) = self.try_save(conversation) {
            warn!(
                conversation_id = %conversation.id,
                error = %e,
                "failed to persist conversation"
            );
        }
    }

    /// Upsert `conversation`, returning any storage error.
    ///
    /// An existing entry with the same id is replaced in place; a new one is
    /// inserted at the front. The collection is then cut to capacity.
    ///
    /// # Errors
    ///
    /// Returns [`FreddieError::Storage`] if the existing record cannot be
    /// read, or if serialization or the write fails. Nothing is written when
    /// the read fails.
    pub fn try_save(&self, conversation: &Conversation) -> Result<()> {
        let mut conversations = self.read_all()?;
        match conversations.iter_mut().find(|c| c.id == conversation.id) {
            Some(existing) => *existing = conversation.clone(),
            None => conversations.insert(0, conversation.clone()),
        }
        conversations.truncate(self.capacity);
        self.write_all(&conversations)?;
        debug!(
            conversation_id = %conversation.id,
            stored = conversations.len(),
            "conversation saved"
        );
        Ok(())
    }

    /// Remove a conversation. Returns `false` if the id was not stored or the
    /// record could not be read or written.
    pub fn delete(&self, id: &str) -> bool {
        let mut conversations = match self.read_all() {
            Ok(conversations) => conversations,
            Err(e) => {
                warn!(conversation_id = %id, error = %e, "failed to read conversations for delete");
                return false;
            }
        };
        let before = conversations.len();
        conversations.retain(|c| c.id != id);
        if conversations.len() == before {
            return false;
        }
        match self.write_all(&conversations) {
            Ok(()) => true,
            Err(e) => {
                warn!(conversation_id = %id, error = %e, "failed to delete conversation");
                false
            }
        }
    }

    /// Stored conversations. Absent or corrupt data is empty; read errors
    /// propagate so callers never overwrite a record they could not see.
    fn read_all(&self) -> Result<Vec<Conversation>> {
        let Some(raw) = self.backend.get(STORAGE_KEY)? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str::<Vec<Conversation>>(&raw) {
            Ok(conversations) => Ok(conversations),
            Err(e) => {
                warn!(error = %e, "stored conversations are corrupt, starting empty");
                Ok(Vec::new())
            }
        }
    }

    fn write_all(&self, conversations: &[Conversation]) -> Result<()> {
        let json = serde_json::to_string(conversations)
            .map_err(|e| FreddieError::Storage(format!("failed to serialize conversations: {e}")))?;
        self.backend.put(STORAGE_KEY, &json)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn conversation(text: &str) -> Conversation {
        let mut conv = Conversation::start(text, &[]);
        conv.push_user(text, Vec::new());
        conv
    }

    #[test]
    fn load_empty_when_nothing_stored() {
        let store = PersistentChatStore::in_memory();
        assert!(store.load().is_empty());
    }

    #[test]
    fn load_corrupt_record_is_empty() {
        let backend = Arc::new(MemoryKeyValue::new());
        backend.put(STORAGE_KEY, "{not json").unwrap();
        let store = PersistentChatStore::new(backend);
        assert!(store.load().is_empty());
    }

    #[test]
    fn new_entries_go_to_front() {
        let store = PersistentChatStore::in_memory();
        let a = conversation("a");
        let b = conversation("b");
        store.save(&a);
        store.save(&b);

        let ids: Vec<_> = store.load().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![b.id, a.id]);
    }

    #[test]
    fn resave_replaces_in_place() {
        let store = PersistentChatStore::in_memory();
        let mut a = conversation("a");
        let b = conversation("b");
        store.save(&a);
        store.save(&b);

        a.push_user("a again", Vec::new());
        store.save(&a);

        let loaded = store.load();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0], b);
        assert_eq!(loaded[1], a);
        assert_eq!(loaded[1].messages.len(), 2);
    }

    #[test]
    fn save_is_idempotent() {
        let store = PersistentChatStore::in_memory();
        let a = conversation("a");
        store.save(&a);
        let once = store.load();
        store.save(&a);
        store.save(&a);
        assert_eq!(store.load(), once);
    }

    #[test]
    fn collection_is_capped() {
        let store = PersistentChatStore::in_memory();
        let mut newest = None;
        for i in 0..(MAX_CONVERSATIONS + 7) {
            let conv = conversation(&format!("chat {i}"));
            store.save(&conv);
            newest = Some(conv.id);
        }
        let loaded = store.load();
        assert_eq!(loaded.len(), MAX_CONVERSATIONS);
        assert_eq!(loaded[0].id, newest.unwrap());
        assert_eq!(loaded[MAX_CONVERSATIONS - 1].title, "chat 7");
    }

    #[test]
    fn custom_capacity_is_honoured() {
        let store = PersistentChatStore::with_capacity(Arc::new(MemoryKeyValue::new()), 2);
        for text in ["a", "b", "c"] {
            store.save(&conversation(text));
        }
        let titles: Vec<_> = store.load().into_iter().map(|c| c.title).collect();
        assert_eq!(titles, vec!["c", "b"]);
    }

    #[test]
    fn delete_removes_only_target() {
        let store = PersistentChatStore::in_memory();
        let a = conversation("a");
        let b = conversation("b");
        store.save(&a);
        store.save(&b);

        assert!(store.delete(&a.id));
        assert!(!store.delete(&a.id));
        assert!(store.get(&a.id).is_none());
        assert_eq!(store.get(&b.id), Some(b));
    }

    struct FailingBackend;

    impl KeyValueBackend for FailingBackend {
        fn get(&self, _key: &str) -> Result<Option<String>> {
            Ok(None)
        }

        fn put(&self, _key: &str, _value: &str) -> Result<()> {
            Err(FreddieError::Storage("disk full".to_owned()))
        }
    }

    #[test]
    fn write_failure_is_swallowed_by_save() {
        let store = PersistentChatStore::new(Arc::new(FailingBackend));
        let a = conversation("a");
        store.save(&a);
        let err = store.try_save(&a).unwrap_err();
        assert_eq!(err.code(), "STORAGE_ERROR");
    }

    /// Wraps a memory backend; the next `get` fails after `fail_next_read`.
    #[derive(Default)]
    struct FlakyReadBackend {
        inner: MemoryKeyValue,
        fail_next_read: std::sync::atomic::AtomicBool,
    }

    impl KeyValueBackend for FlakyReadBackend {
        fn get(&self, key: &str) -> Result<Option<String>> {
            if self
                .fail_next_read
                .swap(false, std::sync::atomic::Ordering::SeqCst)
            {
                return Err(FreddieError::Storage("input/output error".to_owned()));
            }
            self.inner.get(key)
        }

        fn put(&self, key: &str, value: &str) -> Result<()> {
            self.inner.put(key, value)
        }
    }

    #[test]
    fn read_failure_during_save_keeps_archive() {
        let backend = Arc::new(FlakyReadBackend::default());
        let store = PersistentChatStore::new(Arc::clone(&backend) as Arc<dyn KeyValueBackend>);
        for i in 0..10 {
            store.save(&conversation(&format!("chat {i}")));
        }

        backend
            .fail_next_read
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let new_one = conversation("new one");
        store.save(&new_one);
        assert_eq!(store.load().len(), 10);

        backend
            .fail_next_read
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let err = store.try_save(&new_one).unwrap_err();
        assert_eq!(err.code(), "STORAGE_ERROR");
        assert_eq!(store.load().len(), 10);

        store.save(&new_one);
        assert_eq!(store.load().len(), 11);
    }

    #[test]
    fn read_failure_during_delete_keeps_archive() {
        let backend = Arc::new(FlakyReadBackend::default());
        let store = PersistentChatStore::new(Arc::clone(&backend) as Arc<dyn KeyValueBackend>);
        let a = conversation("a");
        let b = conversation("b");
        store.save(&a);
        store.save(&b);

        backend
            .fail_next_read
            .store(true, std::sync::atomic::Ordering::SeqCst);
        assert!(!store.delete(&a.id));
        assert_eq!(store.load().len(), 2);
    }

    #[test]
    fn fs_backend_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsKeyValue::new(dir.path().join("data")).unwrap();
        assert_eq!(backend.get("missing").unwrap(), None);

        backend.put("k", "[1,2]").unwrap();
        assert_eq!(backend.get("k").unwrap().as_deref(), Some("[1,2]"));
        assert!(backend.key_path("k").ends_with("k.json"));
        assert!(!dir.path().join("data").join(".k.tmp").exists());
    }

    #[test]
    fn fs_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let a = conversation("persist me");
        {
            let store = PersistentChatStore::new(Arc::new(FsKeyValue::new(dir.path()).unwrap()));
            store.save(&a);
        }
        let reopened = PersistentChatStore::new(Arc::new(FsKeyValue::new(dir.path()).unwrap()));
        assert_eq!(reopened.load(), vec![a]);
        assert!(dir.path().join("freddie_chats.json").exists());
    }
}
