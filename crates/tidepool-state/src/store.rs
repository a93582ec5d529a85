//! StateStore: redb-backed persistence for share records and service
//! heartbeats.
//!
//! All values are JSON-serialized into redb's `&[u8]` value columns. The
//! store supports both on-disk and in-memory backends (the latter for
//! testing and dry runs).

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store.
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Storage))?;
        txn.open_table(SHARES).map_err(map_err!(Storage))?;
        txn.open_table(SERVICES).map_err(map_err!(Storage))?;
        txn.commit().map_err(map_err!(Storage))?;
        Ok(())
    }

    // ── Shares ─────────────────────────────────────────────────────

    /// Insert or replace a share record.
    pub fn put_share(&self, share: &ShareRecord) -> StateResult<()> {
        let value = serde_json::to_vec(share).map_err(map_err!(Encode))?;
        let txn = self.db.begin_write().map_err(map_err!(Storage))?;
        {
            let mut table = txn.open_table(SHARES).map_err(map_err!(Storage))?;
            table
                .insert(share.id.as_str(), value.as_slice())
                .map_err(map_err!(Storage))?;
        }
        txn.commit().map_err(map_err!(Storage))?;
        debug!(share_id = %share.id, "share stored");
        Ok(())
    }

    /// Get a share record by id.
    pub fn get_share(&self, share_id: &str) -> StateResult<Option<ShareRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Storage))?;
        let table = txn.open_table(SHARES).map_err(map_err!(Storage))?;
        match table.get(share_id).map_err(map_err!(Storage))? {
            Some(guard) => {
                let share: ShareRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Corrupt))?;
                Ok(Some(share))
            }
            None => Ok(None),
        }
    }

    /// Record the scheduling decision for a share: set its host and
    /// `scheduled_at` inside one write transaction.
    ///
    /// Readers see either the old record or the fully updated one.
    pub fn update_share_host(&self, share_id: &str, host: &str) -> StateResult<ShareRecord> {
        self.modify_share(share_id, |share, now| {
            share.host = Some(host.to_string());
            share.scheduled_at = Some(now);
        })
    }

    /// Set a share's status.
    pub fn set_share_status(&self, share_id: &str, status: ShareStatus) -> StateResult<ShareRecord> {
        self.modify_share(share_id, |share, _| share.status = status)
    }

    fn modify_share(
        &self,
        share_id: &str,
        apply: impl FnOnce(&mut ShareRecord, u64),
    ) -> StateResult<ShareRecord> {
        let now = epoch_secs();
        let txn = self.db.begin_write().map_err(map_err!(Storage))?;
        let share = {
            let mut table = txn.open_table(SHARES).map_err(map_err!(Storage))?;
            let mut share: ShareRecord = match table.get(share_id).map_err(map_err!(Storage))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Corrupt))?
                }
                None => return Err(StateError::ShareNotFound(share_id.to_string())),
            };
            apply(&mut share, now);
            share.updated_at = now;
            let value = serde_json::to_vec(&share).map_err(map_err!(Encode))?;
            table
                .insert(share_id, value.as_slice())
                .map_err(map_err!(Storage))?;
            share
        };
        txn.commit().map_err(map_err!(Storage))?;
        debug!(%share_id, host = ?share.host, status = ?share.status, "share updated");
        Ok(share)
    }

    // ── Services ───────────────────────────────────────────────────

    /// Insert or update a service heartbeat.
    pub fn put_service(&self, service: &ServiceRecord) -> StateResult<()> {
        let key = service.table_key();
        let value = serde_json::to_vec(service).map_err(map_err!(Encode))?;
        let txn = self.db.begin_write().map_err(map_err!(Storage))?;
        {
            let mut table = txn.open_table(SERVICES).map_err(map_err!(Storage))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Storage))?;
        }
        txn.commit().map_err(map_err!(Storage))?;
        Ok(())
    }

    /// List all services registered under a topic.
    pub fn list_services_by_topic(&self, topic: &str) -> StateResult<Vec<ServiceRecord>> {
        let prefix = format!("{topic}:");
        let txn = self.db.begin_read().map_err(map_err!(Storage))?;
        let table = txn.open_table(SERVICES).map_err(map_err!(Storage))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Storage))? {
            let (key, value) = entry.map_err(map_err!(Storage))?;
            if key.value().starts_with(&prefix) {
                let service: ServiceRecord =
                    serde_json::from_slice(value.value()).map_err(map_err!(Corrupt))?;
                results.push(service);
            }
        }
        Ok(results)
    }
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_share(id: &str) -> ShareRecord {
        ShareRecord {
            id: id.to_string(),
            host: None,
            status: ShareStatus::Creating,
            size_gb: 10,
            scheduled_at: None,
            updated_at: 1000,
        }
    }

    fn test_service(topic: &str, host: &str) -> ServiceRecord {
        ServiceRecord {
            host: host.to_string(),
            topic: topic.to_string(),
            disabled: false,
            updated_at: 1000,
        }
    }

    #[test]
    fn share_roundtrip() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_share(&test_share("s1")).unwrap();

        let loaded = store.get_share("s1").unwrap().unwrap();
        assert_eq!(loaded, test_share("s1"));
        assert!(store.get_share("missing").unwrap().is_none());
    }

    #[test]
    fn update_host_sets_scheduled_at() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_share(&test_share("s1")).unwrap();

        let updated = store.update_share_host("s1", "node1@lvm#vg0").unwrap();
        assert_eq!(updated.host.as_deref(), Some("node1@lvm#vg0"));
        assert!(updated.scheduled_at.is_some());

        let loaded = store.get_share("s1").unwrap().unwrap();
        assert_eq!(loaded, updated);
    }

    #[test]
    fn update_host_of_missing_share_fails() {
        let store = StateStore::open_in_memory().unwrap();
        let result = store.update_share_host("nope", "h");
        assert!(matches!(result, Err(StateError::ShareNotFound(_))));
    }

    #[test]
    fn corrupt_share_record_is_reported() {
        let store = StateStore::open_in_memory().unwrap();
        let txn = store.db.begin_write().unwrap();
        {
            let mut table = txn.open_table(SHARES).unwrap();
            table.insert("s1", b"not json".as_slice()).unwrap();
        }
        txn.commit().unwrap();

        let err = store.get_share("s1").unwrap_err();
        assert!(matches!(err, StateError::Corrupt(_)), "{err}");
        assert!(err.to_string().starts_with("corrupt record: "));

        let err = store.set_share_status("s1", ShareStatus::Error).unwrap_err();
        assert!(matches!(err, StateError::Corrupt(_)), "{err}");
    }

    #[test]
    fn missing_share_names_the_share() {
        let store = StateStore::open_in_memory().unwrap();
        let err = store.set_share_status("share-9", ShareStatus::Error).unwrap_err();
        assert_eq!(err.to_string(), "share not found: share-9");
    }

    #[test]
    fn set_status_keeps_host() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_share(&test_share("s1")).unwrap();
        store.update_share_host("s1", "h@b#p").unwrap();

        let updated = store.set_share_status("s1", ShareStatus::Error).unwrap();
        assert_eq!(updated.status, ShareStatus::Error);
        assert_eq!(updated.host.as_deref(), Some("h@b#p"));
    }

    #[test]
    fn services_listed_by_topic() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_service(&test_service("share", "a@lvm")).unwrap();
        store.put_service(&test_service("share", "b@nfs")).unwrap();
        store.put_service(&test_service("data", "c@x")).unwrap();

        let mut hosts: Vec<String> = store
            .list_services_by_topic("share")
            .unwrap()
            .into_iter()
            .map(|s| s.host)
            .collect();
        hosts.sort();
        assert_eq!(hosts, vec!["a@lvm", "b@nfs"]);
    }

    #[test]
    fn service_heartbeat_overwrites() {
        let store = StateStore::open_in_memory().unwrap();
        let mut svc = test_service("share", "a@lvm");
        store.put_service(&svc).unwrap();
        svc.updated_at = 2000;
        store.put_service(&svc).unwrap();

        let listed = store.list_services_by_topic("share").unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].updated_at, 2000);
    }

    #[test]
    fn persistent_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tidepool.redb");

        {
            let store = StateStore::open(&path).unwrap();
            store.put_share(&test_share("s1")).unwrap();
            store.update_share_host("s1", "h@b#p").unwrap();
        }

        let store = StateStore::open(&path).unwrap();
        let loaded = store.get_share("s1").unwrap().unwrap();
        assert_eq!(loaded.host.as_deref(), Some("h@b#p"));
    }
}
