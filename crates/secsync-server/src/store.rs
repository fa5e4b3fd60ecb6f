//! Document storage with transactional clock validation.
//!
//! The [`DocumentStore`] trait is where a database adapter plugs in; the
//! bundled in-memory implementation guards each document with its own
//! async mutex, which stands in for the serializable transaction a real
//! backend would use. Clients observe acceptance as atomic either way.

use async_trait::async_trait;
use secsync_protocol::wire::{Snapshot, SnapshotServerData, Update, UpdateServerData};
use secsync_core::{Result, SecsyncError};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// The active snapshot and its updates, as delivered on connect.
#[derive(Debug, Clone, Default)]
pub struct DocumentBundle {
    /// Active snapshot, annotated with the latest update version.
    pub snapshot: Option<Snapshot>,
    /// Updates anchored to the active snapshot, in version order.
    pub updates: Vec<Update>,
}

/// Result of attempting to persist a snapshot.
#[derive(Debug, Clone)]
pub enum SnapshotSaveResult {
    /// Persisted; the snapshot is now active.
    Saved,
    /// Rejected. The attached payload lets the author catch up: the
    /// current snapshot plus updates when the author's chain was behind,
    /// updates only when the snapshot missed some.
    Failed {
        /// Current active snapshot, when the author extended the wrong one.
        snapshot: Option<Snapshot>,
        /// Updates the author had not included.
        updates: Option<Vec<Update>>,
    },
}

/// Result of attempting to persist an update.
#[derive(Debug, Clone, Copy)]
pub enum UpdateSaveResult {
    /// Persisted (or an identical duplicate re-acked) with this version.
    Saved {
        /// Per-snapshot monotonic version.
        version: u64,
    },
    /// Rejected: wrong snapshot or a clock that is not the successor.
    Failed,
}

/// Persistence surface of the server core.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Load a document, or `None` if it does not exist.
    async fn load_document(&self, doc_id: &str) -> Result<Option<DocumentBundle>>;

    /// Create an empty document. Loading it afterwards returns an empty
    /// bundle.
    async fn create_document(&self, doc_id: &str) -> Result<DocumentBundle>;

    /// Validate and persist a snapshot atomically.
    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<SnapshotSaveResult>;

    /// Validate and persist an update atomically.
    async fn save_update(&self, update: Update) -> Result<UpdateSaveResult>;
}

#[derive(Debug, Default)]
struct StoredDocument {
    active_snapshot: Option<Snapshot>,
    updates: Vec<Update>,
    /// Per-author clock of the last saved update on the active snapshot.
    update_clocks: BTreeMap<String, u64>,
    /// Last assigned per-snapshot version.
    latest_version: Option<u64>,
}

impl StoredDocument {
    fn bundle(&self) -> DocumentBundle {
        let snapshot = self.active_snapshot.clone().map(|mut snapshot| {
            snapshot.server_data = Some(SnapshotServerData {
                latest_version: self.latest_version.unwrap_or(0),
            });
            snapshot
        });
        DocumentBundle {
            snapshot,
            updates: self.updates.clone(),
        }
    }

    /// Updates the given clock table has not seen, in version order.
    fn updates_missing_from(&self, clocks: &BTreeMap<String, u64>) -> Vec<Update> {
        self.updates
            .iter()
            .filter(|update| {
                let author = &update.public_data.pub_key;
                match clocks.get(author) {
                    Some(recorded) => update.public_data.clock > *recorded,
                    None => true,
                }
            })
            .cloned()
            .collect()
    }
}

/// In-memory store with a per-document mutex as the transaction boundary.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    documents: RwLock<HashMap<String, Arc<Mutex<StoredDocument>>>>,
}

impl InMemoryDocumentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    async fn document(&self, doc_id: &str) -> Option<Arc<Mutex<StoredDocument>>> {
        self.documents.read().await.get(doc_id).cloned()
    }

    async fn document_or_create(&self, doc_id: &str) -> Arc<Mutex<StoredDocument>> {
        let mut documents = self.documents.write().await;
        documents
            .entry(doc_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(StoredDocument::default())))
            .clone()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn load_document(&self, doc_id: &str) -> Result<Option<DocumentBundle>> {
        match self.document(doc_id).await {
            Some(document) => Ok(Some(document.lock().await.bundle())),
            None => Ok(None),
        }
    }

    async fn create_document(&self, doc_id: &str) -> Result<DocumentBundle> {
        let document = self.document_or_create(doc_id).await;
        let bundle = document.lock().await.bundle();
        Ok(bundle)
    }

    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<SnapshotSaveResult> {
        let doc_id = snapshot.public_data.doc_id.clone();
        let document = self
            .document(&doc_id)
            .await
            .ok_or_else(|| SecsyncError::storage(format!("unknown document {}", doc_id)))?;
        let mut document = document.lock().await;

        if let Some(active) = &document.active_snapshot {
            // Must extend the current chain head.
            if snapshot.public_data.parent_snapshot_id != active.public_data.snapshot_id {
                return Ok(SnapshotSaveResult::Failed {
                    snapshot: document.bundle().snapshot,
                    updates: Some(document.updates.clone()),
                });
            }
            // Must have observed every saved update.
            let recorded = &snapshot.public_data.parent_snapshot_update_clocks;
            let behind = document
                .update_clocks
                .iter()
                .any(|(author, server_clock)| {
                    recorded.get(author).map_or(true, |clock| clock < server_clock)
                });
            if behind {
                return Ok(SnapshotSaveResult::Failed {
                    snapshot: None,
                    updates: Some(document.updates_missing_from(recorded)),
                });
            }
        }

        document.active_snapshot = Some(snapshot);
        document.updates.clear();
        document.update_clocks.clear();
        document.latest_version = None;
        Ok(SnapshotSaveResult::Saved)
    }

    async fn save_update(&self, update: Update) -> Result<UpdateSaveResult> {
        let doc_id = update.public_data.doc_id.clone();
        let document = self
            .document(&doc_id)
            .await
            .ok_or_else(|| SecsyncError::storage(format!("unknown document {}", doc_id)))?;
        let mut document = document.lock().await;

        let active_id = match &document.active_snapshot {
            Some(active) => active.public_data.snapshot_id.clone(),
            None => return Ok(UpdateSaveResult::Failed),
        };
        if update.public_data.ref_snapshot_id != active_id {
            return Ok(UpdateSaveResult::Failed);
        }

        let author = update.public_data.pub_key.clone();
        let clock = update.public_data.clock;

        // Identical duplicate: re-ack idempotently.
        if let Some(existing) = document.updates.iter().find(|stored| {
            stored.public_data.pub_key == author && stored.public_data.clock == clock
        }) {
            if existing.ciphertext == update.ciphertext {
                let version = existing.server_data.map_or(0, |data| data.version);
                return Ok(UpdateSaveResult::Saved { version });
            }
            return Ok(UpdateSaveResult::Failed);
        }

        let expected = document
            .update_clocks
            .get(&author)
            .map(|stored| stored + 1)
            .unwrap_or(0);
        if clock != expected {
            return Ok(UpdateSaveResult::Failed);
        }

        let version = document.latest_version.map_or(0, |version| version + 1);
        let mut stored = update;
        stored.server_data = Some(UpdateServerData { version });
        document.updates.push(stored);
        document.update_clocks.insert(author, clock);
        document.latest_version = Some(version);
        Ok(UpdateSaveResult::Saved { version })
    }
}
