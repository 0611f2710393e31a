//! Collection
//!
//! One named set of documents: its payload store, its index and the lock
//! that guards both. Every mutation runs start to finish under the write
//! lock: encrypt, append the frame, update the index, append the ledger
//! block. A mutation whose ledger block cannot be written is undone.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use crate::config::{Config, SyncStrategy};
use crate::crypto::EncryptionManager;
use crate::error::{Result, SealError};
use crate::index::{self, DocumentIndex, Location};
use crate::ledger::Ledger;
use crate::value::Fields;

use super::document::{Document, RemovalNotice};
use super::payload::{PayloadStore, RecordOp, StoredRecord, HEADER_SIZE};

/// Longest accepted document id, in bytes
pub const MAX_ID_LEN: usize = 1024;

/// Per-collection settings taken from `Config`
#[derive(Debug, Clone)]
pub(crate) struct CollectionSettings {
    pub min_degree: usize,
    pub flush_interval: usize,
    pub lock_timeout: Duration,
    pub sync_strategy: SyncStrategy,
}

impl CollectionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            min_degree: config.btree_min_degree,
            flush_interval: config.index_flush_interval,
            lock_timeout: Duration::from_millis(config.lock_timeout_ms),
            sync_strategy: config.sync_strategy,
        }
    }
}

/// Point-in-time figures for one collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionStats {
    pub name: String,
    /// Live documents
    pub documents: usize,
    /// Payload store size, header and superseded frames included
    pub payload_bytes: u64,
    /// Bytes held by the frames of live documents
    pub live_bytes: u64,
    pub index_height: usize,
}

impl CollectionStats {
    /// Bytes `compact` would reclaim
    pub fn reclaimable_bytes(&self) -> u64 {
        self.payload_bytes.saturating_sub(HEADER_SIZE + self.live_bytes)
    }
}

pub(crate) struct CollectionState {
    pub index: DocumentIndex,
    pub store: PayloadStore,
    next_sequence: u64,
    /// Mutations since the index file was last written
    unflushed: usize,
    dropped: bool,
}

/// A named collection of documents
pub struct Collection {
    name: String,
    index_path: PathBuf,
    settings: CollectionSettings,
    crypto: Arc<EncryptionManager>,
    ledger: Arc<Ledger>,
    state: RwLock<CollectionState>,
}

impl Collection {
    /// Open (or create) the collection stored under `dir`
    ///
    /// A missing, damaged or stale index file is rebuilt from the payload
    /// store.
    pub(crate) fn open(
        name: &str,
        dir: &Path,
        settings: CollectionSettings,
        crypto: Arc<EncryptionManager>,
        ledger: Arc<Ledger>,
    ) -> Result<Self> {
        let data_path = dir.join(format!("{}.dat", name));
        let index_path = dir.join(format!("{}.idx", name));
        let is_new = !data_path.exists();

        let store = PayloadStore::open(&data_path, settings.sync_strategy)?;

        let loaded = if is_new {
            Ok((DocumentIndex::new(settings.min_degree), store.len()))
        } else {
            index::file::load(&index_path, settings.min_degree)
        };

        let (index, next_sequence, rebuilt) = match loaded {
            Ok((tree, stamped)) if stamped == store.len() => {
                let next_sequence = tree
                    .iter()
                    .map(|(_, loc)| loc.sequence + 1)
                    .max()
                    .unwrap_or(0);
                (tree, next_sequence, is_new)
            }
            Ok((_, stamped)) => {
                let reason = SealError::IndexCorruption(format!(
                    "index covers {} bytes but the payload store has {}",
                    stamped,
                    store.len()
                ));
                tracing::warn!(collection = name, error = %reason, "Rebuilding index");
                let (tree, next) = rebuild_index(&store, settings.min_degree)?;
                (tree, next, true)
            }
            Err(reason @ SealError::IndexCorruption(_)) => {
                tracing::warn!(collection = name, error = %reason, "Rebuilding index");
                let (tree, next) = rebuild_index(&store, settings.min_degree)?;
                (tree, next, true)
            }
            Err(e) => return Err(e),
        };

        if rebuilt {
            index::file::save(&index_path, &index, store.len())?;
        }

        tracing::debug!(
            collection = name,
            documents = index.len(),
            bytes = store.len(),
            "Opened collection"
        );

        Ok(Self {
            name: name.to_string(),
            index_path,
            settings,
            crypto,
            ledger,
            state: RwLock::new(CollectionState {
                index,
                store,
                next_sequence,
                unflushed: 0,
                dropped: false,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Insert a new document, generating an id when `id` is `None`
    pub fn insert(&self, id: Option<String>, fields: Fields) -> Result<String> {
        let id = match id {
            Some(id) => {
                validate_id(&id)?;
                id
            }
            None => Uuid::new_v4().simple().to_string(),
        };

        let mut state = self.write_state()?;
        self.insert_locked(&mut state, id.clone(), fields)?;

        tracing::debug!(collection = %self.name, id = %id, "Inserted document");
        Ok(id)
    }

    /// Insert several documents under one lock acquisition, generating ids
    ///
    /// Each document gets its own frame and ledger block, in input order. On
    /// error the documents before the failing one stay inserted.
    pub fn insert_many(&self, documents: Vec<Fields>) -> Result<Vec<String>> {
        let mut state = self.write_state()?;
        let mut ids = Vec::with_capacity(documents.len());
        for fields in documents {
            let id = Uuid::new_v4().simple().to_string();
            self.insert_locked(&mut state, id.clone(), fields)?;
            ids.push(id);
        }

        tracing::debug!(collection = %self.name, count = ids.len(), "Inserted documents");
        Ok(ids)
    }

    fn insert_locked(&self, state: &mut CollectionState, id: String, fields: Fields) -> Result<()> {
        if state.index.contains_key(&id) {
            return Err(SealError::DuplicateId {
                collection: self.name.clone(),
                id,
            });
        }

        let document = Document::new(&self.name, id.clone(), fields);
        let plaintext = bincode::serialize(&document)?;

        // Sequences are never reused, even by a failed insert
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        self.commit(state, RecordOp::Put, &id, sequence, &plaintext)
    }

    /// Merge `patch` into an existing document
    pub fn update(&self, id: &str, patch: Fields) -> Result<bool> {
        let mut state = self.write_state()?;
        let location = *state
            .index
            .get(&id.to_string())
            .ok_or_else(|| SealError::not_found(&self.name, id))?;

        let mut document = self.load(&state, id, &location)?;
        document.apply_patch(patch);

        self.commit(
            &mut state,
            RecordOp::Put,
            id,
            location.sequence,
            &bincode::serialize(&document)?,
        )?;

        tracing::debug!(collection = %self.name, id, version = document.version, "Updated document");
        Ok(true)
    }

    /// Remove a document from the live view
    pub fn delete(&self, id: &str) -> Result<bool> {
        let mut state = self.write_state()?;
        let location = *state
            .index
            .get(&id.to_string())
            .ok_or_else(|| SealError::not_found(&self.name, id))?;

        let notice = RemovalNotice {
            id: id.to_string(),
            removed_at: crate::now_millis(),
        };

        self.commit(
            &mut state,
            RecordOp::Remove,
            id,
            location.sequence,
            &bincode::serialize(&notice)?,
        )?;

        tracing::debug!(collection = %self.name, id, "Deleted document");
        Ok(true)
    }

    /// Encrypt, append, index, then record the frame in the ledger
    ///
    /// If the ledger append fails the frame and the index change are undone,
    /// so an `Err` leaves the collection as it was.
    fn commit(
        &self,
        state: &mut CollectionState,
        op: RecordOp,
        id: &str,
        sequence: u64,
        plaintext: &[u8],
    ) -> Result<()> {
        let record = StoredRecord {
            op,
            id: id.to_string(),
            sequence,
            ciphertext: self.crypto.encrypt_data(plaintext)?,
        };
        let body = record.encode()?;
        let (offset, len) = state.store.append(&body)?;

        let key = id.to_string();
        let previous = match op {
            RecordOp::Put => state.index.insert(
                key.clone(),
                Location {
                    offset,
                    len,
                    sequence,
                },
            ),
            RecordOp::Remove => state.index.remove(&key),
        };

        if let Err(e) = self.ledger.add_block(&body) {
            match previous {
                Some(location) => {
                    state.index.insert(key, location);
                }
                None => {
                    state.index.remove(&key);
                }
            }
            if let Err(undo) = state.store.truncate_to(offset) {
                // The index stamp no longer matches, so the next open rebuilds
                tracing::error!(
                    collection = %self.name,
                    id,
                    error = %undo,
                    "Failed to discard frame of an unrecorded mutation"
                );
            }
            return Err(e);
        }

        // The mutation is durable from here on; a failed index write is retried
        state.unflushed += 1;
        if state.unflushed >= self.settings.flush_interval {
            if let Err(e) = self.flush_state(state) {
                tracing::warn!(collection = %self.name, error = %e, "Index flush failed");
            }
        }
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Fetch a document by id
    pub fn get(&self, id: &str) -> Result<Document> {
        let record = {
            let state = self.read_state()?;
            let location = state
                .index
                .get(&id.to_string())
                .ok_or_else(|| SealError::not_found(&self.name, id))?;
            state.store.read_record(location)?
        };
        self.decode_document(id, record)
    }

    /// Number of live documents
    pub fn count(&self) -> Result<usize> {
        Ok(self.read_state()?.index.len())
    }

    pub fn stats(&self) -> Result<CollectionStats> {
        let state = self.read_state()?;
        Ok(CollectionStats {
            name: self.name.clone(),
            documents: state.index.len(),
            payload_bytes: state.store.len(),
            live_bytes: state.index.iter().map(|(_, loc)| loc.len as u64).sum(),
            index_height: state.index.height(),
        })
    }

    /// Read and decrypt the document at `location` while the caller holds a lock
    fn load(&self, state: &CollectionState, id: &str, location: &Location) -> Result<Document> {
        let record = state.store.read_record(location)?;
        self.decode_document(id, record)
    }

    pub(crate) fn decode_document(&self, id: &str, record: StoredRecord) -> Result<Document> {
        if record.op != RecordOp::Put || record.id != id {
            return Err(SealError::Storage(format!(
                "index entry for {}/{} points at a record for {:?} {}",
                self.name, id, record.op, record.id
            )));
        }
        let plaintext = self.crypto.decrypt_data(&record.ciphertext)?;
        Ok(bincode::deserialize(&plaintext)?)
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Sync the payload store and persist the index
    pub fn flush(&self) -> Result<()> {
        let mut state = self.write_state()?;
        self.flush_state(&mut state)
    }

    fn flush_state(&self, state: &mut CollectionState) -> Result<()> {
        state.store.sync()?;
        index::file::save(&self.index_path, &state.index, state.store.len())?;
        state.unflushed = 0;
        tracing::trace!(collection = %self.name, "Flushed index");
        Ok(())
    }

    /// Rewrite the payload store with live records only
    pub fn compact(&self) -> Result<()> {
        let mut state = self.write_state()?;

        let mut live: Vec<(String, Location)> = state
            .index
            .iter()
            .map(|(id, loc)| (id.clone(), *loc))
            .collect();
        live.sort_by_key(|(_, loc)| loc.sequence);

        let before = state.store.len();
        let moved = state.store.compact(live)?;

        let mut index = DocumentIndex::new(self.settings.min_degree);
        for (id, location) in moved {
            index.insert(id, location);
        }
        state.index = index;
        self.flush_state(&mut state)?;

        tracing::info!(
            collection = %self.name,
            before,
            after = state.store.len(),
            "Compacted collection"
        );
        Ok(())
    }

    /// Delete the collection's files. The handle is unusable afterwards.
    ///
    /// If the payload store cannot be removed nothing changes. Once it is
    /// gone the collection is dropped even if the index file lingers, since
    /// collections are discovered by their payload store.
    pub(crate) fn destroy(&self) -> Result<()> {
        let mut state = self.write_state()?;
        match fs::remove_file(state.store.path()) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        state.dropped = true;
        state.index.clear();

        if self.index_path.exists() {
            if let Err(e) = fs::remove_file(&self.index_path) {
                tracing::warn!(
                    collection = %self.name,
                    path = %self.index_path.display(),
                    error = %e,
                    "Failed to remove index file of dropped collection"
                );
            }
        }
        Ok(())
    }

    // =========================================================================
    // Locking
    // =========================================================================

    pub(crate) fn read_state(&self) -> Result<RwLockReadGuard<'_, CollectionState>> {
        let guard = self
            .state
            .try_read_for(self.settings.lock_timeout)
            .or_else(|| {
                tracing::debug!(collection = %self.name, "Read lock contended, retrying");
                self.state.try_read_for(self.settings.lock_timeout)
            })
            .ok_or_else(|| SealError::LockTimeout(format!("read lock on {}", self.name)))?;

        if guard.dropped {
            return Err(SealError::CollectionNotFound(self.name.clone()));
        }
        Ok(guard)
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, CollectionState>> {
        let guard = self
            .state
            .try_write_for(self.settings.lock_timeout)
            .or_else(|| {
                tracing::debug!(collection = %self.name, "Write lock contended, retrying");
                self.state.try_write_for(self.settings.lock_timeout)
            })
            .ok_or_else(|| SealError::LockTimeout(format!("write lock on {}", self.name)))?;

        if guard.dropped {
            return Err(SealError::CollectionNotFound(self.name.clone()));
        }
        Ok(guard)
    }
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection").field("name", &self.name).finish()
    }
}

/// Rebuild an index by replaying every frame in the store
///
/// Returns the index and the next free insertion sequence.
fn rebuild_index(store: &PayloadStore, min_degree: usize) -> Result<(DocumentIndex, u64)> {
    let mut index = DocumentIndex::new(min_degree);
    let mut next_sequence = 0;

    for frame in store.scan()? {
        next_sequence = next_sequence.max(frame.record.sequence + 1);
        match frame.record.op {
            RecordOp::Put => {
                index.insert(
                    frame.record.id,
                    Location {
                        offset: frame.offset,
                        len: frame.len,
                        sequence: frame.record.sequence,
                    },
                );
            }
            RecordOp::Remove => {
                index.remove(&frame.record.id);
            }
        }
    }

    tracing::info!(
        path = %store.path().display(),
        documents = index.len(),
        "Rebuilt index from payload store"
    );
    Ok((index, next_sequence))
}

fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > MAX_ID_LEN {
        return Err(SealError::InvalidName(format!(
            "document id must be 1-{} bytes",
            MAX_ID_LEN
        )));
    }
    Ok(())
}
