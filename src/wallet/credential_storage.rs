// src/wallet/credential_storage.rs
//! Local persistence for document records, the audit trail and issued
//! credentials.
//!
//! Everything here is a cache. The ledger stays authoritative for credential
//! state, so a lost or stale store never changes what verification reports.
//!
//! Two backends share one in-memory layout ([`RecordState`]):
//! - [`InMemoryRecordStore`] keeps it for the life of the process
//! - [`JsonFileRecordStore`] loads it on open and rewrites the file after
//!   every mutation

use crate::errors::{Result, VaultError};
use crate::models::credential::VerifiableCredential;
use crate::models::document::{AuditLogEntry, DocumentRecord};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Persistence collaborator used by the orchestrator.
///
/// Implementations are internally synchronized; no method is held across an
/// await point by callers.
pub trait RecordStore: Send + Sync {
    /// Inserts or replaces the record with the same `doc_id`.
    fn save_document(&self, record: DocumentRecord) -> Result<()>;

    fn get_document(&self, doc_id: &str) -> Result<Option<DocumentRecord>>;

    /// All records in upload order.
    fn list_documents(&self) -> Result<Vec<DocumentRecord>>;

    fn append_audit(&self, entry: AuditLogEntry) -> Result<()>;

    /// Audit entries, newest first.
    fn audit_log(&self) -> Result<Vec<AuditLogEntry>>;

    fn save_credential(&self, vc: VerifiableCredential) -> Result<()>;

    /// Issued credentials in issuance order.
    fn credentials(&self) -> Result<Vec<VerifiableCredential>>;

    /// Most recently issued credential for `cid`, if any.
    fn credential_by_cid(&self, cid: &str) -> Result<Option<VerifiableCredential>> {
        Ok(self
            .credentials()?
            .into_iter()
            .rev()
            .find(|vc| vc.credential_subject.cid == cid))
    }
}

/// Serialized layout shared by both backends.
#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct RecordState {
    #[serde(default)]
    pub documents: Vec<DocumentRecord>,
    /// Oldest first; reversed on read
    #[serde(default)]
    pub audit: Vec<AuditLogEntry>,
    #[serde(default)]
    pub credentials: Vec<VerifiableCredential>,
}

impl RecordState {
    fn save_document(&mut self, record: DocumentRecord) {
        match self.documents.iter_mut().find(|d| d.doc_id == record.doc_id) {
            Some(existing) => *existing = record,
            None => self.documents.push(record),
        }
    }

    fn get_document(&self, doc_id: &str) -> Option<DocumentRecord> {
        self.documents.iter().find(|d| d.doc_id == doc_id).cloned()
    }

    fn audit_newest_first(&self) -> Vec<AuditLogEntry> {
        self.audit.iter().rev().cloned().collect()
    }
}

fn poisoned<T>(_: T) -> VaultError {
    VaultError::Persistence("record store lock poisoned".into())
}

/// Process-local record store.
#[derive(Default)]
pub struct InMemoryRecordStore {
    state: Mutex<RecordState>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, RecordState>> {
        self.state.lock().map_err(poisoned)
    }
}

impl RecordStore for InMemoryRecordStore {
    fn save_document(&self, record: DocumentRecord) -> Result<()> {
        self.lock()?.save_document(record);
        Ok(())
    }

    fn get_document(&self, doc_id: &str) -> Result<Option<DocumentRecord>> {
        Ok(self.lock()?.get_document(doc_id))
    }

    fn list_documents(&self) -> Result<Vec<DocumentRecord>> {
        Ok(self.lock()?.documents.clone())
    }

    fn append_audit(&self, entry: AuditLogEntry) -> Result<()> {
        self.lock()?.audit.push(entry);
        Ok(())
    }

    fn audit_log(&self) -> Result<Vec<AuditLogEntry>> {
        Ok(self.lock()?.audit_newest_first())
    }

    fn save_credential(&self, vc: VerifiableCredential) -> Result<()> {
        self.lock()?.credentials.push(vc);
        Ok(())
    }

    fn credentials(&self) -> Result<Vec<VerifiableCredential>> {
        Ok(self.lock()?.credentials.clone())
    }
}

/// Record store persisted as a single pretty-printed JSON file.
///
/// # Durability
/// Each mutation writes the full state to a sibling temp file and renames it
/// over the target, so a crash leaves either the old or the new contents.
pub struct JsonFileRecordStore {
    path: PathBuf,
    state: Mutex<RecordState>,
}

impl JsonFileRecordStore {
    /// Opens `path`, starting empty if the file does not exist yet.
    ///
    /// # Errors
    /// - [`VaultError::Persistence`] if the file exists but cannot be read
    /// - [`VaultError::Serialization`] if its contents are not a valid state
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let raw = fs::read(&path)
                .map_err(|e| VaultError::Persistence(format!("reading {}: {}", path.display(), e)))?;
            let state: RecordState = serde_json::from_slice(&raw)?;
            info!(
                "loaded {} documents and {} audit entries from {}",
                state.documents.len(),
                state.audit.len(),
                path.display()
            );
            state
        } else {
            RecordState::default()
        };

        Ok(JsonFileRecordStore {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Applies `f` and flushes. The in-memory state is rolled back if the
    /// write fails.
    fn mutate(&self, f: impl FnOnce(&mut RecordState)) -> Result<()> {
        let mut state = self.state.lock().map_err(poisoned)?;
        let previous = state.clone();
        f(&mut state);
        if let Err(e) = self.flush(&state) {
            *state = previous;
            return Err(e);
        }
        Ok(())
    }

    fn read<T>(&self, f: impl FnOnce(&RecordState) -> T) -> Result<T> {
        let state = self.state.lock().map_err(poisoned)?;
        Ok(f(&state))
    }

    fn flush(&self, state: &RecordState) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| VaultError::Persistence(format!("creating {}: {}", parent.display(), e)))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(state)?;
        fs::write(&tmp, bytes).map_err(|e| VaultError::Persistence(format!("writing {}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| VaultError::Persistence(format!("replacing {}: {}", self.path.display(), e)))?;
        debug!("flushed record store to {}", self.path.display());
        Ok(())
    }
}

impl RecordStore for JsonFileRecordStore {
    fn save_document(&self, record: DocumentRecord) -> Result<()> {
        self.mutate(|s| s.save_document(record))
    }

    fn get_document(&self, doc_id: &str) -> Result<Option<DocumentRecord>> {
        self.read(|s| s.get_document(doc_id))
    }

    fn list_documents(&self) -> Result<Vec<DocumentRecord>> {
        self.read(|s| s.documents.clone())
    }

    fn append_audit(&self, entry: AuditLogEntry) -> Result<()> {
        self.mutate(|s| s.audit.push(entry))
    }

    fn audit_log(&self) -> Result<Vec<AuditLogEntry>> {
        self.read(RecordState::audit_newest_first)
    }

    fn save_credential(&self, vc: VerifiableCredential) -> Result<()> {
        self.mutate(|s| s.credentials.push(vc))
    }

    fn credentials(&self) -> Result<Vec<VerifiableCredential>> {
        self.read(|s| s.credentials.clone())
    }
}
