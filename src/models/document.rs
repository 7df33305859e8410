// src/models/document.rs
//! Locally cached document metadata and audit trail.

use crate::models::fingerprint::ContentFingerprint;
use crate::utils::crypto::NONCE_LEN;
use crate::utils::serialization::{base64_bytes, base64_nonce};
use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};

/// A symmetric key encrypted to one recipient (ECIES over secp256k1).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WrappedKey {
    /// Compressed SEC1 ephemeral public key (33 bytes)
    #[serde(with = "base64_bytes")]
    pub ephemeral_public_key: Vec<u8>,

    #[serde(with = "base64_nonce")]
    pub nonce: [u8; NONCE_LEN],

    /// Encrypted key followed by the 16-byte tag
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
}

/// Output of the document encryption step.
///
/// Created once per document and never mutated. The ciphertext itself lives
/// in content storage; records keep only the [`PayloadKeys`] half.
#[derive(Debug, Clone)]
pub struct EncryptedPayload {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_LEN],
    pub wrapped_key: WrappedKey,
}

impl EncryptedPayload {
    pub fn keys(&self) -> PayloadKeys {
        PayloadKeys {
            nonce: self.nonce,
            wrapped_key: self.wrapped_key.clone(),
        }
    }
}

/// What a record needs to decrypt its stored ciphertext.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PayloadKeys {
    #[serde(with = "base64_nonce")]
    pub nonce: [u8; NONCE_LEN],
    pub wrapped_key: WrappedKey,
}

/// Cached lifecycle status. Advisory only: the ledger is authoritative and
/// this value may lag it.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Uploaded,
    Registered,
    Revoked,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DocumentRecord {
    pub doc_id: String,
    pub name: String,
    pub doc_type: String,
    pub owner: Address,
    pub cid: String,
    pub fingerprint: ContentFingerprint,
    pub uploaded_at: String,
    pub payload: PayloadKeys,
    /// Hash of the last confirmed ledger write
    pub tx_hash: Option<H256>,
    pub status: DocumentStatus,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Upload,
    Register,
    Revoke,
    IssueVc,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AuditLogEntry {
    pub id: String,
    pub timestamp: String,
    pub action: AuditAction,
    pub doc_id: Option<String>,
    pub cid: Option<String>,
    pub tx_hash: Option<H256>,
    pub details: String,
}

impl AuditLogEntry {
    pub fn new(action: AuditAction, details: impl Into<String>) -> Self {
        AuditLogEntry {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: crate::utils::time::now_rfc3339(),
            action,
            doc_id: None,
            cid: None,
            tx_hash: None,
            details: details.into(),
        }
    }

    pub fn for_document(mut self, record: &DocumentRecord) -> Self {
        self.doc_id = Some(record.doc_id.clone());
        self.cid = Some(record.cid.clone());
        self
    }

    pub fn with_cid(mut self, cid: impl Into<String>) -> Self {
        self.cid = Some(cid.into());
        self
    }

    pub fn with_tx(mut self, tx_hash: H256) -> Self {
        self.tx_hash = Some(tx_hash);
        self
    }
}
