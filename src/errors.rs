// src/errors.rs
//! Error taxonomy for the credential lifecycle engine.
//!
//! Every fallible operation in the crate returns [`VaultError`]. The variants
//! fall into three groups that callers are expected to treat differently:
//!
//! - **Verdicts**: the payload or credential is invalid (`Integrity`,
//!   `HashMismatch`, `MissingProof`, `SignerMismatch`). Never retried.
//! - **Precondition violations**: the registry state machine refused the
//!   transition (`AlreadyRegistered`, `NotRegistered`, `AlreadyRevoked`,
//!   `Unauthorized`). Definitive; retrying cannot change the outcome.
//! - **Incomplete checks**: a collaborator could not be reached (`Ledger`,
//!   `Storage`). Eligible for caller-driven retry.

use crate::models::fingerprint::ContentFingerprint;
use ethers::types::Address;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, VaultError>;

#[derive(Debug, Error)]
pub enum VaultError {
    /// AEAD tag did not verify: tampered ciphertext, wrong key or wrong nonce.
    #[error("integrity check failed: ciphertext could not be authenticated")]
    Integrity,

    #[error("fingerprint {0} is already registered")]
    AlreadyRegistered(ContentFingerprint),

    #[error("fingerprint {0} is not registered")]
    NotRegistered(ContentFingerprint),

    #[error("fingerprint {0} is already revoked")]
    AlreadyRevoked(ContentFingerprint),

    #[error("account {caller:?} is not allowed to revoke fingerprint {fingerprint}")]
    Unauthorized {
        caller: Address,
        fingerprint: ContentFingerprint,
    },

    /// The external signer declined or was unavailable. Retryable by
    /// re-initiating the signing request.
    #[error("signing rejected: {0}")]
    SigningRejected(String),

    #[error("credential hash mismatch: signed fields were modified")]
    HashMismatch,

    #[error("credential has no proof")]
    MissingProof,

    #[error("recovered signer {recovered:?} does not match issuer account {expected:?}")]
    SignerMismatch { recovered: Address, expected: Address },

    #[error("invalid DID: {0}")]
    InvalidDid(String),

    #[error("key wrapping failed: {0}")]
    KeyWrap(String),

    /// Ledger transport or submission failure.
    #[error("ledger unavailable: {0}")]
    Ledger(String),

    #[error("content storage unavailable: {0}")]
    Storage(String),

    #[error("record store failure: {0}")]
    Persistence(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl VaultError {
    /// Only transport failures may be retried by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, VaultError::Ledger(_) | VaultError::Storage(_))
    }

    /// `true` when the error states that a credential or payload is invalid,
    /// as opposed to a check that could not be completed.
    pub fn is_verdict(&self) -> bool {
        matches!(
            self,
            VaultError::Integrity
                | VaultError::HashMismatch
                | VaultError::MissingProof
                | VaultError::SignerMismatch { .. }
        )
    }

    /// `true` for registry state-machine refusals.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            VaultError::AlreadyRegistered(_)
                | VaultError::NotRegistered(_)
                | VaultError::AlreadyRevoked(_)
                | VaultError::Unauthorized { .. }
        )
    }
}

impl From<config::ConfigError> for VaultError {
    fn from(err: config::ConfigError) -> Self {
        VaultError::Config(err.to_string())
    }
}
