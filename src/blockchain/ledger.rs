// src/blockchain/ledger.rs
//! Ledger abstraction over the credential registry.
//!
//! A [`Ledger`] is the only path to registry state. Writes resolve once the
//! ledger has confirmed them; a returned [`LedgerReceipt`] means the
//! transition took effect. Writes are serialized by the ledger, so when two
//! `issue` calls race for one fingerprint exactly one succeeds and the other
//! observes [`VaultError::AlreadyRegistered`].
//!
//! A submitted write cannot be retracted. Dropping the future only stops the
//! caller from waiting for it.

use crate::blockchain::registry::{CredentialRegistry, RegistryEvent, RevocationPolicy, Validity};
use crate::errors::{Result, VaultError};
use crate::models::fingerprint::ContentFingerprint;
use crate::utils::crypto::hash_data;
use crate::utils::time::now_unix;
use async_trait::async_trait;
use ethers::types::{Address, H256};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};

/// Confirmation of a ledger write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerReceipt {
    pub tx_hash: H256,
    pub block_number: Option<u64>,
    /// Block timestamp, when the backend reports one
    pub timestamp: Option<u64>,
}

/// Registry operations as seen by clients.
///
/// `caller` is the account submitting the write (`msg.sender` on chain).
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn issue(
        &self,
        caller: Address,
        fingerprint: ContentFingerprint,
        owner: Address,
        issuer_did: &str,
    ) -> Result<LedgerReceipt>;

    async fn revoke(&self, caller: Address, fingerprint: ContentFingerprint) -> Result<LedgerReceipt>;

    async fn is_valid(&self, fingerprint: ContentFingerprint) -> Result<Validity>;
}

type Clock = Box<dyn Fn() -> u64 + Send + Sync>;

/// Process-local ledger backed by [`CredentialRegistry`].
///
/// The mutex plays the part of the chain's transaction ordering; no lock is
/// held across an await point.
pub struct InMemoryLedger {
    registry: Mutex<CredentialRegistry>,
    clock: Clock,
}

impl InMemoryLedger {
    pub fn new(policy: RevocationPolicy) -> Self {
        Self::with_clock(policy, now_unix)
    }

    /// Uses `clock` for block timestamps.
    pub fn with_clock(policy: RevocationPolicy, clock: impl Fn() -> u64 + Send + Sync + 'static) -> Self {
        InMemoryLedger {
            registry: Mutex::new(CredentialRegistry::new(policy)),
            clock: Box::new(clock),
        }
    }

    /// All events emitted so far, oldest first.
    pub fn events(&self) -> Result<Vec<RegistryEvent>> {
        Ok(self.lock()?.events().to_vec())
    }

    fn lock(&self) -> Result<MutexGuard<'_, CredentialRegistry>> {
        self.registry
            .lock()
            .map_err(|_| VaultError::Ledger("in-memory ledger lock poisoned".into()))
    }

    fn receipt(event: &RegistryEvent, block_number: u64) -> Result<LedgerReceipt> {
        let mut preimage = serde_json::to_vec(event)?;
        preimage.extend_from_slice(&block_number.to_be_bytes());
        Ok(LedgerReceipt {
            tx_hash: H256::from(hash_data(&preimage)),
            block_number: Some(block_number),
            timestamp: Some(event.timestamp()),
        })
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new(RevocationPolicy::default())
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn issue(
        &self,
        caller: Address,
        fingerprint: ContentFingerprint,
        owner: Address,
        issuer_did: &str,
    ) -> Result<LedgerReceipt> {
        let now = (self.clock)();
        let mut registry = self.lock()?;
        let event = registry.issue(fingerprint, owner, issuer_did, now)?;
        let receipt = Self::receipt(&event, registry.events().len() as u64)?;
        info!("issued {} for owner {:?} (submitted by {:?})", fingerprint, owner, caller);
        Ok(receipt)
    }

    async fn revoke(&self, caller: Address, fingerprint: ContentFingerprint) -> Result<LedgerReceipt> {
        let now = (self.clock)();
        let mut registry = self.lock()?;
        let event = registry.revoke(caller, fingerprint, now)?;
        let receipt = Self::receipt(&event, registry.events().len() as u64)?;
        info!("revoked {} by {:?}", fingerprint, caller);
        Ok(receipt)
    }

    async fn is_valid(&self, fingerprint: ContentFingerprint) -> Result<Validity> {
        let validity = self.lock()?.is_valid(&fingerprint);
        debug!("isValid({}) = {}", fingerprint, validity.valid);
        Ok(validity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::crypto::compute_fingerprint;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_receipts_are_distinct() {
        let ledger = InMemoryLedger::with_clock(RevocationPolicy::OwnerOnly, || 42);
        let owner = Address::from_low_u64_be(7);
        let fp = compute_fingerprint("bafy123");

        let issued = ledger.issue(owner, fp, owner, "did:ethr:x").await.unwrap();
        let revoked = ledger.revoke(owner, fp).await.unwrap();
        assert_ne!(issued.tx_hash, revoked.tx_hash);
        assert_eq!(issued.block_number, Some(1));
        assert_eq!(revoked.block_number, Some(2));
        assert_eq!(revoked.timestamp, Some(42));
        assert_eq!(ledger.events().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_write_changes_nothing() {
        let ledger = InMemoryLedger::default();
        let owner = Address::from_low_u64_be(7);
        let fp = compute_fingerprint("bafy123");

        assert!(matches!(ledger.revoke(owner, fp).await, Err(VaultError::NotRegistered(_))));
        assert!(ledger.events().unwrap().is_empty());
        assert!(!ledger.is_valid(fp).await.unwrap().valid);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_issue_has_one_winner() {
        let ledger = Arc::new(InMemoryLedger::default());
        let fp = compute_fingerprint("bafy-race");

        let handles: Vec<_> = (1..=8u64)
            .map(|n| {
                let ledger = ledger.clone();
                tokio::spawn(async move {
                    let who = Address::from_low_u64_be(n);
                    ledger.issue(who, fp, who, "did:ethr:racer").await
                })
            })
            .collect();

        let mut wins = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => wins += 1,
                Err(VaultError::AlreadyRegistered(_)) => conflicts += 1,
                Err(other) => panic!("unexpected error {other}"),
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(conflicts, 7);
        assert_eq!(ledger.events().unwrap().len(), 1);
    }
}
