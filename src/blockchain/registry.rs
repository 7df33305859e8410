// src/blockchain/registry.rs
//! Credential registry state machine.
//!
//! Mirrors the `CredentialsRegistry` contract: a mapping from content
//! fingerprint to registry entry, where a missing entry means
//! `Unregistered`. The only transitions are
//!
//! ```text
//! Unregistered --issue--> Valid --revoke--> Revoked
//! ```
//!
//! `Revoked` is terminal, and a fingerprint can never be issued twice. As a
//! consequence the events recorded for any fingerprint are always a prefix
//! of `[Issued, Revoked]`.

use crate::errors::{Result, VaultError};
use crate::models::did::EthrDid;
use crate::models::fingerprint::ContentFingerprint;
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// Lifecycle state of a fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryState {
    Unregistered,
    Valid,
    Revoked,
}

/// Who may revoke a valid registration.
///
/// The default is [`RevocationPolicy::OwnerOnly`]: an issuer cannot
/// invalidate a user's credential without the user's consent. Deployments
/// that need issuer-initiated revocation (for example after a key
/// compromise) can select `IssuerOnly` or `OwnerOrIssuer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationPolicy {
    #[default]
    OwnerOnly,
    IssuerOnly,
    OwnerOrIssuer,
}

impl FromStr for RevocationPolicy {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "owner_only" | "owner" => Ok(RevocationPolicy::OwnerOnly),
            "issuer_only" | "issuer" => Ok(RevocationPolicy::IssuerOnly),
            "owner_or_issuer" | "either" => Ok(RevocationPolicy::OwnerOrIssuer),
            other => Err(VaultError::Config(format!("unknown revocation policy {}", other))),
        }
    }
}

impl RevocationPolicy {
    /// Checks `caller` against the entry. The issuer's account is the one
    /// named by the stored issuer DID; a non-`did:ethr` issuer has no account
    /// and therefore can never revoke.
    pub fn permits(&self, caller: Address, entry: &RegistryEntry) -> bool {
        let is_owner = caller == entry.owner;
        let is_issuer = EthrDid::account_of(&entry.issuer_did).map_or(false, |issuer| issuer == caller);
        match self {
            RevocationPolicy::OwnerOnly => is_owner,
            RevocationPolicy::IssuerOnly => is_issuer,
            RevocationPolicy::OwnerOrIssuer => is_owner || is_issuer,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub owner: Address,
    pub issuer_did: String,
    /// Unix seconds
    pub issued_at: u64,
    pub state: RegistryState,
}

/// Result of the `isValid` query. Fields are zeroed unless `valid`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validity {
    pub valid: bool,
    pub owner: Address,
    pub issuer_did: String,
    pub issued_at: u64,
}

impl Validity {
    pub fn invalid() -> Self {
        Validity {
            valid: false,
            owner: Address::zero(),
            issuer_did: String::new(),
            issued_at: 0,
        }
    }
}

/// Events emitted by the state transitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum RegistryEvent {
    Issued {
        fingerprint: ContentFingerprint,
        owner: Address,
        issuer_did: String,
        timestamp: u64,
    },
    Revoked {
        fingerprint: ContentFingerprint,
        timestamp: u64,
    },
}

impl RegistryEvent {
    pub fn fingerprint(&self) -> ContentFingerprint {
        match self {
            RegistryEvent::Issued { fingerprint, .. } | RegistryEvent::Revoked { fingerprint, .. } => *fingerprint,
        }
    }

    pub fn timestamp(&self) -> u64 {
        match self {
            RegistryEvent::Issued { timestamp, .. } | RegistryEvent::Revoked { timestamp, .. } => *timestamp,
        }
    }
}

/// Registry state plus its append-only event log.
#[derive(Debug, Default)]
pub struct CredentialRegistry {
    entries: HashMap<ContentFingerprint, RegistryEntry>,
    events: Vec<RegistryEvent>,
    policy: RevocationPolicy,
}

impl CredentialRegistry {
    pub fn new(policy: RevocationPolicy) -> Self {
        CredentialRegistry {
            entries: HashMap::new(),
            events: Vec::new(),
            policy,
        }
    }

    pub fn state_of(&self, fingerprint: &ContentFingerprint) -> RegistryState {
        self.entries
            .get(fingerprint)
            .map_or(RegistryState::Unregistered, |entry| entry.state)
    }

    /// Registers `fingerprint` as valid.
    ///
    /// # Errors
    /// [`VaultError::AlreadyRegistered`] if the fingerprint was ever issued,
    /// including when it has since been revoked.
    pub fn issue(
        &mut self,
        fingerprint: ContentFingerprint,
        owner: Address,
        issuer_did: &str,
        now: u64,
    ) -> Result<RegistryEvent> {
        if self.entries.contains_key(&fingerprint) {
            return Err(VaultError::AlreadyRegistered(fingerprint));
        }

        self.entries.insert(
            fingerprint,
            RegistryEntry {
                owner,
                issuer_did: issuer_did.to_string(),
                issued_at: now,
                state: RegistryState::Valid,
            },
        );
        let event = RegistryEvent::Issued {
            fingerprint,
            owner,
            issuer_did: issuer_did.to_string(),
            timestamp: now,
        };
        self.events.push(event.clone());
        Ok(event)
    }

    /// Moves a valid registration to `Revoked`.
    ///
    /// State preconditions are checked before authorization, so revoking an
    /// unknown fingerprint always reports `NotRegistered`.
    ///
    /// # Errors
    /// - [`VaultError::NotRegistered`] if never issued
    /// - [`VaultError::AlreadyRevoked`] if already revoked
    /// - [`VaultError::Unauthorized`] if the policy rejects `caller`
    pub fn revoke(&mut self, caller: Address, fingerprint: ContentFingerprint, now: u64) -> Result<RegistryEvent> {
        let policy = self.policy;
        let entry = self
            .entries
            .get_mut(&fingerprint)
            .ok_or(VaultError::NotRegistered(fingerprint))?;

        if entry.state == RegistryState::Revoked {
            return Err(VaultError::AlreadyRevoked(fingerprint));
        }
        if !policy.permits(caller, entry) {
            return Err(VaultError::Unauthorized { caller, fingerprint });
        }

        entry.state = RegistryState::Revoked;
        let event = RegistryEvent::Revoked {
            fingerprint,
            timestamp: now,
        };
        self.events.push(event.clone());
        Ok(event)
    }

    /// Side-effect-free validity query, usable by anyone.
    pub fn is_valid(&self, fingerprint: &ContentFingerprint) -> Validity {
        match self.entries.get(fingerprint) {
            Some(entry) if entry.state == RegistryState::Valid => Validity {
                valid: true,
                owner: entry.owner,
                issuer_did: entry.issuer_did.clone(),
                issued_at: entry.issued_at,
            },
            _ => Validity::invalid(),
        }
    }

    pub fn events(&self) -> &[RegistryEvent] {
        &self.events
    }

    pub fn events_for(&self, fingerprint: &ContentFingerprint) -> Vec<&RegistryEvent> {
        self.events.iter().filter(|e| e.fingerprint() == *fingerprint).collect()
    }
}
