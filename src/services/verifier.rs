// src/services/verifier.rs
//! Credential verification service.
//!
//! Verification has two independent halves, and a credential is trusted only
//! when both pass:
//! 1. **Signature**: the proof's message hash matches the recomputed
//!    canonical hash, and the signer recovered from it is the issuer's account
//! 2. **Ledger**: the registry reports the subject's fingerprint as valid,
//!    owned by the subject and attested by the same issuer DID
//!
//! Invalid credentials are reported as verdicts (`valid = false` with a
//! reason). A check that could not be completed, such as an unreachable
//! ledger, is returned as an `Err`.

use crate::blockchain::ledger::Ledger;
use crate::blockchain::registry::Validity;
use crate::errors::{Result, VaultError};
use crate::models::credential::VerifiableCredential;
use crate::models::did::EthrDid;
use crate::services::credential_issuer::credential_hash;
use crate::utils::crypto::compute_fingerprint;
use ethers::types::{Address, Signature};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Why a credential failed the signature check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    MissingProof,
    HashMismatch,
    MalformedSignature,
    IssuerNotAnAccount,
    SignerMismatch,
}

impl InvalidReason {
    pub fn into_error(self, recovered: Option<Address>, expected: Option<Address>) -> VaultError {
        match self {
            InvalidReason::MissingProof => VaultError::MissingProof,
            InvalidReason::HashMismatch => VaultError::HashMismatch,
            InvalidReason::MalformedSignature => VaultError::InvalidInput("signature is not a valid recoverable ECDSA signature".into()),
            InvalidReason::IssuerNotAnAccount => VaultError::InvalidDid("issuer DID does not name an account".into()),
            InvalidReason::SignerMismatch => VaultError::SignerMismatch {
                recovered: recovered.unwrap_or_default(),
                expected: expected.unwrap_or_default(),
            },
        }
    }
}

/// Outcome of the signature half of verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub valid: bool,
    pub recovered_signer: Option<Address>,
    pub expected_signer: Option<Address>,
    pub reason: Option<InvalidReason>,
}

impl VerificationReport {
    fn invalid(reason: InvalidReason) -> Self {
        VerificationReport {
            valid: false,
            recovered_signer: None,
            expected_signer: None,
            reason: Some(reason),
        }
    }

    /// Converts a failed report into its error variant.
    pub fn into_result(self) -> Result<Address> {
        match (self.valid, self.recovered_signer, self.reason) {
            (true, Some(signer), _) => Ok(signer),
            (_, recovered, Some(reason)) => Err(reason.into_error(recovered, self.expected_signer)),
            _ => Err(VaultError::MissingProof),
        }
    }
}

/// Why a correctly signed credential is still not trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustIssue {
    /// `cidHash` is not the fingerprint of `cid`
    FingerprintMismatch,
    /// Unregistered or revoked on the ledger
    NotValidOnLedger,
    OwnerMismatch,
    IssuerMismatch,
}

/// Combined signature and ledger decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustDecision {
    pub trusted: bool,
    pub signature: VerificationReport,
    pub ledger: Validity,
    pub issues: Vec<TrustIssue>,
}

/// Checks the signature half. Stateless; needs no ledger access.
///
/// # Process Flow
/// 1. Missing proof is invalid
/// 2. Recomputes `keccak256(canonicalize(vc))` and compares it with
///    `proof.messageHash`, so any edit to a signed field is detected
/// 3. Recovers the EIP-191 signer from the signature over the hash bytes
/// 4. Compares it with the account in `vc.issuer`
pub fn verify(vc: &VerifiableCredential) -> Result<VerificationReport> {
    let proof = match &vc.proof {
        Some(proof) => proof,
        None => return Ok(VerificationReport::invalid(InvalidReason::MissingProof)),
    };

    let recomputed = credential_hash(vc)?;
    if recomputed != proof.message_hash {
        debug!("hash mismatch: proof {} vs recomputed {}", proof.message_hash, recomputed);
        return Ok(VerificationReport::invalid(InvalidReason::HashMismatch));
    }

    let recovered = match Signature::try_from(proof.signature.as_slice())
        .ok()
        .and_then(|sig| sig.recover(proof.message_hash.as_bytes().to_vec()).ok())
    {
        Some(address) => address,
        None => return Ok(VerificationReport::invalid(InvalidReason::MalformedSignature)),
    };

    let expected = match EthrDid::account_of(&vc.issuer) {
        Ok(address) => address,
        Err(_) => {
            return Ok(VerificationReport {
                valid: false,
                recovered_signer: Some(recovered),
                expected_signer: None,
                reason: Some(InvalidReason::IssuerNotAnAccount),
            })
        }
    };

    let valid = recovered == expected;
    Ok(VerificationReport {
        valid,
        recovered_signer: Some(recovered),
        expected_signer: Some(expected),
        reason: (!valid).then_some(InvalidReason::SignerMismatch),
    })
}

/// `did:ethr` issuers match on the account they name, so hex case does not
/// matter. Anything else must match exactly.
fn same_issuer(ledger_issuer: &str, vc_issuer: &str) -> bool {
    match (EthrDid::account_of(ledger_issuer), EthrDid::account_of(vc_issuer)) {
        (Ok(a), Ok(b)) => a == b,
        _ => ledger_issuer == vc_issuer,
    }
}

/// Credential verifier that cross-checks the registry.
#[derive(Clone)]
pub struct Verifier {
    ledger: Arc<dyn Ledger>,
}

impl Verifier {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Verifier { ledger }
    }

    /// Full trust decision: signature validity and ledger validity are both
    /// required.
    ///
    /// # Errors
    /// Only when the decision could not be made (ledger unreachable, or the
    /// credential could not be serialized). Invalid credentials yield
    /// `Ok` with `trusted = false`.
    pub async fn assess(&self, vc: &VerifiableCredential) -> Result<TrustDecision> {
        let signature = verify(vc)?;
        let subject = &vc.credential_subject;
        let mut issues = Vec::new();

        if compute_fingerprint(&subject.cid) != subject.cid_hash {
            issues.push(TrustIssue::FingerprintMismatch);
        }

        let ledger = self.ledger.is_valid(subject.cid_hash).await?;
        if !ledger.valid {
            issues.push(TrustIssue::NotValidOnLedger);
        } else {
            if EthrDid::account_of(&subject.id).ok() != Some(ledger.owner) {
                issues.push(TrustIssue::OwnerMismatch);
            }
            if !same_issuer(&ledger.issuer_did, &vc.issuer) {
                issues.push(TrustIssue::IssuerMismatch);
            }
        }

        let trusted = signature.valid && issues.is_empty();
        info!(
            "assessed credential for {} (cid {}): signature {}, trusted {}",
            subject.id, subject.cid, signature.valid, trusted
        );
        Ok(TrustDecision {
            trusted,
            signature,
            ledger,
            issues,
        })
    }
}
