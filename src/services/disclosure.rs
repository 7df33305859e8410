// src/services/disclosure.rs
//! Selective disclosure proofs (placeholder).
//!
//! A disclosure proof is a signed statement such as "the subject is over
//! 18", tied to its source credential by the credential's hash.
//!
//! **This is not a zero-knowledge proof.** Verification checks only that the
//! referenced hash matches the credential and that a signature is present.
//! Nothing establishes that `claim` actually follows from the credential's
//! contents. Do not treat a passing check as evidence of the claim.

use crate::errors::Result;
use crate::models::credential::{SelectiveDisclosureProof, VerifiableCredential};
use crate::models::fingerprint::ContentFingerprint;
use crate::services::credential_issuer::SigningCapability;
use crate::utils::crypto::hash_data;
use crate::utils::serialization::to_canonical_json;
use crate::utils::time::now_rfc3339;
use log::{info, warn};
use serde_json::{json, Value};

pub const DISCLOSURE_PROOF_TYPE: &str = "SelectiveDisclosureProof";

/// Hash of the complete credential, proof included, with sorted keys.
pub fn credential_digest(vc: &VerifiableCredential) -> Result<ContentFingerprint> {
    Ok(ContentFingerprint::from_bytes(hash_data(&to_canonical_json(vc)?)))
}

/// Claim derived for a disclosure tag. Only `age_over_18` is known.
pub fn derive_claim(disclosure: &str) -> Option<Value> {
    match disclosure {
        "age_over_18" => Some(json!({ "type": "AgeVerification", "ageOver": 18, "verified": true })),
        _ => None,
    }
}

/// Creates and signs a disclosure proof for `vc`.
pub async fn create_disclosure(
    vc: &VerifiableCredential,
    disclosure: &str,
    signer: &dyn SigningCapability,
) -> Result<SelectiveDisclosureProof> {
    let original_vc_hash = credential_digest(vc)?;
    let claim = derive_claim(disclosure);
    if claim.is_none() {
        warn!("no claim derivation for disclosure tag {}", disclosure);
    }

    let statement = json!({
        "type": DISCLOSURE_PROOF_TYPE,
        "disclosure": disclosure,
        "originalVCHash": original_vc_hash,
        "claim": claim,
    });
    let signature = signer.sign_message(&to_canonical_json(&statement)?).await?;

    info!("created {} disclosure for credential {}", disclosure, original_vc_hash);
    Ok(SelectiveDisclosureProof {
        proof_type: DISCLOSURE_PROOF_TYPE.to_string(),
        created: now_rfc3339(),
        disclosure: disclosure.to_string(),
        original_vc_hash,
        claim,
        signature,
    })
}

/// Placeholder check: hash equality plus signature presence. See module docs.
pub fn verify_disclosure(proof: &SelectiveDisclosureProof, original: &VerifiableCredential) -> bool {
    match credential_digest(original) {
        Ok(hash) if hash == proof.original_vc_hash => !proof.signature.is_empty(),
        _ => false,
    }
}
