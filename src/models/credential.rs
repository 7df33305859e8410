// src/models/credential.rs
//! Verifiable Credential data model implementation.
//!
//! Defines the W3C-style credential that attests ownership of a fingerprinted
//! document, its ECDSA proof, and the selective disclosure placeholder.

use crate::models::fingerprint::ContentFingerprint;
use crate::utils::serialization::hex_bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const CREDENTIALS_CONTEXT_V1: &str = "https://www.w3.org/2018/credentials/v1";
pub const SECP256K1_2019_CONTEXT: &str = "https://w3id.org/security/suites/secp256k1-2019/v1";
pub const DEFAULT_CREDENTIAL_TYPE: &str = "IdentityDocument";
pub const PROOF_TYPE: &str = "EcdsaSecp256k1Signature2019";
pub const PROOF_PURPOSE: &str = "assertionMethod";

/// A Verifiable Credential binding a subject DID to a registered document.
///
/// Implements the JSON shape of the
/// [W3C Verifiable Credentials Data Model](https://www.w3.org/TR/vc-data-model/).
/// Once `proof` is set the credential is treated as immutable: re-issuing
/// produces a new object.
///
/// # Serialization
/// Field names follow the JSON-LD vocabulary (`@context`, `issuanceDate`,
/// `credentialSubject`). `proof` serializes as `null` until signed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VerifiableCredential {
    #[serde(rename = "@context")]
    pub context: Vec<String>,

    #[serde(rename = "type")]
    pub types: Vec<String>,

    /// DID of the credential issuer
    /// Example: "did:ethr:0xabc..."
    pub issuer: String,

    /// RFC 3339 UTC timestamp with millisecond precision
    #[serde(rename = "issuanceDate")]
    pub issuance_date: String,

    #[serde(rename = "credentialSubject")]
    pub credential_subject: CredentialSubject,

    pub proof: Option<CredentialProof>,
}

impl VerifiableCredential {
    pub fn is_signed(&self) -> bool {
        self.proof.is_some()
    }
}

/// The attested facts about the subject.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CredentialSubject {
    /// Subject DID
    pub id: String,

    /// Storage-network content identifier of the encrypted document
    pub cid: String,

    /// Fingerprint of `cid`, the registry key
    #[serde(rename = "cidHash")]
    pub cid_hash: ContentFingerprint,

    /// Additional claims, flattened into the subject object.
    #[serde(flatten)]
    pub claims: BTreeMap<String, Value>,
}

/// ECDSA secp256k1 proof over the credential's canonical hash.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CredentialProof {
    #[serde(rename = "type")]
    pub proof_type: String,

    pub created: String,

    #[serde(rename = "proofPurpose")]
    pub proof_purpose: String,

    /// `<issuer DID>#controller`
    #[serde(rename = "verificationMethod")]
    pub verification_method: String,

    /// 65-byte recoverable signature (r || s || v)
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,

    /// Keccak-256 of the canonical credential bytes
    #[serde(rename = "messageHash")]
    pub message_hash: ContentFingerprint,
}

/// Signed statement derived from a credential without revealing it.
///
/// # Security
/// This is a placeholder. It is bound to its source credential only by hash
/// equality, and the `claim` is not cryptographically implied by the
/// credential. It must not be used as a trust mechanism until it is replaced
/// with a real zero-knowledge or redaction proof.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SelectiveDisclosureProof {
    #[serde(rename = "type")]
    pub proof_type: String,

    pub created: String,

    /// What is being disclosed, e.g. `age_over_18`
    pub disclosure: String,

    #[serde(rename = "originalVCHash")]
    pub original_vc_hash: ContentFingerprint,

    /// Derived fact, `null` for tags without a known derivation
    pub claim: Option<Value>,

    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::crypto::compute_fingerprint;
    use serde_json::json;

    fn sample() -> VerifiableCredential {
        let mut claims = BTreeMap::new();
        claims.insert("documentType".to_string(), json!("passport"));
        VerifiableCredential {
            context: vec![CREDENTIALS_CONTEXT_V1.into()],
            types: vec!["VerifiableCredential".into(), DEFAULT_CREDENTIAL_TYPE.into()],
            issuer: "did:ethr:0x8ba1f109551bd432803012645ac136ddd64dba72".into(),
            issuance_date: "2024-01-01T00:00:00.000Z".into(),
            credential_subject: CredentialSubject {
                id: "did:ethr:0x0000000000000000000000000000000000000001".into(),
                cid: "bafy123".into(),
                cid_hash: compute_fingerprint("bafy123"),
                claims,
            },
            proof: None,
        }
    }

    #[test]
    fn test_json_shape_uses_vc_vocabulary() {
        let value = serde_json::to_value(sample()).unwrap();
        assert!(value.get("@context").is_some());
        assert!(value.get("issuanceDate").is_some());
        assert_eq!(value["proof"], Value::Null);
        assert_eq!(value["credentialSubject"]["documentType"], json!("passport"));
        assert_eq!(value["credentialSubject"]["cidHash"], json!(compute_fingerprint("bafy123").to_hex()));
    }

    #[test]
    fn test_flattened_claims_survive_parsing() {
        let vc = sample();
        let parsed: VerifiableCredential = serde_json::from_value(serde_json::to_value(&vc).unwrap()).unwrap();
        assert_eq!(parsed, vc);
        assert!(!parsed.is_signed());
    }
}
