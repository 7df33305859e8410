// src/services/credential_issuer.rs
//! Credential Issuer Service
//!
//! Builds Verifiable Credentials that reference a registered content
//! fingerprint, and signs them through an external signing capability (a
//! wallet `personal_sign` interface bound to the issuer's account).
//!
//! # Canonical form
//! The signed bytes are the compact JSON encoding of exactly these fields, in
//! this order:
//! ```text
//! {"@context":[..],"type":[..],"issuer":"..","issuanceDate":"..",
//!  "credentialSubject":{"id":"..","cid":"..","cidHash":"0x..",<claims>}}
//! ```
//! Extra claims follow `cidHash` in ascending key order, and objects nested
//! inside claims have their keys sorted recursively. `proof` is never part of
//! the canonical form.

use crate::errors::{Result, VaultError};
use crate::models::credential::{
    CredentialProof, CredentialSubject, VerifiableCredential, CREDENTIALS_CONTEXT_V1,
    DEFAULT_CREDENTIAL_TYPE, PROOF_PURPOSE, PROOF_TYPE, SECP256K1_2019_CONTEXT,
};
use crate::models::did::EthrDid;
use crate::models::fingerprint::ContentFingerprint;
use crate::utils::crypto::hash_data;
use crate::utils::serialization::sort_keys;
use crate::utils::time::now_rfc3339;
use async_trait::async_trait;
use ethers::types::Address;
use log::{info, warn};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// An identity-bound signer, e.g. a wallet's `personal_sign` endpoint.
///
/// Signing may wait on out-of-band user approval for an arbitrary time.
/// Declining is reported as [`VaultError::SigningRejected`].
#[async_trait]
pub trait SigningCapability: Send + Sync {
    /// Account whose key produces the signatures.
    fn account(&self) -> Address;

    /// Returns a 65-byte recoverable EIP-191 signature over `message`.
    async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>>;
}

/// Borrowed view of the signed fields; field order here is the canonical order.
#[derive(Serialize)]
struct CanonicalCredential<'a> {
    #[serde(rename = "@context")]
    context: &'a [String],
    #[serde(rename = "type")]
    types: &'a [String],
    issuer: &'a str,
    #[serde(rename = "issuanceDate")]
    issuance_date: &'a str,
    #[serde(rename = "credentialSubject")]
    credential_subject: CanonicalSubject<'a>,
}

#[derive(Serialize)]
struct CanonicalSubject<'a> {
    id: &'a str,
    cid: &'a str,
    #[serde(rename = "cidHash")]
    cid_hash: String,
    #[serde(flatten)]
    claims: BTreeMap<&'a str, Value>,
}

/// Claim names that collide with fixed `credentialSubject` fields.
pub const RESERVED_CLAIMS: [&str; 3] = ["id", "cid", "cidHash"];

/// Rejects claims that would shadow `id`, `cid` or `cidHash` in the
/// flattened subject.
pub fn check_claims(claims: &BTreeMap<String, Value>) -> Result<()> {
    match claims.keys().find(|k| RESERVED_CLAIMS.contains(&k.as_str())) {
        Some(key) => Err(VaultError::InvalidInput(format!("claim name {} is reserved", key))),
        None => Ok(()),
    }
}

/// Assembles an unsigned credential stamped with the current time.
///
/// # Arguments
/// * `issuer_did` - DID of the attesting party
/// * `subject_did` - DID of the document owner
/// * `cid` - Content identifier of the encrypted document
/// * `fingerprint` - Registry key derived from `cid`
/// * `claims` - Additional subject claims
pub fn build_credential(
    issuer_did: &str,
    subject_did: &str,
    cid: &str,
    fingerprint: ContentFingerprint,
    claims: BTreeMap<String, Value>,
) -> VerifiableCredential {
    VerifiableCredential {
        context: vec![CREDENTIALS_CONTEXT_V1.to_string(), SECP256K1_2019_CONTEXT.to_string()],
        types: vec!["VerifiableCredential".to_string(), DEFAULT_CREDENTIAL_TYPE.to_string()],
        issuer: issuer_did.to_string(),
        issuance_date: now_rfc3339(),
        credential_subject: CredentialSubject {
            id: subject_did.to_string(),
            cid: cid.to_string(),
            cid_hash: fingerprint,
            claims,
        },
        proof: None,
    }
}

/// Deterministic byte serialization of the signed fields (see module docs).
pub fn canonicalize(vc: &VerifiableCredential) -> Result<Vec<u8>> {
    let subject = &vc.credential_subject;
    let view = CanonicalCredential {
        context: &vc.context,
        types: &vc.types,
        issuer: &vc.issuer,
        issuance_date: &vc.issuance_date,
        credential_subject: CanonicalSubject {
            id: &subject.id,
            cid: &subject.cid,
            cid_hash: subject.cid_hash.to_hex(),
            claims: subject
                .claims
                .iter()
                .map(|(k, v)| (k.as_str(), sort_keys(v.clone())))
                .collect(),
        },
    };
    Ok(serde_json::to_vec(&view)?)
}

/// Keccak-256 of the canonical bytes.
pub fn credential_hash(vc: &VerifiableCredential) -> Result<ContentFingerprint> {
    Ok(ContentFingerprint::from_bytes(hash_data(&canonicalize(vc)?)))
}

/// Signs `vc` and returns a new credential carrying the proof.
///
/// # Process Flow
/// 1. Computes `messageHash = keccak256(canonicalize(vc))`
/// 2. Asks the signer for an EIP-191 signature over the 32 hash bytes
/// 3. Attaches `proof` with `verificationMethod = issuer + "#controller"`
///
/// # Errors
/// - [`VaultError::SigningRejected`] if the signer declines, is unavailable,
///   or controls a different account than the one named by `vc.issuer`
/// - [`VaultError::InvalidDid`] if `vc.issuer` is not a `did:ethr` identifier
/// - [`VaultError::InvalidInput`] if a claim uses a reserved subject field
pub async fn sign(vc: &VerifiableCredential, signer: &dyn SigningCapability) -> Result<VerifiableCredential> {
    check_claims(&vc.credential_subject.claims)?;
    let issuer_account = EthrDid::account_of(&vc.issuer)?;
    if signer.account() != issuer_account {
        warn!(
            "refusing to sign credential for {} with account {:?}",
            vc.issuer,
            signer.account()
        );
        return Err(VaultError::SigningRejected(format!(
            "signer {:?} does not control issuer {}",
            signer.account(),
            vc.issuer
        )));
    }

    let message_hash = credential_hash(vc)?;
    let signature = signer.sign_message(message_hash.as_bytes()).await?;

    let mut signed = vc.clone();
    signed.proof = Some(CredentialProof {
        proof_type: PROOF_TYPE.to_string(),
        created: now_rfc3339(),
        proof_purpose: PROOF_PURPOSE.to_string(),
        verification_method: format!("{}#controller", vc.issuer),
        signature,
        message_hash,
    });

    info!(
        "signed credential for subject {} (cid {}, hash {})",
        vc.credential_subject.id, vc.credential_subject.cid, message_hash
    );
    Ok(signed)
}

/// Service wrapper that issues credentials with a fixed signer.
#[derive(Clone)]
pub struct CredentialIssuer<S> {
    signer: S,
    chain_id: Option<String>,
}

impl<S: SigningCapability> CredentialIssuer<S> {
    pub fn new(signer: S, chain_id: Option<String>) -> Self {
        CredentialIssuer { signer, chain_id }
    }

    /// DID naming the signer's account.
    pub fn issuer_did(&self) -> String {
        EthrDid::new(self.signer.account(), self.chain_id.as_deref()).to_string()
    }

    pub fn signer(&self) -> &S {
        &self.signer
    }

    /// Builds and signs a credential in one step.
    pub async fn issue(
        &self,
        subject_did: &str,
        cid: &str,
        fingerprint: ContentFingerprint,
        claims: BTreeMap<String, Value>,
    ) -> Result<VerifiableCredential> {
        let unsigned = build_credential(&self.issuer_did(), subject_did, cid, fingerprint, claims);
        sign(&unsigned, &self.signer).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::crypto::compute_fingerprint;
    use crate::wallet::key_management::KeyManager;
    use serde_json::json;

    struct DecliningSigner(Address);

    #[async_trait]
    impl SigningCapability for DecliningSigner {
        fn account(&self) -> Address {
            self.0
        }

        async fn sign_message(&self, _message: &[u8]) -> Result<Vec<u8>> {
            Err(VaultError::SigningRejected("user rejected the request".into()))
        }
    }

    fn fixed_credential() -> VerifiableCredential {
        let mut claims = BTreeMap::new();
        claims.insert("nationality".to_string(), json!("NZ"));
        claims.insert("address".to_string(), json!({ "street": "Queen St", "city": "Auckland" }));
        let mut vc = build_credential(
            "did:ethr:0x8ba1f109551bd432803012645ac136ddd64dba72",
            "did:ethr:0x0000000000000000000000000000000000000001",
            "bafy123",
            compute_fingerprint("bafy123"),
            claims,
        );
        vc.issuance_date = "2024-01-01T00:00:00.000Z".to_string();
        vc
    }

    #[test]
    fn test_build_credential_has_no_proof() {
        let vc = fixed_credential();
        assert!(vc.proof.is_none());
        assert_eq!(vc.types, vec!["VerifiableCredential", "IdentityDocument"]);
        assert_eq!(vc.context.len(), 2);
    }

    #[test]
    fn test_canonical_bytes_are_fixed() {
        let bytes = canonicalize(&fixed_credential()).unwrap();
        let expected = concat!(
            r#"{"@context":["https://www.w3.org/2018/credentials/v1","https://w3id.org/security/suites/secp256k1-2019/v1"],"#,
            r#""type":["VerifiableCredential","IdentityDocument"],"#,
            r#""issuer":"did:ethr:0x8ba1f109551bd432803012645ac136ddd64dba72","#,
            r#""issuanceDate":"2024-01-01T00:00:00.000Z","#,
            r#""credentialSubject":{"id":"did:ethr:0x0000000000000000000000000000000000000001","cid":"bafy123","#,
            r#""cidHash":"0x"#,
        );
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with(expected), "{}", text);
        assert!(text.ends_with(r#","address":{"city":"Auckland","street":"Queen St"},"nationality":"NZ"}}"#), "{}", text);
    }

    #[test]
    fn test_canonical_form_excludes_proof() {
        let unsigned = fixed_credential();
        let mut with_proof = unsigned.clone();
        with_proof.proof = Some(CredentialProof {
            proof_type: PROOF_TYPE.into(),
            created: "2024-01-01T00:00:01.000Z".into(),
            proof_purpose: PROOF_PURPOSE.into(),
            verification_method: "x#controller".into(),
            signature: vec![0; 65],
            message_hash: compute_fingerprint("x"),
        });
        assert_eq!(canonicalize(&unsigned).unwrap(), canonicalize(&with_proof).unwrap());
    }

    #[tokio::test]
    async fn test_sign_attaches_proof() {
        let issuer = KeyManager::new();
        let issuer_did = issuer.did(None).to_string();
        let vc = build_credential(&issuer_did, "did:ethr:0x0000000000000000000000000000000000000001", "bafy123", compute_fingerprint("bafy123"), BTreeMap::new());

        let signed = sign(&vc, &issuer).await.unwrap();
        let proof = signed.proof.as_ref().unwrap();
        assert_eq!(proof.verification_method, format!("{}#controller", issuer_did));
        assert_eq!(proof.message_hash, credential_hash(&vc).unwrap());
        assert_eq!(proof.signature.len(), 65);
        // input stays untouched
        assert!(vc.proof.is_none());
    }

    #[tokio::test]
    async fn test_declining_signer_surfaces_rejection() {
        let account: Address = "0x8ba1f109551bd432803012645ac136ddd64dba72".parse().unwrap();
        let result = sign(&fixed_credential(), &DecliningSigner(account)).await;
        assert!(matches!(result, Err(VaultError::SigningRejected(_))));
    }

    #[tokio::test]
    async fn test_signer_must_control_issuer_did() {
        let other = KeyManager::new();
        let result = sign(&fixed_credential(), &other).await;
        assert!(matches!(result, Err(VaultError::SigningRejected(_))));
    }

    #[tokio::test]
    async fn test_issuer_service_uses_signer_did() {
        let issuer = CredentialIssuer::new(KeyManager::new(), Some("0x89".to_string()));
        assert!(issuer.issuer_did().starts_with("did:ethr:0x89:0x"));

        let vc = issuer
            .issue("did:ethr:0x0000000000000000000000000000000000000002", "bafyabc", compute_fingerprint("bafyabc"), BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(vc.issuer, issuer.issuer_did());
        assert!(vc.is_signed());
    }

    #[tokio::test]
    async fn test_issue_rejects_reserved_claim_names() {
        let issuer = CredentialIssuer::new(KeyManager::new(), None);
        for reserved in RESERVED_CLAIMS {
            let mut claims = BTreeMap::new();
            claims.insert(reserved.to_string(), json!("did:ethr:0x0000000000000000000000000000000000000009"));
            let result = issuer
                .issue("did:ethr:0x0000000000000000000000000000000000000001", "bafy1", compute_fingerprint("bafy1"), claims)
                .await;
            assert!(matches!(result, Err(VaultError::InvalidInput(_))), "{} accepted", reserved);
        }
    }

    #[tokio::test]
    async fn test_issued_credential_parses_back() {
        let issuer = CredentialIssuer::new(KeyManager::new(), None);
        let mut claims = BTreeMap::new();
        claims.insert("degree".to_string(), json!("BSc"));
        let vc = issuer
            .issue("did:ethr:0x0000000000000000000000000000000000000001", "bafy1", compute_fingerprint("bafy1"), claims)
            .await
            .unwrap();

        let parsed: VerifiableCredential = serde_json::from_str(&serde_json::to_string(&vc).unwrap()).unwrap();
        assert_eq!(parsed, vc);
    }
}
