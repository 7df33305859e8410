// src/services/orchestrator.rs
//! Document lifecycle orchestration.
//!
//! Sequences the collaborators for each user-facing operation:
//!
//! # Process Flow
//! 1. **Upload**: encrypt locally, wrap the key to the recipient, store the
//!    ciphertext, cache a record with status `Uploaded`
//! 2. **Register**: issue the fingerprint on the ledger, then mark the record
//!    `Registered`
//! 3. **Revoke**: revoke on the ledger, then mark the record `Revoked`
//!
//! Cached status only moves after the ledger has confirmed the write. When a
//! ledger call fails the record is left exactly as it was.

use crate::blockchain::ledger::Ledger;
use crate::blockchain::registry::Validity;
use crate::errors::{Result, VaultError};
use crate::models::credential::VerifiableCredential;
use crate::models::did::EthrDid;
use crate::models::document::{AuditAction, AuditLogEntry, DocumentRecord, DocumentStatus, EncryptedPayload};
use crate::services::credential_issuer::{check_claims, CredentialIssuer, SigningCapability};
use crate::services::verifier::{TrustDecision, Verifier};
use crate::storage::ipfs_client::ContentStore;
use crate::utils::crypto::{compute_fingerprint, decrypt, encrypt, generate_key, generate_nonce};
use crate::utils::time::now_rfc3339;
use crate::wallet::credential_storage::RecordStore;
use crate::wallet::key_management::{wrap_key, KeyManager};
use ethers::types::Address;
use k256::PublicKey;
use log::{info, warn};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Coordinates encryption, storage, ledger writes and the local cache.
///
/// # Thread Safety
/// All collaborators are `Arc<dyn ...>`, so the orchestrator is cheap to
/// clone into request handlers.
#[derive(Clone)]
pub struct LifecycleOrchestrator {
    ledger: Arc<dyn Ledger>,
    content: Arc<dyn ContentStore>,
    records: Arc<dyn RecordStore>,
    verifier: Verifier,
}

impl LifecycleOrchestrator {
    pub fn new(ledger: Arc<dyn Ledger>, content: Arc<dyn ContentStore>, records: Arc<dyn RecordStore>) -> Self {
        LifecycleOrchestrator {
            verifier: Verifier::new(ledger.clone()),
            ledger,
            content,
            records,
        }
    }

    pub fn records(&self) -> &dyn RecordStore {
        self.records.as_ref()
    }

    pub fn verifier(&self) -> &Verifier {
        &self.verifier
    }

    /// Encrypts `plaintext` and stores it, wrapped to `recipient`.
    ///
    /// # Arguments
    /// * `owner` - Account that will own the ledger entry
    /// * `recipient` - Public key the document key is wrapped to
    ///
    /// # Returns
    /// The cached record, status `Uploaded`. Nothing touches the ledger yet.
    ///
    /// # Errors
    /// - [`VaultError::Storage`] if the content store rejects the upload
    /// - [`VaultError::KeyWrap`] if the key cannot be wrapped
    pub async fn upload_document(
        &self,
        owner: Address,
        name: &str,
        doc_type: &str,
        plaintext: &[u8],
        recipient: &PublicKey,
    ) -> Result<DocumentRecord> {
        let payload = seal(plaintext, recipient)?;
        let cid = self.content.put(&payload.ciphertext).await?;

        let record = DocumentRecord {
            doc_id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            doc_type: doc_type.to_string(),
            owner,
            fingerprint: compute_fingerprint(&cid),
            cid,
            uploaded_at: now_rfc3339(),
            payload: payload.keys(),
            tx_hash: None,
            status: DocumentStatus::Uploaded,
        };
        self.records.save_document(record.clone())?;
        self.records.append_audit(
            AuditLogEntry::new(AuditAction::Upload, format!("uploaded {} ({} bytes)", name, plaintext.len()))
                .for_document(&record),
        )?;

        info!("uploaded document {} as {}", record.doc_id, record.cid);
        Ok(record)
    }

    /// Issues the document's fingerprint on the ledger.
    ///
    /// # Errors
    /// - [`VaultError::NotFound`] for an unknown `doc_id`
    /// - [`VaultError::AlreadyRegistered`] and ledger failures pass through;
    ///   the record is left unchanged in every error case
    pub async fn register_document(&self, doc_id: &str, caller: Address, issuer_did: &str) -> Result<DocumentRecord> {
        let mut record = self.document(doc_id)?;

        let receipt = match self.ledger.issue(caller, record.fingerprint, record.owner, issuer_did).await {
            Ok(receipt) => receipt,
            Err(e) => {
                warn!("registering {} failed: {}", doc_id, e);
                return Err(e);
            }
        };

        record.status = DocumentStatus::Registered;
        record.tx_hash = Some(receipt.tx_hash);
        self.records.save_document(record.clone())?;
        self.records.append_audit(
            AuditLogEntry::new(AuditAction::Register, format!("registered by {}", issuer_did))
                .for_document(&record)
                .with_tx(receipt.tx_hash),
        )?;

        info!("registered document {} in {:?}", doc_id, receipt.tx_hash);
        Ok(record)
    }

    /// Revokes the document's fingerprint on the ledger.
    pub async fn revoke_document(&self, doc_id: &str, caller: Address) -> Result<DocumentRecord> {
        let mut record = self.document(doc_id)?;

        let receipt = match self.ledger.revoke(caller, record.fingerprint).await {
            Ok(receipt) => receipt,
            Err(e) => {
                warn!("revoking {} failed: {}", doc_id, e);
                return Err(e);
            }
        };

        record.status = DocumentStatus::Revoked;
        record.tx_hash = Some(receipt.tx_hash);
        self.records.save_document(record.clone())?;
        self.records.append_audit(
            AuditLogEntry::new(AuditAction::Revoke, format!("revoked by {:?}", caller))
                .for_document(&record)
                .with_tx(receipt.tx_hash),
        )?;

        info!("revoked document {} in {:?}", doc_id, receipt.tx_hash);
        Ok(record)
    }

    /// Fetches and decrypts a document with the recipient's key.
    ///
    /// # Errors
    /// - [`VaultError::KeyWrap`] if `keys` is not the recipient
    /// - [`VaultError::Integrity`] if the stored ciphertext was altered
    pub async fn retrieve_document(&self, doc_id: &str, keys: &KeyManager) -> Result<Vec<u8>> {
        let record = self.document(doc_id)?;
        let ciphertext = self.content.get(&record.cid).await?;
        let key = keys.unwrap_key(&record.payload.wrapped_key)?;
        decrypt(&ciphertext, &key, &record.payload.nonce)
    }

    /// Builds, signs and caches a credential for `cid`.
    ///
    /// # Errors
    /// - [`VaultError::InvalidInput`] if `claims` uses a reserved subject field
    /// - [`VaultError::InvalidDid`] if `subject_did` names no account
    /// - [`VaultError::SigningRejected`] if the signer declines
    pub async fn issue_credential<S: SigningCapability>(
        &self,
        issuer: &CredentialIssuer<S>,
        subject_did: &str,
        cid: &str,
        claims: BTreeMap<String, Value>,
    ) -> Result<VerifiableCredential> {
        check_claims(&claims)?;
        EthrDid::account_of(subject_did)?;

        let vc = issuer.issue(subject_did, cid, compute_fingerprint(cid), claims).await?;
        self.records.save_credential(vc.clone())?;
        self.records.append_audit(
            AuditLogEntry::new(AuditAction::IssueVc, format!("issued to {}", subject_did)).with_cid(cid),
        )?;

        info!("issued credential for {} to {}", cid, subject_did);
        Ok(vc)
    }

    /// Ledger validity of a content identifier.
    pub async fn check_cid(&self, cid: &str) -> Result<Validity> {
        self.ledger.is_valid(compute_fingerprint(cid)).await
    }

    pub async fn assess_credential(&self, vc: &VerifiableCredential) -> Result<TrustDecision> {
        self.verifier.assess(vc).await
    }

    /// Reconciles the cached status with the ledger.
    ///
    /// A valid entry means `Registered`. An invalid entry for a record that
    /// was registered means it has since been revoked. An `Uploaded` record
    /// that the ledger reports invalid stays `Uploaded`.
    ///
    /// # Limitations
    /// `is_valid` does not distinguish revoked from unregistered. A
    /// fingerprint issued and then revoked directly on the ledger, without
    /// going through this orchestrator, therefore leaves an `Uploaded` record
    /// as `Uploaded`.
    pub async fn refresh_status(&self, doc_id: &str) -> Result<DocumentRecord> {
        let mut record = self.document(doc_id)?;
        let validity = self.ledger.is_valid(record.fingerprint).await?;

        let status = match (validity.valid, record.status) {
            (true, _) => DocumentStatus::Registered,
            (false, DocumentStatus::Uploaded) => DocumentStatus::Uploaded,
            (false, _) => DocumentStatus::Revoked,
        };
        if status != record.status {
            info!("document {} status {:?} -> {:?}", doc_id, record.status, status);
            record.status = status;
            self.records.save_document(record.clone())?;
        }
        Ok(record)
    }

    fn document(&self, doc_id: &str) -> Result<DocumentRecord> {
        self.records
            .get_document(doc_id)?
            .ok_or_else(|| VaultError::NotFound(format!("document {}", doc_id)))
    }
}

/// Encrypts under a fresh key and wraps that key to `recipient`.
pub fn seal(plaintext: &[u8], recipient: &PublicKey) -> Result<EncryptedPayload> {
    let key = generate_key();
    let nonce = generate_nonce();
    let ciphertext = encrypt(plaintext, &key, &nonce)?;
    let wrapped_key = wrap_key(&key, recipient)?;
    Ok(EncryptedPayload {
        ciphertext,
        nonce,
        wrapped_key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::ledger::{InMemoryLedger, LedgerReceipt};
    use crate::models::fingerprint::ContentFingerprint;
    use crate::blockchain::registry::RevocationPolicy;
    use crate::services::verifier::{verify, TrustIssue};
    use crate::storage::ipfs_client::InMemoryContentStore;
    use crate::wallet::credential_storage::InMemoryRecordStore;
    use async_trait::async_trait;
    use serde_json::json;

    struct Harness {
        orchestrator: LifecycleOrchestrator,
        content: Arc<InMemoryContentStore>,
        records: Arc<InMemoryRecordStore>,
        wallet: KeyManager,
    }

    fn harness_with(ledger: Arc<dyn Ledger>) -> Harness {
        let content = Arc::new(InMemoryContentStore::new());
        let records = Arc::new(InMemoryRecordStore::new());
        Harness {
            orchestrator: LifecycleOrchestrator::new(ledger, content.clone(), records.clone()),
            content,
            records,
            wallet: KeyManager::new(),
        }
    }

    fn harness() -> Harness {
        harness_with(Arc::new(InMemoryLedger::default()))
    }

    struct OfflineLedger;

    #[async_trait]
    impl Ledger for OfflineLedger {
        async fn issue(&self, _: Address, _: ContentFingerprint, _: Address, _: &str) -> Result<LedgerReceipt> {
            Err(VaultError::Ledger("connection refused".into()))
        }

        async fn revoke(&self, _: Address, _: ContentFingerprint) -> Result<LedgerReceipt> {
            Err(VaultError::Ledger("connection refused".into()))
        }

        async fn is_valid(&self, _: ContentFingerprint) -> Result<Validity> {
            Err(VaultError::Ledger("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_full_document_lifecycle() {
        let h = harness();
        let issuer = CredentialIssuer::new(h.wallet.clone(), None);
        let owner = h.wallet.address();
        let subject_did = h.wallet.did(None).to_string();

        let record = h
            .orchestrator
            .upload_document(owner, "passport.pdf", "passport", b"%PDF-1.7 passport", &h.wallet.public_key)
            .await
            .unwrap();
        assert_eq!(record.status, DocumentStatus::Uploaded);
        assert_eq!(record.fingerprint, compute_fingerprint(&record.cid));
        assert!(!h.orchestrator.check_cid(&record.cid).await.unwrap().valid);

        let registered = h
            .orchestrator
            .register_document(&record.doc_id, owner, &issuer.issuer_did())
            .await
            .unwrap();
        assert_eq!(registered.status, DocumentStatus::Registered);
        assert!(registered.tx_hash.is_some());

        let validity = h.orchestrator.check_cid(&record.cid).await.unwrap();
        assert!(validity.valid);
        assert_eq!(validity.owner, owner);

        let mut claims = BTreeMap::new();
        claims.insert("documentType".to_string(), json!("passport"));
        let vc = h
            .orchestrator
            .issue_credential(&issuer, &subject_did, &record.cid, claims)
            .await
            .unwrap();
        let decision = h.orchestrator.assess_credential(&vc).await.unwrap();
        assert!(decision.trusted, "issues: {:?}", decision.issues);

        let plaintext = h.orchestrator.retrieve_document(&record.doc_id, &h.wallet).await.unwrap();
        assert_eq!(plaintext, b"%PDF-1.7 passport");

        let revoked = h.orchestrator.revoke_document(&record.doc_id, owner).await.unwrap();
        assert_eq!(revoked.status, DocumentStatus::Revoked);

        let decision = h.orchestrator.assess_credential(&vc).await.unwrap();
        assert!(!decision.trusted);
        assert!(decision.signature.valid);
        assert_eq!(decision.issues, vec![TrustIssue::NotValidOnLedger]);

        let actions: Vec<_> = h.records.audit_log().unwrap().into_iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![AuditAction::Revoke, AuditAction::IssueVc, AuditAction::Register, AuditAction::Upload]
        );
        assert!(h.records.credential_by_cid(&record.cid).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_lifecycle_with_separate_issuer_and_subject() {
        const T0: u64 = 1_700_000_000;
        let h = harness_with(Arc::new(InMemoryLedger::with_clock(RevocationPolicy::OwnerOnly, || T0)));
        let subject = KeyManager::new();
        let issuer = CredentialIssuer::new(KeyManager::new(), None);
        let issuer_did = issuer.issuer_did();
        let subject_did = subject.did(None).to_string();

        let record = h
            .orchestrator
            .upload_document(subject.address(), "license.pdf", "drivers_license", b"licence scan", &subject.public_key)
            .await
            .unwrap();
        h.orchestrator
            .register_document(&record.doc_id, subject.address(), &issuer_did)
            .await
            .unwrap();

        assert_eq!(
            h.orchestrator.check_cid(&record.cid).await.unwrap(),
            Validity {
                valid: true,
                owner: subject.address(),
                issuer_did: issuer_did.clone(),
                issued_at: T0,
            }
        );

        let vc = h
            .orchestrator
            .issue_credential(&issuer, &subject_did, &record.cid, BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(verify(&vc).unwrap().recovered_signer, Some(issuer.signer().address()));
        assert!(h.orchestrator.assess_credential(&vc).await.unwrap().trusted);

        // Only the owner may revoke by default.
        let err = h
            .orchestrator
            .revoke_document(&record.doc_id, issuer.signer().address())
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::Unauthorized { .. }));
        assert_eq!(
            h.records.get_document(&record.doc_id).unwrap().unwrap().status,
            DocumentStatus::Registered
        );

        h.orchestrator.revoke_document(&record.doc_id, subject.address()).await.unwrap();
        assert_eq!(h.orchestrator.check_cid(&record.cid).await.unwrap(), Validity::invalid());

        assert!(verify(&vc).unwrap().valid);
        let decision = h.orchestrator.assess_credential(&vc).await.unwrap();
        assert!(!decision.trusted);
        assert_eq!(decision.issues, vec![TrustIssue::NotValidOnLedger]);

        let plaintext = h.orchestrator.retrieve_document(&record.doc_id, &subject).await.unwrap();
        assert_eq!(plaintext, b"licence scan");
    }

    #[tokio::test]
    async fn test_failed_registration_keeps_record() {
        let h = harness_with(Arc::new(OfflineLedger));
        let owner = h.wallet.address();
        let record = h
            .orchestrator
            .upload_document(owner, "id.png", "national_id", b"image", &h.wallet.public_key)
            .await
            .unwrap();

        let err = h
            .orchestrator
            .register_document(&record.doc_id, owner, "did:ethr:0x01")
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        let stored = h.records.get_document(&record.doc_id).unwrap().unwrap();
        assert_eq!(stored, record);
        assert_eq!(h.records.audit_log().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_double_registration_conflicts() {
        let h = harness();
        let owner = h.wallet.address();
        let did = h.wallet.did(None).to_string();
        let record = h
            .orchestrator
            .upload_document(owner, "a.txt", "note", b"same", &h.wallet.public_key)
            .await
            .unwrap();

        h.orchestrator.register_document(&record.doc_id, owner, &did).await.unwrap();
        let err = h.orchestrator.register_document(&record.doc_id, owner, &did).await.unwrap_err();
        assert!(matches!(err, VaultError::AlreadyRegistered(_)));
    }

    #[tokio::test]
    async fn test_tampered_ciphertext_fails_integrity() {
        let h = harness();
        let record = h
            .orchestrator
            .upload_document(h.wallet.address(), "a.txt", "note", b"secret", &h.wallet.public_key)
            .await
            .unwrap();

        h.content.tamper(&record.cid, |bytes| bytes[0] ^= 0x01).unwrap();
        let err = h.orchestrator.retrieve_document(&record.doc_id, &h.wallet).await.unwrap_err();
        assert!(matches!(err, VaultError::Integrity));
    }

    #[tokio::test]
    async fn test_wrong_recipient_cannot_retrieve() {
        let h = harness();
        let record = h
            .orchestrator
            .upload_document(h.wallet.address(), "a.txt", "note", b"secret", &h.wallet.public_key)
            .await
            .unwrap();

        let stranger = KeyManager::new();
        let err = h.orchestrator.retrieve_document(&record.doc_id, &stranger).await.unwrap_err();
        assert!(matches!(err, VaultError::KeyWrap(_)));
    }

    #[tokio::test]
    async fn test_reserved_claims_rejected() {
        let h = harness();
        let issuer = CredentialIssuer::new(h.wallet.clone(), None);
        let mut claims = BTreeMap::new();
        claims.insert("cidHash".to_string(), json!("0x00"));

        let err = h
            .orchestrator
            .issue_credential(&issuer, "did:ethr:0x0000000000000000000000000000000000000001", "bafy1", claims)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::InvalidInput(_)));
        assert!(h.records.credentials().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_status_follows_ledger() {
        let ledger = Arc::new(InMemoryLedger::default());
        let h = harness_with(ledger.clone());
        let owner = h.wallet.address();
        let record = h
            .orchestrator
            .upload_document(owner, "a.txt", "note", b"data", &h.wallet.public_key)
            .await
            .unwrap();

        assert_eq!(
            h.orchestrator.refresh_status(&record.doc_id).await.unwrap().status,
            DocumentStatus::Uploaded
        );

        // Written to the ledger directly, bypassing the cache.
        ledger.issue(owner, record.fingerprint, owner, "did:ethr:x").await.unwrap();
        assert_eq!(
            h.orchestrator.refresh_status(&record.doc_id).await.unwrap().status,
            DocumentStatus::Registered
        );

        ledger.revoke(owner, record.fingerprint).await.unwrap();
        let refreshed = h.orchestrator.refresh_status(&record.doc_id).await.unwrap();
        assert_eq!(refreshed.status, DocumentStatus::Revoked);
        assert_eq!(h.records.get_document(&record.doc_id).unwrap().unwrap().status, DocumentStatus::Revoked);
    }

    #[tokio::test]
    async fn test_unknown_document() {
        let h = harness();
        let err = h.orchestrator.revoke_document("nope", h.wallet.address()).await.unwrap_err();
        assert!(matches!(err, VaultError::NotFound(_)));
    }
}
