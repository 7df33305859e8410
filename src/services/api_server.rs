// src/services/api_server.rs
//! HTTP API for the identity vault.
//!
//! Built with Axum. Wallet actions (upload owner, ledger caller, credential
//! issuer) are all performed by the server's configured account.
//!
//! Endpoints:
//! - Documents: upload, list, fetch, decrypt, register, revoke, refresh
//! - Ledger lookups by CID
//! - Credential issuance and trust assessment
//! - Selective disclosure proofs
//! - Audit log and wallet info

use crate::errors::VaultError;
use crate::models::credential::{SelectiveDisclosureProof, VerifiableCredential};
use crate::services::credential_issuer::CredentialIssuer;
use crate::services::disclosure::{create_disclosure, verify_disclosure};
use crate::services::orchestrator::LifecycleOrchestrator;
use crate::utils::crypto::compute_fingerprint;
use crate::wallet::key_management::KeyManager;
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use ethers::utils::hex;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

// API request and response structures

/// Request payload for uploading a document
#[derive(Serialize, Deserialize)]
struct UploadDocumentRequest {
    name: String,
    doc_type: String,
    /// Base64 plaintext
    content: String,
}

#[derive(Serialize, Deserialize)]
struct DocumentContentResponse {
    doc_id: String,
    /// Base64 plaintext
    content: String,
}

#[derive(Serialize, Deserialize)]
struct IssueCredentialRequest {
    /// Defaults to the server account's DID
    #[serde(default)]
    subject_did: Option<String>,
    cid: String,
    #[serde(default)]
    claims: BTreeMap<String, Value>,
}

#[derive(Serialize, Deserialize)]
struct CreateDisclosureRequest {
    credential: VerifiableCredential,
    disclosure: String,
}

#[derive(Serialize, Deserialize)]
struct VerifyDisclosureRequest {
    proof: SelectiveDisclosureProof,
    credential: VerifiableCredential,
}

#[derive(Serialize, Deserialize)]
struct WalletResponse {
    address: String,
    did: String,
    /// Compressed secp256k1 public key, 0x hex
    encryption_public_key: String,
}

/// Error wrapper mapping [`VaultError`] onto HTTP status codes.
pub struct ApiError(pub VaultError);

impl From<VaultError> for ApiError {
    fn from(err: VaultError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            VaultError::AlreadyRegistered(_) | VaultError::AlreadyRevoked(_) => StatusCode::CONFLICT,
            VaultError::NotRegistered(_) | VaultError::NotFound(_) => StatusCode::NOT_FOUND,
            VaultError::Unauthorized { .. } | VaultError::SigningRejected(_) => StatusCode::FORBIDDEN,
            VaultError::InvalidInput(_) | VaultError::InvalidDid(_) => StatusCode::BAD_REQUEST,
            VaultError::Integrity => StatusCode::UNPROCESSABLE_ENTITY,
            VaultError::Ledger(_) | VaultError::Storage(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("request failed: {}", self.0);
        } else {
            warn!("request rejected: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

/// API server state containing all service dependencies
#[derive(Clone)]
pub struct ApiServer {
    orchestrator: LifecycleOrchestrator,
    /// Signs credentials as the server account
    credential_issuer: Arc<CredentialIssuer<KeyManager>>,
    /// Server account, also the recipient documents are wrapped to
    key_manager: Arc<KeyManager>,
}

impl ApiServer {
    pub fn new(orchestrator: LifecycleOrchestrator, key_manager: KeyManager, chain_id: Option<String>) -> Self {
        ApiServer {
            orchestrator,
            credential_issuer: Arc::new(CredentialIssuer::new(key_manager.clone(), chain_id)),
            key_manager: Arc::new(key_manager),
        }
    }

    /// Route table with shared state and permissive CORS.
    pub fn router(&self) -> Router {
        Router::new()
            .route(
                "/documents",
                post(Self::upload_document_handler).get(Self::list_documents_handler),
            )
            .route("/documents/:doc_id", get(Self::get_document_handler))
            .route("/documents/:doc_id/content", get(Self::document_content_handler))
            .route("/documents/:doc_id/register", post(Self::register_document_handler))
            .route("/documents/:doc_id/revoke", post(Self::revoke_document_handler))
            .route("/documents/:doc_id/refresh", post(Self::refresh_document_handler))
            .route("/verify/:cid", get(Self::verify_cid_handler))
            .route("/issue-credential", post(Self::issue_credential_handler))
            .route("/verify-credential", post(Self::verify_credential_handler))
            .route("/credentials", get(Self::credentials_handler))
            .route("/disclosures", post(Self::create_disclosure_handler))
            .route("/disclosures/verify", post(Self::verify_disclosure_handler))
            .route("/audit-log", get(Self::audit_log_handler))
            .route("/wallet", get(Self::wallet_handler))
            .layer(CorsLayer::permissive())
            .with_state(Arc::new(self.clone()))
    }

    /// Binds `addr` and serves until the process stops.
    pub async fn run(&self, addr: SocketAddr) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("API server running at http://{}", listener.local_addr()?);
        axum::serve(listener, self.router()).await
    }

    // =====================
    // Document Handlers
    // =====================

    /// POST /documents
    ///
    /// Encrypts the base64 `content` to the server account and stores it.
    async fn upload_document_handler(
        State(state): State<Arc<ApiServer>>,
        Json(payload): Json<UploadDocumentRequest>,
    ) -> std::result::Result<impl IntoResponse, ApiError> {
        let plaintext = base64::decode(&payload.content)
            .map_err(|e| VaultError::InvalidInput(format!("content is not base64: {}", e)))?;
        let record = state
            .orchestrator
            .upload_document(
                state.key_manager.address(),
                &payload.name,
                &payload.doc_type,
                &plaintext,
                &state.key_manager.public_key,
            )
            .await?;
        Ok((StatusCode::CREATED, Json(record)))
    }

    async fn list_documents_handler(State(state): State<Arc<ApiServer>>) -> ApiResult<Value> {
        Ok(Json(json!(state.orchestrator.records().list_documents()?)))
    }

    async fn get_document_handler(
        State(state): State<Arc<ApiServer>>,
        Path(doc_id): Path<String>,
    ) -> ApiResult<Value> {
        let record = state
            .orchestrator
            .records()
            .get_document(&doc_id)?
            .ok_or_else(|| VaultError::NotFound(format!("document {}", doc_id)))?;
        Ok(Json(json!(record)))
    }

    /// GET /documents/:doc_id/content
    ///
    /// # Responses
    /// - 200 OK: base64 plaintext
    /// - 422 Unprocessable Entity: stored ciphertext failed authentication
    async fn document_content_handler(
        State(state): State<Arc<ApiServer>>,
        Path(doc_id): Path<String>,
    ) -> ApiResult<DocumentContentResponse> {
        let plaintext = state.orchestrator.retrieve_document(&doc_id, &state.key_manager).await?;
        Ok(Json(DocumentContentResponse {
            doc_id,
            content: base64::encode(plaintext),
        }))
    }

    /// POST /documents/:doc_id/register
    ///
    /// # Responses
    /// - 200 OK: updated record, status `registered`
    /// - 409 Conflict: fingerprint already on the ledger
    /// - 502 Bad Gateway: ledger unreachable, record unchanged
    async fn register_document_handler(
        State(state): State<Arc<ApiServer>>,
        Path(doc_id): Path<String>,
    ) -> ApiResult<Value> {
        let record = state
            .orchestrator
            .register_document(
                &doc_id,
                state.key_manager.address(),
                &state.credential_issuer.issuer_did(),
            )
            .await?;
        Ok(Json(json!(record)))
    }

    async fn revoke_document_handler(
        State(state): State<Arc<ApiServer>>,
        Path(doc_id): Path<String>,
    ) -> ApiResult<Value> {
        let record = state
            .orchestrator
            .revoke_document(&doc_id, state.key_manager.address())
            .await?;
        Ok(Json(json!(record)))
    }

    async fn refresh_document_handler(
        State(state): State<Arc<ApiServer>>,
        Path(doc_id): Path<String>,
    ) -> ApiResult<Value> {
        Ok(Json(json!(state.orchestrator.refresh_status(&doc_id).await?)))
    }

    // =====================
    // Ledger and Credential Handlers
    // =====================

    async fn verify_cid_handler(State(state): State<Arc<ApiServer>>, Path(cid): Path<String>) -> ApiResult<Value> {
        let validity = state.orchestrator.check_cid(&cid).await?;
        Ok(Json(json!({
            "cid": cid,
            "cidHash": compute_fingerprint(&cid),
            "valid": validity.valid,
            "owner": validity.owner,
            "issuerDid": validity.issuer_did,
            "issuedAt": validity.issued_at,
        })))
    }

    /// POST /issue-credential
    ///
    /// # Request Body
    /// `{ "subject_did"?, "cid", "claims"? }`
    async fn issue_credential_handler(
        State(state): State<Arc<ApiServer>>,
        Json(payload): Json<IssueCredentialRequest>,
    ) -> std::result::Result<impl IntoResponse, ApiError> {
        let subject_did = match payload.subject_did {
            Some(did) => did,
            None => state.key_manager.did(None).to_string(),
        };
        let vc = state
            .orchestrator
            .issue_credential(&state.credential_issuer, &subject_did, &payload.cid, payload.claims)
            .await?;
        Ok((StatusCode::CREATED, Json(vc)))
    }

    /// POST /verify-credential
    ///
    /// Always 200 when the decision could be made; `trusted` carries the
    /// verdict.
    async fn verify_credential_handler(
        State(state): State<Arc<ApiServer>>,
        Json(vc): Json<VerifiableCredential>,
    ) -> ApiResult<Value> {
        Ok(Json(json!(state.orchestrator.assess_credential(&vc).await?)))
    }

    async fn credentials_handler(State(state): State<Arc<ApiServer>>) -> ApiResult<Value> {
        Ok(Json(json!(state.orchestrator.records().credentials()?)))
    }

    // =====================
    // Disclosure Handlers
    // =====================

    async fn create_disclosure_handler(
        State(state): State<Arc<ApiServer>>,
        Json(payload): Json<CreateDisclosureRequest>,
    ) -> ApiResult<SelectiveDisclosureProof> {
        let proof = create_disclosure(
            &payload.credential,
            &payload.disclosure,
            state.credential_issuer.signer(),
        )
        .await?;
        Ok(Json(proof))
    }

    async fn verify_disclosure_handler(Json(payload): Json<VerifyDisclosureRequest>) -> Json<Value> {
        Json(json!({ "valid": verify_disclosure(&payload.proof, &payload.credential) }))
    }

    // =====================
    // Audit and Wallet
    // =====================

    async fn audit_log_handler(State(state): State<Arc<ApiServer>>) -> ApiResult<Value> {
        Ok(Json(json!(state.orchestrator.records().audit_log()?)))
    }

    async fn wallet_handler(State(state): State<Arc<ApiServer>>) -> Json<WalletResponse> {
        let keys = &state.key_manager;
        Json(WalletResponse {
            address: format!("{:#x}", keys.address()),
            did: state.credential_issuer.issuer_did(),
            encryption_public_key: format!("0x{}", hex::encode(keys.encryption_public_key())),
        })
    }
}
