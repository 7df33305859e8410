// src/main.rs

//! # Identity Vault - Main Entry Point
//!
//! Loads configuration, wires the ledger, storage and record-store backends
//! into the lifecycle orchestrator, and starts the API server.
//!
//! ## Configuration
//! See `identity_vault::config`. Common environment variables:
//! - `VAULT_LEDGER`: `memory` (default) or `evm`
//! - `VAULT_RPC_URL`, `VAULT_CONTRACT_ADDRESS`: required for `evm`
//! - `VAULT_PRIVATE_KEY`: account key (random when unset)
//! - `VAULT_STORAGE`: `memory` (default) or `ipfs`, with `VAULT_IPFS_API_URL`
//! - `VAULT_RECORD_STORE_PATH`: JSON file for the local record cache
//! - `RUST_LOG`: log filter, e.g. `identity_vault=debug`

use anyhow::Context;
use dotenv::dotenv;
use identity_vault::blockchain::evm_client::EvmLedger;
use identity_vault::blockchain::ledger::{InMemoryLedger, Ledger};
use identity_vault::config::{LedgerBackend, Settings, StorageBackend};
use identity_vault::services::api_server::ApiServer;
use identity_vault::services::orchestrator::LifecycleOrchestrator;
use identity_vault::storage::ipfs_client::{ContentStore, InMemoryContentStore, IpfsStorage};
use identity_vault::wallet::credential_storage::{InMemoryRecordStore, JsonFileRecordStore, RecordStore};
use identity_vault::wallet::key_management::KeyManager;
use log::{info, warn};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv().ok();
    env_logger::init();

    let settings = Settings::load().context("loading configuration")?;

    let key_manager = match &settings.private_key {
        Some(key) => KeyManager::from_private_key_hex(key).context("loading account key")?,
        None => {
            warn!("no private key configured, using an ephemeral account");
            KeyManager::new()
        }
    };
    info!("server account {:?}", key_manager.address());

    let ledger: Arc<dyn Ledger> = match settings.ledger {
        LedgerBackend::Memory => Arc::new(InMemoryLedger::new(settings.policy()?)),
        LedgerBackend::Evm => {
            let rpc_url = settings.rpc_url.as_deref().context("rpc_url is required for the evm ledger")?;
            let ledger = EvmLedger::connect(rpc_url, settings.contract()?, key_manager.wallet())
                .await
                .context("connecting to the registry contract")?;
            Arc::new(ledger)
        }
    };

    let content: Arc<dyn ContentStore> = match settings.storage {
        StorageBackend::Memory => Arc::new(InMemoryContentStore::new()),
        StorageBackend::Ipfs => Arc::new(IpfsStorage::with_url(&settings.ipfs_api_url)?),
    };

    let records: Arc<dyn RecordStore> = match &settings.record_store_path {
        Some(path) => Arc::new(JsonFileRecordStore::open(path).context("opening record store")?),
        None => Arc::new(InMemoryRecordStore::new()),
    };

    let orchestrator = LifecycleOrchestrator::new(ledger, content, records);
    let api_server = ApiServer::new(orchestrator, key_manager, settings.chain_id.clone());

    api_server
        .run(settings.socket_addr()?)
        .await
        .context("API server stopped")?;
    Ok(())
}
