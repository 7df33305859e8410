// src/storage/ipfs_client.rs
//! Content-addressed storage for encrypted document payloads.
//!
//! The core only needs two operations: `put(bytes) -> cid` and
//! `get(cid) -> bytes`. The CID is an opaque string that gets hashed into a
//! fingerprint and is never decoded.
//!
//! # Implementations
//! - [`IpfsStorage`]: an IPFS node via its HTTP API
//! - [`InMemoryContentStore`]: process-local map, for tests and demos
//!
//! # Security Considerations
//! - Everything stored on IPFS is public; only ciphertext is ever put here
//! - CIDs are content-addressed and permanent

use crate::errors::{Result, VaultError};
use crate::utils::crypto::hash_data;
use async_trait::async_trait;
use bytes::BytesMut;
use ethers::utils::hex;
use futures::TryStreamExt;
use ipfs_api_backend_hyper::{IpfsApi, IpfsClient, TryFromUri};
use log::{debug, info};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use tokio::task;

/// Storage collaborator interface.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Stores `data` and returns its content identifier.
    async fn put(&self, data: &[u8]) -> Result<String>;

    /// Retrieves the bytes stored under `cid`.
    async fn get(&self, cid: &str) -> Result<Vec<u8>>;
}

/// Thread-safe IPFS client wrapper.
///
/// The hyper-backed client produces non-`Send` futures, so every request
/// runs on a dedicated blocking thread with its own current-thread runtime.
#[derive(Clone)]
pub struct IpfsStorage {
    /// Shared IPFS client instance (thread-safe via Arc)
    client: Arc<IpfsClient>,
}

impl IpfsStorage {
    /// Creates a client connected to the local node at `http://localhost:5001`.
    pub fn new() -> Self {
        IpfsStorage {
            client: Arc::new(IpfsClient::default()),
        }
    }

    /// Creates a client for the node API at `api_url`.
    pub fn with_url(api_url: &str) -> Result<Self> {
        let client = IpfsClient::from_str(api_url)
            .map_err(|e| VaultError::Config(format!("invalid IPFS API url {}: {}", api_url, e)))?;
        Ok(IpfsStorage {
            client: Arc::new(client),
        })
    }
}

impl Default for IpfsStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentStore for IpfsStorage {
    async fn put(&self, data: &[u8]) -> Result<String> {
        let client = self.client.clone();
        let data_owned = data.to_vec();
        let size = data_owned.len();

        let cid = task::spawn_blocking(move || -> Result<String> {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| VaultError::Storage(e.to_string()))?;
            rt.block_on(async {
                let response = client
                    .add(Cursor::new(data_owned))
                    .await
                    .map_err(|e| VaultError::Storage(format!("IPFS add failed: {}", e)))?;
                Ok(response.hash)
            })
        })
        .await
        .map_err(|e| VaultError::Storage(format!("IPFS worker failed: {}", e)))??;

        info!("stored {} bytes on IPFS as {}", size, cid);
        Ok(cid)
    }

    async fn get(&self, cid: &str) -> Result<Vec<u8>> {
        let client = self.client.clone();
        let cid_owned = cid.to_string();

        let data = task::spawn_blocking(move || -> Result<Vec<u8>> {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| VaultError::Storage(e.to_string()))?;
            rt.block_on(async {
                let data = client
                    .cat(&cid_owned)
                    .map_ok(|chunk| BytesMut::from(&chunk[..]))
                    .try_fold(BytesMut::new(), |mut acc, chunk| async move {
                        acc.extend_from_slice(&chunk);
                        Ok(acc)
                    })
                    .await
                    .map_err(|e| VaultError::Storage(format!("IPFS cat {} failed: {}", cid_owned, e)))?;
                Ok(data.to_vec())
            })
        })
        .await
        .map_err(|e| VaultError::Storage(format!("IPFS worker failed: {}", e)))??;

        debug!("retrieved {} bytes for {}", data.len(), cid);
        Ok(data)
    }
}

/// Process-local content store. CIDs are derived from the data, so storing
/// the same bytes twice yields the same identifier.
#[derive(Default)]
pub struct InMemoryContentStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pseudo-CID: `bafk` followed by hex of the data's Keccak-256.
    pub fn cid_for(data: &[u8]) -> String {
        format!("bafk{}", hex::encode(hash_data(data)))
    }

    /// Overwrites stored bytes in place, for exercising integrity failures.
    pub fn tamper(&self, cid: &str, f: impl FnOnce(&mut Vec<u8>)) -> Result<()> {
        let mut blobs = self.blobs.lock().map_err(|_| VaultError::Storage("store lock poisoned".into()))?;
        let blob = blobs.get_mut(cid).ok_or_else(|| VaultError::NotFound(format!("content {}", cid)))?;
        f(blob);
        Ok(())
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn put(&self, data: &[u8]) -> Result<String> {
        let cid = Self::cid_for(data);
        self.blobs
            .lock()
            .map_err(|_| VaultError::Storage("store lock poisoned".into()))?
            .insert(cid.clone(), data.to_vec());
        Ok(cid)
    }

    async fn get(&self, cid: &str) -> Result<Vec<u8>> {
        self.blobs
            .lock()
            .map_err(|_| VaultError::Storage("store lock poisoned".into()))?
            .get(cid)
            .cloned()
            .ok_or_else(|| VaultError::NotFound(format!("content {}", cid)))
    }
}
