// src/config.rs
//! Runtime configuration.
//!
//! Sources, later ones overriding earlier ones:
//! 1. Built-in defaults (in-memory ledger and storage, localhost bind)
//! 2. Optional `config/identity-vault.{toml,yaml,json}`
//! 3. `VAULT_`-prefixed environment variables, e.g. `VAULT_LEDGER=evm`
//!
//! `.env` files are loaded into the environment by `main` before this runs.

use crate::blockchain::registry::RevocationPolicy;
use crate::errors::{Result, VaultError};
use config::{Config, Environment, File};
use ethers::types::Address;
use serde::Deserialize;
use std::net::SocketAddr;
use std::str::FromStr;

const CONFIG_FILE: &str = "config/identity-vault";
const ENV_PREFIX: &str = "VAULT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    Memory,
    Evm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Ipfs,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub bind_addr: String,
    pub ledger: LedgerBackend,
    #[serde(default)]
    pub rpc_url: Option<String>,
    #[serde(default)]
    pub contract_address: Option<String>,
    /// Account key; a random key is generated when absent
    #[serde(default)]
    pub private_key: Option<String>,
    /// Chain qualifier used in issuer DIDs
    #[serde(default)]
    pub chain_id: Option<String>,
    pub storage: StorageBackend,
    pub ipfs_api_url: String,
    /// JSON file for the record store; in-memory when absent
    #[serde(default)]
    pub record_store_path: Option<String>,
    pub revocation_policy: String,
}

impl Settings {
    /// Loads settings from the file and process environment.
    pub fn load() -> Result<Self> {
        Self::build(Environment::with_prefix(ENV_PREFIX))
    }

    fn build(env: Environment) -> Result<Self> {
        let settings: Settings = Config::builder()
            .set_default("bind_addr", "127.0.0.1:3000")?
            .set_default("ledger", "memory")?
            .set_default("storage", "memory")?
            .set_default("ipfs_api_url", "http://localhost:5001")?
            .set_default("revocation_policy", "owner_only")?
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(env)
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Rejects combinations that cannot start.
    pub fn validate(&self) -> Result<()> {
        self.socket_addr()?;
        self.policy()?;
        if self.ledger == LedgerBackend::Evm {
            if self.rpc_url.is_none() {
                return Err(VaultError::Config("ledger = evm requires rpc_url".into()));
            }
            self.contract()?;
            if self.private_key.is_none() {
                return Err(VaultError::Config("ledger = evm requires private_key".into()));
            }
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.bind_addr
            .parse()
            .map_err(|e| VaultError::Config(format!("bind_addr {}: {}", self.bind_addr, e)))
    }

    pub fn policy(&self) -> Result<RevocationPolicy> {
        RevocationPolicy::from_str(&self.revocation_policy)
    }

    pub fn contract(&self) -> Result<Address> {
        let raw = self
            .contract_address
            .as_deref()
            .ok_or_else(|| VaultError::Config("contract_address is not set".into()))?;
        Address::from_str(raw).map_err(|e| VaultError::Config(format!("contract_address {}: {}", raw, e)))
    }
}
