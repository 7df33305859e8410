// src/lib.rs
//! # Identity Vault
//!
//! Credential lifecycle engine for privacy-preserving identity documents.
//!
//! ## Architecture Overview
//! 1. **Blockchain Layer**: registry state machine and [`blockchain::ledger::Ledger`]
//!    backends (in-memory, EVM contract)
//! 2. **Services Layer**: credential issuance, verification, lifecycle
//!    orchestration and the HTTP API
//! 3. **Storage Layer**: content-addressed ciphertext storage (IPFS)
//! 4. **Wallet Layer**: account keys, key wrapping and the local record cache
//!
//! Documents are encrypted before they leave the process. Only the
//! fingerprint of the storage CID is ever written to the ledger.

pub mod blockchain;
pub mod config;
pub mod errors;
pub mod models;
pub mod services;
pub mod storage;
pub mod utils;
pub mod wallet;

pub use errors::{Result, VaultError};
