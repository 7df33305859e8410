// src/blockchain/mod.rs
pub mod evm_client;
pub mod ledger;
pub mod registry;
