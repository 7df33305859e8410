// src/blockchain/evm_client.rs
//! EVM client for the deployed `CredentialsRegistry` contract.
//!
//! Implements [`Ledger`] over JSON-RPC:
//! - writes are simulated with `eth_call` first, so contract reverts surface
//!   as registry precondition errors before any gas is spent
//! - the transaction is then sent and awaited until a receipt is mined
//! - transport failures map to the retryable [`VaultError::Ledger`]

use crate::blockchain::ledger::{Ledger, LedgerReceipt};
use crate::blockchain::registry::Validity;
use crate::errors::{Result, VaultError};
use crate::models::fingerprint::ContentFingerprint;
use async_trait::async_trait;
use ethers::contract::{abigen, ContractCall, ContractError};
use ethers::abi::Detokenize;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, U256, U64};
use log::{debug, info, warn};
use std::sync::Arc;

abigen!(
    CredentialsRegistry,
    r#"[
        function issue(bytes32 cidHash, address owner, string issuerDid) external returns (bool)
        function revoke(bytes32 cidHash) external
        function isValid(bytes32 cidHash) external view returns (bool valid, address owner, string issuerDid, uint256 issuedAt)
        event CredentialIssued(bytes32 indexed cidHash, address indexed owner, string issuerDid, uint256 timestamp)
        event CredentialRevoked(bytes32 indexed cidHash, uint256 timestamp)
    ]"#
);

type Client = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Registry client bound to one signing account.
///
/// # Thread Safety
/// Cheap to share behind `Arc`; the underlying provider pools connections.
pub struct EvmLedger {
    contract: CredentialsRegistry<Client>,
    account: Address,
}

impl EvmLedger {
    /// Connects to `rpc_url` and binds the registry at `contract_address`.
    ///
    /// # Errors
    /// - [`VaultError::Config`] if the RPC URL is malformed
    /// - [`VaultError::Ledger`] if the chain id cannot be fetched
    pub async fn connect(rpc_url: &str, contract_address: Address, wallet: LocalWallet) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| VaultError::Config(format!("invalid RPC url {}: {}", rpc_url, e)))?;
        let chain_id = provider
            .get_chainid()
            .await
            .map_err(|e| VaultError::Ledger(format!("chain id lookup failed: {}", e)))?
            .as_u64();

        let wallet = wallet.with_chain_id(chain_id);
        let account = wallet.address();
        let client = Arc::new(SignerMiddleware::new(provider, wallet));
        info!(
            "connected to registry {:?} on chain {} as {:?}",
            contract_address, chain_id, account
        );

        Ok(EvmLedger {
            contract: CredentialsRegistry::new(contract_address, client),
            account,
        })
    }

    pub fn account(&self) -> Address {
        self.account
    }

    fn ensure_caller(&self, caller: Address) -> Result<()> {
        if caller != self.account {
            return Err(VaultError::InvalidInput(format!(
                "ledger client submits as {:?}, not {:?}",
                self.account, caller
            )));
        }
        Ok(())
    }

    /// Simulates, sends and waits for one state-changing call.
    async fn submit<D: Detokenize + Send + Sync>(
        &self,
        call: ContractCall<Client, D>,
        fingerprint: ContentFingerprint,
    ) -> Result<LedgerReceipt> {
        call.call()
            .await
            .map_err(|e| classify(e, fingerprint, self.account))?;

        let pending = call
            .send()
            .await
            .map_err(|e| classify(e, fingerprint, self.account))?;
        let tx_hash = pending.tx_hash();
        debug!("submitted {:?} for {}", tx_hash, fingerprint);

        let receipt = pending
            .await
            .map_err(|e| VaultError::Ledger(format!("waiting for {:?} failed: {}", tx_hash, e)))?
            .ok_or_else(|| VaultError::Ledger(format!("transaction {:?} was dropped", tx_hash)))?;

        if receipt.status != Some(U64::from(1)) {
            warn!("transaction {:?} reverted on chain", tx_hash);
            return Err(VaultError::Ledger(format!("transaction {:?} reverted", tx_hash)));
        }

        let block_number = receipt.block_number.map(|b| b.as_u64());
        let timestamp = match receipt.block_number {
            Some(number) => self
                .contract
                .client()
                .get_block(number)
                .await
                .ok()
                .flatten()
                .map(|block| block.timestamp.min(U256::from(u64::MAX)).as_u64()),
            None => None,
        };

        Ok(LedgerReceipt {
            tx_hash,
            block_number,
            timestamp,
        })
    }
}

#[async_trait]
impl Ledger for EvmLedger {
    async fn issue(
        &self,
        caller: Address,
        fingerprint: ContentFingerprint,
        owner: Address,
        issuer_did: &str,
    ) -> Result<LedgerReceipt> {
        self.ensure_caller(caller)?;
        let call = self
            .contract
            .issue(*fingerprint.as_bytes(), owner, issuer_did.to_string());
        let receipt = self.submit(call, fingerprint).await?;
        info!("issued {} in {:?}", fingerprint, receipt.tx_hash);
        Ok(receipt)
    }

    async fn revoke(&self, caller: Address, fingerprint: ContentFingerprint) -> Result<LedgerReceipt> {
        self.ensure_caller(caller)?;
        let call = self.contract.revoke(*fingerprint.as_bytes());
        let receipt = self.submit(call, fingerprint).await?;
        info!("revoked {} in {:?}", fingerprint, receipt.tx_hash);
        Ok(receipt)
    }

    async fn is_valid(&self, fingerprint: ContentFingerprint) -> Result<Validity> {
        let (valid, owner, issuer_did, issued_at) = self
            .contract
            .is_valid(*fingerprint.as_bytes())
            .call()
            .await
            .map_err(|e| VaultError::Ledger(format!("isValid({}) failed: {}", fingerprint, e)))?;

        if !valid {
            return Ok(Validity::invalid());
        }
        Ok(Validity {
            valid,
            owner,
            issuer_did,
            issued_at: issued_at.min(U256::from(u64::MAX)).as_u64(),
        })
    }
}

fn classify(err: ContractError<Client>, fingerprint: ContentFingerprint, caller: Address) -> VaultError {
    if let Some(reason) = err.decode_revert::<String>() {
        return revert_to_error(&reason, fingerprint, caller);
    }
    if err.is_revert() {
        return VaultError::Ledger(format!("transaction reverted without reason: {}", err));
    }
    VaultError::Ledger(err.to_string())
}

/// Maps a contract revert reason to the registry error it stands for.
pub(crate) fn revert_to_error(reason: &str, fingerprint: ContentFingerprint, caller: Address) -> VaultError {
    let r = reason.to_ascii_lowercase();
    if r.contains("revoked") {
        VaultError::AlreadyRevoked(fingerprint)
    } else if r.contains("already") || r.contains("exists") {
        VaultError::AlreadyRegistered(fingerprint)
    } else if r.contains("not registered") || r.contains("not found") || r.contains("does not exist") || r.contains("not issued") {
        VaultError::NotRegistered(fingerprint)
    } else if r.contains("owner") || r.contains("authori") || r.contains("issuer") {
        VaultError::Unauthorized { caller, fingerprint }
    } else {
        VaultError::Ledger(format!("transaction reverted: {}", reason))
    }
}
