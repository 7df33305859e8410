// src/models/did.rs
//! `did:ethr` Decentralized Identifier handling.
//!
//! Two forms are accepted:
//! ```text
//! did:ethr:<address>             (mainnet, chain id omitted)
//! did:ethr:<chainId>:<address>
//! ```
//! The account address is always the last segment, which is what credential
//! verification compares a recovered signer against.

use crate::errors::{Result, VaultError};
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const METHOD_PREFIX: &str = "did:ethr:";

/// A parsed `did:ethr` identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EthrDid {
    /// Network qualifier, `None` for mainnet.
    pub chain_id: Option<String>,
    /// Controlling account
    pub address: Address,
}

impl EthrDid {
    /// Builds a DID for `address`. Chain id `"1"` (mainnet) is omitted.
    pub fn new(address: Address, chain_id: Option<&str>) -> Self {
        let chain_id = chain_id.filter(|c| *c != "1").map(str::to_string);
        EthrDid { chain_id, address }
    }

    pub fn from_address(address: Address) -> Self {
        EthrDid::new(address, None)
    }

    /// Extracts the controlling account from a DID string.
    pub fn account_of(did: &str) -> Result<Address> {
        did.parse::<EthrDid>().map(|d| d.address)
    }
}

impl fmt::Display for EthrDid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let address = format!("{:#x}", self.address);
        match &self.chain_id {
            Some(chain) => write!(f, "{}{}:{}", METHOD_PREFIX, chain, address),
            None => write!(f, "{}{}", METHOD_PREFIX, address),
        }
    }
}

impl FromStr for EthrDid {
    type Err = VaultError;

    fn from_str(did: &str) -> Result<Self> {
        let rest = did
            .strip_prefix(METHOD_PREFIX)
            .ok_or_else(|| VaultError::InvalidDid(format!("{} is not a did:ethr identifier", did)))?;

        let parts: Vec<&str> = rest.split(':').collect();
        let (chain_id, address) = match parts.as_slice() {
            [address] => (None, *address),
            [chain, address] if !chain.is_empty() => (Some(chain.to_string()), *address),
            _ => return Err(VaultError::InvalidDid(format!("malformed did:ethr identifier {}", did))),
        };

        let address = Address::from_str(address)
            .map_err(|e| VaultError::InvalidDid(format!("bad account in {}: {}", did, e)))?;
        Ok(EthrDid { chain_id, address })
    }
}

impl TryFrom<String> for EthrDid {
    type Error = VaultError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<EthrDid> for String {
    fn from(did: EthrDid) -> Self {
        did.to_string()
    }
}

/// Returns `true` if `did` parses as a `did:ethr` identifier.
pub fn is_valid_did(did: &str) -> bool {
    did.parse::<EthrDid>().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: &str = "0x8ba1f109551bd432803012645ac136ddd64dba72";

    #[test]
    fn test_mainnet_form() {
        let did: EthrDid = format!("did:ethr:{}", ADDR).parse().unwrap();
        assert_eq!(did.chain_id, None);
        assert_eq!(did.address, ADDR.parse::<Address>().unwrap());
        assert_eq!(did.to_string(), format!("did:ethr:{}", ADDR));
    }

    #[test]
    fn test_chain_qualified_form() {
        let did: EthrDid = format!("did:ethr:0x89:{}", ADDR).parse().unwrap();
        assert_eq!(did.chain_id.as_deref(), Some("0x89"));
        assert_eq!(did.to_string(), format!("did:ethr:0x89:{}", ADDR));
    }

    #[test]
    fn test_mainnet_chain_id_is_omitted() {
        let address: Address = ADDR.parse().unwrap();
        assert_eq!(EthrDid::new(address, Some("1")).to_string(), format!("did:ethr:{}", ADDR));
    }

    #[test]
    fn test_account_of_ignores_case() {
        let upper = format!("did:ethr:0x{}", ADDR[2..].to_uppercase());
        assert_eq!(EthrDid::account_of(&upper).unwrap(), ADDR.parse::<Address>().unwrap());
    }

    #[test]
    fn test_rejects_other_methods_and_garbage() {
        assert!(!is_valid_did("did:key:z6Mk"));
        assert!(!is_valid_did("did:ethr:"));
        assert!(!is_valid_did("did:ethr:1:2:0xabc"));
        assert!(!is_valid_did("did:ethr:0xnothex"));
    }
}
