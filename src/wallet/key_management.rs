// src/wallet/key_management.rs
//! Cryptographic key management for the vault wallet.
//!
//! One secp256k1 account key serves two roles:
//! - **Signer**: EIP-191 `personal_sign` for credentials and disclosure proofs
//! - **Recipient**: unwraps document keys that were wrapped to its public key
//!
//! Uses the following cryptographic primitives:
//! - secp256k1 curve (via `k256`), ECDH for key agreement
//! - HKDF-SHA256 to derive the wrapping key from the shared secret
//! - ChaCha20-Poly1305 to encrypt the document key
//! - Keccak-256 address derivation and message signing (via `ethers`)

use crate::errors::{Result, VaultError};
use crate::models::did::EthrDid;
use crate::models::document::WrappedKey;
use crate::services::credential_issuer::SigningCapability;
use crate::utils::crypto::{self, generate_nonce, SymmetricKey, KEY_LEN};
use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::Address;
use ethers::utils::hex;
use hkdf::Hkdf;
use k256::ecdh::{diffie_hellman, EphemeralSecret};
use k256::ecdsa::SigningKey;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{PublicKey, SecretKey};
use log::debug;
use rand::rngs::OsRng;
use sha2::Sha256;
use zeroize::Zeroize;

/// HKDF info string binding derived keys to this wrapping scheme.
const WRAP_INFO: &[u8] = b"identity-vault/key-wrap/v1";

/// Wallet key material for one account.
///
/// # Security Notes
/// - The secret key is never exposed; only the public key, address and
///   signatures leave this type
/// - Uses deterministic ECDSA (RFC 6979) for signing
#[derive(Clone)]
pub struct KeyManager {
    /// Securely stored private key (never exposed)
    secret_key: SecretKey,
    /// Derived public key, used as key-wrapping recipient material
    pub public_key: PublicKey,
    wallet: LocalWallet,
}

impl KeyManager {
    /// Generates a new KeyManager with a fresh random account key.
    pub fn new() -> Self {
        Self::from_secret(SecretKey::random(&mut OsRng))
    }

    /// Loads an account from a hex-encoded private key (with or without 0x).
    pub fn from_private_key_hex(private_key: &str) -> Result<Self> {
        let mut bytes = hex::decode(private_key.trim().trim_start_matches("0x"))
            .map_err(|e| VaultError::Config(format!("private key is not hex: {}", e)))?;
        let secret = SecretKey::from_slice(&bytes)
            .map_err(|_| VaultError::Config("private key is not a valid secp256k1 scalar".into()));
        bytes.zeroize();
        Ok(Self::from_secret(secret?))
    }

    fn from_secret(secret_key: SecretKey) -> Self {
        let public_key = secret_key.public_key();
        let wallet = LocalWallet::from(SigningKey::from(&secret_key));
        KeyManager {
            secret_key,
            public_key,
            wallet,
        }
    }

    /// Ethereum account controlled by this key.
    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    /// `did:ethr` identifier for this account.
    pub fn did(&self, chain_id: Option<&str>) -> EthrDid {
        EthrDid::new(self.address(), chain_id)
    }

    /// Compressed SEC1 public key, the material senders wrap document keys to.
    pub fn encryption_public_key(&self) -> Vec<u8> {
        self.public_key.to_encoded_point(true).as_bytes().to_vec()
    }

    /// Signing handle for ledger transactions.
    pub fn wallet(&self) -> LocalWallet {
        self.wallet.clone()
    }

    /// Recovers a document key wrapped to this account's public key.
    pub fn unwrap_key(&self, wrapped: &WrappedKey) -> Result<SymmetricKey> {
        unwrap_key(wrapped, &self.secret_key)
    }
}

impl Default for KeyManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager").field("address", &self.address()).finish()
    }
}

#[async_trait]
impl SigningCapability for KeyManager {
    fn account(&self) -> Address {
        self.address()
    }

    /// EIP-191 `personal_sign` over `message`; returns the 65-byte signature.
    async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>> {
        let signature = self
            .wallet
            .sign_message(message)
            .await
            .map_err(|e| VaultError::SigningRejected(e.to_string()))?;
        Ok(signature.to_vec())
    }
}

/// Parses recipient public material (compressed or uncompressed SEC1).
pub fn parse_public_key(bytes: &[u8]) -> Result<PublicKey> {
    PublicKey::from_sec1_bytes(bytes).map_err(|_| VaultError::KeyWrap("invalid recipient public key".into()))
}

/// Wraps `raw_key` so that only the holder of `recipient`'s secret can
/// recover it.
///
/// # Process Flow
/// 1. Generates an ephemeral secp256k1 key pair
/// 2. ECDH between the ephemeral secret and the recipient public key
/// 3. HKDF-SHA256 (salt = ephemeral public key) derives a wrapping key
/// 4. ChaCha20-Poly1305 encrypts the raw key under a fresh nonce
pub fn wrap_key(raw_key: &SymmetricKey, recipient: &PublicKey) -> Result<WrappedKey> {
    let ephemeral = EphemeralSecret::random(&mut OsRng);
    let ephemeral_public = ephemeral.public_key().to_encoded_point(true);
    let shared = ephemeral.diffie_hellman(recipient);

    let wrapping_key = derive_wrapping_key(shared.raw_secret_bytes().as_slice(), ephemeral_public.as_bytes())?;
    let nonce = generate_nonce();
    let ciphertext = crypto::encrypt(raw_key.as_bytes(), &wrapping_key, &nonce)?;

    debug!("wrapped document key to recipient");
    Ok(WrappedKey {
        ephemeral_public_key: ephemeral_public.as_bytes().to_vec(),
        nonce,
        ciphertext,
    })
}

/// Inverse of [`wrap_key`].
///
/// # Errors
/// [`VaultError::KeyWrap`] if the blob is malformed or was wrapped to a
/// different recipient.
pub fn unwrap_key(wrapped: &WrappedKey, recipient_secret: &SecretKey) -> Result<SymmetricKey> {
    let ephemeral = parse_public_key(&wrapped.ephemeral_public_key)?;
    let shared = diffie_hellman(recipient_secret.to_nonzero_scalar(), ephemeral.as_affine());

    let wrapping_key = derive_wrapping_key(shared.raw_secret_bytes().as_slice(), &wrapped.ephemeral_public_key)?;
    let mut raw = crypto::decrypt(&wrapped.ciphertext, &wrapping_key, &wrapped.nonce)
        .map_err(|_| VaultError::KeyWrap("key was not wrapped for this recipient".into()))?;
    let key = SymmetricKey::from_slice(&raw);
    raw.zeroize();
    key
}

fn derive_wrapping_key(shared_secret: &[u8], salt: &[u8]) -> Result<SymmetricKey> {
    let hk = Hkdf::<Sha256>::new(Some(salt), shared_secret);
    let mut okm = [0u8; KEY_LEN];
    hk.expand(WRAP_INFO, &mut okm)
        .map_err(|_| VaultError::KeyWrap("HKDF output length rejected".into()))?;
    let key = SymmetricKey::from_bytes(okm);
    okm.zeroize();
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::crypto::generate_key;
    use ethers::types::Signature;

    #[test]
    fn test_wrap_unwrap_for_intended_recipient() {
        let recipient = KeyManager::new();
        let key = generate_key();

        let wrapped = wrap_key(&key, &recipient.public_key).unwrap();
        assert_eq!(wrapped.ephemeral_public_key.len(), 33);
        assert_ne!(wrapped.ciphertext[..KEY_LEN], key.as_bytes()[..]);
        assert_eq!(recipient.unwrap_key(&wrapped).unwrap(), key);
    }

    #[test]
    fn test_other_recipient_cannot_unwrap() {
        let recipient = KeyManager::new();
        let eavesdropper = KeyManager::new();
        let wrapped = wrap_key(&generate_key(), &recipient.public_key).unwrap();

        assert!(matches!(eavesdropper.unwrap_key(&wrapped), Err(VaultError::KeyWrap(_))));
    }

    #[test]
    fn test_wrapping_is_randomized() {
        let recipient = KeyManager::new();
        let key = generate_key();
        let first = wrap_key(&key, &recipient.public_key).unwrap();
        let second = wrap_key(&key, &recipient.public_key).unwrap();
        assert_ne!(first.ciphertext, second.ciphertext);
        assert_ne!(first.ephemeral_public_key, second.ephemeral_public_key);
    }

    #[test]
    fn test_public_key_round_trips_through_sec1() {
        let km = KeyManager::new();
        assert_eq!(parse_public_key(&km.encryption_public_key()).unwrap(), km.public_key);
        assert!(parse_public_key(&[4u8; 10]).is_err());
    }

    #[test]
    fn test_private_key_import() {
        // Well-known Hardhat account #0
        let km = KeyManager::from_private_key_hex(
            "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
        )
        .unwrap();
        assert_eq!(
            km.address(),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266".parse::<Address>().unwrap()
        );
        assert!(KeyManager::from_private_key_hex("zz").is_err());
    }

    #[tokio::test]
    async fn test_signature_recovers_to_account() {
        let km = KeyManager::new();
        let raw = km.sign_message(b"hello vault").await.unwrap();
        assert_eq!(raw.len(), 65);

        let signature = Signature::try_from(raw.as_slice()).unwrap();
        assert_eq!(signature.recover(&b"hello vault"[..]).unwrap(), km.address());
    }
}
