// src/utils/crypto.rs
//! Cryptographic primitives for document protection and content addressing.
//!
//! - Keccak-256 (Ethereum's standard hash function) for fingerprints and
//!   credential message hashes, so values match what the registry contract
//!   and wallet signers compute.
//! - ChaCha20-Poly1305 authenticated encryption for document payloads:
//!   256-bit key, 96-bit nonce, 128-bit tag.

use crate::errors::{Result, VaultError};
use crate::models::fingerprint::ContentFingerprint;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use ethers::utils::keccak256;
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Symmetric key length in bytes.
pub const KEY_LEN: usize = 32;

/// Nonce length in bytes.
pub const NONCE_LEN: usize = 12;

/// Computes a Keccak-256 hash of the input data (Ethereum-compatible).
///
/// # Arguments
/// * `data` - Binary data to hash (as bytes slice)
///
/// # Returns
/// Fixed-size 32-byte array (`[u8; 32]`) containing the hash.
pub fn hash_data(data: &[u8]) -> [u8; 32] {
    keccak256(data)
}

/// Derives the registry key for a content identifier.
///
/// The hash is taken over the UTF-8 bytes of the CID string, never over the
/// plaintext, so any party holding the CID can reproduce it.
pub fn compute_fingerprint(content_identifier: &str) -> ContentFingerprint {
    ContentFingerprint::from_bytes(hash_data(content_identifier.as_bytes()))
}

/// A single-use document key. Wiped from memory on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_LEN]);

impl SymmetricKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        SymmetricKey(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| VaultError::KeyWrap(format!("expected {} key bytes, got {}", KEY_LEN, bytes.len())))?;
        Ok(SymmetricKey(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// Generates a fresh document key from the OS CSPRNG.
pub fn generate_key() -> SymmetricKey {
    let mut bytes = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut bytes);
    SymmetricKey(bytes)
}

/// Generates a fresh 96-bit nonce. Keys are single-use per document, so a
/// random nonce is never paired with the same key twice.
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Encrypts `plaintext`; the output carries the 16-byte tag at the end.
pub fn encrypt(plaintext: &[u8], key: &SymmetricKey, nonce: &[u8; NONCE_LEN]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|_| VaultError::InvalidInput("plaintext too large to encrypt".into()))
}

/// Decrypts and authenticates `ciphertext`.
///
/// # Errors
/// [`VaultError::Integrity`] if the tag does not verify. Garbage is never
/// returned.
pub fn decrypt(ciphertext: &[u8], key: &SymmetricKey, nonce: &[u8; NONCE_LEN]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| VaultError::Integrity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_fingerprint_matches_keccak_of_cid() {
        let fp = compute_fingerprint("bafy123");
        assert_eq!(fp.as_bytes(), &keccak256(b"bafy123"));
        assert_eq!(fp, compute_fingerprint("bafy123"));
    }

    #[test]
    fn test_fingerprint_of_empty_string() {
        // keccak256("") is a well-known constant
        assert_eq!(
            compute_fingerprint("").to_hex(),
            "0xc5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn test_distinct_cids_give_distinct_fingerprints() {
        let mut seen = HashSet::new();
        for i in 0..2000 {
            let cid = format!("bafybei{}-{}", i, i * 7919);
            assert!(seen.insert(compute_fingerprint(&cid)), "collision at {}", cid);
        }
    }

    #[test]
    fn test_wrong_key_fails_integrity() {
        let key = generate_key();
        let nonce = generate_nonce();
        let ciphertext = encrypt(b"passport scan", &key, &nonce).unwrap();

        let other = generate_key();
        assert!(matches!(decrypt(&ciphertext, &other, &nonce), Err(VaultError::Integrity)));

        let other_nonce = generate_nonce();
        assert!(matches!(decrypt(&ciphertext, &key, &other_nonce), Err(VaultError::Integrity)));
    }

    #[test]
    fn test_truncated_ciphertext_fails_integrity() {
        let key = generate_key();
        let nonce = generate_nonce();
        let ciphertext = encrypt(b"driver licence", &key, &nonce).unwrap();
        assert!(matches!(decrypt(&ciphertext[..4], &key, &nonce), Err(VaultError::Integrity)));
    }

    #[test]
    fn test_generated_keys_differ() {
        assert_ne!(generate_key(), generate_key());
        assert_ne!(generate_nonce(), generate_nonce());
    }

    proptest! {
        #[test]
        fn prop_decrypt_inverts_encrypt(
            data in proptest::collection::vec(any::<u8>(), 0..512),
            key in any::<[u8; 32]>(),
            nonce in any::<[u8; 12]>(),
        ) {
            let key = SymmetricKey::from_bytes(key);
            let ciphertext = encrypt(&data, &key, &nonce).unwrap();
            prop_assert_eq!(decrypt(&ciphertext, &key, &nonce).unwrap(), data);
        }

        #[test]
        fn prop_any_bit_flip_is_detected(
            data in proptest::collection::vec(any::<u8>(), 0..256),
            bit in any::<usize>(),
        ) {
            let key = generate_key();
            let nonce = generate_nonce();
            let mut ciphertext = encrypt(&data, &key, &nonce).unwrap();
            let bit = bit % (ciphertext.len() * 8);
            ciphertext[bit / 8] ^= 1 << (bit % 8);
            prop_assert!(matches!(decrypt(&ciphertext, &key, &nonce), Err(VaultError::Integrity)));
        }
    }
}
