//! Symmetric encryption and random credential generation
//!
//! Ciphertexts are `nonce || sealed` encoded as lowercase hex, sealed with
//! XChaCha20-Poly1305. A wrong key or a tampered ciphertext fails
//! authentication instead of decrypting to garbage.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use rand::{Rng, RngCore, rngs::OsRng};
use thiserror::Error;

/// Length of every symmetric key, in bytes
pub const KEY_LEN: usize = 32;

const NONCE_LEN: usize = 24;

/// Symmetric key material
pub type Key = [u8; KEY_LEN];

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CryptoError {
    #[error("key or ciphertext is not valid hex")]
    Encoding,

    #[error("key must be {KEY_LEN} bytes")]
    KeyLength,

    #[error("ciphertext is too short")]
    Truncated,

    #[error("ciphertext failed authentication")]
    Authentication,

    #[error("decrypted payload is not UTF-8")]
    Utf8,
}

/// Fresh random key from the operating system RNG
pub fn generate_key() -> Key {
    let mut key = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut key);
    key
}

/// Hex-encoded secret issued once per account
pub fn generate_persistent_secret() -> String {
    hex::encode(generate_key())
}

/// Zero-padded decimal code of `digits` length
pub fn generate_numeric_code(digits: u32) -> String {
    let upper = 10u64.pow(digits);
    let value = OsRng.gen_range(0..upper);
    format!("{value:0width$}", width = digits as usize)
}

pub fn encode_key(key: &Key) -> String {
    hex::encode(key)
}

pub fn decode_key(encoded: &str) -> Result<Key, CryptoError> {
    let bytes = hex::decode(encoded).map_err(|_| CryptoError::Encoding)?;
    bytes.try_into().map_err(|_| CryptoError::KeyLength)
}

/// Seal `plaintext` under `key` with a random nonce
pub fn encrypt(key: &Key, plaintext: &str) -> Result<String, CryptoError> {
    let cipher = XChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::KeyLength)?;

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let sealed = cipher
        .encrypt(XNonce::from_slice(&nonce), plaintext.as_bytes())
        .map_err(|_| CryptoError::Authentication)?;

    let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(hex::encode(out))
}

/// Open a ciphertext produced by [`encrypt`]
pub fn decrypt(key: &Key, ciphertext: &str) -> Result<String, CryptoError> {
    let bytes = hex::decode(ciphertext).map_err(|_| CryptoError::Encoding)?;
    if bytes.len() <= NONCE_LEN {
        return Err(CryptoError::Truncated);
    }
    let (nonce, sealed) = bytes.split_at(NONCE_LEN);

    let cipher = XChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::KeyLength)?;
    let plaintext = cipher
        .decrypt(XNonce::from_slice(nonce), sealed)
        .map_err(|_| CryptoError::Authentication)?;

    String::from_utf8(plaintext).map_err(|_| CryptoError::Utf8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decrypt_recovers_plaintext() {
        let key = generate_key();
        let ciphertext = encrypt(&key, "persistent-secret").unwrap();
        assert_eq!(decrypt(&key, &ciphertext).unwrap(), "persistent-secret");
    }

    #[test]
    fn encryption_uses_fresh_nonce() {
        let key = generate_key();
        assert_ne!(encrypt(&key, "same").unwrap(), encrypt(&key, "same").unwrap());
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let ciphertext = encrypt(&generate_key(), "secret").unwrap();
        assert_eq!(
            decrypt(&generate_key(), &ciphertext),
            Err(CryptoError::Authentication)
        );
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let key = generate_key();
        let mut ciphertext = encrypt(&key, "secret").unwrap();
        let last = ciphertext.pop().unwrap();
        ciphertext.push(if last == '0' { '1' } else { '0' });
        assert_eq!(decrypt(&key, &ciphertext), Err(CryptoError::Authentication));
    }

    #[test]
    fn garbage_input_is_rejected() {
        let key = generate_key();
        assert_eq!(decrypt(&key, "not hex"), Err(CryptoError::Encoding));
        assert_eq!(decrypt(&key, "abcd"), Err(CryptoError::Truncated));
        assert_eq!(decode_key("abcd"), Err(CryptoError::KeyLength));
    }

    #[test]
    fn key_survives_hex_encoding() {
        let key = generate_key();
        assert_eq!(decode_key(&encode_key(&key)).unwrap(), key);
    }

    #[test]
    fn numeric_code_has_requested_width() {
        for _ in 0..50 {
            let code = generate_numeric_code(6);
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn persistent_secrets_are_unique() {
        let secret = generate_persistent_secret();
        assert_eq!(secret.len(), KEY_LEN * 2);
        assert_ne!(secret, generate_persistent_secret());
    }
}
