//! Symmetric encryption of the stored API key
//!
//! The key is sealed with ChaCha20-Poly1305 under a 256-bit key derived
//! from a random password via PBKDF2-HMAC-SHA256. The stored form is
//! `base64(salt[16] || nonce[12] || ciphertext)`.

use crate::error::{Result, RelaywizError};
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use zeroize::Zeroizing;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const PBKDF2_ROUNDS: u32 = 100_000;

/// Generate a random password (64 hex characters)
pub fn generate_password() -> String {
    let bytes: [u8; 32] = rand::random();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// PBKDF2-HMAC-SHA256 producing a 32-byte key
fn derive_key(password: &str, salt: &[u8], rounds: u32) -> Zeroizing<[u8; 32]> {
    let mut key = Zeroizing::new([0u8; 32]);
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, rounds, key.as_mut_slice());
    key
}

/// Encrypt `data` with `password`, returning the base64 envelope
pub fn encrypt(data: &str, password: &str) -> Result<String> {
    encrypt_with_rounds(data, password, PBKDF2_ROUNDS)
}

/// Decrypt a base64 envelope produced by [`encrypt`]
///
/// An empty envelope decrypts to an empty string.
///
/// # Errors
///
/// Returns `RelaywizError::Crypto` on malformed input or a wrong password
pub fn decrypt(data: &str, password: &str) -> Result<Zeroizing<String>> {
    decrypt_with_rounds(data, password, PBKDF2_ROUNDS)
}

pub(crate) fn encrypt_with_rounds(data: &str, password: &str, rounds: u32) -> Result<String> {
    let salt: [u8; SALT_LEN] = rand::random();
    let nonce_bytes: [u8; NONCE_LEN] = rand::random();

    let key = derive_key(password, &salt, rounds);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_slice()));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), data.as_bytes())
        .map_err(|_| RelaywizError::Crypto("Failed to encrypt".into()))?;

    let mut combined = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
    combined.extend_from_slice(&salt);
    combined.extend_from_slice(&nonce_bytes);
    combined.extend_from_slice(&ciphertext);

    Ok(base64::engine::general_purpose::STANDARD.encode(combined))
}

pub(crate) fn decrypt_with_rounds(
    data: &str,
    password: &str,
    rounds: u32,
) -> Result<Zeroizing<String>> {
    if data.is_empty() {
        return Ok(Zeroizing::new(String::new()));
    }

    let combined = base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| RelaywizError::Crypto(format!("Invalid base64: {}", e)))?;

    if combined.len() < SALT_LEN + NONCE_LEN {
        return Err(RelaywizError::Crypto("Ciphertext too short".into()).into());
    }

    let (salt, rest) = combined.split_at(SALT_LEN);
    let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

    let key = derive_key(password, salt, rounds);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_slice()));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| RelaywizError::Crypto("Failed to decrypt - wrong password?".into()))?;

    let text = String::from_utf8(plaintext)
        .map_err(|e| RelaywizError::Crypto(format!("Decrypted data is not UTF-8: {}", e)))?;

    Ok(Zeroizing::new(text))
}
