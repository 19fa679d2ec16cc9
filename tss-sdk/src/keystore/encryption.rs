//! Encryption utilities for the keystore module.
//!
//! Data is encrypted using AES-256-GCM with Argon2id key derivation. Callers
//! pass associated data that binds the ciphertext to its context, so a blob
//! sealed for one purpose cannot be opened as another.

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use rand_core::{OsRng, RngCore};
use serde::Serialize;
use serde::de::DeserializeOwned;
use zeroize::Zeroizing;

use crate::error::LocalError;

// Constants for encryption parameters
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32; // 256 bits

const ARGON2_MEMORY_KIB: u32 = 4096;
const ARGON2_ITERATIONS: u32 = 3;
const ARGON2_PARALLELISM: u32 = 1;

fn derive_key(password: &str, salt: &[u8]) -> Result<Zeroizing<[u8; KEY_LEN]>, LocalError> {
    let params = Params::new(
        ARGON2_MEMORY_KIB,
        ARGON2_ITERATIONS,
        ARGON2_PARALLELISM,
        Some(KEY_LEN),
    )
    .map_err(LocalError::KeyDerivation)?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut key[..])
        .map_err(LocalError::KeyDerivation)?;
    Ok(key)
}

/// Encrypts data with a password using AES-256-GCM with Argon2id key derivation.
///
/// The output format is: `salt (16 bytes) + nonce (12 bytes) + ciphertext`
pub fn encrypt_data(data: &[u8], password: &str, aad: &[u8]) -> Result<Vec<u8>, LocalError> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let key = derive_key(password, &salt)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key[..]));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), Payload { msg: data, aad })
        .map_err(|_| LocalError::Encryption)?;

    let mut result = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
    result.extend_from_slice(&salt);
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);

    Ok(result)
}

/// Decrypts data that was encrypted with `encrypt_data` under the same
/// associated data.
pub fn decrypt_data(
    encrypted_data: &[u8],
    password: &str,
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, LocalError> {
    if encrypted_data.len() < SALT_LEN + NONCE_LEN {
        return Err(LocalError::TruncatedCiphertext {
            len: encrypted_data.len(),
        });
    }

    let salt = &encrypted_data[0..SALT_LEN];
    let nonce_bytes = &encrypted_data[SALT_LEN..SALT_LEN + NONCE_LEN];
    let ciphertext = &encrypted_data[SALT_LEN + NONCE_LEN..];

    let key = derive_key(password, salt)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key[..]));
    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(nonce_bytes),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| LocalError::Decryption)?;

    Ok(Zeroizing::new(plaintext))
}

/// Serializes `value` to JSON and encrypts it, returning base64 text.
pub fn seal<T: Serialize>(
    what: &'static str,
    value: &T,
    password: &str,
    aad: &[u8],
) -> Result<String, LocalError> {
    let plaintext = Zeroizing::new(
        serde_json::to_vec(value).map_err(|cause| LocalError::Encode { what, cause })?,
    );
    let encrypted = encrypt_data(&plaintext, password, aad)?;
    Ok(STANDARD.encode(encrypted))
}

/// Reverses [`seal`].
pub fn unseal<T: DeserializeOwned>(
    what: &'static str,
    sealed: &str,
    password: &str,
    aad: &[u8],
) -> Result<T, LocalError> {
    let encrypted = STANDARD.decode(sealed.trim())?;
    let plaintext = decrypt_data(&encrypted, password, aad)?;
    serde_json::from_slice(&plaintext).map_err(|cause| LocalError::Decode { what, cause })
}
