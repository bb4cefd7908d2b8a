//! Sealing of keychain secrets at rest
//!
//! A keychain keeps its private key and chain code in two forms: an in-memory
//! plaintext that is dropped when the secret is locked, and a [`SealedSecret`]
//! that survives locking and is what gets persisted.
//!
//! # Schemes
//!
//! - [`LockScheme::Plain`]: chosen when the lock key is empty. The "ciphertext"
//!   is the plaintext itself. This provides no confidentiality.
//! - [`LockScheme::Argon2Aes`]: Argon2id derives a 256-bit key from the lock key
//!   and salt, AES-256-GCM encrypts with a fresh random nonce.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use zeroize::Zeroizing;

/// Argon2id parameters: 64 MiB memory, 3 iterations, 4 lanes
const ARGON2_M_COST: u32 = 65536;
const ARGON2_T_COST: u32 = 3;
const ARGON2_P_COST: u32 = 4;
const ARGON2_OUTPUT_LEN: usize = 32;

/// Salt length used when the caller does not supply one
const DEFAULT_SALT_LEN: usize = 16;

/// Argon2 refuses shorter salts
const MIN_SALT_LEN: usize = 8;

const NONCE_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("Decryption failed: wrong lock key or corrupted data")]
    DecryptionFailed,
    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),
    #[error("Salt must be at least {MIN_SALT_LEN} bytes, got {0}")]
    SaltTooShort(usize),
    #[error("Invalid sealed secret format")]
    InvalidFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockScheme {
    Plain,
    Argon2Aes,
}

/// At-rest form of one secret.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedSecret {
    scheme: LockScheme,
    salt: Vec<u8>,
    nonce: Vec<u8>,
    ciphertext: Vec<u8>,
}

impl SealedSecret {
    pub fn scheme(&self) -> LockScheme {
        self.scheme
    }

    pub fn salt(&self) -> &[u8] {
        &self.salt
    }
}

impl fmt::Debug for SealedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Plain ciphertext is the secret itself
        f.debug_struct("SealedSecret")
            .field("scheme", &self.scheme)
            .field("salt_len", &self.salt.len())
            .field("ciphertext_len", &self.ciphertext.len())
            .finish()
    }
}

fn derive_key(
    lock_key: &[u8],
    salt: &[u8],
) -> Result<Zeroizing<[u8; ARGON2_OUTPUT_LEN]>, CryptoError> {
    let params = Params::new(
        ARGON2_M_COST,
        ARGON2_T_COST,
        ARGON2_P_COST,
        Some(ARGON2_OUTPUT_LEN),
    )
    .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = Zeroizing::new([0u8; ARGON2_OUTPUT_LEN]);
    argon2
        .hash_password_into(lock_key, salt, &mut key[..])
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;

    Ok(key)
}

/// Seal a secret under `lock_key`.
///
/// An empty `lock_key` selects [`LockScheme::Plain`]. An empty `salt` with a
/// non-empty lock key draws a fresh random salt.
pub fn seal(secret: &[u8], lock_key: &[u8], salt: &[u8]) -> Result<SealedSecret, CryptoError> {
    if lock_key.is_empty() {
        return Ok(SealedSecret {
            scheme: LockScheme::Plain,
            salt: salt.to_vec(),
            nonce: Vec::new(),
            ciphertext: secret.to_vec(),
        });
    }

    let salt = if salt.is_empty() {
        let mut fresh = vec![0u8; DEFAULT_SALT_LEN];
        OsRng.fill_bytes(&mut fresh);
        fresh
    } else if salt.len() < MIN_SALT_LEN {
        return Err(CryptoError::SaltTooShort(salt.len()));
    } else {
        salt.to_vec()
    };

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let key = derive_key(lock_key, &salt)?;

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key[..]));
    let ciphertext = cipher
        .encrypt(&nonce, secret)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    Ok(SealedSecret {
        scheme: LockScheme::Argon2Aes,
        salt,
        nonce: nonce.to_vec(),
        ciphertext,
    })
}

/// Recover the plaintext of a sealed secret.
///
/// Plain secrets ignore the lock key.
pub fn unseal(sealed: &SealedSecret, lock_key: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    match sealed.scheme {
        LockScheme::Plain => Ok(Zeroizing::new(sealed.ciphertext.clone())),
        LockScheme::Argon2Aes => {
            if sealed.nonce.len() != NONCE_LEN {
                return Err(CryptoError::InvalidFormat);
            }
            let key = derive_key(lock_key, &sealed.salt)?;
            let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key[..]));
            let plaintext = cipher
                .decrypt(
                    Nonce::from_slice(&sealed.nonce),
                    sealed.ciphertext.as_slice(),
                )
                .map_err(|_| CryptoError::DecryptionFailed)?;
            Ok(Zeroizing::new(plaintext))
        }
    }
}
