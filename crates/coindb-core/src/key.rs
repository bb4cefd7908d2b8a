//! Leaf signing keys

use secp256k1::{PublicKey, SecretKey};
use serde::{Deserialize, Serialize};

use crate::keychain::{Keychain, KeychainError};
use crate::repository::{KeychainId, KeychainResolver};

/// A signing key at one leaf index under one tree root.
///
/// Holds the root id and the full path instead of a handle into the tree, so
/// the private key can be re-derived later from the root alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    root: KeychainId,
    derivation_path: Vec<u32>,
    index: u32,
    pubkey: PublicKey,
    is_private: bool,
}

impl Key {
    pub fn new(keychain: &Keychain, index: u32) -> Result<Self, KeychainError> {
        let root = keychain.root_id().ok_or(KeychainError::Detached)?;
        let pubkey = keychain.signing_public_key(index, &[])?;
        Ok(Self {
            root,
            derivation_path: keychain.derivation_path().to_vec(),
            index,
            pubkey,
            is_private: keychain.root_is_private(),
        })
    }

    pub fn root(&self) -> KeychainId {
        self.root
    }

    pub fn derivation_path(&self) -> &[u32] {
        &self.derivation_path
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn pubkey(&self) -> &PublicKey {
        &self.pubkey
    }

    pub fn is_private(&self) -> bool {
        self.is_private
    }

    /// Re-derive the private key through the root.
    ///
    /// Both secrets of the root must be unlocked.
    pub fn private_key<R>(&self, resolver: &R) -> Result<SecretKey, KeychainError>
    where
        R: KeychainResolver + ?Sized,
    {
        if !self.is_private {
            return Err(KeychainError::PublicKeychain);
        }
        let root = resolver
            .keychain(self.root)
            .ok_or(KeychainError::MissingRoot(self.root))?;
        if root.is_private_key_locked()? {
            return Err(KeychainError::PrivateKeyLocked);
        }
        if root.is_chain_code_locked() {
            return Err(KeychainError::ChainCodeLocked);
        }

        let secret = root.signing_private_key(self.index, &self.derivation_path)?;
        let secp = secp256k1::Secp256k1::signing_only();
        if secret.public_key(&secp) != self.pubkey {
            return Err(KeychainError::RootMismatch(self.root));
        }
        Ok(secret)
    }
}
