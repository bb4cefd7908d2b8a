//! HD keychains
//!
//! A [`Keychain`] is one node of a BIP-32 key tree. Roots are created from
//! entropy (or a BIP-39 mnemonic) and carry a unique name; children are derived
//! on demand and point back at their parent and root by repository id.
//!
//! # Locking
//!
//! The private key and the chain code lock independently. Locking drops the
//! in-memory plaintext; the [`SealedSecret`] is kept so the secret can be
//! unlocked again with the lock key it was sealed under.
//!
//! ```text
//!   derive child        needs: chain code unlocked
//!   derive private      needs: chain code + private key unlocked
//!   extended public     needs: chain code unlocked
//!   extended private    needs: chain code + private key unlocked
//! ```

use bitcoin::bip32::{self, ChainCode, ChildNumber, Fingerprint, Xpriv, Xpub};
use bitcoin::hashes::{hash160, Hash, HashEngine};
use bitcoin::{Network, NetworkKind};
use secp256k1::{PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::crypto::{self, CryptoError, SealedSecret};
use crate::naming::{validate_name, NameError};
use crate::repository::KeychainId;

/// BIP-32 accepts seeds between 128 and 512 bits
const MIN_ENTROPY_LEN: usize = 16;
const MAX_ENTROPY_LEN: usize = 64;

#[derive(Error, Debug)]
pub enum KeychainError {
    #[error("Invalid keychain name: {0}")]
    InvalidName(#[from] NameError),

    #[error("Entropy must be 16 to 64 bytes, got {0}")]
    InvalidEntropy(usize),

    #[error("Keychain is public-only")]
    PublicKeychain,

    #[error("Private key is locked")]
    PrivateKeyLocked,

    #[error("Chain code is locked")]
    ChainCodeLocked,

    #[error("No sealed {0} to unlock")]
    NothingSealed(&'static str),

    #[error("Wrong lock key")]
    WrongLockKey,

    #[error("Secret sealing failed: {0}")]
    Crypto(CryptoError),

    #[error("Derivation failed: {0}")]
    Derivation(#[from] bip32::Error),

    #[error("Invalid key material: {0}")]
    Secp256k1(#[from] secp256k1::Error),

    #[error("Keychain has not been stored and has no identity")]
    Detached,

    #[error("Root keychain {0} not found")]
    MissingRoot(KeychainId),

    #[error("Root keychain {0} does not derive this key")]
    RootMismatch(KeychainId),
}

impl From<CryptoError> for KeychainError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::DecryptionFailed => KeychainError::WrongLockKey,
            other => KeychainError::Crypto(other),
        }
    }
}

/// In-memory state of one secret.
#[derive(Clone, Default)]
pub enum LockState {
    #[default]
    Locked,
    Unlocked(Zeroizing<[u8; 32]>),
}

impl LockState {
    fn unlocked(bytes: [u8; 32]) -> Self {
        LockState::Unlocked(Zeroizing::new(bytes))
    }

    pub fn is_locked(&self) -> bool {
        matches!(self, LockState::Locked)
    }

    fn bytes(&self) -> Option<&[u8; 32]> {
        match self {
            LockState::Locked => None,
            LockState::Unlocked(bytes) => Some(&**bytes),
        }
    }
}

impl fmt::Debug for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockState::Locked => f.write_str("Locked"),
            LockState::Unlocked(_) => f.write_str("Unlocked(..)"),
        }
    }
}

fn unseal_32(sealed: &SealedSecret, lock_key: &[u8]) -> Result<[u8; 32], KeychainError> {
    let plain = crypto::unseal(sealed, lock_key)?;
    let bytes: [u8; 32] = plain
        .as_slice()
        .try_into()
        .map_err(|_| KeychainError::Crypto(CryptoError::InvalidFormat))?;
    Ok(bytes)
}

/// ripemd160(sha256(pubkey || chain_code))
fn content_hash(pubkey: &PublicKey, chain_code: &[u8; 32]) -> [u8; 20] {
    let mut engine = hash160::Hash::engine();
    engine.input(&pubkey.serialize());
    engine.input(chain_code);
    hash160::Hash::from_engine(engine).to_byte_array()
}

/// One node of an HD key tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Keychain {
    id: Option<KeychainId>,
    /// Set on roots only
    name: Option<String>,
    network: Network,
    depth: u8,
    parent_fp: [u8; 4],
    child_num: u32,
    pubkey: PublicKey,
    hash: [u8; 20],

    #[serde(skip)]
    chain_code: LockState,
    chain_code_sealed: Option<SealedSecret>,

    #[serde(skip)]
    private_key: LockState,
    private_key_sealed: Option<SealedSecret>,

    parent: Option<KeychainId>,
    root: Option<KeychainId>,
    root_is_private: bool,
    derivation_path: Vec<u32>,
}

impl Keychain {
    /// Create a root keychain from seed entropy.
    ///
    /// Both secrets are sealed under `lock_key` immediately and left unlocked.
    pub fn derive_root(
        name: &str,
        entropy: &[u8],
        lock_key: &[u8],
        salt: &[u8],
    ) -> Result<Self, KeychainError> {
        validate_name(name)?;
        if !(MIN_ENTROPY_LEN..=MAX_ENTROPY_LEN).contains(&entropy.len()) {
            return Err(KeychainError::InvalidEntropy(entropy.len()));
        }

        let network = Network::Bitcoin;
        let master = Xpriv::new_master(network, entropy)?;
        let secp = Secp256k1::new();
        let pubkey = master.private_key.public_key(&secp);
        let chain_code = master.chain_code.to_bytes();
        let private_key = master.private_key.secret_bytes();

        let mut keychain = Self {
            id: None,
            name: Some(name.to_string()),
            network,
            depth: master.depth,
            parent_fp: master.parent_fingerprint.to_bytes(),
            child_num: u32::from(master.child_number),
            pubkey,
            hash: content_hash(&pubkey, &chain_code),
            chain_code: LockState::unlocked(chain_code),
            chain_code_sealed: None,
            private_key: LockState::unlocked(private_key),
            private_key_sealed: None,
            parent: None,
            root: None,
            root_is_private: true,
            derivation_path: Vec::new(),
        };
        keychain.set_private_key_lock_key(lock_key, salt)?;
        keychain.set_chain_code_lock_key(lock_key, salt)?;

        log::debug!("Derived root keychain '{}'", name);
        Ok(keychain)
    }

    /// Create a root keychain from a BIP-39 mnemonic and passphrase.
    pub fn from_mnemonic(
        name: &str,
        mnemonic: &bip39::Mnemonic,
        passphrase: &str,
        lock_key: &[u8],
        salt: &[u8],
    ) -> Result<Self, KeychainError> {
        let seed = Zeroizing::new(mnemonic.to_seed(passphrase));
        Self::derive_root(name, seed.as_slice(), lock_key, salt)
    }

    /// Import a public-only root from an extended public key.
    pub fn watch_only(name: &str, xpub: &str) -> Result<Self, KeychainError> {
        validate_name(name)?;
        let xpub = Xpub::from_str(xpub)?;
        let chain_code = xpub.chain_code.to_bytes();
        let network = match xpub.network {
            NetworkKind::Main => Network::Bitcoin,
            NetworkKind::Test => Network::Testnet,
        };

        let mut keychain = Self {
            id: None,
            name: Some(name.to_string()),
            network,
            depth: xpub.depth,
            parent_fp: xpub.parent_fingerprint.to_bytes(),
            child_num: u32::from(xpub.child_number),
            pubkey: xpub.public_key,
            hash: content_hash(&xpub.public_key, &chain_code),
            chain_code: LockState::unlocked(chain_code),
            chain_code_sealed: None,
            private_key: LockState::Locked,
            private_key_sealed: None,
            parent: None,
            root: None,
            root_is_private: false,
            derivation_path: Vec::new(),
        };
        keychain.set_chain_code_lock_key(b"", b"")?;
        Ok(keychain)
    }

    /// Derive the child at `index`.
    ///
    /// Indices at or above 2^31 are hardened and need a private derivation.
    pub fn derive_child(&self, index: u32, want_private: bool) -> Result<Keychain, KeychainError> {
        if want_private && !self.is_private() {
            return Err(KeychainError::PublicKeychain);
        }
        let chain_code = self
            .chain_code
            .bytes()
            .ok_or(KeychainError::ChainCodeLocked)?;
        let secp = Secp256k1::new();
        let child_number = ChildNumber::from(index);

        let (pubkey, private_key, derived_chain_code, parent_fp, depth) = if want_private {
            let xpriv = self.xpriv(chain_code)?;
            let child = xpriv.derive_priv(&secp, &[child_number])?;
            (
                child.private_key.public_key(&secp),
                LockState::unlocked(child.private_key.secret_bytes()),
                child.chain_code.to_bytes(),
                child.parent_fingerprint.to_bytes(),
                child.depth,
            )
        } else {
            let child = self.xpub(chain_code).derive_pub(&secp, &[child_number])?;
            (
                child.public_key,
                LockState::Locked,
                child.chain_code.to_bytes(),
                child.parent_fingerprint.to_bytes(),
                child.depth,
            )
        };

        let mut derivation_path = self.derivation_path.clone();
        derivation_path.push(index);

        Ok(Keychain {
            id: None,
            name: None,
            network: self.network,
            depth,
            parent_fp,
            child_num: index,
            pubkey,
            hash: content_hash(&pubkey, &derived_chain_code),
            chain_code: LockState::unlocked(derived_chain_code),
            chain_code_sealed: None,
            private_key,
            private_key_sealed: None,
            parent: self.id,
            root: self.root_id(),
            root_is_private: self.root_is_private,
            derivation_path,
        })
    }

    fn xpriv(&self, chain_code: &[u8; 32]) -> Result<Xpriv, KeychainError> {
        let secret = self
            .private_key
            .bytes()
            .ok_or(KeychainError::PrivateKeyLocked)?;
        Ok(Xpriv {
            network: NetworkKind::from(self.network),
            depth: self.depth,
            parent_fingerprint: Fingerprint::from(self.parent_fp),
            child_number: ChildNumber::from(self.child_num),
            private_key: SecretKey::from_slice(secret)?,
            chain_code: ChainCode::from(*chain_code),
        })
    }

    fn xpub(&self, chain_code: &[u8; 32]) -> Xpub {
        Xpub {
            network: NetworkKind::from(self.network),
            depth: self.depth,
            parent_fingerprint: Fingerprint::from(self.parent_fp),
            child_number: ChildNumber::from(self.child_num),
            public_key: self.pubkey,
            chain_code: ChainCode::from(*chain_code),
        }
    }

    // ---- Identity ----

    pub fn id(&self) -> Option<KeychainId> {
        self.id
    }

    /// Record the identity assigned by the repository.
    pub fn assign_id(&mut self, id: KeychainId) {
        self.id = Some(id);
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: &str) -> Result<(), KeychainError> {
        validate_name(name)?;
        self.name = Some(name.to_string());
        Ok(())
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none() && self.derivation_path.is_empty()
    }

    pub fn parent_id(&self) -> Option<KeychainId> {
        self.parent
    }

    /// Id of the tree root: the keychain itself when it is a root.
    pub fn root_id(&self) -> Option<KeychainId> {
        if self.is_root() {
            self.id
        } else {
            self.root
        }
    }

    /// Whether the tree root holds private key material.
    pub fn root_is_private(&self) -> bool {
        self.root_is_private
    }

    pub fn derivation_path(&self) -> &[u32] {
        &self.derivation_path
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Select the version bytes used for extended-key encoding.
    pub fn set_network(&mut self, network: Network) {
        self.network = network;
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn parent_fingerprint(&self) -> Fingerprint {
        Fingerprint::from(self.parent_fp)
    }

    pub fn child_number(&self) -> u32 {
        self.child_num
    }

    pub fn pubkey(&self) -> &PublicKey {
        &self.pubkey
    }

    /// ripemd160(sha256(pubkey || chain_code))
    pub fn hash(&self) -> &[u8; 20] {
        &self.hash
    }

    // ---- Lock state ----

    pub fn is_private(&self) -> bool {
        !self.private_key.is_locked() || self.private_key_sealed.is_some()
    }

    pub fn is_private_key_locked(&self) -> Result<bool, KeychainError> {
        if !self.is_private() {
            return Err(KeychainError::PublicKeychain);
        }
        Ok(self.private_key.is_locked())
    }

    pub fn is_chain_code_locked(&self) -> bool {
        self.chain_code.is_locked()
    }

    /// Re-seal the private key under a new lock key.
    pub fn set_private_key_lock_key(&mut self, lock_key: &[u8], salt: &[u8]) -> Result<(), KeychainError> {
        if !self.is_private() {
            return Err(KeychainError::PublicKeychain);
        }
        let secret = self
            .private_key
            .bytes()
            .ok_or(KeychainError::PrivateKeyLocked)?;
        self.private_key_sealed = Some(crypto::seal(secret, lock_key, salt)?);
        Ok(())
    }

    /// Re-seal the chain code under a new lock key.
    pub fn set_chain_code_lock_key(&mut self, lock_key: &[u8], salt: &[u8]) -> Result<(), KeychainError> {
        let secret = self
            .chain_code
            .bytes()
            .ok_or(KeychainError::ChainCodeLocked)?;
        self.chain_code_sealed = Some(crypto::seal(secret, lock_key, salt)?);
        Ok(())
    }

    pub fn lock_private_key(&mut self) {
        self.private_key = LockState::Locked;
    }

    pub fn lock_chain_code(&mut self) {
        self.chain_code = LockState::Locked;
    }

    pub fn lock_all(&mut self) {
        self.lock_private_key();
        self.lock_chain_code();
    }

    /// No-op when already unlocked.
    pub fn unlock_private_key(&mut self, lock_key: &[u8]) -> Result<(), KeychainError> {
        if !self.is_private() {
            return Err(KeychainError::PublicKeychain);
        }
        if !self.private_key.is_locked() {
            return Ok(());
        }
        let sealed = self
            .private_key_sealed
            .as_ref()
            .ok_or(KeychainError::NothingSealed("private key"))?;
        self.private_key = LockState::unlocked(unseal_32(sealed, lock_key)?);
        Ok(())
    }

    /// No-op when already unlocked.
    pub fn unlock_chain_code(&mut self, lock_key: &[u8]) -> Result<(), KeychainError> {
        if !self.chain_code.is_locked() {
            return Ok(());
        }
        let sealed = self
            .chain_code_sealed
            .as_ref()
            .ok_or(KeychainError::NothingSealed("chain code"))?;
        self.chain_code = LockState::unlocked(unseal_32(sealed, lock_key)?);
        Ok(())
    }

    pub fn private_key(&self) -> Result<SecretKey, KeychainError> {
        if !self.is_private() {
            return Err(KeychainError::PublicKeychain);
        }
        let secret = self
            .private_key
            .bytes()
            .ok_or(KeychainError::PrivateKeyLocked)?;
        Ok(SecretKey::from_slice(secret)?)
    }

    pub fn chain_code(&self) -> Result<ChainCode, KeychainError> {
        let bytes = self
            .chain_code
            .bytes()
            .ok_or(KeychainError::ChainCodeLocked)?;
        Ok(ChainCode::from(*bytes))
    }

    // ---- Signing keys ----

    fn leaf_path(index: u32, path: &[u32]) -> Vec<ChildNumber> {
        path.iter()
            .chain(std::iter::once(&index))
            .map(|&i| ChildNumber::from(i))
            .collect()
    }

    /// Walk `path` from this node, then derive leaf `index`.
    pub fn signing_private_key(&self, index: u32, path: &[u32]) -> Result<SecretKey, KeychainError> {
        if !self.is_private() {
            return Err(KeychainError::PublicKeychain);
        }
        let chain_code = self
            .chain_code
            .bytes()
            .ok_or(KeychainError::ChainCodeLocked)?;
        let secp = Secp256k1::new();
        let leaf = self
            .xpriv(chain_code)?
            .derive_priv(&secp, &Self::leaf_path(index, path))?;
        Ok(leaf.private_key)
    }

    /// Walk `path` from this node, then derive leaf `index`.
    pub fn signing_public_key(&self, index: u32, path: &[u32]) -> Result<PublicKey, KeychainError> {
        let chain_code = self
            .chain_code
            .bytes()
            .ok_or(KeychainError::ChainCodeLocked)?;
        let secp = Secp256k1::new();
        let leaf = self
            .xpub(chain_code)
            .derive_pub(&secp, &Self::leaf_path(index, path))?;
        Ok(leaf.public_key)
    }

    /// BIP-32 extended key in base58check form.
    pub fn extended_key(&self, want_private: bool) -> Result<Zeroizing<String>, KeychainError> {
        if want_private && !self.is_private() {
            return Err(KeychainError::PublicKeychain);
        }
        let chain_code = self
            .chain_code
            .bytes()
            .ok_or(KeychainError::ChainCodeLocked)?;
        let encoded = if want_private {
            self.xpriv(chain_code)?.to_string()
        } else {
            self.xpub(chain_code).to_string()
        };
        Ok(Zeroizing::new(encoded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// BIP-32 test vector 1
    const SEED: &str = "000102030405060708090a0b0c0d0e0f";
    const XPRV_M: &str = "xprv9s21ZrQH143K3QTDL4LXw2F7HEK3wJUD2nW2nRk4stbPy6cq3jPPqjiChkVvvNKmPGJxWUtg6LnF5kejMRNNU3TGtRBeJgk33yuGBxrMPHi";
    const XPUB_M: &str = "xpub661MyMwAqRbcFtXgS5sYJABqqG9YLmC4Q1Rdap9gSE8NqtwybGhePY2gZ29ESFjqJoCu1Rupje8YtGqsefD265TMg7usUDFdp6W1EGMcet8";
    const XPUB_M_0H: &str = "xpub68Gmy5EdvgibQVfPdqkBBCHxA5htiqg55crXYuXoQRKfDBFA1WEjWgP6LHhwBZeNK1VTsfTFUHCdrfp1bgwQ9xv5ski8PX9rL2dZXvgGDnw";

    fn root() -> Keychain {
        Keychain::derive_root("vector1", &hex::decode(SEED).unwrap(), b"", b"").unwrap()
    }

    #[test]
    fn test_root_matches_bip32_vector() {
        let root = root();
        assert_eq!(root.extended_key(true).unwrap().as_str(), XPRV_M);
        assert_eq!(root.extended_key(false).unwrap().as_str(), XPUB_M);
        assert_eq!(root.depth(), 0);
        assert!(root.is_root());
        assert!(root.is_private());
    }

    #[test]
    fn test_hardened_child_matches_vector() {
        let child = root().derive_child(0x8000_0000, true).unwrap();
        assert_eq!(child.extended_key(false).unwrap().as_str(), XPUB_M_0H);
        assert_eq!(child.depth(), 1);
        assert_eq!(child.derivation_path(), &[0x8000_0000]);
    }

    #[test]
    fn test_child_derivation_is_deterministic() {
        let root = root();
        let a = root.derive_child(7, false).unwrap();
        let b = root.derive_child(7, false).unwrap();
        assert_eq!(a.pubkey(), b.pubkey());
        assert_eq!(a.chain_code().unwrap(), b.chain_code().unwrap());
        assert_eq!(a.hash(), b.hash());

        // Public and private derivation agree on non-hardened indices
        let c = root.derive_child(7, true).unwrap();
        assert_eq!(a.pubkey(), c.pubkey());
        assert_eq!(a.hash(), c.hash());
    }

    #[test]
    fn test_invalid_names_and_entropy() {
        assert!(matches!(
            Keychain::derive_root("", &[1u8; 32], b"", b""),
            Err(KeychainError::InvalidName(NameError::Empty))
        ));
        assert!(matches!(
            Keychain::derive_root("@internal", &[1u8; 32], b"", b""),
            Err(KeychainError::InvalidName(NameError::Reserved(_)))
        ));
        assert!(matches!(
            Keychain::derive_root("short", &[1u8; 8], b"", b""),
            Err(KeychainError::InvalidEntropy(8))
        ));
    }

    #[test]
    fn test_public_child_refuses_private_derivation() {
        let public = root().derive_child(1, false).unwrap();
        assert!(!public.is_private());
        assert!(matches!(
            public.derive_child(0, true),
            Err(KeychainError::PublicKeychain)
        ));
        assert!(matches!(
            public.signing_private_key(0, &[]),
            Err(KeychainError::PublicKeychain)
        ));
        assert!(matches!(
            public.extended_key(true),
            Err(KeychainError::PublicKeychain)
        ));
        // Public derivation still works
        assert!(public.derive_child(0, false).is_ok());
    }

    #[test]
    fn test_locked_chain_code_blocks_derivation() {
        let mut root = root();
        root.lock_chain_code();
        assert!(root.is_chain_code_locked());
        assert!(matches!(
            root.derive_child(0, false),
            Err(KeychainError::ChainCodeLocked)
        ));
        assert!(matches!(
            root.signing_public_key(0, &[]),
            Err(KeychainError::ChainCodeLocked)
        ));
        assert!(matches!(
            root.extended_key(false),
            Err(KeychainError::ChainCodeLocked)
        ));

        root.unlock_chain_code(b"").unwrap();
        assert!(root.derive_child(0, false).is_ok());
    }

    #[test]
    fn test_locked_private_key_blocks_private_derivation() {
        let mut root = root();
        root.lock_private_key();
        assert!(root.is_private());
        assert!(root.is_private_key_locked().unwrap());
        assert!(matches!(
            root.derive_child(0, true),
            Err(KeychainError::PrivateKeyLocked)
        ));
        assert!(matches!(
            root.signing_private_key(0, &[]),
            Err(KeychainError::PrivateKeyLocked)
        ));
        // Public derivation only needs the chain code
        assert!(root.derive_child(0, false).is_ok());

        root.unlock_private_key(b"").unwrap();
        // Idempotent
        root.unlock_private_key(b"").unwrap();
        assert!(!root.is_private_key_locked().unwrap());
        assert_eq!(
            root.extended_key(true).unwrap().as_str(),
            XPRV_M
        );
    }

    #[test]
    fn test_lock_all_and_encrypted_unlock() {
        let mut kc =
            Keychain::derive_root("vault", &[9u8; 32], b"hunter2", b"0123456789abcdef").unwrap();
        let xprv = kc.extended_key(true).unwrap();

        kc.lock_all();
        assert!(kc.is_chain_code_locked());
        assert!(kc.is_private_key_locked().unwrap());

        assert!(matches!(
            kc.unlock_private_key(b"wrong"),
            Err(KeychainError::WrongLockKey)
        ));
        assert!(kc.is_private_key_locked().unwrap());

        kc.unlock_private_key(b"hunter2").unwrap();
        kc.unlock_chain_code(b"hunter2").unwrap();
        assert_eq!(kc.extended_key(true).unwrap(), xprv);
    }

    #[test]
    fn test_signing_keys_follow_path() {
        let root = root();
        let child = root.derive_child(2, true).unwrap();

        let via_child = child.signing_public_key(5, &[]).unwrap();
        let via_root = root.signing_public_key(5, &[2]).unwrap();
        assert_eq!(via_child, via_root);

        let secp = Secp256k1::new();
        let secret = root.signing_private_key(5, &[2]).unwrap();
        assert_eq!(secret.public_key(&secp), via_root);
    }

    #[test]
    fn test_content_hash_definition() {
        let root = root();
        let mut data = root.pubkey().serialize().to_vec();
        data.extend_from_slice(&root.chain_code().unwrap().to_bytes());
        let expected = hash160::Hash::hash(&data).to_byte_array();
        assert_eq!(root.hash(), &expected);
    }

    #[test]
    fn test_watch_only_import() {
        let kc = Keychain::watch_only("watcher", XPUB_M).unwrap();
        assert!(!kc.is_private());
        assert!(matches!(
            kc.is_private_key_locked(),
            Err(KeychainError::PublicKeychain)
        ));
        assert_eq!(kc.pubkey(), root().pubkey());
        assert_eq!(kc.hash(), root().hash());
        assert_eq!(
            kc.derive_child(3, false).unwrap().pubkey(),
            root().derive_child(3, false).unwrap().pubkey()
        );
    }

    #[test]
    fn test_mnemonic_root() {
        let mnemonic = bip39::Mnemonic::parse(
            "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about",
        )
        .unwrap();
        let a = Keychain::from_mnemonic("m1", &mnemonic, "", b"", b"").unwrap();
        let b = Keychain::from_mnemonic("m2", &mnemonic, "TREZOR", b"", b"").unwrap();
        assert_ne!(a.pubkey(), b.pubkey());
    }

    #[test]
    fn test_serde_never_writes_unlocked_secrets() {
        let mut kc = Keychain::derive_root("persist", &[3u8; 32], b"pw", b"saltsaltsalt").unwrap();
        let json = serde_json::to_string(&kc).unwrap();
        let restored: Keychain = serde_json::from_str(&json).unwrap();

        assert!(restored.is_private());
        assert!(restored.is_chain_code_locked());
        assert!(restored.is_private_key_locked().unwrap());
        assert_eq!(restored.pubkey(), kc.pubkey());

        kc.lock_all();
        let mut restored = restored;
        restored.unlock_chain_code(b"pw").unwrap();
        kc.unlock_chain_code(b"pw").unwrap();
        assert_eq!(restored.chain_code().unwrap(), kc.chain_code().unwrap());
    }
}
