//! Signing scripts issued by account bins

use bitcoin::script::ScriptBuf;
use serde::{Deserialize, Serialize};

use crate::account::AccountError;
use crate::flags::StatusFlag;
use crate::key::Key;
use crate::keychain::Keychain;
use crate::repository::{AccountId, ScriptId};
use crate::script::{MultisigScript, ScriptError, ScriptMode};

/// Lifecycle of a signing script. Callers drive every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScriptStatus {
    Unused,
    Change,
    Pending,
    Received,
    Canceled,
}

impl StatusFlag for ScriptStatus {
    const ALL: &'static [Self] = &[
        ScriptStatus::Unused,
        ScriptStatus::Change,
        ScriptStatus::Pending,
        ScriptStatus::Received,
        ScriptStatus::Canceled,
    ];

    fn bit(self) -> u32 {
        match self {
            ScriptStatus::Unused => 1,
            ScriptStatus::Change => 2,
            ScriptStatus::Pending => 4,
            ScriptStatus::Received => 8,
            ScriptStatus::Canceled => 16,
        }
    }

    fn label(self) -> &'static str {
        match self {
            ScriptStatus::Unused => "UNUSED",
            ScriptStatus::Change => "CHANGE",
            ScriptStatus::Pending => "PENDING",
            ScriptStatus::Received => "RECEIVED",
            ScriptStatus::Canceled => "CANCELED",
        }
    }
}

/// One multisig script instance of an account bin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningScript {
    id: Option<ScriptId>,
    account: AccountId,
    bin_index: u32,
    index: u32,
    label: String,
    status: ScriptStatus,
    /// Edit-mode template, empty pushes where signatures go
    txinscript: ScriptBuf,
    txoutscript: ScriptBuf,
    keys: Vec<Key>,
}

impl SigningScript {
    /// Build the script at `index` from the bin's child keychains.
    ///
    /// Keys are sorted by serialized public key first, so any ordering of
    /// `keychains` yields the same scripts.
    pub fn derive(
        account: AccountId,
        bin_index: u32,
        index: u32,
        minsigs: u32,
        keychains: &[Keychain],
        label: &str,
    ) -> Result<Self, AccountError> {
        let mut keys = keychains
            .iter()
            .map(|keychain| Key::new(keychain, index))
            .collect::<Result<Vec<_>, _>>()?;
        keys.sort_by_key(|key| key.pubkey().serialize());

        let pubkeys = keys.iter().map(|key| *key.pubkey()).collect();
        let multisig = MultisigScript::new(minsigs as usize, pubkeys)?;

        Ok(Self {
            id: None,
            account,
            bin_index,
            index,
            label: label.to_string(),
            status: ScriptStatus::Unused,
            txinscript: multisig.txinscript(ScriptMode::Edit)?,
            txoutscript: multisig.txoutscript(),
            keys,
        })
    }

    /// Wrap scripts built elsewhere. No keys are recorded.
    pub fn from_parts(
        account: AccountId,
        bin_index: u32,
        index: u32,
        txinscript: ScriptBuf,
        txoutscript: ScriptBuf,
        label: &str,
        status: ScriptStatus,
    ) -> Self {
        Self {
            id: None,
            account,
            bin_index,
            index,
            label: label.to_string(),
            status,
            txinscript,
            txoutscript,
            keys: Vec::new(),
        }
    }

    pub fn id(&self) -> Option<ScriptId> {
        self.id
    }

    pub fn assign_id(&mut self, id: ScriptId) {
        self.id = Some(id);
    }

    pub fn account(&self) -> AccountId {
        self.account
    }

    pub fn bin_index(&self) -> u32 {
        self.bin_index
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn set_label(&mut self, label: &str) {
        self.label = label.to_string();
    }

    pub fn status(&self) -> ScriptStatus {
        self.status
    }

    pub fn set_status(&mut self, status: ScriptStatus) {
        if status != self.status {
            log::debug!(
                "Script {}/{} {} -> {}",
                self.bin_index,
                self.index,
                self.status.label(),
                status.label()
            );
        }
        self.status = status;
    }

    pub fn txinscript(&self) -> &ScriptBuf {
        &self.txinscript
    }

    pub fn txoutscript(&self) -> &ScriptBuf {
        &self.txoutscript
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    /// Parsed form of the input template, for collecting signatures.
    pub fn multisig(&self) -> Result<MultisigScript, ScriptError> {
        MultisigScript::parse_txinscript(&self.txinscript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::KeychainId;

    fn bin_keychains(n: u8, bin: u32) -> Vec<Keychain> {
        (1..=n)
            .map(|i| {
                let mut root =
                    Keychain::derive_root(&format!("k{}", i), &[i; 32], b"", b"").unwrap();
                root.assign_id(KeychainId(i as u64));
                root.derive_child(bin, false).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_keys_are_sorted() {
        let keychains = bin_keychains(3, 2);
        let script = SigningScript::derive(AccountId(1), 2, 0, 2, &keychains, "").unwrap();
        let serialized: Vec<_> = script.keys().iter().map(|k| k.pubkey().serialize()).collect();
        let mut sorted = serialized.clone();
        sorted.sort();
        assert_eq!(serialized, sorted);
        assert_eq!(script.status(), ScriptStatus::Unused);
        assert!(script.txoutscript().is_p2sh());
    }

    #[test]
    fn test_enumeration_order_does_not_matter() {
        let keychains = bin_keychains(3, 2);
        let mut reversed = keychains.clone();
        reversed.reverse();

        let a = SigningScript::derive(AccountId(1), 2, 4, 2, &keychains, "").unwrap();
        let b = SigningScript::derive(AccountId(1), 2, 4, 2, &reversed, "").unwrap();
        assert_eq!(a.txoutscript(), b.txoutscript());
        assert_eq!(a.txinscript(), b.txinscript());
    }

    #[test]
    fn test_template_matches_keys() {
        let keychains = bin_keychains(3, 1);
        let script = SigningScript::derive(AccountId(1), 1, 0, 2, &keychains, "first").unwrap();
        let multisig = script.multisig().unwrap();
        assert_eq!(multisig.minsigs(), 2);
        assert_eq!(multisig.sigs_needed(), 2);
        let pubkeys: Vec<_> = script.keys().iter().map(|k| *k.pubkey()).collect();
        assert_eq!(multisig.pubkeys(), pubkeys.as_slice());
        assert_eq!(multisig.txoutscript(), *script.txoutscript());
    }

    #[test]
    fn test_status_is_caller_driven() {
        let keychains = bin_keychains(1, 1);
        let mut script = SigningScript::derive(AccountId(1), 1, 0, 1, &keychains, "").unwrap();
        script.set_status(ScriptStatus::Change);
        assert_eq!(script.status(), ScriptStatus::Change);
        assert!(script
            .status()
            .matches_any(&[ScriptStatus::Change, ScriptStatus::Pending]));
    }

    #[test]
    fn test_describe_status_masks() {
        let mask = ScriptStatus::mask(&[ScriptStatus::Unused, ScriptStatus::Change]);
        assert_eq!(ScriptStatus::describe(mask), "UNUSED | CHANGE");
        assert_eq!(ScriptStatus::describe(0), "UNKNOWN");
        assert_eq!(ScriptStatus::all_mask(), 31);
        assert_eq!(ScriptStatus::from_bit(8), Some(ScriptStatus::Received));
    }
}
