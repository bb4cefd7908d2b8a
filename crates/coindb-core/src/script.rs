//! Pay-to-script-hash multisig templates
//!
//! ```text
//! redeem     OP_m <pubkey>... OP_n OP_CHECKMULTISIG
//! txout      OP_HASH160 <hash160(redeem)> OP_EQUAL
//! txin edit  OP_0 <slot per pubkey> <redeem>     empty push = missing signature
//! txin sign  OP_0 <signatures in key order> <redeem>
//! ```
//!
//! Edit mode keeps one slot per key so signatures can be collected one at a
//! time. Sign mode is the form that goes on the wire.

use bitcoin::opcodes::all::{OP_CHECKMULTISIG, OP_PUSHBYTES_0, OP_PUSHNUM_1, OP_PUSHNUM_16};
use bitcoin::script::{Builder, Instruction, PushBytesBuf, Script, ScriptBuf};
use secp256k1::PublicKey;
use thiserror::Error;

/// Standard limit for bare multisig in P2SH
pub const MAX_MULTISIG_KEYS: usize = 15;

#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("Invalid threshold: {minsigs} of {keys}")]
    InvalidThreshold { minsigs: usize, keys: usize },

    #[error("At most {MAX_MULTISIG_KEYS} keys, got {0}")]
    TooManyKeys(usize),

    #[error("Push exceeds the script push limit")]
    PushTooLarge,

    #[error("Not a multisig script")]
    NotMultisig,

    #[error("Public key is not part of this script")]
    UnknownPubkey,

    #[error("Already holds the {0} signatures it needs")]
    ThresholdMet(usize),

    #[error("Script parse error: {0}")]
    Parse(#[from] bitcoin::script::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptMode {
    Edit,
    Sign,
}

fn small_int(op: u8) -> Option<usize> {
    if (OP_PUSHNUM_1.to_u8()..=OP_PUSHNUM_16.to_u8()).contains(&op) {
        Some((op - OP_PUSHNUM_1.to_u8() + 1) as usize)
    } else {
        None
    }
}

fn push_buf(data: &[u8]) -> Result<PushBytesBuf, ScriptError> {
    PushBytesBuf::try_from(data.to_vec()).map_err(|_| ScriptError::PushTooLarge)
}

/// An m-of-n multisig script with its signature slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultisigScript {
    minsigs: usize,
    pubkeys: Vec<PublicKey>,
    sigs: Vec<Option<Vec<u8>>>,
    /// Signatures parsed from a sign-mode script, not matched to a key
    unattributed: Vec<Vec<u8>>,
}

impl MultisigScript {
    /// Keys are used in the order given.
    pub fn new(minsigs: usize, pubkeys: Vec<PublicKey>) -> Result<Self, ScriptError> {
        if pubkeys.len() > MAX_MULTISIG_KEYS {
            return Err(ScriptError::TooManyKeys(pubkeys.len()));
        }
        if minsigs == 0 || minsigs > pubkeys.len() {
            return Err(ScriptError::InvalidThreshold {
                minsigs,
                keys: pubkeys.len(),
            });
        }
        let sigs = vec![None; pubkeys.len()];
        Ok(Self {
            minsigs,
            pubkeys,
            sigs,
            unattributed: Vec::new(),
        })
    }

    pub fn minsigs(&self) -> usize {
        self.minsigs
    }

    pub fn pubkeys(&self) -> &[PublicKey] {
        &self.pubkeys
    }

    pub fn redeem_script(&self) -> ScriptBuf {
        let mut builder = Builder::new().push_int(self.minsigs as i64);
        for pubkey in &self.pubkeys {
            builder = builder.push_key(&bitcoin::PublicKey::new(*pubkey));
        }
        builder
            .push_int(self.pubkeys.len() as i64)
            .push_opcode(OP_CHECKMULTISIG)
            .into_script()
    }

    pub fn txoutscript(&self) -> ScriptBuf {
        ScriptBuf::new_p2sh(&self.redeem_script().script_hash())
    }

    pub fn txinscript(&self, mode: ScriptMode) -> Result<ScriptBuf, ScriptError> {
        let mut builder = Builder::new().push_opcode(OP_PUSHBYTES_0);
        match mode {
            ScriptMode::Edit => {
                for slot in &self.sigs {
                    let data = slot.as_deref().unwrap_or_default();
                    builder = builder.push_slice(push_buf(data)?);
                }
            }
            ScriptMode::Sign => {
                // CHECKMULTISIG consumes exactly m signatures after the dummy
                let sigs = self.sigs.iter().flatten().chain(&self.unattributed);
                for sig in sigs.take(self.minsigs) {
                    builder = builder.push_slice(push_buf(sig)?);
                }
            }
        }
        let redeem = push_buf(self.redeem_script().as_bytes())?;
        Ok(builder.push_slice(redeem).into_script())
    }

    /// Parse `OP_m <pubkey>... OP_n OP_CHECKMULTISIG`.
    pub fn parse_redeem_script(script: &Script) -> Result<Self, ScriptError> {
        let instructions = script.instructions().collect::<Result<Vec<_>, _>>()?;
        let (first, rest) = instructions.split_first().ok_or(ScriptError::NotMultisig)?;
        let (last, rest) = rest.split_last().ok_or(ScriptError::NotMultisig)?;
        let (count, keys) = rest.split_last().ok_or(ScriptError::NotMultisig)?;

        let minsigs = match first {
            Instruction::Op(op) => small_int(op.to_u8()),
            _ => None,
        }
        .ok_or(ScriptError::NotMultisig)?;
        let n = match count {
            Instruction::Op(op) => small_int(op.to_u8()),
            _ => None,
        }
        .ok_or(ScriptError::NotMultisig)?;
        if !matches!(last, Instruction::Op(op) if *op == OP_CHECKMULTISIG) {
            return Err(ScriptError::NotMultisig);
        }

        let pubkeys = keys
            .iter()
            .map(|ins| match ins {
                Instruction::PushBytes(data) => {
                    PublicKey::from_slice(data.as_bytes()).map_err(|_| ScriptError::NotMultisig)
                }
                _ => Err(ScriptError::NotMultisig),
            })
            .collect::<Result<Vec<_>, _>>()?;
        if pubkeys.len() != n {
            return Err(ScriptError::NotMultisig);
        }
        Self::new(minsigs, pubkeys)
    }

    /// Parse an input script in either mode.
    ///
    /// One push per key is read as edit-mode slots. Fewer pushes are read as
    /// sign-mode signatures, which cannot be matched to keys without
    /// verification and stay unattributed.
    pub fn parse_txinscript(script: &Script) -> Result<Self, ScriptError> {
        let mut pushes = Vec::new();
        for ins in script.instructions() {
            match ins? {
                Instruction::PushBytes(data) => pushes.push(data.as_bytes().to_vec()),
                Instruction::Op(_) => return Err(ScriptError::NotMultisig),
            }
        }
        let (redeem, rest) = pushes.split_last().ok_or(ScriptError::NotMultisig)?;
        let (dummy, slots) = rest.split_first().ok_or(ScriptError::NotMultisig)?;
        if !dummy.is_empty() {
            return Err(ScriptError::NotMultisig);
        }

        let mut multisig = Self::parse_redeem_script(Script::from_bytes(redeem))?;
        if slots.len() == multisig.pubkeys.len() {
            multisig.sigs = slots
                .iter()
                .map(|s| if s.is_empty() { None } else { Some(s.clone()) })
                .collect();
        } else if slots.len() < multisig.pubkeys.len() {
            multisig.unattributed = slots.iter().filter(|s| !s.is_empty()).cloned().collect();
        } else {
            return Err(ScriptError::NotMultisig);
        }
        Ok(multisig)
    }

    /// Fill the slot of `pubkey`.
    ///
    /// Once the threshold is met, only slots already holding a signature may
    /// be replaced.
    pub fn add_signature(&mut self, pubkey: &PublicKey, sig: Vec<u8>) -> Result<(), ScriptError> {
        let pos = self
            .pubkeys
            .iter()
            .position(|k| k == pubkey)
            .ok_or(ScriptError::UnknownPubkey)?;
        if self.sigs[pos].is_none() && self.sigs_needed() == 0 {
            return Err(ScriptError::ThresholdMet(self.minsigs));
        }
        self.sigs[pos] = Some(sig);
        Ok(())
    }

    pub fn sig_count(&self) -> usize {
        self.sigs.iter().flatten().count() + self.unattributed.len()
    }

    pub fn sigs_needed(&self) -> usize {
        self.minsigs.saturating_sub(self.sig_count())
    }

    /// Keys whose slot is still empty, or nothing once the threshold is met.
    pub fn missing_sigs(&self) -> Vec<PublicKey> {
        if self.sigs_needed() == 0 {
            return Vec::new();
        }
        self.pubkeys
            .iter()
            .zip(&self.sigs)
            .filter(|(_, sig)| sig.is_none())
            .map(|(k, _)| *k)
            .collect()
    }
}

/// Shape of an input's unlocking script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputTemplate {
    Multisig(MultisigScript),
    PubkeyHash { sig: Vec<u8>, pubkey: PublicKey },
    Other,
}

impl InputTemplate {
    pub fn classify(script: &Script) -> Self {
        if let Ok(multisig) = MultisigScript::parse_txinscript(script) {
            return InputTemplate::Multisig(multisig);
        }

        let pushes: Option<Vec<&[u8]>> = script
            .instructions()
            .map(|ins| match ins {
                Ok(Instruction::PushBytes(data)) => Some(data.as_bytes()),
                _ => None,
            })
            .collect();
        match pushes.as_deref() {
            Some([sig, pubkey]) => match PublicKey::from_slice(pubkey) {
                Ok(pubkey) => InputTemplate::PubkeyHash {
                    sig: sig.to_vec(),
                    pubkey,
                },
                Err(_) => InputTemplate::Other,
            },
            _ => InputTemplate::Other,
        }
    }

    pub fn sigs_needed(&self) -> usize {
        match self {
            InputTemplate::Multisig(multisig) => multisig.sigs_needed(),
            InputTemplate::PubkeyHash { sig, .. } if sig.is_empty() => 1,
            _ => 0,
        }
    }

    pub fn missing_sigs(&self) -> Vec<PublicKey> {
        match self {
            InputTemplate::Multisig(multisig) => multisig.missing_sigs(),
            InputTemplate::PubkeyHash { sig, pubkey } if sig.is_empty() => vec![*pubkey],
            _ => Vec::new(),
        }
    }
}
