//! Determinism properties of key derivation and script issuance.

use coindb_core::{
    Account, AccountId, Keychain, KeychainError, KeychainId, MultisigScript, ScriptMode,
    SigningScript, Tx, TxIn, TxOut, TxStatus, DEFAULT_BIN, UNKNOWN_TIMESTAMP,
};

use bitcoin::hashes::Hash as _;
use bitcoin::{OutPoint, ScriptBuf, Txid};

fn roots(n: u8) -> Vec<Keychain> {
    (0..n)
        .map(|i| {
            let mut root =
                Keychain::derive_root(&format!("root{}", i), &[0xA0 + i; 48], b"", b"").unwrap();
            root.assign_id(KeychainId(i as u64 + 1));
            root
        })
        .collect()
}

fn permutations(items: &[Keychain]) -> Vec<Vec<Keychain>> {
    if items.len() <= 1 {
        return vec![items.to_vec()];
    }
    let mut out = Vec::new();
    for i in 0..items.len() {
        let mut rest = items.to_vec();
        let head = rest.remove(i);
        for mut tail in permutations(&rest) {
            tail.insert(0, head.clone());
            out.push(tail);
        }
    }
    out
}

#[test]
fn test_child_derivation_repeats_exactly() {
    for root in roots(3) {
        for index in [0u32, 1, 2, 1000, 0x7FFF_FFFF, 0x8000_0000] {
            let a = root.derive_child(index, true).unwrap();
            let b = root.derive_child(index, true).unwrap();
            assert_eq!(a.pubkey(), b.pubkey());
            assert_eq!(a.chain_code().unwrap(), b.chain_code().unwrap());
            assert_eq!(a.hash(), b.hash());
            assert_eq!(a.depth(), root.depth() + 1);
        }
    }
}

#[test]
fn test_public_keychains_never_derive_private() {
    for root in roots(2) {
        let public = root.derive_child(4, false).unwrap();
        let grandchild = public.derive_child(9, false).unwrap();
        for keychain in [&public, &grandchild] {
            for index in [0u32, 5, 0x8000_0001] {
                assert!(matches!(
                    keychain.derive_child(index, true),
                    Err(KeychainError::PublicKeychain)
                ));
            }
        }
    }
}

#[test]
fn test_scripts_ignore_keychain_order() {
    let all = roots(4);
    let bin_children: Vec<Keychain> = all
        .iter()
        .map(|root| root.derive_child(DEFAULT_BIN, false).unwrap())
        .collect();

    for minsigs in 1..=4u32 {
        for index in [0u32, 7] {
            let reference =
                SigningScript::derive(AccountId(1), DEFAULT_BIN, index, minsigs, &bin_children, "")
                    .unwrap();
            for order in permutations(&bin_children) {
                let script =
                    SigningScript::derive(AccountId(1), DEFAULT_BIN, index, minsigs, &order, "")
                        .unwrap();
                assert_eq!(script.txoutscript(), reference.txoutscript());
                assert_eq!(script.txinscript(), reference.txinscript());
            }
        }
    }
}

#[test]
fn test_account_order_is_irrelevant() {
    let all = roots(3);
    let mut reversed = all.clone();
    reversed.reverse();

    let mut first = Account::with_defaults("first", 2, [KeychainId(1), KeychainId(2), KeychainId(3)]).unwrap();
    let mut second = Account::with_defaults("second", 2, [KeychainId(3), KeychainId(1), KeychainId(2)]).unwrap();
    for account in [&mut first, &mut second] {
        account.assign_id(AccountId(1));
        account.add_bin("change").unwrap();
        account.add_bin("default").unwrap();
    }

    for _ in 0..3 {
        let a = first.new_signing_script(DEFAULT_BIN, "", &all).unwrap();
        let b = second.new_signing_script(DEFAULT_BIN, "", &reversed).unwrap();
        assert_eq!(a.index(), b.index());
        assert_eq!(a.txoutscript(), b.txoutscript());
    }
}

#[test]
fn test_indices_have_no_gaps() {
    let all = roots(2);
    let mut account = Account::with_defaults("gapless", 1, [KeychainId(1), KeychainId(2)]).unwrap();
    account.assign_id(AccountId(3));
    account.add_bin("change").unwrap();
    account.add_bin("default").unwrap();

    let mut seen = Vec::new();
    for _ in 0..20 {
        seen.push(account.new_signing_script(DEFAULT_BIN, "", &all).unwrap().index());
    }
    let expected: Vec<u32> = (0..20).collect();
    assert_eq!(seen, expected);
}

#[test]
fn test_missing_count_tracks_every_input() {
    let all = roots(3);
    let children: Vec<Keychain> = all
        .iter()
        .map(|root| root.derive_child(DEFAULT_BIN, false).unwrap())
        .collect();
    let pubkeys: Vec<_> = SigningScript::derive(AccountId(1), DEFAULT_BIN, 0, 3, &children, "")
        .unwrap()
        .keys()
        .iter()
        .map(|k| *k.pubkey())
        .collect();

    for needed in 1..=3usize {
        let multisig = MultisigScript::new(needed, pubkeys.clone()).unwrap();
        let template = multisig.txinscript(ScriptMode::Edit).unwrap();
        let txins: Vec<TxIn> = (0..3u8)
            .map(|i| {
                TxIn::new(
                    OutPoint::new(Txid::from_byte_array([i; 32]), 0),
                    template.clone(),
                    0xFFFF_FFFF,
                )
            })
            .collect();

        let mut tx = Tx::new();
        tx.set(
            1,
            txins,
            vec![TxOut::new(1_000, ScriptBuf::new())],
            0,
            UNKNOWN_TIMESTAMP,
            TxStatus::Confirmed,
        );
        assert_eq!(tx.status(), TxStatus::Unsigned);
        assert_eq!(tx.missing_sig_count(), needed);

        for input in 0..3 {
            for (n, pubkey) in pubkeys.iter().take(needed).enumerate() {
                // Before the last slot of the last input, something is missing
                assert!(tx.missing_sig_count() > 0);
                tx.add_signature(input, pubkey, vec![0x30, n as u8, 0x01]).unwrap();
            }
        }
        assert_eq!(tx.missing_sig_count(), 0);
    }
}
