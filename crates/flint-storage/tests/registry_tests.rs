//! Wallet registry tests
//!
//! Tests cover:
//! - Master key creation, import and duplicate detection
//! - Sub-wallet policy gating, archive and restore
//! - Deletion and active-wallet handoff
//! - Index contiguity under random operation sequences

use flint_core::{Activity, Error, MasterKeyId, MnemonicService};
use flint_params::{biometric_pin_key, FlintConfig, KdfParams};
use flint_storage::{DeleteOutcome, MemoryKeyValueStore, WalletRegistry};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

const PHRASE_A: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
const PHRASE_B: &str = "legal winner thank year wave sausage worth useful legal winner thank yellow";

fn config() -> FlintConfig {
    let mut config = FlintConfig::default();
    config.vault.kdf = KdfParams {
        memory_kib: 64,
        iterations: 1,
        parallelism: 1,
    };
    config
}

fn registry() -> (WalletRegistry, Arc<MemoryKeyValueStore>) {
    let store = Arc::new(MemoryKeyValueStore::new());
    let registry = WalletRegistry::open(store.clone(), &config()).unwrap();
    (registry, store)
}

// =============================================================================
// Creation and import
// =============================================================================

#[test]
fn test_create_master_key_scenario() {
    let (registry, _) = registry();
    let entry = registry.create_master_key("123456", Some("Main"), None).unwrap();

    let keys = registry.list_master_keys();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0].nickname, "Main");
    assert_eq!(keys[0].sub_wallets.len(), 1);
    assert_eq!(keys[0].sub_wallets[0].index, 0);
    assert_eq!(keys[0].sub_wallets[0].nickname, "Main Wallet");
    assert_eq!(keys[0].sub_wallets[0].activity, Activity::Unknown);

    let phrase = registry.get_mnemonic(&entry.id, "123456").unwrap();
    assert_eq!(phrase.word_count(), 12);
    assert!(MnemonicService::validate(phrase.as_str()));
    assert_eq!(MnemonicService::fingerprint(&phrase).unwrap(), entry.fingerprint);

    assert!(matches!(
        registry.get_mnemonic(&entry.id, "000000"),
        Err(Error::WrongPin)
    ));
}

#[test]
fn test_create_with_supplied_mnemonic() {
    let (registry, _) = registry();
    let entry = registry.create_master_key("1234", None, Some(PHRASE_B)).unwrap();
    assert_eq!(registry.get_mnemonic(&entry.id, "1234").unwrap().as_str(), PHRASE_B);
}

#[test]
fn test_default_nicknames_count_up() {
    let (registry, _) = registry();
    let a = registry.import_master_key(PHRASE_A, "1234", None).unwrap();
    let b = registry.import_master_key(PHRASE_B, "1234", None).unwrap();
    assert_eq!(a.nickname, "Wallet 1");
    assert_eq!(b.nickname, "Wallet 2");
}

#[test]
fn test_concurrent_creation_gets_distinct_names() {
    let (registry, _) = registry();
    let registry = Arc::new(registry);
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let registry = registry.clone();
            std::thread::spawn(move || registry.create_master_key("1234", None, None).unwrap())
        })
        .collect();
    let names: HashSet<String> = handles
        .into_iter()
        .map(|h| h.join().unwrap().nickname)
        .collect();
    assert_eq!(names.len(), 4);
    for n in 1..=4 {
        assert!(names.contains(&format!("Wallet {}", n)));
    }
}

#[test]
fn test_duplicate_import_rejected() {
    let (registry, _) = registry();
    registry.import_master_key(PHRASE_A, "1234", None).unwrap();

    // Same phrase with different spacing and case
    let messy = format!("  {}  ", PHRASE_A.to_uppercase());
    assert!(matches!(
        registry.import_master_key(&messy, "9999", None),
        Err(Error::DuplicateWallet(_))
    ));
    assert!(matches!(
        registry.create_master_key("1234", None, Some(PHRASE_A)),
        Err(Error::DuplicateWallet(_))
    ));
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_import_rejects_invalid_input() {
    let (registry, _) = registry();
    assert!(matches!(
        registry.import_master_key("abandon abandon abandon", "1234", None),
        Err(Error::InvalidMnemonic(_))
    ));
    assert!(matches!(
        registry.import_master_key(PHRASE_A, "12", None),
        Err(Error::InvalidPin(_))
    ));
    assert!(matches!(
        registry.import_master_key(PHRASE_A, "1234", Some("   ")),
        Err(Error::InvalidName(_))
    ));
    assert!(registry.is_empty());
}

// =============================================================================
// Sub-wallets
// =============================================================================

#[test]
fn test_add_sub_wallet_gated_by_activity() {
    let (registry, _) = registry();
    let entry = registry.import_master_key(PHRASE_A, "1234", None).unwrap();

    assert!(!registry.can_add_sub_wallet(&entry.id).unwrap());
    assert!(registry.add_sub_wallet_disabled_reason(&entry.id).unwrap().is_some());
    assert!(matches!(
        registry.add_sub_wallet(&entry.id, None),
        Err(Error::SubWalletCreationBlocked(_))
    ));

    registry.mark_activity(&entry.id, 0, true).unwrap();
    let sub = registry.add_sub_wallet(&entry.id, Some("Savings")).unwrap();
    assert_eq!(sub.index, 1);
    assert_eq!(sub.nickname, "Savings");

    // Newest is now index 1 with unknown activity
    assert!(!registry.can_add_sub_wallet(&entry.id).unwrap());
    registry.mark_activity(&entry.id, 1, true).unwrap();
    assert!(registry.can_add_sub_wallet(&entry.id).unwrap());
    assert_eq!(registry.add_sub_wallet_disabled_reason(&entry.id).unwrap(), None);
}

#[test]
fn test_blocked_reason_is_verbatim_error_message() {
    let (registry, _) = registry();
    let entry = registry.import_master_key(PHRASE_A, "1234", None).unwrap();
    let reason = registry.add_sub_wallet_disabled_reason(&entry.id).unwrap().unwrap();
    match registry.add_sub_wallet(&entry.id, None) {
        Err(e @ Error::SubWalletCreationBlocked(_)) => assert_eq!(e.user_message(), reason),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn test_activity_never_reverts() {
    let (registry, _) = registry();
    let entry = registry.import_master_key(PHRASE_A, "1234", None).unwrap();
    assert_eq!(registry.mark_activity(&entry.id, 0, false).unwrap(), Activity::Inactive);
    assert_eq!(registry.mark_activity(&entry.id, 0, true).unwrap(), Activity::Active);
    assert_eq!(registry.mark_activity(&entry.id, 0, false).unwrap(), Activity::Active);
}

#[test]
fn test_archive_and_restore_keep_indices() {
    let mut config = config();
    config.registry.max_sub_wallets = 5;
    let registry = WalletRegistry::open(Arc::new(MemoryKeyValueStore::new()), &config).unwrap();
    let entry = registry.import_master_key(PHRASE_A, "1234", None).unwrap();
    let id = entry.id;

    for index in 0..3 {
        registry.mark_activity(&id, index, true).unwrap();
        registry.add_sub_wallet(&id, None).unwrap();
    }
    registry.archive_sub_wallet(&id, 1).unwrap();
    registry.archive_sub_wallet(&id, 3).unwrap();

    let key = registry.master_key(&id).unwrap();
    let active: Vec<u32> = key.sub_wallets.iter().map(|w| w.index).collect();
    let archived: Vec<u32> = key.archived_sub_wallets.iter().map(|w| w.index).collect();
    assert_eq!(active, vec![0, 2]);
    assert_eq!(archived, vec![1, 3]);

    // Next index still follows the archived maximum
    let sub = registry.add_sub_wallet(&id, None).unwrap();
    assert_eq!(sub.index, 4);

    registry.restore_sub_wallet(&id, 1).unwrap();
    let key = registry.master_key(&id).unwrap();
    let active: Vec<u32> = key.sub_wallets.iter().map(|w| w.index).collect();
    assert_eq!(active, vec![0, 1, 2, 4]);

    assert!(matches!(
        registry.archive_sub_wallet(&id, 0),
        Err(Error::MainWalletProtected)
    ));
    assert!(matches!(
        registry.restore_sub_wallet(&id, 2),
        Err(Error::SubWalletNotFound { .. })
    ));
}

#[test]
fn test_sub_wallet_limit() {
    let mut config = config();
    config.registry.max_sub_wallets = 2;
    let registry = WalletRegistry::open(Arc::new(MemoryKeyValueStore::new()), &config).unwrap();
    let id = registry.import_master_key(PHRASE_A, "1234", None).unwrap().id;

    registry.mark_activity(&id, 0, true).unwrap();
    registry.add_sub_wallet(&id, None).unwrap();
    registry.mark_activity(&id, 1, true).unwrap();

    let reason = registry.add_sub_wallet_disabled_reason(&id).unwrap().unwrap();
    assert!(reason.contains('2'));
}

#[test]
fn test_rename() {
    let (registry, _) = registry();
    let id = registry.import_master_key(PHRASE_A, "1234", None).unwrap().id;
    registry.rename_master_key(&id, "  Spending  ").unwrap();
    registry.rename_sub_wallet(&id, 0, "Daily").unwrap();

    let key = registry.master_key(&id).unwrap();
    assert_eq!(key.nickname, "Spending");
    assert_eq!(key.sub_wallets[0].nickname, "Daily");

    assert!(matches!(registry.rename_master_key(&id, ""), Err(Error::InvalidName(_))));
    assert!(matches!(
        registry.rename_sub_wallet(&id, 7, "Nope"),
        Err(Error::SubWalletNotFound { .. })
    ));
    assert!(matches!(
        registry.rename_master_key(&MasterKeyId::from("missing"), "X"),
        Err(Error::MasterKeyNotFound(_))
    ));
}

#[test]
fn test_sync_candidates() {
    let (registry, _) = registry();
    let a = registry.import_master_key(PHRASE_A, "1234", None).unwrap().id;
    let b = registry.import_master_key(PHRASE_B, "1234", None).unwrap().id;
    registry.mark_activity(&b, 0, false).unwrap();

    let candidates = registry.sync_candidates();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].master_key_id, a);
    assert_eq!(candidates[0].index, 0);
}

// =============================================================================
// Deletion and PIN changes
// =============================================================================

#[test]
fn test_delete_requires_pin() {
    let (registry, _) = registry();
    let id = registry.import_master_key(PHRASE_A, "1234", None).unwrap().id;
    assert!(matches!(
        registry.delete_master_key(&id, "9999"),
        Err(Error::WrongPin)
    ));
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_delete_active_hands_off_to_first_remaining() {
    let (registry, store) = registry();
    let a = registry.import_master_key(PHRASE_A, "1234", None).unwrap().id;
    let b = registry.import_master_key(PHRASE_B, "5678", None).unwrap().id;
    registry.vault().store_biometric_pin(&a, "1234").unwrap();

    // A is active by default as the first key
    let outcome = registry.delete_master_key(&a, "1234").unwrap();
    assert_eq!(
        outcome,
        DeleteOutcome {
            active_deleted: true,
            next_active_id: Some(b.clone()),
        }
    );
    assert!(!store.contains(&biometric_pin_key(a.as_str())));
    assert_eq!(registry.last_active().unwrap().master_key_id, b);

    let outcome = registry.delete_master_key(&b, "5678").unwrap();
    assert_eq!(
        outcome,
        DeleteOutcome {
            active_deleted: true,
            next_active_id: None,
        }
    );
    assert!(registry.is_empty());
    assert_eq!(registry.last_active(), None);
}

#[test]
fn test_delete_inactive_key() {
    let (registry, _) = registry();
    let a = registry.import_master_key(PHRASE_A, "1234", None).unwrap().id;
    let b = registry.import_master_key(PHRASE_B, "1234", None).unwrap().id;
    let outcome = registry.delete_master_key(&b, "1234").unwrap();
    assert!(!outcome.active_deleted);
    assert_eq!(outcome.next_active_id, None);
    assert_eq!(registry.last_active().unwrap().master_key_id, a);

    // Reimport after deletion is allowed again
    registry.import_master_key(PHRASE_B, "1234", None).unwrap();
}

#[test]
fn test_change_pin() {
    let (registry, _) = registry();
    let id = registry.import_master_key(PHRASE_A, "1234", None).unwrap().id;
    registry.vault().store_biometric_pin(&id, "1234").unwrap();

    assert!(matches!(
        registry.change_pin(&id, "0000", "5678"),
        Err(Error::WrongPin)
    ));
    assert!(matches!(
        registry.change_pin(&id, "1234", "56"),
        Err(Error::InvalidPin(_))
    ));

    registry.change_pin(&id, "1234", "5678").unwrap();
    assert!(matches!(registry.get_mnemonic(&id, "1234"), Err(Error::WrongPin)));
    assert_eq!(registry.get_mnemonic(&id, "5678").unwrap().as_str(), PHRASE_A);
    assert_eq!(
        registry.vault().biometric_pin(&id).unwrap().unwrap().as_str(),
        "5678"
    );
}

// =============================================================================
// Index contiguity
// =============================================================================

#[derive(Debug, Clone)]
enum Op {
    Add,
    MarkNewest,
    Archive(u32),
    Restore(u32),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Add),
        Just(Op::MarkNewest),
        (0u32..8).prop_map(Op::Archive),
        (0u32..8).prop_map(Op::Restore),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn indices_stay_contiguous(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let (registry, _) = registry();
        let id = registry.import_master_key(PHRASE_A, "1234", None).unwrap().id;

        for op in ops {
            // Individual operations may be rejected; the invariant must hold regardless
            let _ = match op {
                Op::Add => registry.add_sub_wallet(&id, None).map(|_| ()),
                Op::MarkNewest => {
                    let key = registry.master_key(&id).unwrap();
                    let newest = key.sub_wallets.iter().map(|w| w.index).max().unwrap();
                    registry.mark_activity(&id, newest, true).map(|_| ())
                }
                Op::Archive(index) => registry.archive_sub_wallet(&id, index),
                Op::Restore(index) => registry.restore_sub_wallet(&id, index),
            };

            let key = registry.master_key(&id).unwrap();
            let mut indices: Vec<u32> = key
                .sub_wallets
                .iter()
                .chain(key.archived_sub_wallets.iter())
                .map(|w| w.index)
                .collect();
            indices.sort_unstable();
            let expected: Vec<u32> = (0..indices.len() as u32).collect();
            prop_assert_eq!(indices, expected);
            prop_assert!(key.sub_wallets.iter().any(|w| w.index == 0));
        }
    }
}
