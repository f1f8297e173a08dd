//! Wallet registry
//!
//! Single owner of the persisted master key / sub-wallet graph. Every
//! mutation runs against a copy of the document, which is checked and
//! written to the secure store before it replaces the in-memory state; a
//! failed check or write leaves both untouched.

use crate::keystore::SecureKeyValueStore;
use crate::security::validate_pin;
use crate::vault::SecretVault;
use flint_core::{
    validate_nickname, ActiveSelection, Activity, Eligibility, Error, MasterFingerprint,
    MasterKey, MasterKeyEntry, MasterKeyId, MnemonicService, Phrase, Result, SubWallet,
    SubWalletEntry, SubWalletPolicy,
};
use flint_params::{FlintConfig, MAIN_WALLET_INDEX, REGISTRY_STORE_KEY};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

const REGISTRY_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegistryDocument {
    version: u32,
    /// Creation order
    master_keys: Vec<MasterKey>,
    #[serde(default)]
    last_active: Option<ActiveSelection>,
}

impl Default for RegistryDocument {
    fn default() -> Self {
        Self {
            version: REGISTRY_VERSION,
            master_keys: Vec::new(),
            last_active: None,
        }
    }
}

impl RegistryDocument {
    fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        let mut fingerprints = HashSet::new();
        for key in &self.master_keys {
            key.check_index_invariant()?;
            if !ids.insert(&key.id) {
                return Err(Error::Storage(format!("duplicate master key id {}", key.id)));
            }
            if !fingerprints.insert(key.fingerprint) {
                return Err(Error::DuplicateWallet(key.fingerprint.to_string()));
            }
        }
        Ok(())
    }

    fn key(&self, id: &MasterKeyId) -> Result<&MasterKey> {
        self.master_keys
            .iter()
            .find(|k| &k.id == id)
            .ok_or_else(|| Error::MasterKeyNotFound(id.to_string()))
    }

    fn key_mut(&mut self, id: &MasterKeyId) -> Result<&mut MasterKey> {
        self.master_keys
            .iter_mut()
            .find(|k| &k.id == id)
            .ok_or_else(|| Error::MasterKeyNotFound(id.to_string()))
    }

    fn find_fingerprint(&self, fingerprint: &MasterFingerprint) -> Option<&MasterKey> {
        self.master_keys.iter().find(|k| &k.fingerprint == fingerprint)
    }

    /// Stored selection if it still names an active sub-wallet, else the
    /// main wallet of the same key, else the main wallet of the first key.
    fn resolve_last_active(&self) -> Option<ActiveSelection> {
        if let Some(selection) = &self.last_active {
            if let Ok(key) = self.key(&selection.master_key_id) {
                let index = if key.sub_wallet(selection.sub_wallet_index).is_some() {
                    selection.sub_wallet_index
                } else {
                    MAIN_WALLET_INDEX
                };
                return Some(ActiveSelection::new(key.id.clone(), index));
            }
        }
        self.master_keys
            .first()
            .map(|k| ActiveSelection::new(k.id.clone(), MAIN_WALLET_INDEX))
    }
}

/// Result of deleting a master key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOutcome {
    /// The deleted key was the active one
    pub active_deleted: bool,
    /// Suggested new active key when `active_deleted`
    pub next_active_id: Option<MasterKeyId>,
}

/// Wallet registry
pub struct WalletRegistry {
    store: Arc<dyn SecureKeyValueStore>,
    vault: SecretVault,
    policy: SubWalletPolicy,
    state: RwLock<RegistryDocument>,
}

impl WalletRegistry {
    /// Load the registry from `store`, starting empty if nothing is saved.
    pub fn open(store: Arc<dyn SecureKeyValueStore>, config: &FlintConfig) -> Result<Self> {
        config.validate()?;
        let document = match store.get(REGISTRY_STORE_KEY)? {
            Some(bytes) => {
                let document: RegistryDocument = serde_json::from_slice(&bytes)?;
                if document.version != REGISTRY_VERSION {
                    return Err(Error::Storage(format!(
                        "Unsupported registry version: {}",
                        document.version
                    )));
                }
                document.validate()?;
                document
            }
            None => RegistryDocument::default(),
        };
        tracing::info!(
            master_keys = document.master_keys.len(),
            "Wallet registry loaded"
        );

        Ok(Self {
            vault: SecretVault::new(store.clone(), config.vault.clone()),
            store,
            policy: SubWalletPolicy::new(&config.registry),
            state: RwLock::new(document),
        })
    }

    /// Vault used for mnemonic and biometric PIN storage
    pub fn vault(&self) -> &SecretVault {
        &self.vault
    }

    fn mutate<T>(&self, apply: impl FnOnce(&mut RegistryDocument) -> Result<T>) -> Result<T> {
        let mut state = self.state.write();
        let mut draft = state.clone();
        let output = apply(&mut draft)?;
        draft.validate()?;
        let bytes = serde_json::to_vec(&draft)?;
        self.store.set(REGISTRY_STORE_KEY, &bytes)?;
        *state = draft;
        Ok(output)
    }

    /// Create a master key, generating a mnemonic unless one is given.
    pub fn create_master_key(
        &self,
        pin: &str,
        nickname: Option<&str>,
        mnemonic: Option<&str>,
    ) -> Result<MasterKeyEntry> {
        let phrase = match mnemonic {
            Some(text) => MnemonicService::parse(text)?,
            None => MnemonicService::generate()?,
        };
        self.insert_master_key(phrase, pin, nickname)
    }

    /// Import an existing mnemonic.
    pub fn import_master_key(
        &self,
        mnemonic: &str,
        pin: &str,
        nickname: Option<&str>,
    ) -> Result<MasterKeyEntry> {
        let phrase = MnemonicService::parse(mnemonic)?;
        self.insert_master_key(phrase, pin, nickname)
    }

    fn insert_master_key(
        &self,
        phrase: Phrase,
        pin: &str,
        nickname: Option<&str>,
    ) -> Result<MasterKeyEntry> {
        validate_pin(pin)?;
        let nickname = nickname.map(validate_nickname).transpose()?;
        let fingerprint = MnemonicService::fingerprint(&phrase)?;

        // Fail fast before paying for key derivation
        if self.state.read().find_fingerprint(&fingerprint).is_some() {
            return Err(Error::DuplicateWallet(fingerprint.to_string()));
        }

        let encrypted = self.vault.encrypt(phrase.as_str().as_bytes(), pin)?;
        drop(phrase);

        let entry = self.mutate(|doc| {
            if doc.find_fingerprint(&fingerprint).is_some() {
                return Err(Error::DuplicateWallet(fingerprint.to_string()));
            }
            // Derived under the lock so concurrent creations get distinct numbers
            let nickname =
                nickname.unwrap_or_else(|| format!("Wallet {}", doc.master_keys.len() + 1));
            let key = MasterKey::new(nickname, fingerprint, encrypted);
            let entry = key.entry();
            doc.master_keys.push(key);
            Ok(entry)
        })?;

        tracing::info!(
            master_key_id = %entry.id,
            fingerprint = %entry.fingerprint,
            "Master key created"
        );
        Ok(entry)
    }

    /// Derive the next sub-wallet if policy allows.
    pub fn add_sub_wallet(
        &self,
        master_key_id: &MasterKeyId,
        nickname: Option<&str>,
    ) -> Result<SubWalletEntry> {
        let nickname = nickname.map(validate_nickname).transpose()?;
        let policy = self.policy;
        let entry = self.mutate(|doc| {
            let key = doc.key_mut(master_key_id)?;
            if let Eligibility::Blocked(reason) = policy.eligibility(key) {
                return Err(Error::SubWalletCreationBlocked(reason.to_string()));
            }
            let index = key.next_index();
            let wallet = SubWallet {
                index,
                nickname: nickname.unwrap_or_else(|| format!("Sub Wallet {}", index)),
                activity: Activity::Unknown,
            };
            let entry = SubWalletEntry::new(master_key_id, &wallet);
            key.sub_wallets.push(wallet);
            Ok(entry)
        })?;
        tracing::info!(master_key_id = %master_key_id, index = entry.index, "Sub-wallet added");
        Ok(entry)
    }

    /// Move a sub-wallet to the archive.
    pub fn archive_sub_wallet(&self, master_key_id: &MasterKeyId, index: u32) -> Result<()> {
        if index == MAIN_WALLET_INDEX {
            return Err(Error::MainWalletProtected);
        }
        self.mutate(|doc| {
            let key = doc.key_mut(master_key_id)?;
            let position = key
                .sub_wallets
                .iter()
                .position(|w| w.index == index)
                .ok_or_else(|| Error::SubWalletNotFound {
                    master_key_id: master_key_id.to_string(),
                    index,
                })?;
            let wallet = key.sub_wallets.remove(position);
            insert_sorted(&mut key.archived_sub_wallets, wallet);
            Ok(())
        })?;
        tracing::info!(master_key_id = %master_key_id, index, "Sub-wallet archived");
        Ok(())
    }

    /// Bring an archived sub-wallet back under its original index.
    pub fn restore_sub_wallet(&self, master_key_id: &MasterKeyId, index: u32) -> Result<()> {
        self.mutate(|doc| {
            let key = doc.key_mut(master_key_id)?;
            let position = key
                .archived_sub_wallets
                .iter()
                .position(|w| w.index == index)
                .ok_or_else(|| Error::SubWalletNotFound {
                    master_key_id: master_key_id.to_string(),
                    index,
                })?;
            let wallet = key.archived_sub_wallets.remove(position);
            insert_sorted(&mut key.sub_wallets, wallet);
            Ok(())
        })?;
        tracing::info!(master_key_id = %master_key_id, index, "Sub-wallet restored");
        Ok(())
    }

    /// Rename a master key.
    pub fn rename_master_key(&self, master_key_id: &MasterKeyId, name: &str) -> Result<()> {
        let name = validate_nickname(name)?;
        self.mutate(|doc| {
            doc.key_mut(master_key_id)?.nickname = name;
            Ok(())
        })
    }

    /// Rename an active or archived sub-wallet.
    pub fn rename_sub_wallet(
        &self,
        master_key_id: &MasterKeyId,
        index: u32,
        name: &str,
    ) -> Result<()> {
        let name = validate_nickname(name)?;
        self.mutate(|doc| {
            let key = doc.key_mut(master_key_id)?;
            let wallet = key
                .sub_wallets
                .iter_mut()
                .chain(key.archived_sub_wallets.iter_mut())
                .find(|w| w.index == index)
                .ok_or_else(|| Error::SubWalletNotFound {
                    master_key_id: master_key_id.to_string(),
                    index,
                })?;
            wallet.nickname = name;
            Ok(())
        })
    }

    /// Delete a master key after checking `pin` against it.
    pub fn delete_master_key(&self, master_key_id: &MasterKeyId, pin: &str) -> Result<DeleteOutcome> {
        let sealed = self.state.read().key(master_key_id)?.encrypted_mnemonic.clone();
        self.vault.decrypt(&sealed, pin)?;

        // Remove the convenience copy first; a failed commit then only costs biometric unlock
        self.vault.delete_biometric_pin(master_key_id)?;

        let outcome = self.mutate(|doc| {
            let active_deleted = doc
                .resolve_last_active()
                .is_some_and(|s| &s.master_key_id == master_key_id);
            doc.key(master_key_id)?;
            doc.master_keys.retain(|k| &k.id != master_key_id);

            let next_active_id = if active_deleted {
                let next = doc.master_keys.first().map(|k| k.id.clone());
                doc.last_active = next
                    .clone()
                    .map(|id| ActiveSelection::new(id, MAIN_WALLET_INDEX));
                next
            } else {
                None
            };
            Ok(DeleteOutcome {
                active_deleted,
                next_active_id,
            })
        })?;

        tracing::info!(
            master_key_id = %master_key_id,
            active_deleted = outcome.active_deleted,
            "Master key deleted"
        );
        Ok(outcome)
    }

    /// Decrypt the mnemonic of a master key.
    pub fn get_mnemonic(&self, master_key_id: &MasterKeyId, pin: &str) -> Result<Phrase> {
        let sealed = self.state.read().key(master_key_id)?.encrypted_mnemonic.clone();
        let plaintext = self.vault.decrypt(&sealed, pin)?;
        Phrase::from_secret_bytes(&plaintext)
    }

    /// Re-seal a master key's mnemonic under a new PIN.
    ///
    /// A stored biometric PIN copy is replaced as well.
    pub fn change_pin(&self, master_key_id: &MasterKeyId, old_pin: &str, new_pin: &str) -> Result<()> {
        validate_pin(new_pin)?;
        let phrase = self.get_mnemonic(master_key_id, old_pin)?;
        let sealed = self.vault.encrypt(phrase.as_str().as_bytes(), new_pin)?;
        drop(phrase);

        self.mutate(|doc| {
            doc.key_mut(master_key_id)?.encrypted_mnemonic = sealed;
            Ok(())
        })?;
        if self.vault.has_biometric_pin(master_key_id)? {
            self.vault.store_biometric_pin(master_key_id, new_pin)?;
        }
        tracing::info!(master_key_id = %master_key_id, "PIN changed");
        Ok(())
    }

    /// Evaluate the sub-wallet creation policy.
    pub fn eligibility(&self, master_key_id: &MasterKeyId) -> Result<Eligibility> {
        let state = self.state.read();
        Ok(self.policy.eligibility(state.key(master_key_id)?))
    }

    /// Whether another sub-wallet may be added
    pub fn can_add_sub_wallet(&self, master_key_id: &MasterKeyId) -> Result<bool> {
        Ok(self.eligibility(master_key_id)?.is_allowed())
    }

    /// User-facing reason `add_sub_wallet` would fail, if any
    pub fn add_sub_wallet_disabled_reason(&self, master_key_id: &MasterKeyId) -> Result<Option<String>> {
        Ok(self.eligibility(master_key_id)?.reason())
    }

    /// Record an activity observation. Activity never reverts.
    pub fn mark_activity(
        &self,
        master_key_id: &MasterKeyId,
        index: u32,
        observed: bool,
    ) -> Result<Activity> {
        let current = self.sub_wallet(master_key_id, index)?.activity;
        let merged = current.merge(observed);
        if merged == current {
            return Ok(current);
        }
        self.mutate(|doc| {
            let key = doc.key_mut(master_key_id)?;
            let wallet = key
                .sub_wallets
                .iter_mut()
                .chain(key.archived_sub_wallets.iter_mut())
                .find(|w| w.index == index)
                .ok_or_else(|| Error::SubWalletNotFound {
                    master_key_id: master_key_id.to_string(),
                    index,
                })?;
            wallet.activity = wallet.activity.merge(observed);
            Ok(wallet.activity)
        })
        .inspect(|activity| {
            tracing::debug!(master_key_id = %master_key_id, index, ?activity, "Activity recorded");
        })
    }

    /// All master keys in creation order
    pub fn list_master_keys(&self) -> Vec<MasterKeyEntry> {
        self.state.read().master_keys.iter().map(MasterKey::entry).collect()
    }

    /// Master key by id
    pub fn master_key(&self, master_key_id: &MasterKeyId) -> Result<MasterKeyEntry> {
        Ok(self.state.read().key(master_key_id)?.entry())
    }

    /// Active or archived sub-wallet by index
    pub fn sub_wallet(&self, master_key_id: &MasterKeyId, index: u32) -> Result<SubWalletEntry> {
        let state = self.state.read();
        let key = state.key(master_key_id)?;
        key.sub_wallet(index)
            .or_else(|| key.archived_sub_wallet(index))
            .map(|w| SubWalletEntry::new(master_key_id, w))
            .ok_or_else(|| Error::SubWalletNotFound {
                master_key_id: master_key_id.to_string(),
                index,
            })
    }

    /// Whether `index` names an active (not archived) sub-wallet
    pub fn is_active_sub_wallet(&self, master_key_id: &MasterKeyId, index: u32) -> Result<bool> {
        Ok(self.state.read().key(master_key_id)?.sub_wallet(index).is_some())
    }

    /// Newest active sub-wallet of each master key whose activity is unknown
    pub fn sync_candidates(&self) -> Vec<SubWalletEntry> {
        self.state
            .read()
            .master_keys
            .iter()
            .filter_map(|key| {
                key.last_sub_wallet()
                    .filter(|w| w.activity.is_unknown())
                    .map(|w| SubWalletEntry::new(&key.id, w))
            })
            .collect()
    }

    /// Wallet to open on unlock
    pub fn last_active(&self) -> Option<ActiveSelection> {
        self.state.read().resolve_last_active()
    }

    /// Remember the wallet to open on next unlock.
    pub fn set_last_active(&self, selection: &ActiveSelection) -> Result<()> {
        if self.state.read().last_active.as_ref() == Some(selection) {
            return Ok(());
        }
        self.mutate(|doc| {
            if doc
                .key(&selection.master_key_id)?
                .sub_wallet(selection.sub_wallet_index)
                .is_none()
            {
                return Err(Error::SubWalletNotFound {
                    master_key_id: selection.master_key_id.to_string(),
                    index: selection.sub_wallet_index,
                });
            }
            doc.last_active = Some(selection.clone());
            Ok(())
        })
    }

    /// Number of registered master keys
    pub fn len(&self) -> usize {
        self.state.read().master_keys.len()
    }

    /// No master keys registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn insert_sorted(set: &mut Vec<SubWallet>, wallet: SubWallet) {
    let position = set.partition_point(|w| w.index < wallet.index);
    set.insert(position, wallet);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::MemoryKeyValueStore;
    use flint_params::KdfParams;

    const PHRASE: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn config() -> FlintConfig {
        let mut config = FlintConfig::default();
        config.vault.kdf = KdfParams {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        };
        config
    }

    #[test]
    fn test_document_survives_reopen() {
        let store = Arc::new(MemoryKeyValueStore::new());
        let registry = WalletRegistry::open(store.clone(), &config()).unwrap();
        let entry = registry.import_master_key(PHRASE, "1234", Some("Main")).unwrap();
        registry.mark_activity(&entry.id, 0, true).unwrap();
        registry.add_sub_wallet(&entry.id, None).unwrap();

        let reopened = WalletRegistry::open(store, &config()).unwrap();
        let loaded = reopened.master_key(&entry.id).unwrap();
        assert_eq!(loaded.nickname, "Main");
        assert_eq!(loaded.sub_wallets.len(), 2);
        assert_eq!(loaded.sub_wallets[1].nickname, "Sub Wallet 1");
        assert_eq!(reopened.get_mnemonic(&entry.id, "1234").unwrap().as_str(), PHRASE);
    }

    #[test]
    fn test_failed_write_leaves_state_untouched() {
        let store = Arc::new(MemoryKeyValueStore::new());
        let registry = WalletRegistry::open(store.clone(), &config()).unwrap();
        let entry = registry.import_master_key(PHRASE, "1234", None).unwrap();

        store.set_fail_writes(true);
        assert!(registry.rename_master_key(&entry.id, "Renamed").is_err());
        assert_eq!(registry.master_key(&entry.id).unwrap().nickname, "Wallet 1");
    }

    #[test]
    fn test_corrupt_document_is_rejected_on_open() {
        let store = Arc::new(MemoryKeyValueStore::new());
        {
            let registry = WalletRegistry::open(store.clone(), &config()).unwrap();
            registry.import_master_key(PHRASE, "1234", None).unwrap();
        }
        let bytes = store.get(REGISTRY_STORE_KEY).unwrap().unwrap();
        let mut json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        json["master_keys"][0]["sub_wallets"][0]["index"] = serde_json::json!(3);
        store
            .set(REGISTRY_STORE_KEY, &serde_json::to_vec(&json).unwrap())
            .unwrap();

        assert!(matches!(
            WalletRegistry::open(store, &config()),
            Err(Error::IndexInvariantViolation(_))
        ));
    }

    #[test]
    fn test_last_active_falls_back() {
        let store = Arc::new(MemoryKeyValueStore::new());
        let registry = WalletRegistry::open(store, &config()).unwrap();
        assert_eq!(registry.last_active(), None);

        let entry = registry.import_master_key(PHRASE, "1234", None).unwrap();
        assert_eq!(
            registry.last_active(),
            Some(ActiveSelection::new(entry.id.clone(), 0))
        );

        registry.mark_activity(&entry.id, 0, true).unwrap();
        registry.add_sub_wallet(&entry.id, None).unwrap();
        registry
            .set_last_active(&ActiveSelection::new(entry.id.clone(), 1))
            .unwrap();
        registry.archive_sub_wallet(&entry.id, 1).unwrap();
        assert_eq!(
            registry.last_active(),
            Some(ActiveSelection::new(entry.id.clone(), 0))
        );

        assert!(registry
            .set_last_active(&ActiveSelection::new(entry.id, 1))
            .is_err());
    }

    #[test]
    fn test_insert_sorted() {
        let wallet = |index| SubWallet {
            index,
            nickname: String::new(),
            activity: Activity::Unknown,
        };
        let mut set = vec![wallet(0), wallet(2), wallet(5)];
        insert_sorted(&mut set, wallet(3));
        let indices: Vec<u32> = set.iter().map(|w| w.index).collect();
        assert_eq!(indices, vec![0, 2, 3, 5]);
    }
}
