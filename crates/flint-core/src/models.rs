//! Master key and sub-wallet data model

use crate::mnemonic::MasterFingerprint;
use crate::{Error, Result};
use flint_params::{CipherSuite, KdfParams, MAIN_WALLET_INDEX, MAIN_WALLET_NICKNAME, MAX_NICKNAME_LENGTH};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable master key identifier (UUID v4)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MasterKeyId(String);

impl MasterKeyId {
    /// Fresh random identifier
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Identifier as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MasterKeyId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MasterKeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for MasterKeyId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for MasterKeyId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Observed usage of a sub-wallet.
///
/// Only ever moves forward: once `Active`, always `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activity {
    /// Never checked
    #[default]
    Unknown,
    /// Checked, nothing found yet
    Inactive,
    /// At least one transaction observed
    Active,
}

impl Activity {
    /// Fold an observation into the current state.
    pub fn merge(self, observed: bool) -> Self {
        match (self, observed) {
            (Activity::Active, _) | (_, true) => Activity::Active,
            _ => Activity::Inactive,
        }
    }

    /// True once activity has been observed
    pub fn is_active(&self) -> bool {
        matches!(self, Activity::Active)
    }

    /// True if the sub-wallet has never been checked
    pub fn is_unknown(&self) -> bool {
        matches!(self, Activity::Unknown)
    }
}

/// Sub-wallet record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubWallet {
    /// Derivation index, unique within the master key
    pub index: u32,
    /// Display name
    pub nickname: String,
    /// Observed activity
    pub activity: Activity,
}

impl SubWallet {
    /// The index-0 wallet every master key starts with
    pub fn main() -> Self {
        Self {
            index: MAIN_WALLET_INDEX,
            nickname: MAIN_WALLET_NICKNAME.to_string(),
            activity: Activity::Unknown,
        }
    }

    /// Whether this is the main wallet
    pub fn is_main(&self) -> bool {
        self.index == MAIN_WALLET_INDEX
    }
}

/// PIN-sealed secret as persisted.
///
/// Carries everything needed to decrypt except the PIN, including the KDF
/// work factor it was sealed with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedSecret {
    /// Envelope format version
    pub version: u8,
    /// Cipher used
    pub cipher: CipherSuite,
    /// Argon2id parameters used
    pub kdf: KdfParams,
    /// KDF salt
    #[serde(with = "hex")]
    pub salt: Vec<u8>,
    /// AEAD nonce
    #[serde(with = "hex")]
    pub nonce: Vec<u8>,
    /// Ciphertext with authentication tag
    #[serde(with = "hex")]
    pub ciphertext: Vec<u8>,
}

/// Master key record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterKey {
    /// Identifier
    pub id: MasterKeyId,
    /// Display name
    pub nickname: String,
    /// BIP-32 master fingerprint, used for duplicate detection
    pub fingerprint: MasterFingerprint,
    /// Created timestamp (unix seconds)
    pub created_at: i64,
    /// Sealed mnemonic
    pub encrypted_mnemonic: EncryptedSecret,
    /// Active sub-wallets, ascending by index
    pub sub_wallets: Vec<SubWallet>,
    /// Archived sub-wallets, ascending by index
    pub archived_sub_wallets: Vec<SubWallet>,
}

impl MasterKey {
    /// New master key holding only the main wallet.
    pub fn new(
        nickname: String,
        fingerprint: MasterFingerprint,
        encrypted_mnemonic: EncryptedSecret,
    ) -> Self {
        Self {
            id: MasterKeyId::new(),
            nickname,
            fingerprint,
            created_at: chrono::Utc::now().timestamp(),
            encrypted_mnemonic,
            sub_wallets: vec![SubWallet::main()],
            archived_sub_wallets: Vec::new(),
        }
    }

    /// Sub-wallet count across active and archived
    pub fn total_sub_wallets(&self) -> usize {
        self.sub_wallets.len() + self.archived_sub_wallets.len()
    }

    /// Index the next sub-wallet receives
    pub fn next_index(&self) -> u32 {
        self.sub_wallets
            .iter()
            .chain(self.archived_sub_wallets.iter())
            .map(|w| w.index + 1)
            .max()
            .unwrap_or(0)
    }

    /// Active sub-wallet by index
    pub fn sub_wallet(&self, index: u32) -> Option<&SubWallet> {
        self.sub_wallets.iter().find(|w| w.index == index)
    }

    /// Mutable active sub-wallet by index
    pub fn sub_wallet_mut(&mut self, index: u32) -> Option<&mut SubWallet> {
        self.sub_wallets.iter_mut().find(|w| w.index == index)
    }

    /// Archived sub-wallet by index
    pub fn archived_sub_wallet(&self, index: u32) -> Option<&SubWallet> {
        self.archived_sub_wallets.iter().find(|w| w.index == index)
    }

    /// Highest-index active sub-wallet
    pub fn last_sub_wallet(&self) -> Option<&SubWallet> {
        self.sub_wallets.iter().max_by_key(|w| w.index)
    }

    /// Check that indices across active and archived form `0..n`,
    /// that each set is sorted, and that the main wallet is active.
    pub fn check_index_invariant(&self) -> Result<()> {
        let sorted = |set: &[SubWallet]| set.windows(2).all(|pair| pair[0].index < pair[1].index);
        if !sorted(&self.sub_wallets) || !sorted(&self.archived_sub_wallets) {
            return Err(Error::IndexInvariantViolation(format!(
                "sub-wallets of {} are not in index order",
                self.id
            )));
        }

        let mut indices: Vec<u32> = self
            .sub_wallets
            .iter()
            .chain(self.archived_sub_wallets.iter())
            .map(|w| w.index)
            .collect();
        indices.sort_unstable();
        for (expected, actual) in indices.iter().enumerate() {
            if *actual as usize != expected {
                return Err(Error::IndexInvariantViolation(format!(
                    "master key {} expected index {} but found {}",
                    self.id, expected, actual
                )));
            }
        }

        if self.sub_wallet(MAIN_WALLET_INDEX).is_none() {
            return Err(Error::IndexInvariantViolation(format!(
                "master key {} has no active main wallet",
                self.id
            )));
        }
        Ok(())
    }

    /// Public view without ciphertext
    pub fn entry(&self) -> MasterKeyEntry {
        MasterKeyEntry {
            id: self.id.clone(),
            nickname: self.nickname.clone(),
            fingerprint: self.fingerprint,
            created_at: self.created_at,
            sub_wallets: self
                .sub_wallets
                .iter()
                .map(|w| SubWalletEntry::new(&self.id, w))
                .collect(),
            archived_sub_wallets: self
                .archived_sub_wallets
                .iter()
                .map(|w| SubWalletEntry::new(&self.id, w))
                .collect(),
        }
    }
}

/// Master key as returned to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterKeyEntry {
    /// Identifier
    pub id: MasterKeyId,
    /// Display name
    pub nickname: String,
    /// Master fingerprint
    pub fingerprint: MasterFingerprint,
    /// Created timestamp (unix seconds)
    pub created_at: i64,
    /// Active sub-wallets
    pub sub_wallets: Vec<SubWalletEntry>,
    /// Archived sub-wallets
    pub archived_sub_wallets: Vec<SubWalletEntry>,
}

/// Sub-wallet as returned to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubWalletEntry {
    /// Owning master key
    pub master_key_id: MasterKeyId,
    /// Derivation index
    pub index: u32,
    /// Display name
    pub nickname: String,
    /// Observed activity
    pub activity: Activity,
}

impl SubWalletEntry {
    /// View of `wallet` under `master_key_id`
    pub fn new(master_key_id: &MasterKeyId, wallet: &SubWallet) -> Self {
        Self {
            master_key_id: master_key_id.clone(),
            index: wallet.index,
            nickname: wallet.nickname.clone(),
            activity: wallet.activity,
        }
    }
}

/// Wallet the SDK should be connected to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActiveSelection {
    /// Master key
    pub master_key_id: MasterKeyId,
    /// Sub-wallet index
    pub sub_wallet_index: u32,
}

impl ActiveSelection {
    /// Selection of a sub-wallet
    pub fn new(master_key_id: MasterKeyId, sub_wallet_index: u32) -> Self {
        Self {
            master_key_id,
            sub_wallet_index,
        }
    }
}

impl fmt::Display for ActiveSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.master_key_id, self.sub_wallet_index)
    }
}

/// Trim a nickname and check its length.
pub fn validate_nickname(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidName("name cannot be empty".to_string()));
    }
    let length = trimmed.chars().count();
    if length > MAX_NICKNAME_LENGTH {
        return Err(Error::InvalidName(format!(
            "name is {} characters, maximum is {}",
            length, MAX_NICKNAME_LENGTH
        )));
    }
    Ok(trimmed.to_string())
}
