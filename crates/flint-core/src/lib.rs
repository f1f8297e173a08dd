//! Flint wallet core
//!
//! This crate implements the pure parts of the key-management core:
//! BIP-39 mnemonic handling, the master-key / sub-wallet data model with its
//! index invariants, and the policy gating sub-wallet creation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod mnemonic;
pub mod models;
pub mod policy;

pub use error::{Error, ErrorCategory, Result};
pub use mnemonic::{retry_bounded, MasterFingerprint, MnemonicService, Phrase, RetryExhausted};
pub use models::{
    validate_nickname, ActiveSelection, Activity, EncryptedSecret, MasterKey, MasterKeyEntry,
    MasterKeyId, SubWallet, SubWalletEntry,
};
pub use policy::{BlockReason, Eligibility, SubWalletPolicy};
