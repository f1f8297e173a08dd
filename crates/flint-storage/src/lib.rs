//! Encrypted wallet storage for Flint
//!
//! Persists master keys and sub-wallets in the platform secure store, with
//! each mnemonic sealed under the user's PIN.
//!
//! ## Security Features
//!
//! - **PIN KDF**: Argon2id, parameters recorded per ciphertext
//! - **Sealing**: ChaCha20-Poly1305 (default) or AES-256-GCM with a fixed associated-data label
//! - **Single failure kind**: wrong PIN and corrupted ciphertext are indistinguishable
//! - **Biometric Unlock**: optional PIN copy under `biometricPin:{id}`, never the only copy
//! - **Validate-then-commit**: registry writes are checked before they reach the store

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod keystore;
pub mod registry;
pub mod security;
pub mod vault;

pub use keystore::{
    BiometricPrompt, MemoryKeyValueStore, MockBiometricPrompt, PromptOutcome, SecureKeyValueStore,
};
pub use registry::{DeleteOutcome, WalletRegistry};
pub use security::{validate_pin, SealingKey};
pub use vault::SecretVault;
