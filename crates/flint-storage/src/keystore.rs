//! Platform secure storage and biometric prompt contracts
//!
//! The host application implements these over Android Keystore / iOS Keychain
//! and the platform biometric APIs. In-memory implementations are provided for
//! tests and for hosts without native integration.

use flint_core::{Error, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use zeroize::Zeroizing;

/// Secure key-value store backed by the platform keystore/keychain
pub trait SecureKeyValueStore: Send + Sync {
    /// Read a value
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write a value, replacing any previous one
    fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Remove a value; missing keys are not an error
    fn delete(&self, key: &str) -> Result<()>;
}

/// In-memory secure store
#[derive(Default)]
pub struct MemoryKeyValueStore {
    entries: RwLock<HashMap<String, Zeroizing<Vec<u8>>>>,
    fail_writes: AtomicBool,
}

impl MemoryKeyValueStore {
    /// Create empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `set`/`delete` fail (for testing)
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Whether `key` is present
    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Stored keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Storage("secure store rejected the write".to_string()));
        }
        Ok(())
    }
}

impl SecureKeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).map(|v| v.to_vec()))
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.check_writable()?;
        self.entries
            .write()
            .insert(key.to_string(), Zeroizing::new(value.to_vec()));
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.check_writable()?;
        self.entries.write().remove(key);
        Ok(())
    }
}

/// Result of showing the platform biometric prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptOutcome {
    /// User authenticated
    Success,
    /// User dismissed the prompt
    Cancelled,
    /// Biometric did not match
    Failed,
    /// Prompt could not be shown
    NotAvailable,
}

/// Platform biometric prompt
pub trait BiometricPrompt: Send + Sync {
    /// Device has biometric hardware
    fn has_hardware(&self) -> bool;

    /// At least one biometric is enrolled
    fn is_enrolled(&self) -> bool;

    /// Show the prompt and wait for the user
    fn authenticate(&self, prompt_message: &str) -> PromptOutcome;

    /// Hardware present and enrolled
    fn is_available(&self) -> bool {
        self.has_hardware() && self.is_enrolled()
    }
}

/// Scriptable biometric prompt for testing
pub struct MockBiometricPrompt {
    hardware: AtomicBool,
    enrolled: AtomicBool,
    outcome: Mutex<PromptOutcome>,
    prompts: AtomicU32,
}

impl MockBiometricPrompt {
    /// Available prompt that always succeeds
    pub fn new() -> Self {
        Self {
            hardware: AtomicBool::new(true),
            enrolled: AtomicBool::new(true),
            outcome: Mutex::new(PromptOutcome::Success),
            prompts: AtomicU32::new(0),
        }
    }

    /// Device without biometric hardware
    pub fn without_hardware() -> Self {
        let prompt = Self::new();
        prompt.hardware.store(false, Ordering::SeqCst);
        prompt.enrolled.store(false, Ordering::SeqCst);
        prompt
    }

    /// Set the outcome of subsequent prompts
    pub fn set_outcome(&self, outcome: PromptOutcome) {
        *self.outcome.lock() = outcome;
    }

    /// Set enrollment state
    pub fn set_enrolled(&self, enrolled: bool) {
        self.enrolled.store(enrolled, Ordering::SeqCst);
    }

    /// Number of prompts shown
    pub fn prompt_count(&self) -> u32 {
        self.prompts.load(Ordering::SeqCst)
    }
}

impl Default for MockBiometricPrompt {
    fn default() -> Self {
        Self::new()
    }
}

impl BiometricPrompt for MockBiometricPrompt {
    fn has_hardware(&self) -> bool {
        self.hardware.load(Ordering::SeqCst)
    }

    fn is_enrolled(&self) -> bool {
        self.enrolled.load(Ordering::SeqCst)
    }

    fn authenticate(&self, _prompt_message: &str) -> PromptOutcome {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        if !self.is_available() {
            return PromptOutcome::NotAvailable;
        }
        *self.outcome.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryKeyValueStore::new();
        assert_eq!(store.get("a").unwrap(), None);
        store.set("a", b"one").unwrap();
        store.set("a", b"two").unwrap();
        assert_eq!(store.get("a").unwrap(), Some(b"two".to_vec()));
        store.delete("a").unwrap();
        store.delete("a").unwrap();
        assert!(!store.contains("a"));
    }

    #[test]
    fn test_memory_store_write_failure() {
        let store = MemoryKeyValueStore::new();
        store.set("a", b"one").unwrap();
        store.set_fail_writes(true);
        assert!(matches!(store.set("a", b"two"), Err(Error::Storage(_))));
        assert!(store.delete("a").is_err());
        assert_eq!(store.get("a").unwrap(), Some(b"one".to_vec()));
    }

    #[test]
    fn test_mock_prompt() {
        let prompt = MockBiometricPrompt::new();
        assert!(prompt.is_available());
        assert_eq!(prompt.authenticate("Unlock"), PromptOutcome::Success);

        prompt.set_outcome(PromptOutcome::Cancelled);
        assert_eq!(prompt.authenticate("Unlock"), PromptOutcome::Cancelled);

        prompt.set_enrolled(false);
        assert_eq!(prompt.authenticate("Unlock"), PromptOutcome::NotAvailable);
        assert_eq!(prompt.prompt_count(), 3);

        assert!(!MockBiometricPrompt::without_hardware().is_available());
    }
}
