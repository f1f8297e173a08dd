//! PIN-sealed secret vault
//!
//! Stateless per call: every encrypt draws a fresh salt and nonce, every
//! decrypt re-derives the key from the envelope's own salt and KDF
//! parameters. Failed attempts are counted by the caller.

use crate::keystore::SecureKeyValueStore;
use crate::security::{generate_salt, SealingKey};
use flint_core::{EncryptedSecret, Error, MasterKeyId, Result};
use flint_params::{biometric_pin_key, VaultConfig, ENVELOPE_VERSION};
use std::sync::Arc;
use zeroize::Zeroizing;

/// Secret vault
#[derive(Clone)]
pub struct SecretVault {
    store: Arc<dyn SecureKeyValueStore>,
    config: VaultConfig,
}

impl SecretVault {
    /// Create vault over a secure store
    pub fn new(store: Arc<dyn SecureKeyValueStore>, config: VaultConfig) -> Self {
        Self { store, config }
    }

    /// Seal `secret` under `pin`.
    pub fn encrypt(&self, secret: &[u8], pin: &str) -> Result<EncryptedSecret> {
        let salt = generate_salt();
        let key = SealingKey::derive(pin, &salt, &self.config.kdf, self.config.cipher)?;
        let (nonce, ciphertext) = key.seal(secret)?;
        Ok(EncryptedSecret {
            version: ENVELOPE_VERSION,
            cipher: self.config.cipher,
            kdf: self.config.kdf,
            salt: salt.to_vec(),
            nonce,
            ciphertext,
        })
    }

    /// Open `sealed` with `pin`.
    ///
    /// A wrong PIN and a corrupted envelope both fail with [`Error::WrongPin`].
    pub fn decrypt(&self, sealed: &EncryptedSecret, pin: &str) -> Result<Zeroizing<Vec<u8>>> {
        if sealed.version != ENVELOPE_VERSION {
            return Err(Error::Encryption(format!(
                "Unsupported envelope version: {}",
                sealed.version
            )));
        }
        let key = SealingKey::derive(pin, &sealed.salt, &sealed.kdf, sealed.cipher)
            .map_err(|_| Error::WrongPin)?;
        key.open(&sealed.nonce, &sealed.ciphertext)
    }

    /// Save a PIN copy for biometric unlock of `master_key_id`.
    pub fn store_biometric_pin(&self, master_key_id: &MasterKeyId, pin: &str) -> Result<()> {
        self.store
            .set(&biometric_pin_key(master_key_id.as_str()), pin.as_bytes())?;
        tracing::debug!(master_key_id = %master_key_id, "Stored biometric PIN");
        Ok(())
    }

    /// Read the biometric PIN copy, if enrolled.
    pub fn biometric_pin(&self, master_key_id: &MasterKeyId) -> Result<Option<Zeroizing<String>>> {
        let Some(bytes) = self.store.get(&biometric_pin_key(master_key_id.as_str()))? else {
            return Ok(None);
        };
        let bytes = Zeroizing::new(bytes);
        let pin = std::str::from_utf8(&bytes)
            .map_err(|_| Error::Storage("biometric PIN is not UTF-8".to_string()))?;
        Ok(Some(Zeroizing::new(pin.to_string())))
    }

    /// Whether a biometric PIN copy exists.
    pub fn has_biometric_pin(&self, master_key_id: &MasterKeyId) -> Result<bool> {
        Ok(self
            .store
            .get(&biometric_pin_key(master_key_id.as_str()))?
            .is_some())
    }

    /// Remove the biometric PIN copy.
    pub fn delete_biometric_pin(&self, master_key_id: &MasterKeyId) -> Result<()> {
        self.store
            .delete(&biometric_pin_key(master_key_id.as_str()))?;
        tracing::debug!(master_key_id = %master_key_id, "Deleted biometric PIN");
        Ok(())
    }
}
