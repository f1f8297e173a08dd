//! Security and encryption primitives
//!
//! Argon2id PIN derivation and AES-256-GCM / ChaCha20-Poly1305 sealing.
//! Derived keys live in zeroize-on-drop buffers.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm,
};
use argon2::{Argon2, ParamsBuilder, Version};
use chacha20poly1305::ChaCha20Poly1305;
use flint_core::{Error, Result};
use flint_params::{CipherSuite, KdfParams, MAX_PIN_LENGTH, MIN_PIN_LENGTH, NONCE_LENGTH, SALT_LENGTH};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

/// Associated data bound into every vault ciphertext
pub const VAULT_AAD: &[u8] = b"flint-vault-v1";

/// Generate a random KDF salt
pub fn generate_salt() -> [u8; SALT_LENGTH] {
    let mut salt = [0u8; SALT_LENGTH];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Generate a random AEAD nonce
pub fn generate_nonce() -> [u8; NONCE_LENGTH] {
    let mut nonce = [0u8; NONCE_LENGTH];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Derive raw key bytes from a PIN using Argon2id.
pub fn derive_key_bytes(pin: &str, salt: &[u8], kdf: &KdfParams) -> Result<Zeroizing<[u8; 32]>> {
    if salt.len() < 16 {
        return Err(Error::Encryption("Salt too short".to_string()));
    }

    let params = ParamsBuilder::new()
        .m_cost(kdf.memory_kib)
        .t_cost(kdf.iterations)
        .p_cost(kdf.parallelism)
        .output_len(32)
        .build()
        .map_err(|e| Error::Encryption(e.to_string()))?;

    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params);

    let mut key = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(pin.as_bytes(), salt, &mut *key)
        .map_err(|e| Error::Encryption(e.to_string()))?;
    Ok(key)
}

/// PIN-derived symmetric key
pub struct SealingKey {
    key: Zeroizing<[u8; 32]>,
    cipher: CipherSuite,
}

impl SealingKey {
    /// Derive a key from `pin` and `salt`.
    pub fn derive(pin: &str, salt: &[u8], kdf: &KdfParams, cipher: CipherSuite) -> Result<Self> {
        Ok(Self {
            key: derive_key_bytes(pin, salt, kdf)?,
            cipher,
        })
    }

    /// Encrypt under a fresh nonce. Returns `(nonce, ciphertext)`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
        let nonce = generate_nonce();
        let payload = Payload {
            msg: plaintext,
            aad: VAULT_AAD,
        };
        let ciphertext = match self.cipher {
            CipherSuite::Aes256Gcm => Aes256Gcm::new_from_slice(&self.key[..])
                .map_err(|e| Error::Encryption(e.to_string()))?
                .encrypt(aes_gcm::Nonce::from_slice(&nonce), payload),
            CipherSuite::ChaCha20Poly1305 => ChaCha20Poly1305::new_from_slice(&self.key[..])
                .map_err(|e| Error::Encryption(e.to_string()))?
                .encrypt(chacha20poly1305::Nonce::from_slice(&nonce), payload),
        }
        .map_err(|e| Error::Encryption(e.to_string()))?;
        Ok((nonce.to_vec(), ciphertext))
    }

    /// Decrypt and authenticate.
    ///
    /// Every failure, including a malformed nonce, is reported as
    /// [`Error::WrongPin`].
    pub fn open(&self, nonce: &[u8], ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        if nonce.len() != NONCE_LENGTH {
            return Err(Error::WrongPin);
        }
        let payload = Payload {
            msg: ciphertext,
            aad: VAULT_AAD,
        };
        let plaintext = match self.cipher {
            CipherSuite::Aes256Gcm => Aes256Gcm::new_from_slice(&self.key[..])
                .map_err(|_| Error::WrongPin)?
                .decrypt(aes_gcm::Nonce::from_slice(nonce), payload),
            CipherSuite::ChaCha20Poly1305 => ChaCha20Poly1305::new_from_slice(&self.key[..])
                .map_err(|_| Error::WrongPin)?
                .decrypt(chacha20poly1305::Nonce::from_slice(nonce), payload),
        }
        .map_err(|_| Error::WrongPin)?;
        Ok(Zeroizing::new(plaintext))
    }
}

/// Check that a new PIN is 4-8 ASCII digits.
pub fn validate_pin(pin: &str) -> Result<()> {
    if pin.len() < MIN_PIN_LENGTH || pin.len() > MAX_PIN_LENGTH {
        return Err(Error::InvalidPin(format!(
            "PIN must be {}-{} digits",
            MIN_PIN_LENGTH, MAX_PIN_LENGTH
        )));
    }
    if !pin.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::InvalidPin("PIN must contain only digits".to_string()));
    }
    Ok(())
}
