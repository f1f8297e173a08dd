//! BIP-39 mnemonic generation, validation and normalization
//!
//! Pure functions with no I/O. Randomness is only used by generation, and a
//! generated phrase is re-validated against its own re-serialization before
//! it is ever handed to a caller.

use crate::{Error, Result};
use bip39::{Language, Mnemonic};
use flint_params::{ACCEPTED_WORD_COUNTS, MAX_GENERATION_ATTEMPTS, MNEMONIC_WORD_COUNT};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroizing;

/// A normalized mnemonic phrase.
///
/// The words are held in zeroize-on-drop memory and never printed by `Debug`.
#[derive(Clone)]
pub struct Phrase(Zeroizing<String>);

impl Phrase {
    /// Phrase as a single space-separated string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Individual words
    pub fn words(&self) -> Vec<&str> {
        self.0.split(' ').collect()
    }

    /// Number of words
    pub fn word_count(&self) -> usize {
        self.0.split(' ').count()
    }

    /// Rebuild a phrase from decrypted vault bytes.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| Error::InvalidMnemonic("stored phrase is not UTF-8".to_string()))?;
        MnemonicService::parse(text)
    }
}

impl fmt::Debug for Phrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Phrase(<{} words redacted>)", self.word_count())
    }
}

impl PartialEq for Phrase {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for Phrase {}

/// BIP-32 master public-key fingerprint of a mnemonic (empty BIP-39 passphrase).
///
/// Used to detect duplicate imports without comparing plaintext phrases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MasterFingerprint([u8; 4]);

impl MasterFingerprint {
    /// Raw fingerprint bytes
    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl fmt::Display for MasterFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for MasterFingerprint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut bytes = [0u8; 4];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| Error::Storage(format!("Invalid fingerprint {s:?}: {e}")))?;
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for MasterFingerprint {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<MasterFingerprint> for String {
    fn from(value: MasterFingerprint) -> Self {
        value.to_string()
    }
}

/// Terminal failure of [`retry_bounded`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryExhausted {
    /// Attempts made
    pub attempts: u32,
}

/// Run `attempt` until it yields a value, at most `max_attempts` times.
///
/// The closure receives the 1-based attempt number.
pub fn retry_bounded<T>(
    max_attempts: u32,
    mut attempt: impl FnMut(u32) -> Option<T>,
) -> std::result::Result<T, RetryExhausted> {
    for n in 1..=max_attempts {
        if let Some(value) = attempt(n) {
            return Ok(value);
        }
        tracing::warn!(attempt = n, max_attempts, "Retryable attempt produced no value");
    }
    Err(RetryExhausted {
        attempts: max_attempts,
    })
}

/// Mnemonic service
pub struct MnemonicService;

impl MnemonicService {
    /// Generate a new 12-word phrase.
    pub fn generate() -> Result<Phrase> {
        Self::generate_with_word_count(MNEMONIC_WORD_COUNT)
    }

    /// Generate a phrase with 12 or 24 words.
    ///
    /// Each candidate must survive a split/join round-trip and re-validation
    /// before it is returned; after `MAX_GENERATION_ATTEMPTS` failures the
    /// call fails with [`Error::MnemonicGeneration`].
    pub fn generate_with_word_count(word_count: usize) -> Result<Phrase> {
        let entropy_len = match word_count {
            12 => 16,
            24 => 32,
            other => {
                return Err(Error::InvalidMnemonic(format!(
                    "cannot generate a {other}-word phrase"
                )))
            }
        };

        retry_bounded(MAX_GENERATION_ATTEMPTS, |_| {
            let mut entropy = Zeroizing::new(vec![0u8; entropy_len]);
            OsRng.fill_bytes(&mut entropy);
            let candidate = match Mnemonic::from_entropy(&entropy) {
                Ok(mnemonic) => Zeroizing::new(mnemonic.to_string()),
                Err(e) => {
                    tracing::warn!("Entropy rejected by BIP-39 encoder: {}", e);
                    return None;
                }
            };
            Self::self_check(&candidate, word_count)
        })
        .map_err(|exhausted| Error::MnemonicGeneration {
            attempts: exhausted.attempts,
        })
    }

    fn self_check(candidate: &str, expected_words: usize) -> Option<Phrase> {
        let rejoined = Zeroizing::new(candidate.split_whitespace().collect::<Vec<_>>().join(" "));
        if rejoined.as_str() != candidate {
            return None;
        }
        if !Self::validate(&rejoined) {
            return None;
        }
        let phrase = Phrase(rejoined);
        (phrase.word_count() == expected_words).then_some(phrase)
    }

    /// Check wordlist membership and checksum of a 12 or 24-word phrase.
    ///
    /// The phrase is checked as given; use [`MnemonicService::normalize`]
    /// first for user input.
    pub fn validate(phrase: &str) -> bool {
        match Mnemonic::parse_in_normalized(Language::English, phrase) {
            Ok(mnemonic) => ACCEPTED_WORD_COUNTS.contains(&mnemonic.word_count()),
            Err(_) => false,
        }
    }

    /// Lowercase, collapse whitespace and require 12 or 24 words.
    ///
    /// Does not verify the checksum.
    pub fn normalize(text: &str) -> Result<Phrase> {
        let lowered = Zeroizing::new(text.to_lowercase());
        let normalized = Zeroizing::new(lowered.split_whitespace().collect::<Vec<_>>().join(" "));
        let count = if normalized.is_empty() {
            0
        } else {
            normalized.split(' ').count()
        };
        if !ACCEPTED_WORD_COUNTS.contains(&count) {
            return Err(Error::InvalidMnemonic(format!(
                "expected 12 or 24 words, got {count}"
            )));
        }
        Ok(Phrase(normalized))
    }

    /// Normalize and fully validate user input.
    pub fn parse(text: &str) -> Result<Phrase> {
        let phrase = Self::normalize(text)?;
        if !Self::validate(phrase.as_str()) {
            return Err(Error::InvalidMnemonic(
                "unknown word or checksum mismatch".to_string(),
            ));
        }
        Ok(phrase)
    }

    /// Derive the BIP-32 master fingerprint of a phrase.
    pub fn fingerprint(phrase: &Phrase) -> Result<MasterFingerprint> {
        let mnemonic = Mnemonic::parse_in_normalized(Language::English, phrase.as_str())
            .map_err(|e| Error::InvalidMnemonic(e.to_string()))?;
        let seed = Zeroizing::new(mnemonic.to_seed_normalized(""));
        let xprv = bip32::XPrv::new(&*seed)
            .map_err(|e| Error::InvalidMnemonic(format!("master key derivation failed: {e}")))?;
        Ok(MasterFingerprint(xprv.public_key().fingerprint()))
    }
}
