//! Typed wallet configuration
//!
//! Every section deserializes with defaults, so a partial JSON document only
//! needs to name the values it overrides.

use crate::constants::MAX_KDF_LANES;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Argon2id work factor used to turn a PIN into an encryption key.
///
/// The parameters a ciphertext was sealed with travel inside its envelope,
/// so changing these only affects new encryptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Number of passes
    pub iterations: u32,
    /// Degree of parallelism (lanes)
    pub parallelism: u32,
}

impl KdfParams {
    /// PIN profile: 16 MiB, 2 iterations, 2 lanes
    pub const PIN: Self = Self {
        memory_kib: 16384,
        iterations: 2,
        parallelism: 2,
    };

    fn validate(&self) -> Result<()> {
        if self.parallelism == 0 {
            return Err(Error::InvalidValue {
                field: "vault.kdf.parallelism",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.iterations == 0 {
            return Err(Error::InvalidValue {
                field: "vault.kdf.iterations",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.parallelism > MAX_KDF_LANES {
            return Err(Error::InvalidValue {
                field: "vault.kdf.parallelism",
                reason: format!("must be at most {}", MAX_KDF_LANES),
            });
        }
        // Argon2 requires 8 KiB per lane
        let min_memory_kib = self.parallelism.saturating_mul(8);
        if self.memory_kib < min_memory_kib {
            return Err(Error::InvalidValue {
                field: "vault.kdf.memory_kib",
                reason: format!("must be at least {} KiB", min_memory_kib),
            });
        }
        Ok(())
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::PIN
    }
}

/// Authenticated cipher used for sealing secrets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CipherSuite {
    /// ChaCha20-Poly1305
    #[default]
    ChaCha20Poly1305,
    /// AES-256-GCM
    Aes256Gcm,
}

/// Secret vault settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Key derivation work factor
    pub kdf: KdfParams,
    /// Cipher for new encryptions
    pub cipher: CipherSuite,
}

/// Wallet registry settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Upper bound on sub-wallets per master key (active + archived)
    pub max_sub_wallets: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_sub_wallets: 20,
        }
    }
}

/// Session controller settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Timeout applied to every SDK connect/disconnect/activity call
    pub connect_timeout_secs: u64,
    /// Message shown by the platform biometric prompt
    pub biometric_prompt_message: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            biometric_prompt_message: "Unlock your wallet".to_string(),
        }
    }
}

/// Background activity sync settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Run the periodic sync task at all
    pub enabled: bool,
    /// Seconds between sync passes
    pub interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 15 * 60,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `flint_session=debug`
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlintConfig {
    /// Vault settings
    pub vault: VaultConfig,
    /// Registry settings
    pub registry: RegistryConfig,
    /// Session settings
    pub session: SessionConfig,
    /// Sync settings
    pub sync: SyncConfig,
    /// Logging settings
    pub logging: LoggingConfig,
}

impl FlintConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        self.vault.kdf.validate()?;
        if self.registry.max_sub_wallets == 0 {
            return Err(Error::InvalidValue {
                field: "registry.max_sub_wallets",
                reason: "must allow at least the main wallet".to_string(),
            });
        }
        if self.session.connect_timeout_secs == 0 {
            return Err(Error::InvalidValue {
                field: "session.connect_timeout_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.sync.enabled && self.sync.interval_secs == 0 {
            return Err(Error::InvalidValue {
                field: "sync.interval_secs",
                reason: "must be greater than zero when sync is enabled".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FlintConfig::default();
        assert_eq!(config.vault.kdf, KdfParams::PIN);
        assert_eq!(config.vault.cipher, CipherSuite::ChaCha20Poly1305);
        assert_eq!(config.registry.max_sub_wallets, 20);
        assert_eq!(config.session.connect_timeout_secs, 30);
        assert_eq!(config.sync.interval_secs, 900);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config = FlintConfig::from_json(
            r#"{ "vault": { "cipher": "aes256_gcm" }, "registry": { "max_sub_wallets": 5 } }"#,
        )
        .unwrap();
        assert_eq!(config.vault.cipher, CipherSuite::Aes256Gcm);
        assert_eq!(config.vault.kdf, KdfParams::PIN);
        assert_eq!(config.registry.max_sub_wallets, 5);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_rejects_lane_count_beyond_argon2_limit() {
        let err = FlintConfig::from_json(
            r#"{ "vault": { "kdf": { "memory_kib": 65536, "iterations": 1, "parallelism": 4294967295 } } }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("vault.kdf.parallelism"));

        let kdf = KdfParams {
            memory_kib: 65536,
            iterations: 1,
            parallelism: MAX_KDF_LANES,
        };
        assert!(kdf.validate().unwrap_err().to_string().contains("vault.kdf.memory_kib"));
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        let err = FlintConfig::from_json(
            r#"{ "vault": { "kdf": { "memory_kib": 4, "iterations": 1, "parallelism": 1 } } }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("vault.kdf.memory_kib"));

        assert!(FlintConfig::from_json(r#"{ "registry": { "max_sub_wallets": 0 } }"#).is_err());
        assert!(FlintConfig::from_json(r#"{ "sync": { "interval_secs": 0 } }"#).is_err());
        assert!(FlintConfig::from_json(r#"{ "sync": { "enabled": false, "interval_secs": 0 } }"#).is_ok());
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(FlintConfig::from_json("{"), Err(Error::Parse(_))));
    }
}
