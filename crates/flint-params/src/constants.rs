//! Fixed wallet constants

/// Nickname given to the sub-wallet at index 0 of every master key.
pub const MAIN_WALLET_NICKNAME: &str = "Main Wallet";

/// Index of the main sub-wallet.
pub const MAIN_WALLET_INDEX: u32 = 0;

/// Number of words in a freshly generated mnemonic.
pub const MNEMONIC_WORD_COUNT: usize = 12;

/// Word counts accepted when importing or validating a mnemonic.
pub const ACCEPTED_WORD_COUNTS: [usize; 2] = [12, 24];

/// Bounded retry count for generate-then-revalidate.
pub const MAX_GENERATION_ATTEMPTS: u32 = 3;

/// Shortest accepted PIN.
pub const MIN_PIN_LENGTH: usize = 4;

/// Longest accepted PIN.
pub const MAX_PIN_LENGTH: usize = 8;

/// Maximum nickname length in characters (after trimming).
pub const MAX_NICKNAME_LENGTH: usize = 32;

/// Salt length for PIN key derivation.
pub const SALT_LENGTH: usize = 32;

/// Most lanes Argon2 accepts.
pub const MAX_KDF_LANES: u32 = 0x00FF_FFFF;

/// AEAD nonce length (ChaCha20-Poly1305 and AES-256-GCM).
pub const NONCE_LENGTH: usize = 12;

/// Current encrypted secret envelope version.
pub const ENVELOPE_VERSION: u8 = 1;

/// Secure-store key holding the registry document.
pub const REGISTRY_STORE_KEY: &str = "flint.registry.v1";

/// Secure-store namespace prefix for biometric-wrapped PINs.
pub const BIOMETRIC_PIN_PREFIX: &str = "biometricPin:";

/// Secure-store key for the biometric PIN of a master key.
pub fn biometric_pin_key(master_key_id: &str) -> String {
    format!("{}{}", BIOMETRIC_PIN_PREFIX, master_key_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_biometric_pin_key_namespace() {
        assert_eq!(biometric_pin_key("abc"), "biometricPin:abc");
    }

    #[test]
    fn test_generated_word_count_is_accepted() {
        assert!(ACCEPTED_WORD_COUNTS.contains(&MNEMONIC_WORD_COUNT));
    }
}
