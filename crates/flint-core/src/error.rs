//! Error types for Flint Core
//!
//! One taxonomy shared by the vault, registry and session layers so callers
//! can match on a single enum for user-facing messaging.

use std::fmt;

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Flint wallet errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Mnemonic failed word-count, wordlist or checksum validation
    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    /// Generation could not produce a self-validating phrase
    #[error("Mnemonic generation failed after {attempts} attempts")]
    MnemonicGeneration {
        /// Attempts made before giving up
        attempts: u32,
    },

    /// Decryption failed: wrong PIN or corrupt ciphertext (deliberately not distinguished)
    #[error("Wrong PIN")]
    WrongPin,

    /// PIN does not have the accepted shape
    #[error("Invalid PIN: {0}")]
    InvalidPin(String),

    /// A master key with the same fingerprint is already registered
    #[error("Wallet already exists: {0}")]
    DuplicateWallet(String),

    /// Sub-wallet creation is gated by policy
    #[error("Sub-wallet creation blocked: {0}")]
    SubWalletCreationBlocked(String),

    /// A mutation would break sub-wallet index contiguity
    #[error("Sub-wallet index invariant violated: {0}")]
    IndexInvariantViolation(String),

    /// The main sub-wallet cannot be archived
    #[error("The main wallet cannot be archived")]
    MainWalletProtected,

    /// Nickname rejected
    #[error("Invalid name: {0}")]
    InvalidName(String),

    /// Master key not found
    #[error("Master key not found: {0}")]
    MasterKeyNotFound(String),

    /// Sub-wallet not found
    #[error("Sub-wallet {index} not found for master key {master_key_id}")]
    SubWalletNotFound {
        /// Owning master key
        master_key_id: String,
        /// Requested index
        index: u32,
    },

    /// No master keys are registered
    #[error("No wallets registered")]
    NoWallets,

    /// Biometric unlock cannot be used right now
    #[error("Biometric unlock unavailable: {0}")]
    BiometricUnavailable(String),

    /// User cancelled the biometric prompt
    #[error("Biometric prompt cancelled")]
    BiometricCancelled,

    /// SDK connect/disconnect/activity call failed or timed out
    #[error("Connection failure: {0}")]
    ConnectionFailure(String),

    /// Operation not permitted in the current session state
    #[error("Invalid session state: {0}")]
    InvalidState(String),

    /// Encryption error
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Secure store error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] flint_params::Error),
}

impl Error {
    /// Check if error is a user-facing error (vs internal error)
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidMnemonic(_)
                | Error::WrongPin
                | Error::InvalidPin(_)
                | Error::DuplicateWallet(_)
                | Error::SubWalletCreationBlocked(_)
                | Error::MainWalletProtected
                | Error::InvalidName(_)
                | Error::BiometricUnavailable(_)
                | Error::BiometricCancelled
                | Error::ConnectionFailure(_)
        )
    }

    /// Errors after which the caller should offer manual PIN entry
    pub fn should_fall_back_to_pin(&self) -> bool {
        matches!(self, Error::BiometricUnavailable(_) | Error::BiometricCancelled)
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Error::InvalidMnemonic(_) => {
                "The recovery phrase is invalid. Please check the words and try again.".to_string()
            }
            Error::WrongPin => "Incorrect PIN. Please try again.".to_string(),
            Error::InvalidPin(_) => format!(
                "Your PIN must be {} to {} digits.",
                flint_params::MIN_PIN_LENGTH,
                flint_params::MAX_PIN_LENGTH
            ),
            Error::DuplicateWallet(_) => "This wallet has already been added.".to_string(),
            // Policy reasons are written for the user already
            Error::SubWalletCreationBlocked(reason) => reason.clone(),
            Error::MainWalletProtected => "The main wallet cannot be archived.".to_string(),
            Error::InvalidName(_) => format!(
                "Names must be between 1 and {} characters.",
                flint_params::MAX_NICKNAME_LENGTH
            ),
            Error::BiometricUnavailable(_) | Error::BiometricCancelled => {
                "Biometric unlock is not available. Please enter your PIN.".to_string()
            }
            Error::ConnectionFailure(_) => {
                "Unable to connect to your wallet. Please check your connection and try again."
                    .to_string()
            }
            _ => self.to_string(),
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InvalidMnemonic(_) | Error::MnemonicGeneration { .. } => ErrorCategory::Mnemonic,
            Error::WrongPin | Error::InvalidPin(_) => ErrorCategory::Authentication,
            Error::BiometricUnavailable(_) | Error::BiometricCancelled => ErrorCategory::Biometric,
            Error::DuplicateWallet(_)
            | Error::SubWalletCreationBlocked(_)
            | Error::MainWalletProtected
            | Error::InvalidName(_)
            | Error::MasterKeyNotFound(_)
            | Error::SubWalletNotFound { .. }
            | Error::NoWallets => ErrorCategory::Wallet,
            Error::ConnectionFailure(_) => ErrorCategory::Connection,
            Error::InvalidState(_) => ErrorCategory::Session,
            Error::Encryption(_) | Error::Storage(_) | Error::Serialization(_) => {
                ErrorCategory::Storage
            }
            Error::IndexInvariantViolation(_) | Error::Config(_) => ErrorCategory::Internal,
        }
    }
}

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Mnemonic generation/validation
    Mnemonic,
    /// PIN checks
    Authentication,
    /// Biometric prompt and storage
    Biometric,
    /// Registry data model
    Wallet,
    /// Lightning SDK connection
    Connection,
    /// Session state machine
    Session,
    /// Persistence and encryption
    Storage,
    /// Bugs and misconfiguration
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Mnemonic => write!(f, "Mnemonic"),
            ErrorCategory::Authentication => write!(f, "Authentication"),
            ErrorCategory::Biometric => write!(f, "Biometric"),
            ErrorCategory::Wallet => write!(f, "Wallet"),
            ErrorCategory::Connection => write!(f, "Connection"),
            ErrorCategory::Session => write!(f, "Session"),
            ErrorCategory::Storage => write!(f, "Storage"),
            ErrorCategory::Internal => write!(f, "Internal"),
        }
    }
}
