//! Sub-wallet creation policy
//!
//! A new sub-wallet may only be derived once the newest one has seen activity.
//! Keeping used indices contiguous lets a restore scan stop at the first
//! empty sub-wallet.

use crate::models::{Activity, MasterKey};
use flint_params::RegistryConfig;
use std::fmt;

/// Why a sub-wallet cannot be added
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    /// Newest sub-wallet has never been checked for activity
    ActivityUnknown {
        /// Its nickname
        nickname: String,
    },
    /// Newest sub-wallet was checked and has no activity
    NoActivity {
        /// Its nickname
        nickname: String,
    },
    /// Master key already holds the maximum number of sub-wallets
    LimitReached {
        /// Configured maximum
        max: u32,
    },
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::ActivityUnknown { nickname } => write!(
                f,
                "We haven't confirmed any activity on \"{}\" yet. Receive a payment there before adding another wallet.",
                nickname
            ),
            BlockReason::NoActivity { nickname } => write!(
                f,
                "Use \"{}\" before adding another wallet.",
                nickname
            ),
            BlockReason::LimitReached { max } => {
                write!(f, "You can have at most {} wallets under one recovery phrase.", max)
            }
        }
    }
}

/// Outcome of the eligibility check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    /// A sub-wallet can be added
    Allowed,
    /// Creation is blocked
    Blocked(BlockReason),
}

impl Eligibility {
    /// True if allowed
    pub fn is_allowed(&self) -> bool {
        matches!(self, Eligibility::Allowed)
    }

    /// User-facing reason, if blocked
    pub fn reason(&self) -> Option<String> {
        match self {
            Eligibility::Allowed => None,
            Eligibility::Blocked(reason) => Some(reason.to_string()),
        }
    }
}

/// Sub-wallet creation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubWalletPolicy {
    /// Bound on active + archived sub-wallets per master key
    pub max_sub_wallets: u32,
}

impl SubWalletPolicy {
    /// Create policy from registry config
    pub fn new(config: &RegistryConfig) -> Self {
        Self {
            max_sub_wallets: config.max_sub_wallets,
        }
    }

    /// Evaluate whether `key` may receive another sub-wallet.
    ///
    /// Only the active set is considered when looking for the newest
    /// sub-wallet; archived entries still count towards the limit.
    pub fn eligibility(&self, key: &MasterKey) -> Eligibility {
        if key.total_sub_wallets() >= self.max_sub_wallets as usize {
            return Eligibility::Blocked(BlockReason::LimitReached {
                max: self.max_sub_wallets,
            });
        }
        let Some(last) = key.last_sub_wallet() else {
            return Eligibility::Allowed;
        };
        match last.activity {
            Activity::Active => Eligibility::Allowed,
            Activity::Unknown => Eligibility::Blocked(BlockReason::ActivityUnknown {
                nickname: last.nickname.clone(),
            }),
            Activity::Inactive => Eligibility::Blocked(BlockReason::NoActivity {
                nickname: last.nickname.clone(),
            }),
        }
    }
}

impl Default for SubWalletPolicy {
    fn default() -> Self {
        Self::new(&RegistryConfig::default())
    }
}
