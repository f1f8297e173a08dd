//! Session layer for Flint
//!
//! Authentication state machine, active wallet switching and background
//! activity sync on top of [`flint_storage::WalletRegistry`]. The Lightning SDK
//! sits behind [`WalletConnector`] and is driven by a single connection actor,
//! so at most one SDK connection exists at any time.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod actor;
pub mod background;
pub mod cancel;
pub mod connector;
pub mod logging;
pub mod session;

pub use background::SyncReport;
pub use cancel::CancelToken;
pub use connector::{ConnectionHandle, WalletActivity, WalletConnector};
#[cfg(feature = "test-helpers")]
pub use connector::{ConnectorCall, MockConnector};
pub use logging::init_logging;
pub use session::{SessionController, SessionState};
