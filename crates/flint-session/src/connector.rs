//! Lightning SDK boundary
//!
//! The SDK is a black box that can hold one wallet connection at a time.
//! The session only ever talks to it through the connection actor.

use async_trait::async_trait;
use flint_core::{Phrase, Result};

/// Opaque handle to an open SDK connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(pub u64);

/// Activity reported by the SDK for the connected wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalletActivity {
    /// Any on-chain or Lightning transaction has been seen
    pub has_activity: bool,
}

/// Connects the Lightning SDK to a derived sub-wallet
#[async_trait]
pub trait WalletConnector: Send + Sync {
    /// Open a connection for `sub_wallet_index` under `mnemonic`
    async fn connect(&self, mnemonic: &Phrase, sub_wallet_index: u32) -> Result<ConnectionHandle>;

    /// Close a connection
    async fn disconnect(&self, handle: ConnectionHandle) -> Result<()>;

    /// Query activity of the connected wallet
    async fn get_activity(&self, handle: ConnectionHandle) -> Result<WalletActivity>;
}

#[cfg(any(test, feature = "test-helpers"))]
pub use mock::{ConnectorCall, MockConnector};

#[cfg(any(test, feature = "test-helpers"))]
mod mock {
    use super::*;
    use flint_core::{Error, MasterFingerprint, MnemonicService};
    use parking_lot::Mutex;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Call recorded by [`MockConnector`]
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum ConnectorCall {
        /// `connect`
        Connect {
            /// Master fingerprint of the mnemonic
            fingerprint: MasterFingerprint,
            /// Sub-wallet index
            index: u32,
        },
        /// `disconnect`
        Disconnect(ConnectionHandle),
        /// `get_activity`
        Activity(ConnectionHandle),
    }

    #[derive(Default)]
    struct MockState {
        next_handle: u64,
        live: HashMap<ConnectionHandle, (MasterFingerprint, u32)>,
        max_live: usize,
        activity: HashMap<(MasterFingerprint, u32), bool>,
        failing: HashSet<(MasterFingerprint, u32)>,
        fail_next: u32,
        calls: Vec<ConnectorCall>,
    }

    /// In-memory SDK stand-in.
    ///
    /// Wallets are identified by master fingerprint and index so tests never
    /// need to compare phrases.
    #[derive(Default)]
    pub struct MockConnector {
        state: Mutex<MockState>,
        delay: Mutex<Option<Duration>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    struct InFlight<'a>(&'a MockConnector);

    impl<'a> InFlight<'a> {
        fn enter(connector: &'a MockConnector) -> Self {
            let now = connector.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            connector.max_in_flight.fetch_max(now, Ordering::SeqCst);
            Self(connector)
        }
    }

    impl Drop for InFlight<'_> {
        fn drop(&mut self) {
            self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl MockConnector {
        /// Create connector with no activity anywhere
        pub fn new() -> Self {
            Self::default()
        }

        /// Activity the SDK reports for a wallet
        pub fn set_activity(&self, fingerprint: MasterFingerprint, index: u32, has_activity: bool) {
            self.state
                .lock()
                .activity
                .insert((fingerprint, index), has_activity);
        }

        /// Make every connect to this wallet fail
        pub fn fail_connect_to(&self, fingerprint: MasterFingerprint, index: u32) {
            self.state.lock().failing.insert((fingerprint, index));
        }

        /// Make the next `count` connects fail regardless of target
        pub fn fail_next_connects(&self, count: u32) {
            self.state.lock().fail_next = count;
        }

        /// Remove all injected failures
        pub fn clear_failures(&self) {
            let mut state = self.state.lock();
            state.failing.clear();
            state.fail_next = 0;
        }

        /// Delay applied to every call
        pub fn set_delay(&self, delay: Option<Duration>) {
            *self.delay.lock() = delay;
        }

        /// Calls made so far
        pub fn calls(&self) -> Vec<ConnectorCall> {
            self.state.lock().calls.clone()
        }

        /// Number of `connect` calls made so far
        pub fn connect_count(&self) -> usize {
            self.state
                .lock()
                .calls
                .iter()
                .filter(|c| matches!(c, ConnectorCall::Connect { .. }))
                .count()
        }

        /// The single open connection, if exactly one is open
        pub fn current(&self) -> Option<(MasterFingerprint, u32)> {
            let state = self.state.lock();
            if state.live.len() == 1 {
                state.live.values().next().copied()
            } else {
                None
            }
        }

        /// Number of open connections
        pub fn live_connections(&self) -> usize {
            self.state.lock().live.len()
        }

        /// Most connections ever open at once
        pub fn max_live_connections(&self) -> usize {
            self.state.lock().max_live
        }

        /// Most calls ever running at once
        pub fn max_concurrent_calls(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }

        async fn pause(&self) {
            let delay = *self.delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
        }
    }

    #[async_trait]
    impl WalletConnector for MockConnector {
        async fn connect(&self, mnemonic: &Phrase, sub_wallet_index: u32) -> Result<ConnectionHandle> {
            let _guard = InFlight::enter(self);
            let fingerprint = MnemonicService::fingerprint(mnemonic)?;
            self.state.lock().calls.push(ConnectorCall::Connect {
                fingerprint,
                index: sub_wallet_index,
            });
            self.pause().await;

            let mut state = self.state.lock();
            if state.fail_next > 0 {
                state.fail_next -= 1;
                return Err(Error::ConnectionFailure("injected failure".to_string()));
            }
            if state.failing.contains(&(fingerprint, sub_wallet_index)) {
                return Err(Error::ConnectionFailure(format!(
                    "node unreachable for {}/{}",
                    fingerprint, sub_wallet_index
                )));
            }
            state.next_handle += 1;
            let handle = ConnectionHandle(state.next_handle);
            state.live.insert(handle, (fingerprint, sub_wallet_index));
            state.max_live = state.max_live.max(state.live.len());
            Ok(handle)
        }

        async fn disconnect(&self, handle: ConnectionHandle) -> Result<()> {
            let _guard = InFlight::enter(self);
            self.state.lock().calls.push(ConnectorCall::Disconnect(handle));
            self.pause().await;
            self.state.lock().live.remove(&handle);
            Ok(())
        }

        async fn get_activity(&self, handle: ConnectionHandle) -> Result<WalletActivity> {
            let _guard = InFlight::enter(self);
            self.state.lock().calls.push(ConnectorCall::Activity(handle));
            self.pause().await;
            let state = self.state.lock();
            let wallet = state
                .live
                .get(&handle)
                .ok_or_else(|| Error::ConnectionFailure(format!("unknown handle {}", handle.0)))?;
            Ok(WalletActivity {
                has_activity: state.activity.get(wallet).copied().unwrap_or(false),
            })
        }
    }
}
