//! Authentication and wallet-switching state machine
//!
//! One `SessionController` is constructed at process start with its
//! collaborators injected and shared by reference. Foreground operations are
//! serialized by an async mutex; the SDK connection itself is owned by the
//! connection actor. A failed operation never leaves a transitional state
//! behind: the prior state is restored unless the operation commits a new one.

use crate::actor::{ConnectionClient, SwitchFailure, Target};
use crate::cancel::CancelToken;
use crate::connector::WalletConnector;
use chrono::{DateTime, Utc};
use flint_core::{ActiveSelection, Activity, Error, MasterKeyId, Phrase, Result};
use flint_params::SessionConfig;
use flint_storage::{BiometricPrompt, DeleteOutcome, PromptOutcome, WalletRegistry};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use zeroize::Zeroizing;

/// Session state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No wallet is open
    Locked,
    /// First unlock in progress
    Unlocking,
    /// A wallet is open and connected
    Unlocked {
        /// Active master key
        master_key_id: MasterKeyId,
        /// Active sub-wallet
        sub_wallet_index: u32,
    },
    /// Moving from one wallet to another
    Switching {
        /// Wallet that stays active if the switch fails
        from: ActiveSelection,
        /// Requested wallet
        to: ActiveSelection,
    },
}

impl SessionState {
    /// Active wallet, if unlocked
    pub fn active(&self) -> Option<ActiveSelection> {
        match self {
            SessionState::Unlocked {
                master_key_id,
                sub_wallet_index,
            } => Some(ActiveSelection::new(master_key_id.clone(), *sub_wallet_index)),
            _ => None,
        }
    }

    /// True when locked
    pub fn is_locked(&self) -> bool {
        matches!(self, SessionState::Locked)
    }

    fn unlocked(selection: &ActiveSelection) -> Self {
        SessionState::Unlocked {
            master_key_id: selection.master_key_id.clone(),
            sub_wallet_index: selection.sub_wallet_index,
        }
    }
}

struct Inner {
    state: SessionState,
    session_pin: Option<Zeroizing<String>>,
    unlocked_at: Option<DateTime<Utc>>,
}

impl Inner {
    fn clear(&mut self) {
        self.state = SessionState::Locked;
        self.session_pin = None;
        self.unlocked_at = None;
    }
}

/// Puts the prior state back unless committed.
struct Transition<'a> {
    inner: &'a RwLock<Inner>,
    prior: SessionState,
    committed: bool,
}

impl<'a> Transition<'a> {
    fn begin(inner: &'a RwLock<Inner>, transitional: SessionState) -> Self {
        let prior = std::mem::replace(&mut inner.write().state, transitional);
        Self {
            inner,
            prior,
            committed: false,
        }
    }

    fn commit(mut self, apply: impl FnOnce(&mut Inner)) {
        apply(&mut *self.inner.write());
        self.committed = true;
    }
}

impl Drop for Transition<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.inner.write().state = self.prior.clone();
        }
    }
}

/// Bookkeeping shared between foreground operations and sync runs
#[derive(Default)]
pub(crate) struct SyncCoordinator {
    /// Token handed to sync runs; replaced whenever a foreground op preempts
    pub current: Mutex<CancelToken>,
    /// Master keys with a probe in progress
    pub in_flight: Mutex<HashSet<MasterKeyId>>,
}

/// Session controller
pub struct SessionController {
    pub(crate) registry: Arc<WalletRegistry>,
    biometric: Arc<dyn BiometricPrompt>,
    pub(crate) connection: ConnectionClient,
    config: SessionConfig,
    inner: RwLock<Inner>,
    op_lock: tokio::sync::Mutex<()>,
    failed_attempts: AtomicU32,
    pub(crate) sync: SyncCoordinator,
}

impl SessionController {
    /// Create a locked session.
    ///
    /// Spawns the connection actor, so this must run inside a tokio runtime.
    pub fn new(
        registry: Arc<WalletRegistry>,
        connector: Arc<dyn WalletConnector>,
        biometric: Arc<dyn BiometricPrompt>,
        config: SessionConfig,
    ) -> Self {
        let connection =
            ConnectionClient::spawn(connector, Duration::from_secs(config.connect_timeout_secs));
        Self {
            registry,
            biometric,
            connection,
            config,
            inner: RwLock::new(Inner {
                state: SessionState::Locked,
                session_pin: None,
                unlocked_at: None,
            }),
            op_lock: tokio::sync::Mutex::new(()),
            failed_attempts: AtomicU32::new(0),
            sync: SyncCoordinator::default(),
        }
    }

    /// Wallet registry
    pub fn registry(&self) -> &Arc<WalletRegistry> {
        &self.registry
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.inner.read().state.clone()
    }

    /// Active wallet, if unlocked
    pub fn active(&self) -> Option<ActiveSelection> {
        self.inner.read().state.active()
    }

    /// When the current session was unlocked
    pub fn unlocked_at(&self) -> Option<DateTime<Utc>> {
        self.inner.read().unlocked_at
    }

    /// Consecutive wrong PIN entries since the last successful unlock.
    ///
    /// Exposed for the presentation layer; no lockout is enforced here.
    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts.load(Ordering::SeqCst)
    }

    /// Session PIN, only while `master_key_id` is the unlocked key.
    pub(crate) fn session_pin(&self, master_key_id: &MasterKeyId) -> Option<Zeroizing<String>> {
        let inner = self.inner.read();
        match &inner.state {
            SessionState::Unlocked {
                master_key_id: active,
                ..
            } if active == master_key_id => inner.session_pin.clone(),
            _ => None,
        }
    }

    /// Cancel any running sync so it yields the connection.
    pub(crate) fn preempt_sync(&self) {
        let mut current = self.sync.current.lock();
        current.cancel();
        *current = CancelToken::new();
    }

    pub(crate) async fn decrypt(&self, master_key_id: &MasterKeyId, pin: &str) -> Result<Phrase> {
        let registry = self.registry.clone();
        let id = master_key_id.clone();
        let pin = Zeroizing::new(pin.to_string());
        tokio::task::spawn_blocking(move || registry.get_mnemonic(&id, &pin))
            .await
            .map_err(|e| Error::InvalidState(format!("decrypt task failed: {}", e)))?
    }

    async fn decrypt_counted(&self, master_key_id: &MasterKeyId, pin: &str) -> Result<Phrase> {
        let result = self.decrypt(master_key_id, pin).await;
        if matches!(result, Err(Error::WrongPin)) {
            let attempts = self.failed_attempts.fetch_add(1, Ordering::SeqCst) + 1;
            warn!(master_key_id = %master_key_id, attempts, "Wrong PIN");
        }
        result
    }

    fn remember(&self, selection: &ActiveSelection) {
        if let Err(e) = self.registry.set_last_active(selection) {
            warn!(selection = %selection, "Failed to persist active wallet: {}", e);
        }
    }

    /// Unlock the last active wallet with a PIN.
    pub async fn unlock(&self, pin: &str) -> Result<()> {
        let _op = self.op_lock.lock().await;
        self.unlock_locked(pin).await
    }

    async fn unlock_locked(&self, pin: &str) -> Result<()> {
        if !self.state().is_locked() {
            return Err(Error::InvalidState("session is already unlocked".to_string()));
        }
        let selection = self.registry.last_active().ok_or(Error::NoWallets)?;

        let transition = Transition::begin(&self.inner, SessionState::Unlocking);
        let mnemonic = self.decrypt_counted(&selection.master_key_id, pin).await?;
        self.preempt_sync();
        self.connection
            .connect(Target {
                selection: selection.clone(),
                mnemonic,
            })
            .await
            .map_err(|failure| failure.error)?;

        transition.commit(|inner| {
            inner.state = SessionState::unlocked(&selection);
            inner.session_pin = Some(Zeroizing::new(pin.to_string()));
            inner.unlocked_at = Some(Utc::now());
        });
        self.failed_attempts.store(0, Ordering::SeqCst);
        self.remember(&selection);
        info!(selection = %selection, "Session unlocked");
        Ok(())
    }

    /// Unlock using the biometric-stored PIN of the last active wallet.
    ///
    /// Cancelling the prompt leaves the session locked with
    /// [`Error::BiometricCancelled`]; the caller falls back to PIN entry.
    pub async fn unlock_with_biometric(&self) -> Result<()> {
        let _op = self.op_lock.lock().await;
        if !self.state().is_locked() {
            return Err(Error::InvalidState("session is already unlocked".to_string()));
        }
        if !self.biometric_available() {
            return Err(Error::BiometricUnavailable(
                "no enrolled biometric on this device".to_string(),
            ));
        }
        let selection = self.registry.last_active().ok_or(Error::NoWallets)?;
        if !self.biometric_enabled(&selection.master_key_id)? {
            return Err(Error::BiometricUnavailable(
                "biometric unlock is not enabled for this wallet".to_string(),
            ));
        }

        match self.prompt().await? {
            PromptOutcome::Success => {}
            PromptOutcome::Cancelled => return Err(Error::BiometricCancelled),
            PromptOutcome::Failed => {
                return Err(Error::BiometricUnavailable("biometric not recognized".to_string()))
            }
            PromptOutcome::NotAvailable => {
                return Err(Error::BiometricUnavailable("prompt unavailable".to_string()))
            }
        }

        let pin = self
            .registry
            .vault()
            .biometric_pin(&selection.master_key_id)?
            .ok_or_else(|| Error::BiometricUnavailable("stored PIN missing".to_string()))?;
        self.unlock_locked(&pin).await
    }

    async fn prompt(&self) -> Result<PromptOutcome> {
        let biometric = self.biometric.clone();
        let message = self.config.biometric_prompt_message.clone();
        tokio::task::spawn_blocking(move || biometric.authenticate(&message))
            .await
            .map_err(|e| Error::InvalidState(format!("biometric prompt task failed: {}", e)))
    }

    /// Open another master key.
    ///
    /// The target is decrypted with `pin`, never with the current session
    /// PIN. On any failure the previous state is kept, unless the previous
    /// connection could not be restored, in which case the session locks.
    pub async fn select_wallet(
        &self,
        master_key_id: &MasterKeyId,
        sub_wallet_index: u32,
        pin: &str,
    ) -> Result<()> {
        let _op = self.op_lock.lock().await;
        let target = ActiveSelection::new(master_key_id.clone(), sub_wallet_index);
        let transitional = match self.state() {
            SessionState::Locked => SessionState::Unlocking,
            SessionState::Unlocked {
                master_key_id: from_id,
                sub_wallet_index: from_index,
            } => SessionState::Switching {
                from: ActiveSelection::new(from_id, from_index),
                to: target.clone(),
            },
            other => {
                return Err(Error::InvalidState(format!(
                    "cannot switch wallets while {:?}",
                    other
                )))
            }
        };
        if !self
            .registry
            .is_active_sub_wallet(master_key_id, sub_wallet_index)?
        {
            return Err(Error::SubWalletNotFound {
                master_key_id: master_key_id.to_string(),
                index: sub_wallet_index,
            });
        }

        let transition = Transition::begin(&self.inner, transitional);
        let mnemonic = self.decrypt_counted(master_key_id, pin).await?;
        self.preempt_sync();
        let result = self
            .connection
            .connect(Target {
                selection: target.clone(),
                mnemonic,
            })
            .await;
        self.finish_switch(transition, &target, Some(pin), result)?;

        self.failed_attempts.store(0, Ordering::SeqCst);
        self.remember(&target);
        info!(selection = %target, "Wallet selected");
        Ok(())
    }

    /// Switch to another sub-wallet of the unlocked master key. No PIN needed.
    pub async fn select_sub_wallet(&self, sub_wallet_index: u32) -> Result<()> {
        let _op = self.op_lock.lock().await;
        let from = self
            .active()
            .ok_or_else(|| Error::InvalidState("session is locked".to_string()))?;
        if from.sub_wallet_index == sub_wallet_index {
            return Ok(());
        }
        let target = ActiveSelection::new(from.master_key_id.clone(), sub_wallet_index);
        if !self
            .registry
            .is_active_sub_wallet(&target.master_key_id, sub_wallet_index)?
        {
            return Err(Error::SubWalletNotFound {
                master_key_id: target.master_key_id.to_string(),
                index: sub_wallet_index,
            });
        }

        let transition = Transition::begin(
            &self.inner,
            SessionState::Switching {
                from,
                to: target.clone(),
            },
        );
        self.preempt_sync();
        let result = self.connection.reindex(sub_wallet_index).await;
        self.finish_switch(transition, &target, None, result)?;

        self.remember(&target);
        info!(selection = %target, "Sub-wallet selected");
        Ok(())
    }

    fn finish_switch(
        &self,
        transition: Transition<'_>,
        target: &ActiveSelection,
        pin: Option<&str>,
        result: std::result::Result<(), SwitchFailure>,
    ) -> Result<()> {
        match result {
            Ok(()) => {
                transition.commit(|inner| {
                    inner.state = SessionState::unlocked(target);
                    if let Some(pin) = pin {
                        inner.session_pin = Some(Zeroizing::new(pin.to_string()));
                    }
                    if inner.unlocked_at.is_none() {
                        inner.unlocked_at = Some(Utc::now());
                    }
                });
                Ok(())
            }
            // Dropping the transition puts the previous wallet back
            Err(SwitchFailure {
                error,
                restored: true,
            }) => Err(error),
            Err(SwitchFailure {
                error,
                restored: false,
            }) => {
                warn!(selection = %target, "Switch failed without a connection to fall back to, locking");
                transition.commit(Inner::clear);
                Err(error)
            }
        }
    }

    /// Lock the session. Idempotent.
    pub async fn lock(&self) {
        self.preempt_sync();
        let _op = self.op_lock.lock().await;
        self.lock_locked().await;
    }

    async fn lock_locked(&self) {
        if self.state().is_locked() {
            return;
        }
        self.inner.write().clear();
        self.connection.disconnect().await;
        info!("Session locked");
    }

    /// Decrypt the active master key's mnemonic after re-entering the PIN.
    pub async fn reveal_mnemonic(&self, pin: &str) -> Result<Phrase> {
        let active = self
            .active()
            .ok_or_else(|| Error::InvalidState("session is locked".to_string()))?;
        self.decrypt_counted(&active.master_key_id, pin).await
    }

    /// Device has enrolled biometric hardware
    pub fn biometric_available(&self) -> bool {
        self.biometric.is_available()
    }

    /// Biometric unlock is set up for `master_key_id`
    pub fn biometric_enabled(&self, master_key_id: &MasterKeyId) -> Result<bool> {
        self.registry.vault().has_biometric_pin(master_key_id)
    }

    /// Store a PIN copy for biometric unlock after checking it decrypts the key.
    pub async fn enable_biometric(&self, master_key_id: &MasterKeyId, pin: &str) -> Result<()> {
        if !self.biometric_available() {
            return Err(Error::BiometricUnavailable(
                "no enrolled biometric on this device".to_string(),
            ));
        }
        self.decrypt_counted(master_key_id, pin).await?;
        self.registry.vault().store_biometric_pin(master_key_id, pin)?;
        info!(master_key_id = %master_key_id, "Biometric unlock enabled");
        Ok(())
    }

    /// Remove the biometric PIN copy.
    pub fn disable_biometric(&self, master_key_id: &MasterKeyId) -> Result<()> {
        self.registry.vault().delete_biometric_pin(master_key_id)?;
        info!(master_key_id = %master_key_id, "Biometric unlock disabled");
        Ok(())
    }

    /// Change the PIN of a master key, updating the session PIN if it is active.
    pub async fn change_pin(
        &self,
        master_key_id: &MasterKeyId,
        old_pin: &str,
        new_pin: &str,
    ) -> Result<()> {
        let _op = self.op_lock.lock().await;
        let registry = self.registry.clone();
        let id = master_key_id.clone();
        let old_pin_owned = Zeroizing::new(old_pin.to_string());
        let new_pin_owned = Zeroizing::new(new_pin.to_string());
        let result = tokio::task::spawn_blocking(move || {
            registry.change_pin(&id, &old_pin_owned, &new_pin_owned)
        })
        .await
        .map_err(|e| Error::InvalidState(format!("change PIN task failed: {}", e)))?;
        if matches!(result, Err(Error::WrongPin)) {
            self.failed_attempts.fetch_add(1, Ordering::SeqCst);
        }
        result?;

        let mut inner = self.inner.write();
        let is_active = matches!(
            &inner.state,
            SessionState::Unlocked { master_key_id: active, .. } if active == master_key_id
        );
        if is_active {
            inner.session_pin = Some(Zeroizing::new(new_pin.to_string()));
        }
        Ok(())
    }

    /// Delete a master key, locking first if it is the open one.
    pub async fn delete_master_key(&self, master_key_id: &MasterKeyId, pin: &str) -> Result<DeleteOutcome> {
        let _op = self.op_lock.lock().await;
        let registry = self.registry.clone();
        let id = master_key_id.clone();
        let pin = Zeroizing::new(pin.to_string());
        let outcome = tokio::task::spawn_blocking(move || registry.delete_master_key(&id, &pin))
            .await
            .map_err(|e| Error::InvalidState(format!("delete task failed: {}", e)))??;

        let was_open = self
            .active()
            .is_some_and(|active| &active.master_key_id == master_key_id);
        if was_open {
            self.preempt_sync();
            self.lock_locked().await;
        }
        Ok(outcome)
    }

    /// Make sure an unlocked session still has its wallet connected.
    ///
    /// Runs under the op lock after a sync was preempted or failed to put the
    /// previous connection back. Locks if the wallet cannot be reconnected.
    pub(crate) async fn settle_connection(&self) {
        let _op = self.op_lock.lock().await;
        let Some(active) = self.active() else {
            return;
        };
        match self.connection.reconcile().await {
            Ok(Some(connected)) if connected == active => {}
            Ok(connected) => {
                warn!(selection = %active, ?connected, "Connection does not match session, locking");
                self.lock_locked().await;
            }
            Err(e) => {
                warn!(selection = %active, "Wallet could not be reconnected, locking: {}", e);
                self.lock_locked().await;
            }
        }
    }

    /// Query the SDK for activity of the open wallet and record it.
    pub async fn refresh_activity(&self) -> Result<Activity> {
        let _op = self.op_lock.lock().await;
        let active = self
            .active()
            .ok_or_else(|| Error::InvalidState("session is locked".to_string()))?;
        self.preempt_sync();
        let activity = match self.connection.activity().await {
            Ok(activity) => activity,
            Err(SwitchFailure { error, restored: true }) => return Err(error),
            Err(SwitchFailure { error, restored: false }) => {
                warn!(selection = %active, "Connection lost, locking");
                self.lock_locked().await;
                return Err(error);
            }
        };
        self.registry
            .mark_activity(&active.master_key_id, active.sub_wallet_index, activity.has_activity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::MockConnector;
    use flint_params::{FlintConfig, KdfParams};
    use flint_storage::{MemoryKeyValueStore, MockBiometricPrompt};

    const PHRASE: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn controller() -> (SessionController, MasterKeyId) {
        let mut config = FlintConfig::default();
        config.vault.kdf = KdfParams {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        };
        let registry =
            Arc::new(WalletRegistry::open(Arc::new(MemoryKeyValueStore::new()), &config).unwrap());
        let id = registry.import_master_key(PHRASE, "1234", None).unwrap().id;
        let session = SessionController::new(
            registry,
            Arc::new(MockConnector::new()),
            Arc::new(MockBiometricPrompt::new()),
            config.session,
        );
        (session, id)
    }

    #[tokio::test]
    async fn test_session_pin_only_for_unlocked_key() {
        let (session, id) = controller();
        assert!(session.session_pin(&id).is_none());

        session.unlock("1234").await.unwrap();
        assert_eq!(session.session_pin(&id).unwrap().as_str(), "1234");
        assert!(session.session_pin(&MasterKeyId::from("other")).is_none());

        session.lock().await;
        assert!(session.session_pin(&id).is_none());
    }

    #[tokio::test]
    async fn test_transition_restores_prior_state() {
        let (session, _) = controller();
        {
            let _transition = Transition::begin(&session.inner, SessionState::Unlocking);
            assert_eq!(session.state(), SessionState::Unlocking);
        }
        assert_eq!(session.state(), SessionState::Locked);
    }

    #[tokio::test]
    async fn test_preempt_replaces_token() {
        let (session, _) = controller();
        let token = session.sync.current.lock().clone();
        session.preempt_sync();
        assert!(token.is_cancelled());
        assert!(!session.sync.current.lock().is_cancelled());
    }

    #[tokio::test]
    async fn test_settle_keeps_connected_wallet() {
        let (session, id) = controller();
        session.settle_connection().await;
        assert_eq!(session.state(), SessionState::Locked);

        session.unlock("1234").await.unwrap();
        session.settle_connection().await;
        assert_eq!(session.active().unwrap().master_key_id, id);
        assert!(session.session_pin(&id).is_some());
    }
}
