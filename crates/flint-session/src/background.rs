//! Background activity sync
//!
//! Best-effort reconciliation of sub-wallet activity flags. Each run walks the
//! master keys whose newest sub-wallet has unknown activity, briefly connects
//! the SDK to that sub-wallet through the connection actor, records what it
//! sees and puts the previous connection back. Foreground operations cancel a
//! running sync; errors are logged and never reach the foreground session.

use crate::actor::{ProbeOutcome, Target};
use crate::cancel::CancelToken;
use crate::session::SessionController;
use flint_core::{ActiveSelection, MasterKeyId};
use flint_params::SyncConfig;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

/// Outcome of one sync run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Sub-wallets whose activity was read
    pub checked: usize,
    /// Sub-wallets newly found to have activity
    pub became_active: usize,
    /// Candidates skipped (no usable PIN, or already being synced)
    pub skipped: usize,
    /// Candidates that failed to decrypt, connect or record
    pub failed: usize,
    /// The run stopped early for a foreground operation
    pub aborted: bool,
}

/// Marks a master key as mid-sync for as long as it lives.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<MasterKeyId>>,
    id: MasterKeyId,
}

impl<'a> InFlight<'a> {
    fn acquire(set: &'a Mutex<HashSet<MasterKeyId>>, id: &MasterKeyId) -> Option<Self> {
        if !set.lock().insert(id.clone()) {
            return None;
        }
        Some(Self {
            set,
            id: id.clone(),
        })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.id);
    }
}

impl SessionController {
    /// PIN usable without user interaction: the session PIN for the open
    /// key, otherwise a biometric-stored copy.
    fn sync_pin(&self, master_key_id: &MasterKeyId) -> Option<Zeroizing<String>> {
        if let Some(pin) = self.session_pin(master_key_id) {
            return Some(pin);
        }
        match self.registry.vault().biometric_pin(master_key_id) {
            Ok(pin) => pin,
            Err(e) => {
                warn!(master_key_id = %master_key_id, "Biometric PIN unreadable: {}", e);
                None
            }
        }
    }

    /// Run one activity sync pass.
    ///
    /// Never changes the active wallet. Stops early when a foreground
    /// operation preempts it; the session locks only if the previous
    /// connection cannot be restored afterwards.
    pub async fn sync_activity(&self) -> SyncReport {
        let cancel = self.sync.current.lock().clone();
        let started = Instant::now();
        let mut report = SyncReport::default();
        let mut unsettled = false;

        let candidates = self.registry.sync_candidates();
        debug!(candidates = candidates.len(), "Activity sync started");

        for candidate in candidates {
            if cancel.is_cancelled() {
                report.aborted = true;
                break;
            }
            let id = candidate.master_key_id;
            let Some(_in_flight) = InFlight::acquire(&self.sync.in_flight, &id) else {
                debug!(master_key_id = %id, "Already syncing, skipped");
                report.skipped += 1;
                continue;
            };
            // Another run may have settled it since the candidates were listed
            let still_unknown = self
                .registry
                .sub_wallet(&id, candidate.index)
                .is_ok_and(|wallet| wallet.activity.is_unknown());
            if !still_unknown {
                continue;
            }
            let Some(pin) = self.sync_pin(&id) else {
                debug!(master_key_id = %id, "No PIN available, skipped");
                report.skipped += 1;
                continue;
            };
            let mnemonic = match self.decrypt(&id, &pin).await {
                Ok(mnemonic) => mnemonic,
                Err(e) => {
                    warn!(master_key_id = %id, "Sync decrypt failed: {}", e);
                    report.failed += 1;
                    continue;
                }
            };
            drop(pin);

            let target = Target {
                selection: ActiveSelection::new(id.clone(), candidate.index),
                mnemonic,
            };
            match self.connection.probe(target, cancel.clone()).await {
                ProbeOutcome::Skipped => {
                    report.aborted = true;
                    unsettled = true;
                    break;
                }
                ProbeOutcome::Observed(has_activity) => {
                    report.checked += 1;
                    match self.registry.mark_activity(&id, candidate.index, has_activity) {
                        Ok(_) if has_activity => report.became_active += 1,
                        Ok(_) => {}
                        Err(e) => {
                            warn!(master_key_id = %id, index = candidate.index, "Recording activity failed: {}", e);
                            report.failed += 1;
                        }
                    }
                }
                ProbeOutcome::Failed(e) => {
                    warn!(master_key_id = %id, index = candidate.index, "Activity probe failed: {}", e);
                    report.failed += 1;
                }
                ProbeOutcome::RestoreFailed(e) => {
                    error!("Previous wallet could not be reconnected: {}", e);
                    report.failed += 1;
                    report.aborted = true;
                    unsettled = true;
                    break;
                }
            }
        }

        // A preempting operation may not talk to the connection itself
        if unsettled {
            self.settle_connection().await;
        }

        info!(
            checked = report.checked,
            became_active = report.became_active,
            skipped = report.skipped,
            failed = report.failed,
            aborted = report.aborted,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Activity sync finished"
        );
        report
    }

    /// Run [`sync_activity`](Self::sync_activity) every `interval` until `stop` fires.
    ///
    /// The first pass runs immediately. Stopping abandons a pass in progress;
    /// a probe already handed to the connection actor still restores the
    /// previous connection.
    pub fn spawn_activity_sync(self: Arc<Self>, interval: Duration, stop: CancelToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            while stop.run_until_cancelled(ticker.tick()).await.is_some() {
                if stop.run_until_cancelled(self.sync_activity()).await.is_none() {
                    break;
                }
            }
            debug!("Activity sync task stopped");
        })
    }

    /// Start the periodic sync described by `config`, if enabled.
    pub fn spawn_configured_sync(
        self: Arc<Self>,
        config: &SyncConfig,
        stop: CancelToken,
    ) -> Option<JoinHandle<()>> {
        if !config.enabled {
            return None;
        }
        Some(self.spawn_activity_sync(Duration::from_secs(config.interval_secs), stop))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_flight_guard_releases() {
        let set = Mutex::new(HashSet::new());
        let id = MasterKeyId::from("key");
        {
            let _guard = InFlight::acquire(&set, &id).unwrap();
            assert!(InFlight::acquire(&set, &id).is_none());
        }
        assert!(InFlight::acquire(&set, &id).is_some());
    }
}
