//! Single-owner actor for the SDK connection
//!
//! All connector traffic goes through one task, so a switch, a lock and a
//! background probe can never interleave on the connection. The actor keeps
//! the *desired* target (what the session considers active, with its
//! decrypted mnemonic) separately from the *live* connection. A preempted
//! probe leaves the two apart; the next foreground command, or the sync's own
//! `Reconcile` once the foreground operation is done, brings them together.

use crate::cancel::CancelToken;
use crate::connector::{ConnectionHandle, WalletActivity, WalletConnector};
use flint_core::{ActiveSelection, Error, Phrase, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

const COMMAND_QUEUE: usize = 16;

/// A sub-wallet together with the mnemonic needed to connect it
pub(crate) struct Target {
    pub selection: ActiveSelection,
    pub mnemonic: Phrase,
}

struct Live {
    handle: ConnectionHandle,
    selection: ActiveSelection,
}

/// A foreground connect that did not go through
#[derive(Debug)]
pub(crate) struct SwitchFailure {
    pub error: Error,
    /// The previous wallet is connected again
    pub restored: bool,
}

/// Result of a background probe
#[derive(Debug)]
pub(crate) enum ProbeOutcome {
    /// Cancelled before anything was learned
    Skipped,
    /// Activity was read
    Observed(bool),
    /// Probe failed; the previous connection is intact
    Failed(Error),
    /// The previous connection could not be re-established
    RestoreFailed(Error),
}

enum Command {
    Connect {
        target: Target,
        reply: oneshot::Sender<std::result::Result<(), SwitchFailure>>,
    },
    Reindex {
        sub_wallet_index: u32,
        reply: oneshot::Sender<std::result::Result<(), SwitchFailure>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Activity {
        reply: oneshot::Sender<std::result::Result<WalletActivity, SwitchFailure>>,
    },
    Probe {
        target: Target,
        cancel: CancelToken,
        reply: oneshot::Sender<ProbeOutcome>,
    },
    Reconcile {
        reply: oneshot::Sender<Result<Option<ActiveSelection>>>,
    },
}

/// Handle to the connection actor
#[derive(Clone)]
pub(crate) struct ConnectionClient {
    tx: mpsc::Sender<Command>,
}

fn actor_stopped() -> Error {
    Error::ConnectionFailure("connection actor stopped".to_string())
}

impl ConnectionClient {
    /// Spawn the actor on the current tokio runtime.
    pub fn spawn(connector: Arc<dyn WalletConnector>, timeout: Duration) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
        let actor = ConnectionActor {
            connector,
            timeout,
            desired: None,
            live: None,
        };
        tokio::spawn(actor.run(rx));
        Self { tx }
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Option<T> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(command(reply)).await.ok()?;
        rx.await.ok()
    }

    /// Switch the connection to `target`.
    pub async fn connect(&self, target: Target) -> std::result::Result<(), SwitchFailure> {
        self.request(|reply| Command::Connect { target, reply })
            .await
            .unwrap_or_else(|| {
                Err(SwitchFailure {
                    error: actor_stopped(),
                    restored: false,
                })
            })
    }

    /// Switch to another sub-wallet of the connected master key.
    pub async fn reindex(&self, sub_wallet_index: u32) -> std::result::Result<(), SwitchFailure> {
        self.request(|reply| Command::Reindex {
            sub_wallet_index,
            reply,
        })
        .await
        .unwrap_or_else(|| {
            Err(SwitchFailure {
                error: actor_stopped(),
                restored: false,
            })
        })
    }

    /// Drop the connection and forget the target.
    pub async fn disconnect(&self) {
        if self.request(|reply| Command::Disconnect { reply }).await.is_none() {
            warn!("Connection actor stopped before disconnect");
        }
    }

    /// Activity of the active wallet.
    ///
    /// `restored` is false on failure when the wallet could not be reconnected.
    pub async fn activity(&self) -> std::result::Result<WalletActivity, SwitchFailure> {
        self.request(|reply| Command::Activity { reply })
            .await
            .unwrap_or_else(|| {
                Err(SwitchFailure {
                    error: actor_stopped(),
                    restored: false,
                })
            })
    }

    /// Bring the live connection back in line with the target.
    ///
    /// Returns the connected wallet; an error means the target was lost.
    pub async fn reconcile(&self) -> Result<Option<ActiveSelection>> {
        self.request(|reply| Command::Reconcile { reply })
            .await
            .unwrap_or_else(|| Err(actor_stopped()))
    }

    /// Read activity of `target`, then put the previous connection back.
    pub async fn probe(&self, target: Target, cancel: CancelToken) -> ProbeOutcome {
        self.request(|reply| Command::Probe {
            target,
            cancel,
            reply,
        })
        .await
        .unwrap_or_else(|| ProbeOutcome::Failed(actor_stopped()))
    }
}

struct ConnectionActor {
    connector: Arc<dyn WalletConnector>,
    timeout: Duration,
    desired: Option<Target>,
    live: Option<Live>,
}

impl ConnectionActor {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Connect { target, reply } => {
                    let _ = reply.send(self.switch(target).await);
                }
                Command::Reindex {
                    sub_wallet_index,
                    reply,
                } => {
                    let target = self.desired.as_ref().map(|current| Target {
                        selection: ActiveSelection::new(
                            current.selection.master_key_id.clone(),
                            sub_wallet_index,
                        ),
                        mnemonic: current.mnemonic.clone(),
                    });
                    let result = match target {
                        Some(target) => self.switch(target).await,
                        None => Err(SwitchFailure {
                            error: Error::InvalidState("no wallet is connected".to_string()),
                            restored: false,
                        }),
                    };
                    let _ = reply.send(result);
                }
                Command::Disconnect { reply } => {
                    self.close_live().await;
                    self.desired = None;
                    let _ = reply.send(());
                }
                Command::Activity { reply } => {
                    let result = self.active_activity().await.map_err(|error| SwitchFailure {
                        error,
                        restored: self.desired.is_some(),
                    });
                    let _ = reply.send(result);
                }
                Command::Probe {
                    target,
                    cancel,
                    reply,
                } => {
                    let _ = reply.send(self.probe(target, cancel).await);
                }
                Command::Reconcile { reply } => {
                    let result = self
                        .reconcile()
                        .await
                        .map(|()| self.desired.as_ref().map(|t| t.selection.clone()));
                    let _ = reply.send(result);
                }
            }
        }
        self.close_live().await;
        debug!("Connection actor stopped");
    }

    async fn call<T>(&self, what: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::ConnectionFailure(format!(
                "{} timed out after {:?}",
                what, self.timeout
            ))),
        }
    }

    async fn open(&self, target: &Target) -> Result<ConnectionHandle> {
        self.call(
            "connect",
            self.connector
                .connect(&target.mnemonic, target.selection.sub_wallet_index),
        )
        .await
    }

    async fn close(&self, handle: ConnectionHandle) {
        if let Err(e) = self.call("disconnect", self.connector.disconnect(handle)).await {
            warn!(handle = handle.0, "Disconnect failed, dropping handle: {}", e);
        }
    }

    async fn close_live(&mut self) {
        if let Some(live) = self.live.take() {
            self.close(live.handle).await;
        }
    }

    /// Make the live connection match the desired target.
    ///
    /// If that fails the target is forgotten, which the session treats as locked.
    async fn reconcile(&mut self) -> Result<()> {
        let Some(desired) = &self.desired else {
            self.close_live().await;
            return Ok(());
        };
        if self
            .live
            .as_ref()
            .is_some_and(|live| live.selection == desired.selection)
        {
            return Ok(());
        }
        self.close_live().await;
        let Some(desired) = &self.desired else {
            return Ok(());
        };
        match self.open(desired).await {
            Ok(handle) => {
                self.live = Some(Live {
                    handle,
                    selection: desired.selection.clone(),
                });
                Ok(())
            }
            Err(e) => {
                warn!(selection = %desired.selection, "Reconnect failed: {}", e);
                self.desired = None;
                Err(e)
            }
        }
    }

    async fn switch(&mut self, target: Target) -> std::result::Result<(), SwitchFailure> {
        self.close_live().await;
        match self.open(&target).await {
            Ok(handle) => {
                info!(selection = %target.selection, "Wallet connected");
                self.live = Some(Live {
                    handle,
                    selection: target.selection.clone(),
                });
                self.desired = Some(target);
                Ok(())
            }
            Err(error) => {
                warn!(selection = %target.selection, "Connect failed: {}", error);
                let restored = match self.reconcile().await {
                    Ok(()) => self.desired.is_some(),
                    Err(_) => false,
                };
                Err(SwitchFailure { error, restored })
            }
        }
    }

    async fn active_activity(&mut self) -> Result<WalletActivity> {
        self.reconcile().await?;
        let handle = self
            .live
            .as_ref()
            .map(|live| live.handle)
            .ok_or_else(|| Error::InvalidState("no wallet is connected".to_string()))?;
        self.call("activity", self.connector.get_activity(handle)).await
    }

    async fn probe(&mut self, target: Target, cancel: CancelToken) -> ProbeOutcome {
        if cancel.is_cancelled() {
            return ProbeOutcome::Skipped;
        }

        let prior = self.desired.as_ref().map(|t| t.selection.clone());
        if prior.as_ref() == Some(&target.selection) {
            // Probing the active wallet needs no switch
            return match self.active_activity().await {
                Ok(activity) => ProbeOutcome::Observed(activity.has_activity),
                Err(e) if self.desired.is_none() => ProbeOutcome::RestoreFailed(e),
                Err(e) => ProbeOutcome::Failed(e),
            };
        }

        self.close_live().await;
        let observed = match self.open(&target).await {
            Ok(handle) => {
                let observed = if cancel.is_cancelled() {
                    None
                } else {
                    Some(self.call("activity", self.connector.get_activity(handle)).await)
                };
                self.close(handle).await;
                observed
            }
            Err(e) => Some(Err(e)),
        };

        let restored = if cancel.is_cancelled() {
            debug!(selection = %target.selection, "Preempted, restore left to the next command");
            Ok(())
        } else {
            self.reconcile().await
        };

        match (observed, restored) {
            (_, Err(e)) => ProbeOutcome::RestoreFailed(e),
            (None, Ok(())) => ProbeOutcome::Skipped,
            (Some(Ok(activity)), Ok(())) => ProbeOutcome::Observed(activity.has_activity),
            (Some(Err(e)), Ok(())) => ProbeOutcome::Failed(e),
        }
    }
}
