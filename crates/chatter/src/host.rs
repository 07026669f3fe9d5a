//! Process lifetime: one shutdown signal, and a telemetry listener that is restarted whenever
//! the game companion goes away.
//!
//! The dispatcher is started once and outlives every listener restart, so a companion that
//! reconnects mid-match doesn't lose the kill count.

use tokio::sync::{mpsc, watch};

use crate::listener::{self, NormalizedEvent, TelemetrySource};

/// Asks everything holding a [`Shutdown`] to stop.
pub struct ShutdownTrigger {
    requested: watch::Sender<bool>,
}

/// Resolves once shutdown has been requested, including requests made before anyone waited.
#[derive(Clone)]
pub struct Shutdown {
    requested: watch::Receiver<bool>,
}

pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (requested_tx, requested_rx) = watch::channel(false);
    (
        ShutdownTrigger {
            requested: requested_tx,
        },
        Shutdown {
            requested: requested_rx,
        },
    )
}

impl ShutdownTrigger {
    pub fn request(&self) {
        self.requested.send_replace(true);
    }
}

impl Shutdown {
    pub fn is_requested(&self) -> bool {
        *self.requested.borrow()
    }

    pub async fn requested(mut self) {
        let trigger_dropped = self.requested.wait_for(|&requested| requested).await.is_err();
        if trigger_dropped {
            // The trigger is gone without asking, nobody can ask anymore.
            std::future::pending::<()>().await;
        }
    }
}

/// How hard to keep trying when the telemetry source can't be set up.
#[derive(Debug, Clone, Copy)]
pub struct RestartPolicy {
    pub delay: std::time::Duration,
    /// Consecutive setup failures before giving up.
    pub max_failures: usize,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            delay: std::time::Duration::from_secs(10),
            max_failures: 100,
        }
    }
}

/// Keep `source` subscribed, forwarding into the long-lived `events` channel.
///
/// A feed that ends is re-subscribed straight away. Setup failures wait `policy.delay` first.
/// Returns on shutdown or after too many failures in a row, dropping `events` so the
/// dispatcher winds down.
pub async fn supervise<S: TelemetrySource>(
    source: &mut S,
    events: mpsc::Sender<NormalizedEvent>,
    policy: RestartPolicy,
    shutdown: Shutdown,
) {
    let mut failures = 0;
    loop {
        if shutdown.is_requested() {
            return;
        }

        let started = tokio::select! {
            biased;
            () = shutdown.clone().requested() => return,
            started = listener::start(source, events.clone()) => started,
        };

        match started {
            Ok(mut forwarding) => {
                failures = 0;
                tokio::select! {
                    biased;
                    () = shutdown.clone().requested() => {
                        forwarding.abort();
                        return;
                    }
                    result = &mut forwarding => {
                        if let Err(error) = result {
                            tracing::error!("Telemetry forwarding crashed: {error}");
                        }
                        tracing::info!("Game companion went away, listening again");
                    }
                }
            }
            Err(error) => {
                failures += 1;
                tracing::error!("Telemetry setup failed ({failures}/{}): {error}", policy.max_failures);
                if failures >= policy.max_failures {
                    tracing::error!("Giving up on telemetry");
                    return;
                }
                tokio::select! {
                    biased;
                    () = shutdown.clone().requested() => return,
                    () = tokio::time::sleep(policy.delay) => {
                        tracing::info!("Restarting telemetry listener");
                    }
                }
            }
        }
    }
}
