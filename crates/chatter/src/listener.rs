//! Turns the game's telemetry feed into the three events the bot understands.

use std::future::Future;

use tokio::sync::mpsc;
use warzone_telemetry::{EventBatch, RawEvent};

use crate::error::ListenerSetupError;

/// The only game events the bot reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NormalizedEvent {
    Kill,
    Death,
    MatchEnd,
}

impl NormalizedEvent {
    pub const ALL: [Self; 3] = [Self::Kill, Self::Death, Self::MatchEnd];

    /// The telemetry feature that produces this event.
    pub const fn feature(self) -> &'static str {
        match self {
            Self::Kill => warzone_telemetry::KILL,
            Self::Death => warzone_telemetry::DEATH,
            Self::MatchEnd => warzone_telemetry::MATCH_END,
        }
    }

    pub fn from_raw(raw: &RawEvent) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|event| event.feature() == raw.name)
    }
}

/// Something that can stream game event batches once told which features matter.
pub trait TelemetrySource: Send {
    fn subscribe(
        &mut self,
        features: &[&'static str],
    ) -> impl Future<Output = Result<mpsc::Receiver<EventBatch>, ListenerSetupError>> + Send;
}

/// Subscribe to `source` and forward its events to the dispatcher, in delivery order.
///
/// Returns once the subscription is up. Forwarding carries on in the background until either
/// the feed or the dispatcher goes away.
pub async fn start<S: TelemetrySource>(
    source: &mut S,
    events: mpsc::Sender<NormalizedEvent>,
) -> Result<tokio::task::JoinHandle<()>, ListenerSetupError> {
    let features = NormalizedEvent::ALL.map(NormalizedEvent::feature);
    let batches = source.subscribe(&features).await?;
    tracing::info!("Subscribed to telemetry features {features:?}");
    Ok(tokio::spawn(forward(batches, events)))
}

async fn forward(mut batches: mpsc::Receiver<EventBatch>, events: mpsc::Sender<NormalizedEvent>) {
    while let Some(batch) = batches.recv().await {
        for raw in batch.events {
            let Some(event) = NormalizedEvent::from_raw(&raw) else {
                tracing::debug!(name = %raw.name, "Ignoring telemetry event");
                continue;
            };
            tracing::trace!(?event, "Telemetry event");
            if events.send(event).await.is_err() {
                tracing::debug!("Dispatcher has stopped, no longer forwarding telemetry");
                return;
            }
        }
    }
    tracing::info!("Telemetry feed ended");
}
