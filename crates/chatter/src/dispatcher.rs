//! The bot's session state, and the single task that owns it.
//!
//! Game events and settings changes both arrive here, and are handled one at a time in arrival
//! order. Nothing else touches the kill count or the chat connection.

use std::future::Future;

use tokio::sync::{mpsc, watch};

use crate::{
    chat::{ChatConnection, ChatNetwork, ConnectionState},
    config::BotConfiguration,
    error::ChatError,
    listener::NormalizedEvent,
    template,
};

/// What became of one game event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent(String),
    /// The bot is disabled, so the rendered message was dropped.
    Suppressed,
    /// No configuration has been saved yet.
    Unconfigured,
    /// The message couldn't be posted. The event still counted.
    Failed { message: String, error: ChatError },
}

/// Why [`Dispatcher::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnd {
    Shutdown,
    /// The telemetry feed is gone.
    EventsClosed,
}

pub struct Dispatcher<N: ChatNetwork> {
    kill_count: u32,
    configuration: Option<BotConfiguration>,
    connection: ChatConnection<N>,
    reports: Option<mpsc::UnboundedSender<(NormalizedEvent, DispatchOutcome)>>,
}

impl<N: ChatNetwork> Dispatcher<N> {
    pub const fn new(connection: ChatConnection<N>) -> Self {
        Self {
            kill_count: 0,
            configuration: None,
            connection,
            reports: None,
        }
    }

    /// Also send every event's outcome to `reports`.
    #[must_use]
    pub fn with_reports(
        mut self,
        reports: mpsc::UnboundedSender<(NormalizedEvent, DispatchOutcome)>,
    ) -> Self {
        self.reports = Some(reports);
        self
    }

    pub const fn kill_count(&self) -> u32 {
        self.kill_count
    }

    pub const fn configuration(&self) -> Option<&BotConfiguration> {
        self.configuration.as_ref()
    }

    pub const fn connection(&self) -> &ChatConnection<N> {
        &self.connection
    }

    /// Make `next` the active configuration.
    ///
    /// Only a change of channel, username or credential reopens the chat connection, as does
    /// any save while the connection is down. The new configuration is kept even if connecting
    /// fails.
    pub async fn apply_configuration(&mut self, next: BotConfiguration) -> Result<(), ChatError> {
        let identity_changed = self
            .configuration
            .as_ref()
            .map_or(true, |current| !current.same_identity(&next));
        let identity = next.identity();
        self.configuration = Some(next);

        if !identity_changed && self.connection.state() == ConnectionState::Connected {
            tracing::debug!("Configuration updated, chat identity unchanged");
            return Ok(());
        }
        self.connection.connect(identity).await
    }

    /// Update the session state for `event`, then announce it in chat.
    pub async fn handle_event(&mut self, event: NormalizedEvent) -> DispatchOutcome {
        if event == NormalizedEvent::Kill {
            self.kill_count = self.kill_count.saturating_add(1);
        }

        let outcome = self.announce(event).await;

        if event == NormalizedEvent::MatchEnd {
            tracing::debug!(kills = self.kill_count, "Match over, resetting kill count");
            self.kill_count = 0;
        }
        outcome
    }

    async fn announce(&mut self, event: NormalizedEvent) -> DispatchOutcome {
        let Some(configuration) = &self.configuration else {
            return DispatchOutcome::Unconfigured;
        };
        let template = match event {
            NormalizedEvent::Kill => configuration.kill_message_template(),
            NormalizedEvent::Death => configuration.death_message_template(),
            NormalizedEvent::MatchEnd => configuration.match_end_message_template(),
        };
        let message = template::render(template, self.kill_count);
        if !configuration.enabled() {
            return DispatchOutcome::Suppressed;
        }

        match self.connection.send(&message).await {
            Ok(()) => DispatchOutcome::Sent(message),
            Err(error) => DispatchOutcome::Failed { message, error },
        }
    }

    /// Process settings changes and game events until `shutdown` resolves or the events dry up.
    ///
    /// The latest value in `settings` is applied first, if there is one.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<NormalizedEvent>,
        mut settings: watch::Receiver<Option<BotConfiguration>>,
        shutdown: impl Future<Output = ()> + Send,
    ) -> RunEnd {
        tokio::pin!(shutdown);
        settings.mark_changed();
        let mut settings_open = true;

        let end = loop {
            tokio::select! {
                biased;

                () = &mut shutdown => break RunEnd::Shutdown,

                changed = settings.changed(), if settings_open => {
                    if changed.is_err() {
                        tracing::debug!("Settings store dropped, keeping the current configuration");
                        settings_open = false;
                        continue;
                    }
                    let latest = settings.borrow_and_update().clone();
                    if let Some(next) = latest {
                        if let Err(error) = self.apply_configuration(next).await {
                            tracing::error!("Couldn't connect to chat: {error}");
                        }
                    }
                }

                event = events.recv() => {
                    let Some(event) = event else {
                        break RunEnd::EventsClosed;
                    };
                    let outcome = self.handle_event(event).await;
                    log_outcome(event, &outcome);
                    if let Some(reports) = &self.reports {
                        reports.send((event, outcome)).ok();
                    }
                }
            }
        };

        tracing::info!("Dispatcher stopping: {end:?}");
        self.connection.disconnect().await;
        end
    }
}

fn log_outcome(event: NormalizedEvent, outcome: &DispatchOutcome) {
    match outcome {
        DispatchOutcome::Sent(message) => tracing::info!(?event, "Sent: {message}"),
        DispatchOutcome::Suppressed => tracing::debug!(?event, "Bot disabled, not sending"),
        DispatchOutcome::Unconfigured => {
            tracing::warn!(?event, "No configuration saved yet, not sending");
        }
        DispatchOutcome::Failed { message, error } => {
            tracing::error!(?event, "Couldn't send {message:?}: {error}");
        }
    }
}
