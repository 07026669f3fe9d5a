//! The bot's single connection to a chat network.
//!
//! [`ChatNetwork`] and [`ChatSession`] describe what a chat transport can do. [`ChatConnection`]
//! wraps a transport and guarantees there is at most one live session, that sends fail fast
//! when there isn't one, and that a failed connect never leaves it stuck half-connected.

use std::future::Future;

use crate::error::ChatError;

/// Who the bot is and where it posts.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
    pub credential: String,
    pub channel: String,
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("username", &self.username)
            .field("credential", &"<redacted>")
            .field("channel", &self.channel)
            .finish()
    }
}

/// A chat service the bot can sign in to.
pub trait ChatNetwork: Send + Sync {
    type Session: ChatSession + 'static;

    /// Authenticate as `identity` and join its channel.
    fn open(
        &self,
        identity: &Identity,
    ) -> impl Future<Output = Result<Self::Session, ChatError>> + Send;
}

/// A signed in, joined chat session.
pub trait ChatSession: Send {
    /// Queue a message for the joined channel.
    fn say(&mut self, message: &str) -> impl Future<Output = Result<(), ChatError>> + Send;

    /// Whether the transport underneath has gone away for good.
    fn is_closed(&self) -> bool;

    /// Leave the channel and release the transport.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

enum Link<S> {
    Disconnected,
    Connecting,
    Connected { identity: Identity, session: S },
}

pub struct ChatConnection<N: ChatNetwork> {
    network: N,
    connect_timeout: std::time::Duration,
    link: Link<N::Session>,
}

impl<N: ChatNetwork> ChatConnection<N> {
    pub const fn new(network: N, connect_timeout: std::time::Duration) -> Self {
        Self {
            network,
            connect_timeout,
            link: Link::Disconnected,
        }
    }

    pub const fn state(&self) -> ConnectionState {
        match self.link {
            Link::Disconnected => ConnectionState::Disconnected,
            Link::Connecting => ConnectionState::Connecting,
            Link::Connected { .. } => ConnectionState::Connected,
        }
    }

    /// The identity of the live session, if there is one.
    pub const fn identity(&self) -> Option<&Identity> {
        match &self.link {
            Link::Connected { identity, .. } => Some(identity),
            Link::Disconnected | Link::Connecting => None,
        }
    }

    /// Connect as `identity`, first tearing down any existing session.
    pub async fn connect(&mut self, identity: Identity) -> Result<(), ChatError> {
        self.disconnect().await;

        tracing::info!(
            channel = %identity.channel,
            username = %identity.username,
            "Connecting to chat"
        );
        self.link = Link::Connecting;
        let attempt = tokio::time::timeout(self.connect_timeout, self.network.open(&identity)).await;

        let result = match attempt {
            Ok(Ok(session)) => {
                tracing::info!(channel = %identity.channel, "Connected to chat");
                self.link = Link::Connected { identity, session };
                return Ok(());
            }
            Ok(Err(error)) => error,
            Err(_elapsed) => ChatError::network(format!(
                "no answer within {}s",
                self.connect_timeout.as_secs_f32()
            )),
        };
        self.link = Link::Disconnected;
        Err(result)
    }

    /// Send a message over the live session.
    pub async fn send(&mut self, message: &str) -> Result<(), ChatError> {
        let Link::Connected { session, .. } = &mut self.link else {
            return Err(ChatError::NotConnected);
        };

        if session.is_closed() {
            tracing::warn!("Chat session ended underneath us");
            self.disconnect().await;
            return Err(ChatError::network("chat session has ended"));
        }

        let result = session.say(message).await;
        if result.is_err() && session.is_closed() {
            tracing::warn!("Chat session ended while sending");
            self.disconnect().await;
        }
        result
    }

    /// Close the live session, if any. Safe to call at any time.
    pub async fn disconnect(&mut self) {
        if let Link::Connected {
            identity,
            mut session,
        } = std::mem::replace(&mut self.link, Link::Disconnected)
        {
            tracing::info!(channel = %identity.channel, "Disconnecting from chat");
            session.close().await;
        }
    }
}
