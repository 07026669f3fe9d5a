//! Twitch chat through the Helix "send chat message" API.
//!
//! There is no socket to keep open: opening a session validates the token and resolves the
//! channel, every message is its own request.

use twitch_api::HelixClient;
use twitch_oauth2::tokens::errors::ValidationError;

use crate::{
    chat::{ChatNetwork, ChatSession, Identity},
    error::ChatError,
};

pub struct HelixNetwork {
    client: HelixClient<'static, reqwest::Client>,
}

impl HelixNetwork {
    pub const fn new(client: HelixClient<'static, reqwest::Client>) -> Self {
        Self { client }
    }
}

impl ChatNetwork for HelixNetwork {
    type Session = HelixSession;

    async fn open(&self, identity: &Identity) -> Result<HelixSession, ChatError> {
        let access_token = twitch_oauth2::AccessToken::from(
            identity
                .credential
                .strip_prefix("oauth:")
                .unwrap_or(&identity.credential)
                .to_owned(),
        );
        let token = twitch_oauth2::UserToken::from_existing(&self.client, access_token, None, None)
            .await
            .map_err(validation_error)?;

        if !token.login.as_str().eq_ignore_ascii_case(&identity.username) {
            tracing::warn!(
                "Token belongs to {}, not the configured bot {}",
                token.login,
                identity.username
            );
        }

        let Some(twitch_api::helix::users::User {
            id: broadcaster, ..
        }) = self
            .client
            .get_user_from_login(identity.channel.as_str(), &token)
            .await
            .map_err(|error| ChatError::network(error.to_string()))?
        else {
            return Err(ChatError::network(format!(
                "no channel named {}",
                identity.channel
            )));
        };

        tracing::debug!(channel = %identity.channel, "Resolved broadcaster {broadcaster}");
        Ok(HelixSession {
            client: self.client.clone(),
            sender: token.user_id.clone(),
            token,
            broadcaster,
        })
    }
}

/// A refused token is an auth failure, trouble reaching the validation endpoint is not.
fn validation_error<RE>(error: ValidationError<RE>) -> ChatError
where
    RE: std::error::Error + Send + Sync + 'static,
{
    match error {
        ValidationError::Request(_) | ValidationError::RequestParseError(_) => {
            ChatError::network(format!("couldn't validate token: {error}"))
        }
        other => ChatError::auth(format!("token rejected: {other}")),
    }
}

pub struct HelixSession {
    client: HelixClient<'static, reqwest::Client>,
    token: twitch_oauth2::UserToken,
    broadcaster: twitch_api::types::UserId,
    sender: twitch_api::types::UserId,
}

impl ChatSession for HelixSession {
    async fn say(&mut self, message: &str) -> Result<(), ChatError> {
        self.client
            .send_chat_message(
                self.broadcaster.as_str(),
                self.sender.as_str(),
                message,
                &self.token,
            )
            .await
            .map_err(|error| ChatError::network(error.to_string()))?;

        Ok(())
    }

    fn is_closed(&self) -> bool {
        false
    }

    async fn close(&mut self) {}
}
