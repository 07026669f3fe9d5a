//! The JSON-lines protocol spoken between a game companion and the chatter bot.
//!
//! The bot listens on a Unix domain socket. Once a companion connects the bot asks for the
//! game features it needs, the companion confirms (or refuses) them, and from then on streams
//! event batches, one JSON object per line.

pub const SOCKET_PATH: &str = "/tmp/warzone-telemetry.sock";

/// Call of Duty: Warzone's ID on the game events platform.
pub const WARZONE_GAME_ID: u32 = 21652;

pub const KILL: &str = "kill";
pub const DEATH: &str = "death";
pub const MATCH_END: &str = "match_end";

/// A single game event, exactly as the game events platform reports it.
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub name: String,
    /// Event specific payload. Often a stringified JSON document, sometimes nothing at all.
    #[serde(default)]
    pub data: serde_json::Value,
}

/// A batch of events delivered together, in the order they happened.
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct EventBatch {
    pub events: Vec<RawEvent>,
}

/// Messages sent from the bot to the companion.
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BotMessage {
    SetRequiredFeatures { game_id: u32, features: Vec<String> },
}

/// Messages sent from the companion to the bot.
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompanionMessage {
    FeaturesStatus {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    NewEvents(EventBatch),
}

/// Serialise a message as a single newline terminated line.
pub fn encode_line<T: serde::Serialize>(message: &T) -> serde_json::Result<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}
