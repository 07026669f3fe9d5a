use eyre::WrapErr as _;

use crate::{chat::Identity, error::InvalidConfigurationError};

pub const DEFAULT_KILL_TEMPLATE: &str = "(kills) enemies eliminated";
pub const DEFAULT_DEATH_TEMPLATE: &str = "Defeated in battle";
pub const DEFAULT_MATCH_END_TEMPLATE: &str = "Match complete with (kills) kills";

/// Twitch drops chat messages longer than this.
pub const MAX_MESSAGE_LENGTH: usize = 500;

/// The single active record describing where the bot talks, as whom, and what it says.
///
/// Only constructed through [`BotConfigurationPatch`], so every instance is valid.
#[derive(Clone, PartialEq, Eq)]
pub struct BotConfiguration {
    channel: String,
    bot_username: String,
    bot_credential: String,
    enabled: bool,
    kill_message_template: String,
    death_message_template: String,
    match_end_message_template: String,
}

impl BotConfiguration {
    /// A configuration with the default templates, enabled.
    pub fn new(
        channel: impl Into<String>,
        bot_username: impl Into<String>,
        bot_credential: impl Into<String>,
    ) -> Result<Self, InvalidConfigurationError> {
        BotConfigurationPatch {
            channel: Some(channel.into()),
            bot_username: Some(bot_username.into()),
            bot_credential: Some(bot_credential.into()),
            ..BotConfigurationPatch::default()
        }
        .into_configuration()
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn bot_username(&self) -> &str {
        &self.bot_username
    }

    pub fn bot_credential(&self) -> &str {
        &self.bot_credential
    }

    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn kill_message_template(&self) -> &str {
        &self.kill_message_template
    }

    pub fn death_message_template(&self) -> &str {
        &self.death_message_template
    }

    pub fn match_end_message_template(&self) -> &str {
        &self.match_end_message_template
    }

    /// Who the chat connection authenticates as, and where it posts.
    pub fn identity(&self) -> Identity {
        Identity {
            username: self.bot_username.clone(),
            credential: self.bot_credential.clone(),
            channel: self.channel.clone(),
        }
    }

    /// Whether both configurations would use the very same chat connection.
    pub fn same_identity(&self, other: &Self) -> bool {
        self.channel == other.channel
            && self.bot_username == other.bot_username
            && self.bot_credential == other.bot_credential
    }

    fn validate(mut self) -> Result<Self, InvalidConfigurationError> {
        self.channel = normalise_login("channel", self.channel.trim_start_matches('#'))?;
        self.bot_username = normalise_login("bot_username", &self.bot_username)?;

        self.bot_credential = self.bot_credential.trim().to_owned();
        if self.bot_credential.is_empty() || self.bot_credential == "oauth:" {
            return Err(InvalidConfigurationError::new(
                "bot_credential",
                "must not be empty",
            ));
        }

        check_template("kill_message_template", &self.kill_message_template)?;
        check_template("death_message_template", &self.death_message_template)?;
        check_template(
            "match_end_message_template",
            &self.match_end_message_template,
        )?;

        Ok(self)
    }
}

impl std::fmt::Debug for BotConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotConfiguration")
            .field("channel", &self.channel)
            .field("bot_username", &self.bot_username)
            .field("bot_credential", &"<redacted>")
            .field("enabled", &self.enabled)
            .field("kill_message_template", &self.kill_message_template)
            .field("death_message_template", &self.death_message_template)
            .field("match_end_message_template", &self.match_end_message_template)
            .finish()
    }
}

/// Chat logins are case-insensitive and can't contain whitespace.
fn normalise_login(field: &'static str, value: &str) -> Result<String, InvalidConfigurationError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(InvalidConfigurationError::new(field, "must not be empty"));
    }
    if value.chars().any(char::is_whitespace) {
        return Err(InvalidConfigurationError::new(
            field,
            "must not contain whitespace",
        ));
    }
    Ok(value.to_lowercase())
}

fn check_template(field: &'static str, template: &str) -> Result<(), InvalidConfigurationError> {
    if template.contains(['\r', '\n']) {
        return Err(InvalidConfigurationError::new(
            field,
            "must be a single line",
        ));
    }
    // Every `(kills)` can grow into the widest possible count.
    let widest_count = u32::MAX.to_string().chars().count();
    let tokens = template.matches(crate::template::KILLS_TOKEN).count();
    let length = template.chars().count()
        + tokens * widest_count.saturating_sub(crate::template::KILLS_TOKEN.len());
    if length > MAX_MESSAGE_LENGTH {
        return Err(InvalidConfigurationError::new(
            field,
            format!("can render to {length} characters, the limit is {MAX_MESSAGE_LENGTH}"),
        ));
    }
    Ok(())
}

/// A partial configuration, as found in config files and settings updates.
#[derive(serde::Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BotConfigurationPatch {
    pub channel: Option<String>,
    pub bot_username: Option<String>,
    pub bot_credential: Option<String>,
    pub enabled: Option<bool>,
    pub kill_message_template: Option<String>,
    pub death_message_template: Option<String>,
    pub match_end_message_template: Option<String>,
}

impl BotConfigurationPatch {
    /// Build a brand new configuration. Templates and `enabled` fall back to their defaults,
    /// the identity fields are required.
    pub fn into_configuration(self) -> Result<BotConfiguration, InvalidConfigurationError> {
        let required = |field: &'static str, value: Option<String>| {
            value.ok_or_else(|| InvalidConfigurationError::new(field, "is required"))
        };

        BotConfiguration {
            channel: required("channel", self.channel)?,
            bot_username: required("bot_username", self.bot_username)?,
            bot_credential: required("bot_credential", self.bot_credential)?,
            enabled: self.enabled.unwrap_or(true),
            kill_message_template: self
                .kill_message_template
                .unwrap_or_else(|| DEFAULT_KILL_TEMPLATE.to_owned()),
            death_message_template: self
                .death_message_template
                .unwrap_or_else(|| DEFAULT_DEATH_TEMPLATE.to_owned()),
            match_end_message_template: self
                .match_end_message_template
                .unwrap_or_else(|| DEFAULT_MATCH_END_TEMPLATE.to_owned()),
        }
        .validate()
    }

    /// Overlay the fields present in this patch onto `base`.
    pub fn apply(&self, base: &BotConfiguration) -> Result<BotConfiguration, InvalidConfigurationError> {
        let pick = |patched: &Option<String>, current: &String| {
            patched.clone().unwrap_or_else(|| current.clone())
        };

        BotConfiguration {
            channel: pick(&self.channel, &base.channel),
            bot_username: pick(&self.bot_username, &base.bot_username),
            bot_credential: pick(&self.bot_credential, &base.bot_credential),
            enabled: self.enabled.unwrap_or(base.enabled),
            kill_message_template: pick(&self.kill_message_template, &base.kill_message_template),
            death_message_template: pick(
                &self.death_message_template,
                &base.death_message_template,
            ),
            match_end_message_template: pick(
                &self.match_end_message_template,
                &base.match_end_message_template,
            ),
        }
        .validate()
    }
}

/// The on-disk TOML config file.
#[derive(serde::Deserialize, Clone, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub bot: BotConfigurationPatch,
}

impl ConfigFile {
    pub fn load(path: &std::path::Path) -> Result<Self, eyre::Report> {
        let config = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("Couldn't read config file {}", path.display()))?;
        Self::parse(&config)
    }

    pub fn parse(config: &str) -> Result<Self, eyre::Report> {
        toml::from_str(config).wrap_err("Failed to parse config")
    }
}
