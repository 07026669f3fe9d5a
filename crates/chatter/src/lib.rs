//! Announces game kills, deaths and match results in a Twitch channel's chat.

pub mod chat;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod helix;
pub mod host;
pub mod irc;
pub mod listener;
pub mod settings;
pub mod telemetry;
pub mod template;

#[cfg(test)]
mod fakes;
