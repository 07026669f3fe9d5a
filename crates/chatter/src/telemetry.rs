//! The game companion's feed, over a Unix domain socket.

use std::os::unix::fs::FileTypeExt as _;

use tokio::io::{AsyncBufReadExt as _, AsyncRead, AsyncWrite, AsyncWriteExt as _};
use tokio::sync::mpsc;
use warzone_telemetry::{BotMessage, CompanionMessage, EventBatch};

use crate::{error::ListenerSetupError, listener::TelemetrySource};

const BATCH_QUEUE: usize = 64;

pub struct SocketTelemetry {
    path: std::path::PathBuf,
    game_id: u32,
}

impl SocketTelemetry {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            path: path.into(),
            game_id: warzone_telemetry::WARZONE_GAME_ID,
        }
    }
}

impl TelemetrySource for SocketTelemetry {
    /// Waits for a companion to connect, then negotiates features with it.
    async fn subscribe(
        &mut self,
        features: &[&'static str],
    ) -> Result<mpsc::Receiver<EventBatch>, ListenerSetupError> {
        remove_stale_socket(&self.path)?;
        let listener = tokio::net::UnixListener::bind(&self.path)
            .map_err(|error| ListenerSetupError::socket(&self.path, error))?;

        tracing::info!("Waiting for the game companion on {}...", self.path.display());
        let (stream, _addr) = listener
            .accept()
            .await
            .map_err(|error| ListenerSetupError::socket(&self.path, error))?;
        tracing::info!("Game companion connected");

        negotiate(stream, self.game_id, features).await
    }
}

/// Clear a socket left behind by an earlier run. Anything else at `path` is left alone.
fn remove_stale_socket(path: &std::path::Path) -> Result<(), ListenerSetupError> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(error) => return Err(ListenerSetupError::socket(path, error)),
    };
    if !metadata.file_type().is_socket() {
        return Err(ListenerSetupError::socket(
            path,
            std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "something other than a socket is already there",
            ),
        ));
    }
    std::fs::remove_file(path).map_err(|error| ListenerSetupError::socket(path, error))
}

/// Ask the companion for `features` and, once it agrees, stream its batches.
pub async fn negotiate<S>(
    stream: S,
    game_id: u32,
    features: &[&'static str],
) -> Result<mpsc::Receiver<EventBatch>, ListenerSetupError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, mut write_half) = tokio::io::split(stream);

    let request = warzone_telemetry::encode_line(&BotMessage::SetRequiredFeatures {
        game_id,
        features: features.iter().map(|&feature| feature.to_owned()).collect(),
    })
    .map_err(|error| ListenerSetupError::Handshake(error.to_string()))?;
    write_half
        .write_all(request.as_bytes())
        .await
        .map_err(|error| ListenerSetupError::Handshake(error.to_string()))?;

    let mut lines = tokio::io::BufReader::new(read_half).lines();
    let reply = lines
        .next_line()
        .await
        .map_err(|error| ListenerSetupError::Handshake(error.to_string()))?
        .ok_or_else(|| {
            ListenerSetupError::Handshake(
                "companion hung up before confirming features".to_owned(),
            )
        })?;

    match serde_json::from_str::<CompanionMessage>(&reply) {
        Ok(CompanionMessage::FeaturesStatus { success: true, .. }) => {}
        Ok(CompanionMessage::FeaturesStatus {
            success: false,
            reason,
        }) => {
            return Err(ListenerSetupError::FeaturesRejected(
                reason.unwrap_or_else(|| "no reason given".to_owned()),
            ))
        }
        Ok(other) => {
            return Err(ListenerSetupError::Handshake(format!(
                "expected a features status, got {other:?}"
            )))
        }
        Err(error) => {
            return Err(ListenerSetupError::Handshake(format!(
                "malformed features status: {error}"
            )))
        }
    }

    let (batches_tx, batches_rx) = mpsc::channel(BATCH_QUEUE);
    tokio::spawn(async move {
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    tracing::info!("Game companion disconnected");
                    break;
                }
                Err(error) => {
                    tracing::warn!("Game companion connection error: {error}");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<CompanionMessage>(&line) {
                Ok(CompanionMessage::NewEvents(batch)) => {
                    if batches_tx.send(batch).await.is_err() {
                        break;
                    }
                }
                Ok(other) => tracing::debug!("Ignoring companion message: {other:?}"),
                Err(error) => tracing::warn!("Skipping malformed telemetry line: {error}"),
            }
        }
        drop(write_half);
    });

    Ok(batches_rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEATURES: [&str; 3] = ["kill", "death", "match_end"];

    /// Play the companion's side: read the request, answer with `status`, then send `lines`.
    fn companion(
        stream: tokio::io::DuplexStream,
        status: &'static str,
        lines: Vec<&'static str>,
    ) -> tokio::task::JoinHandle<String> {
        tokio::spawn(async move {
            let (read_half, mut write_half) = tokio::io::split(stream);
            let mut reader = tokio::io::BufReader::new(read_half).lines();
            let request = reader.next_line().await.unwrap().unwrap();
            write_half.write_all(status.as_bytes()).await.unwrap();
            for line in lines {
                write_half.write_all(line.as_bytes()).await.unwrap();
            }
            request
        })
    }

    #[tokio::test]
    async fn negotiates_then_streams_batches() {
        let (bot_side, companion_side) = tokio::io::duplex(4096);
        let companion = companion(
            companion_side,
            "{\"type\":\"features_status\",\"success\":true}\n",
            vec![
                "{\"type\":\"new_events\",\"events\":[{\"name\":\"kill\"}]}\n",
                "not json at all\n",
                "\n",
                "{\"type\":\"new_events\",\"events\":[{\"name\":\"death\"},{\"name\":\"match_end\"}]}\n",
            ],
        );

        let mut batches = negotiate(bot_side, 21652, &FEATURES).await.unwrap();
        let request = companion.await.unwrap();
        assert_eq!(
            serde_json::from_str::<BotMessage>(&request).unwrap(),
            BotMessage::SetRequiredFeatures {
                game_id: 21652,
                features: vec!["kill".to_owned(), "death".to_owned(), "match_end".to_owned()],
            }
        );

        let first = batches.recv().await.unwrap();
        assert_eq!(first.events.len(), 1);
        let second = batches.recv().await.unwrap();
        assert_eq!(second.events[1].name, "match_end");
        assert!(batches.recv().await.is_none());
    }

    #[tokio::test]
    async fn refused_features_are_a_setup_error() {
        let (bot_side, companion_side) = tokio::io::duplex(4096);
        let _companion = companion(
            companion_side,
            "{\"type\":\"features_status\",\"success\":false,\"reason\":\"game not running\"}\n",
            Vec::new(),
        );

        let error = negotiate(bot_side, 21652, &FEATURES).await.unwrap_err();
        assert!(
            matches!(error, ListenerSetupError::FeaturesRejected(ref reason) if reason == "game not running")
        );
    }

    #[tokio::test]
    async fn a_silent_hang_up_is_a_setup_error() {
        let (bot_side, companion_side) = tokio::io::duplex(4096);
        drop(companion_side);

        let error = negotiate(bot_side, 21652, &FEATURES).await.unwrap_err();
        assert!(matches!(error, ListenerSetupError::Handshake(_)));
    }

    #[tokio::test]
    async fn refuses_to_delete_a_regular_file_at_the_socket_path() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut source = SocketTelemetry::new(file.path());

        let error = source.subscribe(&FEATURES).await.unwrap_err();
        assert!(matches!(error, ListenerSetupError::Socket { .. }));
        assert!(file.path().exists());
    }

    #[tokio::test]
    async fn replaces_a_socket_left_by_an_earlier_run() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("warzone.sock");
        drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
        assert!(path.exists());

        remove_stale_socket(&path).unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn unusable_socket_paths_are_a_setup_error() {
        let mut source = SocketTelemetry::new("/nonexistent-directory/warzone.sock");
        let error = source.subscribe(&FEATURES).await.unwrap_err();
        assert!(matches!(error, ListenerSetupError::Socket { .. }));
    }
}
