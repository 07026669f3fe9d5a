use clap::Parser;
use color_eyre::eyre::{bail, Result, WrapErr as _};
use tokio::io::{AsyncBufReadExt as _, AsyncWriteExt as _};
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _};

use warzone_telemetry::{BotMessage, CompanionMessage, EventBatch};

/// Pipes game event batches from a companion's STDOUT into the chatter bot.
#[derive(Parser, Debug, Clone)]
#[clap(about, version)]
struct Cli {
    /// The bot's telemetry socket
    #[clap(long, env = "WARZONE_TELEMETRY_SOCKET", default_value = warzone_telemetry::SOCKET_PATH)]
    socket: std::path::PathBuf,
    /// Where to write logs, STDIN and STDOUT belong to the companion
    #[clap(long, default_value = "/tmp/warzone-telemetry.log")]
    log_file: std::path::PathBuf,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli_args = Cli::parse();
    setup_logging(&cli_args.log_file)?;

    let (batches_tx, batches_rx) = tokio::sync::mpsc::channel(16);
    start_listener(batches_tx);
    relay(&cli_args.socket, batches_rx).await
}

/// Start a dedicated thread for the STDIN listener.
fn start_listener(sender: tokio::sync::mpsc::Sender<EventBatch>) {
    std::thread::spawn(move || {
        let result = listen_for_companion_events(&sender);
        if let Err(error) = result {
            tracing::error!("Reading companion events: {error:?}");
        }
    });
}

/// Listen for event batches from the companion, one JSON object per line.
///
/// Both the platform's bare `{"events": [...]}` shape and our tagged `new_events` message
/// are accepted.
fn listen_for_companion_events(sender: &tokio::sync::mpsc::Sender<EventBatch>) -> Result<()> {
    tracing::debug!("Starting to listen on STDIN for companion events");
    for maybe_line in std::io::stdin().lines() {
        let line = maybe_line?;
        if line.trim().is_empty() {
            continue;
        }
        let batch = match serde_json::from_str::<CompanionMessage>(&line) {
            Ok(CompanionMessage::NewEvents(batch)) => batch,
            Ok(other) => {
                tracing::debug!("Ignoring companion message: {other:?}");
                continue;
            }
            Err(_) => match serde_json::from_str::<EventBatch>(&line) {
                Ok(batch) => batch,
                Err(error) => {
                    tracing::warn!("Skipping malformed event line: {error}");
                    continue;
                }
            },
        };
        sender.blocking_send(batch)?;
    }
    Ok(())
}

/// Connect to the bot, agree on features and forward every batch in order.
async fn relay(
    socket_path: &std::path::Path,
    mut batches: tokio::sync::mpsc::Receiver<EventBatch>,
) -> Result<()> {
    let stream = tokio::net::UnixStream::connect(socket_path)
        .await
        .wrap_err_with(|| format!("Couldn't connect to the bot at {}", socket_path.display()))?;
    tracing::info!("Connected to the bot at {}", socket_path.display());
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = tokio::io::BufReader::new(read_half).lines();

    let Some(request) = lines.next_line().await? else {
        bail!("Bot hung up before requesting any features");
    };
    let BotMessage::SetRequiredFeatures { game_id, features } =
        serde_json::from_str::<BotMessage>(&request).wrap_err("Unexpected request from the bot")?;
    tracing::info!("Bot requires features {features:?} for game {game_id}");

    let status = warzone_telemetry::encode_line(&CompanionMessage::FeaturesStatus {
        success: true,
        reason: None,
    })?;
    write_half.write_all(status.as_bytes()).await?;

    while let Some(batch) = batches.recv().await {
        tracing::debug!("Forwarding {} events", batch.events.len());
        let line = warzone_telemetry::encode_line(&CompanionMessage::NewEvents(batch))?;
        write_half
            .write_all(line.as_bytes())
            .await
            .wrap_err("Bot connection closed")?;
    }

    tracing::info!("Companion closed STDIN, relay finished");
    Ok(())
}

/// Setup logging to a file.
fn setup_logging(path: &std::path::Path) -> Result<()> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(path)?;
    let file_appender = tracing_subscriber::fmt::layer().with_writer(file);
    tracing_subscriber::registry()
        .with(file_appender)
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    Ok(())
}
