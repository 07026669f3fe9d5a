use std::sync::Arc;

use clap::Parser;
use color_eyre::Result;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _};
use twitch_api::{client::ClientDefault, HelixClient};

use warzone_chatter::{
    chat::{ChatConnection, ChatNetwork},
    dispatcher::{Dispatcher, RunEnd},
    helix::HelixNetwork,
    host::{self, RestartPolicy, Shutdown, ShutdownTrigger},
    irc::IrcNetwork,
    settings::{ConfigFileSource, SettingsStore},
    telemetry::SocketTelemetry,
};

/// How many events may queue up while the dispatcher is busy talking to chat.
const EVENT_QUEUE: usize = 128;
const TOKEN_ENV: &str = "WARZONE_CHATTER_TOKEN";

#[derive(clap::ValueEnum, Debug, Clone, Copy)]
enum Transport {
    /// Twitch IRC over websockets
    Irc,
    /// The Helix "send chat message" API
    Helix,
}

#[derive(Parser, Debug, Clone)]
#[clap(about, version)]
struct Cli {
    /// Bot settings, re-read whenever the file changes
    #[clap(long, env = "WARZONE_CHATTER_CONFIG", default_value = "config.toml")]
    config: std::path::PathBuf,
    /// Optional `.env` file, `WARZONE_CHATTER_TOKEN` in there overrides `bot_credential`
    #[clap(long, default_value = ".env")]
    env_file: std::path::PathBuf,
    /// How to post into chat
    #[clap(long, value_enum, default_value_t = Transport::Irc)]
    transport: Transport,
    /// Mock websocket server for testing
    #[clap(long)]
    irc_server: Option<url::Url>,
    /// Where the game companion connects to
    #[clap(long, default_value = warzone_telemetry::SOCKET_PATH)]
    socket: std::path::PathBuf,
    #[clap(long, default_value_t = 10)]
    connect_timeout_secs: u64,
    #[clap(long, default_value_t = 5)]
    config_poll_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), eyre::Report> {
    color_eyre::install()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let cli_args = Cli::parse();
    if let Err(error) = dotenvy::from_path(&cli_args.env_file) {
        if !error.not_found() {
            return Err(error.into());
        }
    }

    let (trigger, shutdown) = host::shutdown_channel();
    tokio::spawn(listen_for_ctrl_c(trigger));

    let settings = Arc::new(SettingsStore::new());
    let source = ConfigFileSource {
        path: cli_args.config.clone(),
        credential: std::env::var(TOKEN_ENV).ok(),
    };
    match source.load_into(&settings) {
        Ok(config) => tracing::info!("Loaded configuration: {config:?}"),
        Err(error) => tracing::error!("No usable configuration yet, waiting for edits: {error:?}"),
    }
    tokio::spawn(source.watch(
        Arc::clone(&settings),
        std::time::Duration::from_secs(cli_args.config_poll_secs),
    ));

    let timeout = std::time::Duration::from_secs(cli_args.connect_timeout_secs);
    let end = match cli_args.transport {
        Transport::Irc => {
            let server = match &cli_args.irc_server {
                Some(server) => server.clone(),
                None => warzone_chatter::irc::TWITCH_IRC_URL.parse()?,
            };
            let connection = ChatConnection::new(IrcNetwork::new(server), timeout);
            run_bot(&cli_args, &settings, connection, shutdown).await?
        }
        Transport::Helix => {
            let client: HelixClient<'static, reqwest::Client> = HelixClient::with_client(
                ClientDefault::default_client_with_name(Some("warzone_chatter".parse()?))?,
            );
            let connection = ChatConnection::new(HelixNetwork::new(client), timeout);
            run_bot(&cli_args, &settings, connection, shutdown).await?
        }
    };

    match end {
        RunEnd::Shutdown => tracing::info!("Shutting down"),
        RunEnd::EventsClosed => eyre::bail!("Gave up waiting for the game companion"),
    }
    Ok(())
}

/// One dispatcher for the whole process, fed by however many listener restarts it takes.
async fn run_bot<N: ChatNetwork + 'static>(
    cli_args: &Cli,
    settings: &SettingsStore,
    connection: ChatConnection<N>,
    shutdown: Shutdown,
) -> Result<RunEnd, eyre::Report> {
    let (events_tx, events_rx) = tokio::sync::mpsc::channel(EVENT_QUEUE);
    let dispatcher = tokio::spawn(Dispatcher::new(connection).run(
        events_rx,
        settings.subscribe(),
        shutdown.clone().requested(),
    ));

    let mut telemetry = SocketTelemetry::new(&cli_args.socket);
    host::supervise(
        &mut telemetry,
        events_tx,
        RestartPolicy::default(),
        shutdown,
    )
    .await;

    Ok(dispatcher.await?)
}

async fn listen_for_ctrl_c(trigger: ShutdownTrigger) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Ctrl-C received");
            trigger.request();
        }
        Err(error) => tracing::error!("Couldn't listen for Ctrl-C: {error}"),
    }
}
