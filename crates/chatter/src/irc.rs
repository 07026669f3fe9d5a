//! Twitch chat over IRC-on-WebSockets.

use futures::{SinkExt as _, StreamExt as _};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::{
    chat::{ChatNetwork, ChatSession, Identity},
    error::ChatError,
};

pub const TWITCH_IRC_URL: &str = "wss://irc-ws.chat.twitch.tv:443";

type Socket =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// How long a closing session gets to say goodbye before it is dropped.
const CLOSE_GRACE: std::time::Duration = std::time::Duration::from_secs(2);

pub struct IrcNetwork {
    server: url::Url,
}

impl IrcNetwork {
    pub const fn new(server: url::Url) -> Self {
        Self { server }
    }
}

impl ChatNetwork for IrcNetwork {
    type Session = IrcSession;

    async fn open(&self, identity: &Identity) -> Result<IrcSession, ChatError> {
        let (mut socket, _response) = tokio_tungstenite::connect_async(self.server.as_str())
            .await
            .map_err(|error| ChatError::network(format!("couldn't reach {}: {error}", self.server)))?;

        sign_in(&mut socket, identity).await?;

        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_session(socket, identity.channel.clone(), outgoing_rx));
        Ok(IrcSession {
            channel: identity.channel.clone(),
            outgoing: Some(outgoing_tx),
            task: Some(task),
        })
    }
}

pub struct IrcSession {
    channel: String,
    outgoing: Option<mpsc::UnboundedSender<String>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl ChatSession for IrcSession {
    async fn say(&mut self, message: &str) -> Result<(), ChatError> {
        let Some(outgoing) = &self.outgoing else {
            return Err(ChatError::NotConnected);
        };
        outgoing
            .send(message.to_owned())
            .map_err(|_closed| ChatError::network(format!("session for #{} has ended", self.channel)))
    }

    fn is_closed(&self) -> bool {
        self.outgoing
            .as_ref()
            .map_or(true, mpsc::UnboundedSender::is_closed)
    }

    async fn close(&mut self) {
        // The session task parts the channel once its queue is dropped.
        drop(self.outgoing.take());
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
                tracing::warn!(channel = %self.channel, "Chat session didn't close in time");
                task.abort();
            }
        }
    }
}

/// Authenticate and join, answering keepalives along the way.
async fn sign_in(socket: &mut Socket, identity: &Identity) -> Result<(), ChatError> {
    send_line(socket, "CAP REQ :twitch.tv/tags twitch.tv/commands").await?;
    send_line(socket, &format!("PASS {}", oauth_password(&identity.credential))).await?;
    send_line(socket, &format!("NICK {}", identity.username)).await?;
    await_reply(socket, |line| match line {
        IrcLine::Welcome => Some(Ok(())),
        IrcLine::AuthFailed(reason) => Some(Err(ChatError::auth(*reason))),
        _ => None,
    })
    .await?;
    tracing::debug!(username = %identity.username, "Signed in to chat");

    send_line(socket, &format!("JOIN #{}", identity.channel)).await?;
    await_reply(socket, |line| match line {
        IrcLine::Join { nick, channel }
            if nick.eq_ignore_ascii_case(&identity.username)
                && channel.eq_ignore_ascii_case(&identity.channel) =>
        {
            Some(Ok(()))
        }
        _ => None,
    })
    .await
}

/// Read until `accept` recognises a line.
async fn await_reply(
    socket: &mut Socket,
    accept: impl Fn(&IrcLine<'_>) -> Option<Result<(), ChatError>>,
) -> Result<(), ChatError> {
    while let Some(frame) = socket.next().await {
        let text = match frame.map_err(|error| ChatError::network(error.to_string()))? {
            Message::Text(text) => text,
            Message::Close(frame) => {
                return Err(ChatError::network(format!(
                    "server closed the connection: {frame:?}"
                )))
            }
            _ => continue,
        };

        for line in text.as_str().lines() {
            let parsed = parse_line(line);
            if let IrcLine::Ping(token) = parsed {
                send_line(socket, &format!("PONG {token}")).await?;
                continue;
            }
            if let Some(outcome) = accept(&parsed) {
                return outcome;
            }
        }
    }

    Err(ChatError::network("connection closed while signing in"))
}

/// Owns the socket once signed in: writes queued messages and keeps the connection alive.
async fn run_session(
    socket: Socket,
    channel: String,
    mut outgoing: mpsc::UnboundedReceiver<String>,
) {
    let (mut writer, mut reader) = socket.split();

    'session: loop {
        tokio::select! {
            maybe_message = outgoing.recv() => {
                let Some(message) = maybe_message else {
                    let _ = writer.send(text_frame(format!("PART #{channel}"))).await;
                    let _ = writer.close().await;
                    tracing::debug!(channel = %channel, "Left chat channel");
                    break 'session;
                };
                let line = format!("PRIVMSG #{channel} :{message}");
                if let Err(error) = writer.send(text_frame(line)).await {
                    tracing::warn!(channel = %channel, "Couldn't write to chat: {error}");
                    break 'session;
                }
            }
            maybe_frame = reader.next() => {
                let text = match maybe_frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(frame))) => {
                        tracing::warn!(channel = %channel, "Chat server closed the connection: {frame:?}");
                        break 'session;
                    }
                    Some(Ok(_)) => continue 'session,
                    Some(Err(error)) => {
                        tracing::warn!(channel = %channel, "Chat connection error: {error}");
                        break 'session;
                    }
                    None => break 'session,
                };

                for line in text.as_str().lines() {
                    match parse_line(line) {
                        IrcLine::Ping(token) => {
                            if writer.send(text_frame(format!("PONG {token}"))).await.is_err() {
                                break 'session;
                            }
                        }
                        IrcLine::Reconnect => {
                            tracing::warn!(channel = %channel, "Chat server asked us to reconnect");
                            break 'session;
                        }
                        IrcLine::Notice(notice) | IrcLine::AuthFailed(notice) => {
                            tracing::warn!(channel = %channel, "Chat notice: {notice}");
                        }
                        _ => tracing::trace!("IRC: {line}"),
                    }
                }
            }
        }
    }
}

async fn send_line(socket: &mut Socket, line: &str) -> Result<(), ChatError> {
    socket
        .send(text_frame(line.to_owned()))
        .await
        .map_err(|error| ChatError::network(error.to_string()))
}

fn text_frame(line: String) -> Message {
    Message::Text(line.into())
}

/// Twitch wants the token prefixed with `oauth:`.
fn oauth_password(credential: &str) -> String {
    if credential.starts_with("oauth:") {
        credential.to_owned()
    } else {
        format!("oauth:{credential}")
    }
}

/// The handful of IRC lines the bot cares about.
#[derive(Debug, PartialEq, Eq)]
enum IrcLine<'line> {
    Ping(&'line str),
    Welcome,
    AuthFailed(&'line str),
    Notice(&'line str),
    Join { nick: &'line str, channel: &'line str },
    Reconnect,
    Other,
}

const AUTH_FAILURES: [&str; 3] = [
    "Login authentication failed",
    "Improperly formatted auth",
    "Login unsuccessful",
];

fn parse_line(line: &str) -> IrcLine<'_> {
    let line = line.trim_end_matches(['\r', '\n']);
    let line = match line.strip_prefix('@') {
        Some(tagged) => tagged.split_once(' ').map_or("", |(_tags, rest)| rest),
        None => line,
    };
    let (prefix, rest) = match line.strip_prefix(':') {
        Some(prefixed) => prefixed.split_once(' ').unwrap_or((prefixed, "")),
        None => ("", line),
    };
    let (command, params) = rest.split_once(' ').unwrap_or((rest, ""));

    match command {
        "PING" => IrcLine::Ping(params),
        "001" => IrcLine::Welcome,
        "NOTICE" => {
            let notice = trailing(params);
            if AUTH_FAILURES.iter().any(|failure| notice.contains(failure)) {
                IrcLine::AuthFailed(notice)
            } else {
                IrcLine::Notice(notice)
            }
        }
        "JOIN" => IrcLine::Join {
            nick: prefix.split('!').next().unwrap_or(prefix),
            channel: params.trim().trim_start_matches('#'),
        },
        "RECONNECT" => IrcLine::Reconnect,
        _ => IrcLine::Other,
    }
}

/// The free-text parameter after the first ` :`.
fn trailing(params: &str) -> &str {
    match params.strip_prefix(':') {
        Some(text) => text,
        None => params.split_once(" :").map_or(params, |(_, text)| text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_keepalives() {
        assert_eq!(
            parse_line("PING :tmi.twitch.tv\r\n"),
            IrcLine::Ping(":tmi.twitch.tv")
        );
    }

    #[test]
    fn parses_the_welcome_numeric() {
        assert_eq!(
            parse_line(":tmi.twitch.tv 001 killbot :Welcome, GLHF!"),
            IrcLine::Welcome
        );
    }

    #[test]
    fn recognises_auth_failures() {
        assert_eq!(
            parse_line(":tmi.twitch.tv NOTICE * :Login authentication failed"),
            IrcLine::AuthFailed("Login authentication failed")
        );
        assert_eq!(
            parse_line(":tmi.twitch.tv NOTICE * :Improperly formatted auth"),
            IrcLine::AuthFailed("Improperly formatted auth")
        );
    }

    #[test]
    fn other_notices_are_just_notices() {
        assert_eq!(
            parse_line("@msg-id=msg_ratelimit :tmi.twitch.tv NOTICE #streamer :You are sending messages too quickly."),
            IrcLine::Notice("You are sending messages too quickly.")
        );
    }

    #[test]
    fn parses_join_echoes() {
        assert_eq!(
            parse_line(":killbot!killbot@killbot.tmi.twitch.tv JOIN #streamer"),
            IrcLine::Join {
                nick: "killbot",
                channel: "streamer"
            }
        );
    }

    #[test]
    fn parses_reconnect_requests() {
        assert_eq!(parse_line(":tmi.twitch.tv RECONNECT"), IrcLine::Reconnect);
    }

    #[test]
    fn ignores_chatter() {
        assert_eq!(
            parse_line("@badge-info=;color=#1E90FF :someone!someone@someone.tmi.twitch.tv PRIVMSG #streamer :gg"),
            IrcLine::Other
        );
    }

    #[test]
    fn adds_the_oauth_prefix_once() {
        assert_eq!(oauth_password("abc"), "oauth:abc");
        assert_eq!(oauth_password("oauth:abc"), "oauth:abc");
    }

    /// A tiny Twitch-like IRC server on a local port. Refuses the `expired` token.
    async fn mock_server() -> (url::Url, tokio::sync::mpsc::UnboundedReceiver<String>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let (received_tx, received_rx) = tokio::sync::mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let received = received_tx.clone();
                tokio::spawn(async move {
                    let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();
                    let mut nick = String::new();
                    let mut password = String::new();
                    while let Some(Ok(Message::Text(text))) = socket.next().await {
                        let line = text.as_str().to_owned();
                        let _ = received.send(line.clone());
                        let reply = if let Some(value) = line.strip_prefix("PASS ") {
                            password = value.to_owned();
                            None
                        } else if let Some(value) = line.strip_prefix("NICK ") {
                            nick = value.to_owned();
                            if password == "oauth:expired" {
                                Some(":tmi.twitch.tv NOTICE * :Login authentication failed".to_owned())
                            } else {
                                Some(format!(
                                    "PING :tmi.twitch.tv\r\n:tmi.twitch.tv 001 {nick} :Welcome, GLHF!"
                                ))
                            }
                        } else if let Some(channel) = line.strip_prefix("JOIN ") {
                            Some(format!(":{nick}!{nick}@{nick}.tmi.twitch.tv JOIN {channel}"))
                        } else {
                            None
                        };
                        if let Some(reply) = reply {
                            socket.send(Message::Text(reply.into())).await.unwrap();
                        }
                    }
                });
            }
        });

        let url = url::Url::parse(&format!("ws://{address}")).unwrap();
        (url, received_rx)
    }

    fn identity(credential: &str) -> Identity {
        Identity {
            username: "killbot".to_owned(),
            credential: credential.to_owned(),
            channel: "streamer".to_owned(),
        }
    }

    #[tokio::test]
    async fn signs_in_joins_and_posts() {
        let (url, mut received) = mock_server().await;
        let network = IrcNetwork::new(url);

        let mut session = network.open(&identity("abc123")).await.unwrap();
        session.say("3 enemies eliminated").await.unwrap();
        session.close().await;

        let mut lines = Vec::new();
        while let Ok(Some(line)) =
            tokio::time::timeout(std::time::Duration::from_secs(2), received.recv()).await
        {
            let parted = line.starts_with("PART ");
            lines.push(line);
            if parted {
                break;
            }
        }
        assert!(lines.contains(&"PASS oauth:abc123".to_owned()));
        assert!(lines.contains(&"NICK killbot".to_owned()));
        assert!(lines.contains(&"PONG :tmi.twitch.tv".to_owned()));
        assert!(lines.contains(&"JOIN #streamer".to_owned()));
        assert!(lines.contains(&"PRIVMSG #streamer :3 enemies eliminated".to_owned()));
        assert!(lines.contains(&"PART #streamer".to_owned()));
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn rejected_credentials_are_auth_errors() {
        let (url, _received) = mock_server().await;
        let network = IrcNetwork::new(url);

        let result = network.open(&identity("expired")).await;
        assert!(matches!(result, Err(ChatError::Auth(_))));
    }

    #[tokio::test]
    async fn unreachable_servers_are_network_errors() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let network = IrcNetwork::new(url::Url::parse(&format!("ws://{address}")).unwrap());
        let result = network.open(&identity("abc123")).await;
        assert!(matches!(result, Err(ChatError::Network(_))));
    }
}
