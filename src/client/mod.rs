//! Chat client engine
//!
//! Three cooperating parts share one connection:
//!
//! - the listener task reads frames and posts them as [`ClientEvent::Inbound`]
//! - the menu thread posts requests as [`ClientEvent::Outbound`]
//! - the event loop consumes both, renders inbound traffic through a
//!   [`Console`], and is the only writer on the socket
//!
//! Shutdown is cooperative. The menu posts [`ClientEvent::Quit`]; the event
//! loop writes whatever is still queued, shuts the write half, and gives the
//! listener a moment to see the close.

mod menu;
mod terminal;

pub use menu::{run_menu, MenuLink, Prompt};
pub use terminal::{TerminalConsole, TerminalPrompt};

use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ProtocolError;
use crate::message::{write_message, FrameReader, Message, RoomEventKind};

/// Default look-back for the history requested on joining a room
pub const DEFAULT_HISTORY_MINUTES: i64 = 60;

/// How long the menu waits for a reply before re-prompting
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

const EVENT_QUEUE: usize = 64;
const LISTENER_GRACE: Duration = Duration::from_secs(2);

/// Everything the event loop reacts to
#[derive(Debug)]
pub enum ClientEvent {
    /// Request from the menu, to be written to the server
    Outbound(Message),
    /// Frame read by the listener
    Inbound(Message),
    /// The listener stopped; carries the reason
    ServerClosed(String),
    /// The menu is done
    Quit,
}

/// Where server traffic is shown to the user
pub trait Console: Send {
    fn print(&mut self, line: &str);
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Connection to server lost: {0}")]
    ConnectionLost(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Cannot start menu thread: {0}")]
    Menu(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub history_lookback: chrono::Duration,
    pub reply_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            history_lookback: chrono::Duration::minutes(DEFAULT_HISTORY_MINUTES),
            reply_timeout: REPLY_TIMEOUT,
        }
    }
}

/// Run a full client session over `stream`
///
/// Returns once the user quits or the server goes away.
pub async fn run<P, C>(
    stream: TcpStream,
    mut prompt: P,
    mut console: C,
    options: ClientOptions,
) -> Result<(), ClientError>
where
    P: Prompt + 'static,
    C: Console,
{
    let (reader, mut writer) = stream.into_split();
    let (events_tx, mut events_rx) = mpsc::channel::<ClientEvent>(EVENT_QUEUE);
    let (replies_tx, replies_rx) = std_mpsc::channel::<Message>();

    let listener = spawn_listener(reader, events_tx.clone());

    let link = MenuLink {
        events: events_tx,
        replies: replies_rx,
        reply_timeout: options.reply_timeout,
        history_lookback: options.history_lookback,
    };
    std::thread::Builder::new()
        .name("menu".to_string())
        .spawn(move || run_menu(&mut prompt, link))?;

    let outcome = loop {
        let Some(event) = events_rx.recv().await else {
            break Ok(());
        };

        match event {
            ClientEvent::Outbound(message) => {
                debug!(command = ?message.command(), "sending");
                if let Err(e) = write_message(&mut writer, &message).await {
                    break Err(ClientError::ConnectionLost(e.to_string()));
                }
            }
            ClientEvent::Inbound(message) => {
                for line in render(&message) {
                    console.print(&line);
                }
                if forwards_to_menu(&message) {
                    let _ = replies_tx.send(message);
                }
            }
            ClientEvent::ServerClosed(reason) => {
                break Err(ClientError::ConnectionLost(reason));
            }
            ClientEvent::Quit => break flush_pending(&mut events_rx, &mut writer).await,
        }
    };

    if let Err(e) = writer.shutdown().await {
        debug!("shutdown failed: {}", e);
    }
    if outcome.is_ok() {
        // show what the server sent before it saw the close
        let drain = async {
            while let Some(event) = events_rx.recv().await {
                match event {
                    ClientEvent::Inbound(message) => {
                        for line in render(&message) {
                            console.print(&line);
                        }
                    }
                    ClientEvent::ServerClosed(_) => break,
                    _ => {}
                }
            }
        };
        let _ = tokio::time::timeout(LISTENER_GRACE, drain).await;
    }
    listener.abort();

    match &outcome {
        Ok(()) => info!("client session ended"),
        Err(e) => {
            warn!("client session ended: {}", e);
            console.print(&e.to_string());
        }
    }
    outcome
}

/// Write requests the menu queued before quitting
async fn flush_pending(
    events: &mut mpsc::Receiver<ClientEvent>,
    writer: &mut OwnedWriteHalf,
) -> Result<(), ClientError> {
    while let Ok(event) = events.try_recv() {
        if let ClientEvent::Outbound(message) = event {
            write_message(writer, &message).await?;
        }
    }
    Ok(())
}

fn spawn_listener(reader: OwnedReadHalf, events: mpsc::Sender<ClientEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut frames = FrameReader::new(reader);
        loop {
            match frames.read_message().await {
                Ok(message) => {
                    if events.send(ClientEvent::Inbound(message)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!("listener stopped: {}", e);
                    let _ = events.send(ClientEvent::ServerClosed(e.to_string())).await;
                    break;
                }
            }
        }
    })
}

/// Replies and events the menu needs to make progress
fn forwards_to_menu(message: &Message) -> bool {
    match message {
        Message::Token(_) | Message::Notice(_) => true,
        Message::RoomEvent(event) => event.event == RoomEventKind::Closed,
        _ => false,
    }
}

/// Console lines for one server message
pub fn render(message: &Message) -> Vec<String> {
    match message {
        Message::Token(p) if p.token.is_empty() => vec![format!("Login failed: {}", p.message)],
        Message::Token(p) => vec![format!("Logged in as {}", p.username)],
        Message::Notice(p) if p.ok => vec![p.text.clone()],
        Message::Notice(p) => vec![format!("{} failed: {}", p.request, p.text)],
        Message::ListRooms(p) if p.rooms.is_empty() => vec!["No open rooms".to_string()],
        Message::ListRooms(p) => vec![format!("Rooms: {}", p.rooms.join(", "))],
        Message::ReceiveText(p) => vec![format_line(&p.message)],
        Message::PopulateHistory(p) if p.messages.is_empty() => {
            vec![format!("No recent messages in '{}'", p.room)]
        }
        Message::PopulateHistory(p) => p.messages.iter().map(format_line).collect(),
        Message::RoomEvent(p) => vec![match &p.event {
            RoomEventKind::Joined { username } => format!("* {} has joined {}", username, p.room),
            RoomEventKind::Left { username } => format!("* {} has left {}", username, p.room),
            RoomEventKind::Closed => format!("* Room '{}' has been closed", p.room),
        }],
        other => {
            debug!(command = ?other.command(), "ignoring unexpected message");
            Vec::new()
        }
    }
}

fn format_line(message: &crate::message::TextMessage) -> String {
    format!(
        "[{}] {}: {}",
        message.timestamp.format("%H:%M:%S"),
        message.username,
        message.text
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{
        CommandKind, ListRoomsPayload, RoomEventPayload, TextMessage, TokenPayload,
    };
    use crate::types::SessionToken;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_render_text_line() {
        let message = TextMessage {
            username: "alice".into(),
            room: "general".into(),
            text: "hi".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
        };
        assert_eq!(format_line(&message), "[03:04:05] alice: hi");
    }

    #[test]
    fn test_render_replies() {
        let failed = Message::Token(TokenPayload {
            username: "alice".into(),
            token: SessionToken::empty(),
            message: "Invalid credentials".into(),
        });
        assert_eq!(render(&failed), vec!["Login failed: Invalid credentials"]);

        let rooms = Message::ListRooms(ListRoomsPayload {
            token: SessionToken::empty(),
            rooms: vec!["a".into(), "b".into()],
        });
        assert_eq!(render(&rooms), vec!["Rooms: a, b"]);

        let closed = Message::RoomEvent(RoomEventPayload {
            room: "a".into(),
            event: RoomEventKind::Closed,
        });
        assert_eq!(render(&closed), vec!["* Room 'a' has been closed"]);
        assert!(forwards_to_menu(&closed));
    }

    #[test]
    fn test_menu_sees_only_replies() {
        assert!(forwards_to_menu(&Message::notice(CommandKind::JoinRoom, "ok")));
        let joined = Message::RoomEvent(RoomEventPayload {
            room: "a".into(),
            event: RoomEventKind::Joined {
                username: "bob".into(),
            },
        });
        assert!(!forwards_to_menu(&joined));
    }
}
