//! Interactive menu
//!
//! Runs on its own OS thread and blocks only on user input or, for a few
//! requests, on the server's reply. Requests go to the event loop as
//! [`ClientEvent::Outbound`]; replies the menu cares about come back over a
//! std channel.

use std::sync::mpsc as std_mpsc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::debug;

use super::ClientEvent;
use crate::message::{
    AuthenticatePayload, CloseRoomPayload, CommandKind, CreateRoomPayload, JoinRoomPayload,
    LeaveRoomPayload, ListRoomsPayload, Message, NoticePayload, PopulateHistoryPayload,
    RegisterPayload, RoomEventKind, SendTextPayload, TextMessage,
};
use crate::password::prehash_password;
use crate::types::SessionToken;

/// Source of user input
pub trait Prompt: Send {
    /// Read one line; `None` means input is exhausted
    fn line(&mut self, label: &str) -> Option<String>;

    /// Pick one of `options` by index; `None` means the user backed out
    fn choose(&mut self, title: &str, options: &[&str]) -> Option<usize>;

    /// Show a menu-level message that did not come from the server
    fn note(&mut self, text: &str);
}

const GATE_OPTIONS: [&str; 2] = ["Register", "Log In"];
const TOP_OPTIONS: [&str; 5] = ["List rooms", "Join room", "Create room", "Close room", "Quit"];

enum State {
    Gate,
    Top,
    InRoom(String),
    Done,
}

/// The menu's view of the connection
pub struct MenuLink {
    pub events: mpsc::Sender<ClientEvent>,
    pub replies: std_mpsc::Receiver<Message>,
    pub reply_timeout: Duration,
    pub history_lookback: chrono::Duration,
}

/// The event loop has stopped taking requests
#[derive(Debug)]
struct Disconnected;

struct Menu<'a> {
    prompt: &'a mut dyn Prompt,
    link: MenuLink,
    username: String,
    token: SessionToken,
}

/// Drive the menu until the user quits or the connection goes away
pub fn run_menu(prompt: &mut dyn Prompt, link: MenuLink) {
    let events = link.events.clone();
    let mut menu = Menu {
        prompt,
        link,
        username: String::new(),
        token: SessionToken::empty(),
    };

    let mut state = State::Gate;
    loop {
        let next = match state {
            State::Gate => menu.gate(),
            State::Top => menu.top(),
            State::InRoom(room) => menu.in_room(room),
            State::Done => break,
        };
        state = match next {
            Ok(next) => next,
            Err(Disconnected) => return,
        };
    }

    debug!("menu finished");
    let _ = events.blocking_send(ClientEvent::Quit);
}

impl Menu<'_> {
    fn send(&self, message: Message) -> Result<(), Disconnected> {
        self.link
            .events
            .blocking_send(ClientEvent::Outbound(message))
            .map_err(|_| Disconnected)
    }

    /// Send a request whose reply will be awaited
    ///
    /// Anything still queued answers an earlier request that timed out.
    fn request(&mut self, message: Message) -> Result<(), Disconnected> {
        let stale = self.link.replies.try_iter().count();
        if stale > 0 {
            debug!(stale, "discarding late replies");
        }
        self.send(message)
    }

    /// Wait for the reply to `request`, skipping unrelated ones
    fn await_reply(&mut self, request: CommandKind) -> Result<Option<Message>, Disconnected> {
        let deadline = Instant::now() + self.link.reply_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.link.replies.recv_timeout(remaining) {
                Ok(reply) if reply_to(&reply) == Some(request) => return Ok(Some(reply)),
                Ok(_) => continue,
                Err(std_mpsc::RecvTimeoutError::Timeout) => {
                    self.prompt.note("No response from server");
                    return Ok(None);
                }
                Err(std_mpsc::RecvTimeoutError::Disconnected) => return Err(Disconnected),
            }
        }
    }

    fn await_notice(&mut self, request: CommandKind) -> Result<bool, Disconnected> {
        Ok(matches!(
            self.await_reply(request)?,
            Some(Message::Notice(NoticePayload { ok: true, .. }))
        ))
    }

    fn read_nonempty(&mut self, label: &str) -> Option<String> {
        loop {
            let text = self.prompt.line(label)?;
            let text = text.trim();
            if !text.is_empty() {
                return Some(text.to_string());
            }
        }
    }

    fn gate(&mut self) -> Result<State, Disconnected> {
        let Some(choice) = self.prompt.choose("Welcome", &GATE_OPTIONS) else {
            return Ok(State::Done);
        };
        let Some(username) = self.read_nonempty("Username: ") else {
            return Ok(State::Done);
        };
        let Some(password) = self.read_nonempty("Password: ") else {
            return Ok(State::Done);
        };

        if choice == 0 {
            let Some(confirm) = self.prompt.line("Confirm password: ") else {
                return Ok(State::Done);
            };
            if confirm.trim() != password {
                self.prompt.note("Passwords do not match");
                return Ok(State::Gate);
            }
            self.request(Message::Register(RegisterPayload {
                username,
                password_hash: prehash_password(&password),
            }))?;
            self.await_reply(CommandKind::Register)?;
            return Ok(State::Gate);
        }

        self.request(Message::Authenticate(AuthenticatePayload {
            username,
            password_hash: prehash_password(&password),
        }))?;
        match self.await_reply(CommandKind::Authenticate)? {
            Some(Message::Token(reply)) if !reply.token.is_empty() => {
                self.username = reply.username;
                self.token = reply.token;
                Ok(State::Top)
            }
            _ => Ok(State::Gate),
        }
    }

    fn top(&mut self) -> Result<State, Disconnected> {
        let Some(choice) = self.prompt.choose("Main menu", &TOP_OPTIONS) else {
            return Ok(State::Done);
        };

        match choice {
            0 => {
                self.send(Message::ListRooms(ListRoomsPayload {
                    token: self.token.clone(),
                    rooms: Vec::new(),
                }))?;
                Ok(State::Top)
            }
            1 => {
                let Some(room) = self.read_nonempty("Room to join: ") else {
                    return Ok(State::Top);
                };
                self.request(Message::JoinRoom(JoinRoomPayload {
                    username: self.username.clone(),
                    room: room.clone(),
                    privileged: false,
                    token: self.token.clone(),
                }))?;
                if self.await_notice(CommandKind::JoinRoom)? {
                    Ok(State::InRoom(room))
                } else {
                    Ok(State::Top)
                }
            }
            2 => {
                let Some(room) = self.read_nonempty("Room to create: ") else {
                    return Ok(State::Top);
                };
                let Some(capacity) = self.read_capacity() else {
                    return Ok(State::Top);
                };
                self.request(Message::CreateRoom(CreateRoomPayload {
                    room,
                    capacity,
                    token: self.token.clone(),
                }))?;
                self.await_reply(CommandKind::CreateRoom)?;
                Ok(State::Top)
            }
            3 => {
                let Some(room) = self.read_nonempty("Room to close: ") else {
                    return Ok(State::Top);
                };
                self.request(Message::CloseRoom(CloseRoomPayload {
                    room,
                    token: self.token.clone(),
                }))?;
                self.await_reply(CommandKind::CloseRoom)?;
                Ok(State::Top)
            }
            _ => Ok(State::Done),
        }
    }

    fn read_capacity(&mut self) -> Option<u32> {
        loop {
            let text = self.prompt.line("Room capacity: ")?;
            match text.trim().parse::<u32>() {
                Ok(capacity) if capacity >= 1 => return Some(capacity),
                _ => self.prompt.note("Capacity must be a whole number of at least 1"),
            }
        }
    }

    fn in_room(&mut self, room: String) -> Result<State, Disconnected> {
        self.send(Message::PopulateHistory(PopulateHistoryPayload {
            token: self.token.clone(),
            room: room.clone(),
            since: Utc::now() - self.link.history_lookback,
            messages: Vec::new(),
        }))?;

        loop {
            let Some(text) = self.prompt.line("") else {
                return Ok(State::Done);
            };
            if self.room_closed(&room) {
                return Ok(State::Top);
            }

            if text.trim().is_empty() {
                self.request(Message::LeaveRoom(LeaveRoomPayload {
                    username: self.username.clone(),
                    room,
                    token: self.token.clone(),
                }))?;
                self.await_reply(CommandKind::LeaveRoom)?;
                return Ok(State::Top);
            }

            self.send(Message::SendText(SendTextPayload {
                token: self.token.clone(),
                message: TextMessage {
                    username: self.username.clone(),
                    room: room.clone(),
                    text,
                    timestamp: Utc::now(),
                },
            }))?;
        }
    }

    /// Drain pending replies, reporting whether `room` was closed meanwhile
    fn room_closed(&mut self, room: &str) -> bool {
        let mut closed = false;
        while let Ok(reply) = self.link.replies.try_recv() {
            if let Message::RoomEvent(event) = reply {
                closed |= event.room == room && event.event == RoomEventKind::Closed;
            }
        }
        closed
    }
}

/// The request a forwarded reply answers
fn reply_to(message: &Message) -> Option<CommandKind> {
    match message {
        Message::Token(_) => Some(CommandKind::Authenticate),
        Message::Notice(notice) => Some(notice.request),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChatError;

    struct NoInput;

    impl Prompt for NoInput {
        fn line(&mut self, _label: &str) -> Option<String> {
            None
        }

        fn choose(&mut self, _title: &str, _options: &[&str]) -> Option<usize> {
            None
        }

        fn note(&mut self, _text: &str) {}
    }

    #[test]
    fn test_late_reply_does_not_answer_next_request() {
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let (replies_tx, replies_rx) = std_mpsc::channel();
        let mut prompt = NoInput;
        let mut menu = Menu {
            prompt: &mut prompt,
            link: MenuLink {
                events: events_tx,
                replies: replies_rx,
                reply_timeout: Duration::from_millis(200),
                history_lookback: chrono::Duration::minutes(1),
            },
            username: "alice".to_string(),
            token: SessionToken::empty(),
        };

        // a failed join whose request already gave up waiting
        replies_tx
            .send(Message::failure(
                CommandKind::JoinRoom,
                &ChatError::RoomNotFound("lobby".into()),
            ))
            .unwrap();

        let join = Message::JoinRoom(JoinRoomPayload {
            username: "alice".to_string(),
            room: "lobby".to_string(),
            privileged: false,
            token: SessionToken::empty(),
        });
        menu.request(join.clone()).unwrap();
        replies_tx
            .send(Message::notice(CommandKind::JoinRoom, "Joined room 'lobby'"))
            .unwrap();

        assert!(menu.await_notice(CommandKind::JoinRoom).unwrap());
        assert!(matches!(events_rx.try_recv(), Ok(ClientEvent::Outbound(sent)) if sent == join));
    }

    #[test]
    fn test_silent_server_times_out() {
        let (events_tx, _events_rx) = mpsc::channel(8);
        let (_replies_tx, replies_rx) = std_mpsc::channel::<Message>();
        let mut prompt = NoInput;
        let mut menu = Menu {
            prompt: &mut prompt,
            link: MenuLink {
                events: events_tx,
                replies: replies_rx,
                reply_timeout: Duration::from_millis(50),
                history_lookback: chrono::Duration::minutes(1),
            },
            username: String::new(),
            token: SessionToken::empty(),
        };

        assert!(menu.await_reply(CommandKind::Authenticate).unwrap().is_none());
    }
}
