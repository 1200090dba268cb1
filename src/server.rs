//! ChatServer implementation
//!
//! Owns the shared registries and runs the per-message pipeline for every
//! connection: token gate, context resolution, command execution, direct
//! reply, room broadcast. Each registry guards its own state with a single
//! lock; connection tasks call into the server concurrently.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::connection::{ConnectionHandle, Connections};
use crate::error::{ChatError, ErrorCategory};
use crate::handler::handle_connection;
use crate::history::MessageLog;
use crate::message::{
    AuthenticatePayload, CloseRoomPayload, CommandKind, CreateRoomPayload, JoinRoomPayload,
    LeaveRoomPayload, ListRoomsPayload, Message, NoticePayload, PopulateHistoryPayload,
    ReceiveTextPayload, RegisterPayload, RoomEventKind, RoomEventPayload, SendTextPayload,
    TextMessage, TokenPayload,
};
use crate::room::{Room, RoomRegistry};
use crate::session::SessionRegistry;
use crate::store::Stores;
use crate::types::{ClientId, SessionToken};
use crate::user::{User, UserDirectory};

/// Per-request context resolved before a command runs
#[derive(Debug, Default)]
struct Context {
    user: Option<User>,
    room: Option<Room>,
}

impl Context {
    fn user(&self) -> Result<&User, ChatError> {
        self.user.as_ref().ok_or(ChatError::InvalidToken)
    }

    fn room(&self, name: &str) -> Result<&Room, ChatError> {
        self.room
            .as_ref()
            .ok_or_else(|| ChatError::RoomNotFound(name.to_string()))
    }
}

/// The chat server
///
/// Shared behind an `Arc` by every connection task.
pub struct ChatServer {
    sessions: Arc<SessionRegistry>,
    users: UserDirectory,
    rooms: RoomRegistry,
    log: MessageLog,
    connections: Connections,
    admins: HashSet<String>,
    outbound_queue: usize,
}

impl ChatServer {
    pub fn new(config: &ServerConfig, stores: Stores) -> Self {
        let sessions = Arc::new(SessionRegistry::new(config.session_ttl()));
        Self {
            users: UserDirectory::new(stores.users, Arc::clone(&sessions)),
            rooms: RoomRegistry::new(stores.rooms),
            log: MessageLog::new(stores.messages, config.history_limit),
            connections: Connections::new(),
            admins: config.admins.iter().cloned().collect(),
            outbound_queue: config.outbound_queue,
            sessions,
        }
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn users(&self) -> &UserDirectory {
        &self.users
    }

    pub fn rooms(&self) -> &RoomRegistry {
        &self.rooms
    }

    pub fn outbound_queue(&self) -> usize {
        self.outbound_queue
    }

    /// Accept connections until the process ends
    pub async fn run(self: Arc<Self>, listener: TcpListener) {
        self.run_until(listener, std::future::pending()).await
    }

    /// Accept connections until `shutdown` resolves
    pub async fn run_until<F>(self: Arc<Self>, listener: TcpListener, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        info!("ChatServer started");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        info!("New connection from {}", addr);
                        let server = Arc::clone(&self);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, server).await {
                                warn!("Connection handler error: {}", e);
                            }
                        });
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                },
            }
        }

        info!("ChatServer shutting down");
    }

    /// Register a new connection and its outbound queue
    pub async fn connect(&self, sender: mpsc::Sender<Message>) -> ClientId {
        let client_id = ClientId::new();
        self.connections
            .insert(ConnectionHandle::new(client_id, sender))
            .await;
        let total = self.connections.len().await;
        debug!(%client_id, total, "connection registered");
        client_id
    }

    /// Drop a connection and remove it from every room
    pub async fn disconnect(&self, client_id: ClientId) {
        let handle = self.connections.remove(client_id).await;
        let left = self.rooms.evict(client_id).await;

        let Some(username) = handle.and_then(|h| h.username) else {
            return;
        };

        for room in left {
            debug!(%client_id, room = %room, "evicted on disconnect");
            if let Ok(members) = self.rooms.members(&room).await {
                let event = room_event(&room, RoomEventKind::Left {
                    username: username.clone(),
                });
                self.broadcast(&room, &members, event).await;
            }
        }
    }

    /// Run one inbound message through the pipeline
    ///
    /// Returns the direct reply for the initiating connection, if any.
    /// Every failure becomes a reply; nothing here ends the connection.
    pub async fn dispatch(&self, client_id: ClientId, message: Message) -> Option<Message> {
        let command = message.command();
        let claimed = match &message {
            Message::Authenticate(p) => p.username.clone(),
            _ => String::new(),
        };

        match self.execute(client_id, message).await {
            Ok(reply) => reply,
            Err(err) => {
                match err.category() {
                    ErrorCategory::Store => error!(%client_id, ?command, "{}", err),
                    _ => debug!(%client_id, ?command, "request failed: {}", err),
                }
                Some(failure_reply(command, claimed, &err))
            }
        }
    }

    async fn execute(
        &self,
        client_id: ClientId,
        message: Message,
    ) -> Result<Option<Message>, ChatError> {
        let ctx = self.resolve(&message).await?;

        match message {
            Message::Register(p) => self.handle_register(p).await,
            Message::Authenticate(p) => self.handle_authenticate(client_id, p).await,
            Message::ListRooms(p) => self.handle_list_rooms(p).await,
            Message::JoinRoom(p) => self.handle_join_room(client_id, &ctx, p).await,
            Message::LeaveRoom(p) => self.handle_leave_room(client_id, &ctx, p).await,
            Message::CreateRoom(p) => self.handle_create_room(&ctx, p).await,
            Message::CloseRoom(p) => self.handle_close_room(&ctx, p).await,
            Message::SendText(p) => self.handle_send_text(client_id, &ctx, p).await,
            Message::PopulateHistory(p) => self.handle_populate_history(&ctx, p).await,
            other @ (Message::Token(_)
            | Message::ReceiveText(_)
            | Message::Notice(_)
            | Message::RoomEvent(_)) => Err(ChatError::UnexpectedCommand(other.command())),
        }
    }

    /// Token gate plus room and user lookup
    async fn resolve(&self, message: &Message) -> Result<Context, ChatError> {
        let command = message.command();
        let mut ctx = Context::default();

        if command.requires_session() {
            let token = message.token().ok_or(ChatError::InvalidToken)?;
            let session = self
                .sessions
                .validate(token)
                .await
                .ok_or(ChatError::InvalidToken)?;

            if let Some(claimed) = message.username() {
                if !claimed.is_empty() && claimed != session.username {
                    return Err(ChatError::InvalidRequest(
                        "username does not match session".to_string(),
                    ));
                }
            }

            // the admin CLI may have deleted the user behind our back
            let user = self.users.refresh(&session.username).await?;
            if user.deleted {
                self.sessions.revoke(&session.username).await;
                return Err(ChatError::InvalidToken);
            }
            ctx.user = Some(user);
        }

        if let Some(name) = message.room_name() {
            ctx.room = match self.rooms.get(name).await {
                Ok(room) => Some(room),
                // the room is about to be created
                Err(ChatError::RoomNotFound(_)) | Err(ChatError::RoomClosed(_))
                    if command == CommandKind::CreateRoom =>
                {
                    None
                }
                Err(e) => return Err(e),
            };
        }

        Ok(ctx)
    }

    async fn handle_register(&self, p: RegisterPayload) -> Result<Option<Message>, ChatError> {
        let user = self.users.register(&p.username, &p.password_hash).await?;
        Ok(Some(Message::notice(
            CommandKind::Register,
            format!("User '{}' registered", user.username),
        )))
    }

    async fn handle_authenticate(
        &self,
        client_id: ClientId,
        p: AuthenticatePayload,
    ) -> Result<Option<Message>, ChatError> {
        let user = self.users.authenticate(&p.username, &p.password_hash).await?;
        let token = self.sessions.issue(&user.username).await;
        self.connections.set_username(client_id, &user.username).await;

        info!(%client_id, username = %user.username, "client authenticated");
        Ok(Some(Message::Token(TokenPayload {
            username: user.username,
            token,
            message: "Authenticated".to_string(),
        })))
    }

    async fn handle_list_rooms(&self, _p: ListRoomsPayload) -> Result<Option<Message>, ChatError> {
        let rooms = self.rooms.list_names().await?;
        Ok(Some(Message::ListRooms(ListRoomsPayload {
            token: SessionToken::empty(),
            rooms,
        })))
    }

    async fn handle_join_room(
        &self,
        client_id: ClientId,
        ctx: &Context,
        p: JoinRoomPayload,
    ) -> Result<Option<Message>, ChatError> {
        let user = ctx.user()?;
        let room = ctx.room(&p.room)?;

        let privileged = p.privileged && self.admins.contains(&user.username);
        if p.privileged && !privileged {
            warn!(%client_id, username = %user.username, "privileged join refused, joining as member");
        }

        let members = self.rooms.join(&room.name, client_id, privileged).await?;
        self.connections.set_username(client_id, &user.username).await;
        info!(%client_id, room = %room.name, username = %user.username, "joined room");

        let others: Vec<ClientId> = members.into_iter().filter(|id| *id != client_id).collect();
        let event = room_event(&room.name, RoomEventKind::Joined {
            username: user.username.clone(),
        });
        self.broadcast(&room.name, &others, event).await;

        Ok(Some(Message::notice(
            CommandKind::JoinRoom,
            format!("Joined room '{}'", room.name),
        )))
    }

    async fn handle_leave_room(
        &self,
        client_id: ClientId,
        ctx: &Context,
        p: LeaveRoomPayload,
    ) -> Result<Option<Message>, ChatError> {
        let user = ctx.user()?;
        let room = ctx.room(&p.room)?;

        let remaining = self.rooms.leave(&room.name, client_id).await?;
        info!(%client_id, room = %room.name, "left room");

        let event = room_event(&room.name, RoomEventKind::Left {
            username: user.username.clone(),
        });
        self.broadcast(&room.name, &remaining, event).await;

        Ok(Some(Message::notice(
            CommandKind::LeaveRoom,
            format!("Left room '{}'", room.name),
        )))
    }

    async fn handle_create_room(
        &self,
        ctx: &Context,
        p: CreateRoomPayload,
    ) -> Result<Option<Message>, ChatError> {
        if let Some(existing) = &ctx.room {
            return Err(ChatError::DuplicateRoom(existing.name.clone()));
        }

        let room = self.rooms.create(&p.room, p.capacity).await?;
        Ok(Some(Message::notice(
            CommandKind::CreateRoom,
            format!("Room '{}' created (capacity {})", room.name, room.capacity),
        )))
    }

    async fn handle_close_room(
        &self,
        ctx: &Context,
        p: CloseRoomPayload,
    ) -> Result<Option<Message>, ChatError> {
        let room = ctx.room(&p.room)?;
        let closed = self.rooms.close(&room.name).await?;

        let evicted = closed.members();
        let event = room_event(&closed.name, RoomEventKind::Closed);
        self.broadcast(&closed.name, &evicted, event).await;

        Ok(Some(Message::notice(
            CommandKind::CloseRoom,
            format!("Room '{}' closed", closed.name),
        )))
    }

    async fn handle_send_text(
        &self,
        client_id: ClientId,
        ctx: &Context,
        p: SendTextPayload,
    ) -> Result<Option<Message>, ChatError> {
        let user = ctx.user()?;
        let room = ctx.room(&p.message.room)?;

        if p.message.text.trim().is_empty() {
            return Err(ChatError::InvalidRequest("message text is empty".to_string()));
        }
        if !self.rooms.is_member(&room.name, client_id).await? {
            return Err(ChatError::MemberNotPresent(room.name.clone()));
        }

        let record = self.log.append(user, room, &p.message.text)?;
        let members = self.rooms.members(&room.name).await?;
        let push = Message::ReceiveText(ReceiveTextPayload {
            message: TextMessage::from(record),
        });
        self.broadcast(&room.name, &members, push).await;

        Ok(None)
    }

    async fn handle_populate_history(
        &self,
        ctx: &Context,
        p: PopulateHistoryPayload,
    ) -> Result<Option<Message>, ChatError> {
        let room = ctx.room(&p.room)?;
        let messages = self
            .log
            .since(room, p.since)?
            .into_iter()
            .map(TextMessage::from)
            .collect();

        Ok(Some(Message::PopulateHistory(PopulateHistoryPayload {
            token: SessionToken::empty(),
            room: room.name.clone(),
            since: p.since,
            messages,
        })))
    }

    /// Push `message` to each member, best effort
    ///
    /// A member whose queue has closed is dropped from the room; the rest
    /// still receive the message. Returns the number of deliveries.
    async fn broadcast(&self, room: &str, members: &[ClientId], message: Message) -> usize {
        let handles = self.connections.resolve(members).await;
        let results = join_all(handles.iter().map(|h| h.send(message.clone()))).await;

        let mut delivered = 0;
        for (handle, result) in handles.iter().zip(results) {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(room, client_id = %handle.id, "broadcast failed: {}", e);
                    let _ = self.rooms.leave(room, handle.id).await;
                }
            }
        }
        delivered
    }
}

fn room_event(room: &str, event: RoomEventKind) -> Message {
    Message::RoomEvent(RoomEventPayload {
        room: room.to_string(),
        event,
    })
}

/// Error reply for the initiating connection
///
/// Failed logins answer with an empty token so clients waiting on the
/// authentication gate see a `Token` either way.
fn failure_reply(command: CommandKind, username: String, err: &ChatError) -> Message {
    match command {
        CommandKind::Authenticate => Message::Token(TokenPayload {
            username,
            token: SessionToken::empty(),
            message: NoticePayload::failure(command, err).text,
        }),
        _ => Message::failure(command, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ErrorCode;
    use crate::password::prehash_password;
    use crate::store::SqliteStore;
    use chrono::Utc;
    use tokio::net::TcpStream;

    struct Peer {
        id: ClientId,
        rx: mpsc::Receiver<Message>,
        token: SessionToken,
        username: String,
    }

    fn server() -> ChatServer {
        let config = ServerConfig {
            admins: vec!["root".to_string()],
            ..ServerConfig::default()
        };
        ChatServer::new(&config, Stores::in_memory())
    }

    async fn login(server: &ChatServer, username: &str) -> Peer {
        let (tx, rx) = mpsc::channel(32);
        let id = server.connect(tx).await;
        let hash = prehash_password("pw");

        server
            .dispatch(
                id,
                Message::Register(RegisterPayload {
                    username: username.into(),
                    password_hash: hash.clone(),
                }),
            )
            .await;
        let reply = server
            .dispatch(
                id,
                Message::Authenticate(AuthenticatePayload {
                    username: username.into(),
                    password_hash: hash,
                }),
            )
            .await;

        let Some(Message::Token(TokenPayload { token, .. })) = reply else {
            panic!("expected token, got {reply:?}");
        };
        Peer {
            id,
            rx,
            token,
            username: username.to_string(),
        }
    }

    fn join(peer: &Peer, room: &str, privileged: bool) -> Message {
        Message::JoinRoom(JoinRoomPayload {
            username: peer.username.clone(),
            room: room.into(),
            privileged,
            token: peer.token.clone(),
        })
    }

    fn create(peer: &Peer, room: &str, capacity: u32) -> Message {
        Message::CreateRoom(CreateRoomPayload {
            room: room.into(),
            capacity,
            token: peer.token.clone(),
        })
    }

    fn say(peer: &Peer, room: &str, text: &str) -> Message {
        Message::SendText(SendTextPayload {
            token: peer.token.clone(),
            message: TextMessage {
                username: peer.username.clone(),
                room: room.into(),
                text: text.into(),
                timestamp: Utc::now(),
            },
        })
    }

    fn expect_notice(reply: Option<Message>) -> NoticePayload {
        match reply {
            Some(Message::Notice(notice)) => notice,
            other => panic!("expected notice, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_login_returns_empty_token() {
        let server = server();
        let alice = login(&server, "alice").await;

        let reply = server
            .dispatch(
                alice.id,
                Message::Authenticate(AuthenticatePayload {
                    username: "alice".into(),
                    password_hash: prehash_password("wrong"),
                }),
            )
            .await;

        match reply {
            Some(Message::Token(p)) => {
                assert!(p.token.is_empty());
                assert_eq!(p.username, "alice");
                assert_eq!(p.message, "Invalid credentials");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_token_gate() {
        let server = server();
        let (tx, _rx) = mpsc::channel(8);
        let id = server.connect(tx).await;

        let reply = server
            .dispatch(
                id,
                Message::CreateRoom(CreateRoomPayload {
                    room: "general".into(),
                    capacity: 2,
                    token: SessionToken("forged".into()),
                }),
            )
            .await;

        let notice = expect_notice(reply);
        assert!(!notice.ok);
        assert_eq!(notice.code, Some(ErrorCode::InvalidToken));
        assert!(server.rooms().list_names().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_capacity_scenario() {
        let server = server();
        let alice = login(&server, "alice").await;
        let bob = login(&server, "bob").await;
        let carol = login(&server, "carol").await;

        assert!(expect_notice(server.dispatch(alice.id, create(&alice, "general", 2)).await).ok);
        assert!(expect_notice(server.dispatch(alice.id, join(&alice, "general", false)).await).ok);
        assert_eq!(server.rooms().members("general").await.unwrap().len(), 1);
        assert!(expect_notice(server.dispatch(bob.id, join(&bob, "general", false)).await).ok);
        assert_eq!(server.rooms().members("general").await.unwrap().len(), 2);

        let full = expect_notice(server.dispatch(carol.id, join(&carol, "general", false)).await);
        assert_eq!(full.code, Some(ErrorCode::RoomFull));

        // carol is not an admin, so asking for a privileged join does not help
        let still_full = expect_notice(server.dispatch(carol.id, join(&carol, "general", true)).await);
        assert_eq!(still_full.code, Some(ErrorCode::RoomFull));
    }

    #[tokio::test]
    async fn test_admin_bypasses_capacity() {
        let server = server();
        let alice = login(&server, "alice").await;
        let root = login(&server, "root").await;

        server.dispatch(alice.id, create(&alice, "tiny", 1)).await;
        server.dispatch(alice.id, join(&alice, "tiny", false)).await;

        assert!(expect_notice(server.dispatch(root.id, join(&root, "tiny", true)).await).ok);
        assert_eq!(server.rooms().members("tiny").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_send_text_reaches_every_member() {
        let server = server();
        let mut alice = login(&server, "alice").await;
        let mut bob = login(&server, "bob").await;

        server.dispatch(alice.id, create(&alice, "general", 5)).await;
        server.dispatch(alice.id, join(&alice, "general", false)).await;
        server.dispatch(bob.id, join(&bob, "general", false)).await;

        // alice hears bob arrive
        match alice.rx.recv().await {
            Some(Message::RoomEvent(RoomEventPayload {
                event: RoomEventKind::Joined { username },
                ..
            })) => assert_eq!(username, "bob"),
            other => panic!("unexpected {other:?}"),
        }

        let reply = server.dispatch(alice.id, say(&alice, "general", "hello")).await;
        assert!(reply.is_none());

        for rx in [&mut alice.rx, &mut bob.rx] {
            match rx.recv().await {
                Some(Message::ReceiveText(p)) => {
                    assert_eq!(p.message.text, "hello");
                    assert_eq!(p.message.room, "general");
                    assert_eq!(p.message.username, "alice");
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_send_requires_membership() {
        let server = server();
        let alice = login(&server, "alice").await;
        server.dispatch(alice.id, create(&alice, "general", 5)).await;

        let notice = expect_notice(server.dispatch(alice.id, say(&alice, "general", "hi")).await);
        assert_eq!(notice.code, Some(ErrorCode::MemberNotPresent));
    }

    #[tokio::test]
    async fn test_claimed_username_must_match_session() {
        let server = server();
        let alice = login(&server, "alice").await;
        server.dispatch(alice.id, create(&alice, "general", 5)).await;

        let mut forged = join(&alice, "general", false);
        if let Message::JoinRoom(p) = &mut forged {
            p.username = "mallory".into();
        }
        let notice = expect_notice(server.dispatch(alice.id, forged).await);
        assert_eq!(notice.code, Some(ErrorCode::InvalidRequest));
    }

    #[tokio::test]
    async fn test_close_room_notifies_and_evicts() {
        let server = server();
        let mut alice = login(&server, "alice").await;
        let mut bob = login(&server, "bob").await;

        server.dispatch(alice.id, create(&alice, "general", 2)).await;
        server.dispatch(alice.id, join(&alice, "general", false)).await;
        server.dispatch(bob.id, join(&bob, "general", false)).await;
        alice.rx.recv().await; // bob joined

        let notice = expect_notice(
            server
                .dispatch(
                    alice.id,
                    Message::CloseRoom(CloseRoomPayload {
                        room: "general".into(),
                        token: alice.token.clone(),
                    }),
                )
                .await,
        );
        assert!(notice.ok);

        for rx in [&mut alice.rx, &mut bob.rx] {
            assert!(matches!(
                rx.recv().await,
                Some(Message::RoomEvent(RoomEventPayload {
                    event: RoomEventKind::Closed,
                    ..
                }))
            ));
        }
        assert!(matches!(
            server.rooms().get("general").await,
            Err(ChatError::RoomClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_history_backfill() {
        let server = server();
        let alice = login(&server, "alice").await;
        let since = Utc::now() - chrono::Duration::minutes(1);

        server.dispatch(alice.id, create(&alice, "general", 5)).await;
        server.dispatch(alice.id, join(&alice, "general", false)).await;
        server.dispatch(alice.id, say(&alice, "general", "one")).await;
        server.dispatch(alice.id, say(&alice, "general", "two")).await;

        let reply = server
            .dispatch(
                alice.id,
                Message::PopulateHistory(PopulateHistoryPayload {
                    token: alice.token.clone(),
                    room: "general".into(),
                    since,
                    messages: Vec::new(),
                }),
            )
            .await;

        match reply {
            Some(Message::PopulateHistory(p)) => {
                let texts: Vec<&str> = p.messages.iter().map(|m| m.text.as_str()).collect();
                assert_eq!(texts, vec!["one", "two"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_disconnect_leaves_rooms() {
        let server = server();
        let mut alice = login(&server, "alice").await;
        let bob = login(&server, "bob").await;

        server.dispatch(alice.id, create(&alice, "general", 2)).await;
        server.dispatch(alice.id, join(&alice, "general", false)).await;
        server.dispatch(bob.id, join(&bob, "general", false)).await;
        alice.rx.recv().await; // bob joined

        server.disconnect(bob.id).await;

        assert_eq!(server.rooms().members("general").await.unwrap(), vec![alice.id]);
        match alice.rx.recv().await {
            Some(Message::RoomEvent(RoomEventPayload {
                event: RoomEventKind::Left { username },
                ..
            })) => assert_eq!(username, "bob"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dead_member_is_dropped_on_broadcast() {
        let server = server();
        let mut alice = login(&server, "alice").await;
        let bob = login(&server, "bob").await;

        server.dispatch(alice.id, create(&alice, "general", 5)).await;
        server.dispatch(alice.id, join(&alice, "general", false)).await;
        server.dispatch(bob.id, join(&bob, "general", false)).await;
        alice.rx.recv().await; // bob joined
        drop(bob.rx);

        server.dispatch(alice.id, say(&alice, "general", "anyone?")).await;

        assert!(matches!(alice.rx.recv().await, Some(Message::ReceiveText(_))));
        assert_eq!(server.rooms().members("general").await.unwrap(), vec![alice.id]);
    }

    #[tokio::test]
    async fn test_server_only_commands_are_rejected() {
        let server = server();
        let (tx, _rx) = mpsc::channel(8);
        let id = server.connect(tx).await;

        let notice = expect_notice(
            server
                .dispatch(id, Message::notice(CommandKind::Register, "spoof"))
                .await,
        );
        assert_eq!(notice.code, Some(ErrorCode::UnexpectedCommand));
    }

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn test_connection_futures_are_send() {
        let server = Arc::new(server());

        let (tx, _rx) = mpsc::channel(8);
        let connect = server.connect(tx);
        assert_send(&connect);
        connect.await;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (stream, _) = listener.accept().await.unwrap();

        let serve = handle_connection(stream, Arc::clone(&server));
        assert_send(&serve);
        drop(client);
        serve.await.unwrap();
        assert!(server.connections.is_empty().await);
    }

    #[tokio::test]
    async fn test_user_deleted_through_shared_store_is_logged_out() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let server = ChatServer::new(&ServerConfig::default(), Stores::shared(store.clone()));
        let admin = UserDirectory::new(store, Arc::new(SessionRegistry::default()));
        let alice = login(&server, "alice").await;

        admin.delete("alice").await.unwrap();

        let notice = expect_notice(server.dispatch(alice.id, create(&alice, "general", 2)).await);
        assert_eq!(notice.code, Some(ErrorCode::InvalidToken));
        assert!(server.sessions().validate(&alice.token).await.is_none());
        assert!(server.rooms().list_names().await.unwrap().is_empty());

        let relogin = server
            .dispatch(
                alice.id,
                Message::Authenticate(AuthenticatePayload {
                    username: "alice".into(),
                    password_hash: prehash_password("pw"),
                }),
            )
            .await;
        assert!(matches!(relogin, Some(Message::Token(p)) if p.token.is_empty()));
    }

    #[tokio::test]
    async fn test_room_names_are_trimmed_on_every_request() {
        let server = server();
        let mut alice = login(&server, "alice").await;

        let created = expect_notice(server.dispatch(alice.id, create(&alice, " general ", 3)).await);
        assert_eq!(created.text, "Room 'general' created (capacity 3)");

        let joined = expect_notice(server.dispatch(alice.id, join(&alice, "general  ", false)).await);
        assert!(joined.ok);
        assert_eq!(joined.text, "Joined room 'general'");

        let duplicate = expect_notice(server.dispatch(alice.id, create(&alice, "general\t", 3)).await);
        assert_eq!(duplicate.code, Some(ErrorCode::DuplicateRoom));

        assert!(server.dispatch(alice.id, say(&alice, " general", "hi")).await.is_none());
        match alice.rx.recv().await {
            Some(Message::ReceiveText(p)) => assert_eq!(p.message.room, "general"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
