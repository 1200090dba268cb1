//! Message protocol definitions
//!
//! Every frame carries one [`Message`]: a command tag plus the payload that
//! belongs to it. Serde's adjacently tagged enum makes the tag select the
//! payload variant on decode, so a payload that does not match its command
//! is rejected at the boundary as a [`ProtocolError`].
//!
//! Framing is a 4-byte big-endian length prefix followed by a JSON body.

use bytes::{Buf, BytesMut};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ChatError, ProtocolError};
use crate::types::SessionToken;

/// Upper bound on a frame body
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

const HEADER_LEN: usize = 4;

/// Command tag of a [`Message`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Register,
    Authenticate,
    Token,
    ListRooms,
    JoinRoom,
    LeaveRoom,
    CreateRoom,
    CloseRoom,
    SendText,
    ReceiveText,
    PopulateHistory,
    Notice,
    RoomEvent,
}

impl CommandKind {
    /// Commands that must carry a valid session token
    pub fn requires_session(self) -> bool {
        matches!(
            self,
            CommandKind::ListRooms
                | CommandKind::JoinRoom
                | CommandKind::LeaveRoom
                | CommandKind::CreateRoom
                | CommandKind::CloseRoom
                | CommandKind::SendText
                | CommandKind::PopulateHistory
        )
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            CommandKind::Register => "Register",
            CommandKind::Authenticate => "Authenticate",
            CommandKind::Token => "Token",
            CommandKind::ListRooms => "List Rooms",
            CommandKind::JoinRoom => "Join Room",
            CommandKind::LeaveRoom => "Leave Room",
            CommandKind::CreateRoom => "Create Room",
            CommandKind::CloseRoom => "Close Room",
            CommandKind::SendText => "Send Message",
            CommandKind::ReceiveText => "Receive Message",
            CommandKind::PopulateHistory => "Populate History",
            CommandKind::Notice => "Notice",
            CommandKind::RoomEvent => "Room Event",
        };
        f.write_str(label)
    }
}

/// The wire envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", content = "payload", rename_all = "snake_case")]
pub enum Message {
    Register(RegisterPayload),
    Authenticate(AuthenticatePayload),
    Token(TokenPayload),
    ListRooms(ListRoomsPayload),
    JoinRoom(JoinRoomPayload),
    LeaveRoom(LeaveRoomPayload),
    CreateRoom(CreateRoomPayload),
    CloseRoom(CloseRoomPayload),
    SendText(SendTextPayload),
    ReceiveText(ReceiveTextPayload),
    PopulateHistory(PopulateHistoryPayload),
    Notice(NoticePayload),
    RoomEvent(RoomEventPayload),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterPayload {
    pub username: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatePayload {
    pub username: String,
    pub password_hash: String,
}

/// Authentication reply; `token` is empty and `message` explains on failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPayload {
    pub username: String,
    pub token: SessionToken,
    #[serde(default)]
    pub message: String,
}

/// Request carries the token; reply carries the room names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListRoomsPayload {
    #[serde(default = "SessionToken::empty")]
    pub token: SessionToken,
    #[serde(default)]
    pub rooms: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRoomPayload {
    pub username: String,
    pub room: String,
    #[serde(default)]
    pub privileged: bool,
    pub token: SessionToken,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveRoomPayload {
    pub username: String,
    pub room: String,
    pub token: SessionToken,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRoomPayload {
    pub room: String,
    pub capacity: u32,
    pub token: SessionToken,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseRoomPayload {
    pub room: String,
    pub token: SessionToken,
}

/// One chat line as seen by room members
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextMessage {
    pub username: String,
    pub room: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendTextPayload {
    pub token: SessionToken,
    pub message: TextMessage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveTextPayload {
    pub message: TextMessage,
}

/// History backfill; the reply fills `messages`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopulateHistoryPayload {
    #[serde(default = "SessionToken::empty")]
    pub token: SessionToken,
    pub room: String,
    pub since: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<TextMessage>,
}

/// Direct success/failure reply to a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoticePayload {
    pub request: CommandKind,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    pub text: String,
}

/// Unsolicited room membership push
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomEventPayload {
    pub room: String,
    pub event: RoomEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoomEventKind {
    Joined { username: String },
    Left { username: String },
    Closed,
}

/// Error codes for failed notices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidToken,
    InvalidCredentials,
    UserNotFound,
    UserDeleted,
    DuplicateUser,
    RoomNotFound,
    RoomClosed,
    DuplicateRoom,
    RoomFull,
    MemberNotPresent,
    InvalidRequest,
    UnexpectedCommand,
    Internal,
}

impl From<&ChatError> for ErrorCode {
    fn from(err: &ChatError) -> Self {
        match err {
            ChatError::InvalidToken => ErrorCode::InvalidToken,
            ChatError::InvalidCredentials => ErrorCode::InvalidCredentials,
            ChatError::UserNotFound(_) => ErrorCode::UserNotFound,
            ChatError::UserDeleted(_) => ErrorCode::UserDeleted,
            ChatError::DuplicateUser(_) => ErrorCode::DuplicateUser,
            ChatError::RoomNotFound(_) => ErrorCode::RoomNotFound,
            ChatError::RoomClosed(_) => ErrorCode::RoomClosed,
            ChatError::DuplicateRoom(_) => ErrorCode::DuplicateRoom,
            ChatError::RoomFull(_) => ErrorCode::RoomFull,
            ChatError::MemberNotPresent(_) => ErrorCode::MemberNotPresent,
            ChatError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            ChatError::UnexpectedCommand(_) => ErrorCode::UnexpectedCommand,
            ChatError::Store(_) => ErrorCode::Internal,
        }
    }
}

impl NoticePayload {
    pub fn success(request: CommandKind, text: impl Into<String>) -> Self {
        Self {
            request,
            ok: true,
            code: None,
            text: text.into(),
        }
    }

    /// Build a failure notice; storage details never leave the server
    pub fn failure(request: CommandKind, err: &ChatError) -> Self {
        let text = match err {
            ChatError::Store(_) => "Internal error".to_string(),
            other => other.to_string(),
        };
        Self {
            request,
            ok: false,
            code: Some(err.into()),
            text,
        }
    }
}

impl Message {
    /// The command tag this message travels under
    pub fn command(&self) -> CommandKind {
        match self {
            Message::Register(_) => CommandKind::Register,
            Message::Authenticate(_) => CommandKind::Authenticate,
            Message::Token(_) => CommandKind::Token,
            Message::ListRooms(_) => CommandKind::ListRooms,
            Message::JoinRoom(_) => CommandKind::JoinRoom,
            Message::LeaveRoom(_) => CommandKind::LeaveRoom,
            Message::CreateRoom(_) => CommandKind::CreateRoom,
            Message::CloseRoom(_) => CommandKind::CloseRoom,
            Message::SendText(_) => CommandKind::SendText,
            Message::ReceiveText(_) => CommandKind::ReceiveText,
            Message::PopulateHistory(_) => CommandKind::PopulateHistory,
            Message::Notice(_) => CommandKind::Notice,
            Message::RoomEvent(_) => CommandKind::RoomEvent,
        }
    }

    /// Token presented by a session-scoped request
    pub fn token(&self) -> Option<&SessionToken> {
        match self {
            Message::ListRooms(p) => Some(&p.token),
            Message::JoinRoom(p) => Some(&p.token),
            Message::LeaveRoom(p) => Some(&p.token),
            Message::CreateRoom(p) => Some(&p.token),
            Message::CloseRoom(p) => Some(&p.token),
            Message::SendText(p) => Some(&p.token),
            Message::PopulateHistory(p) => Some(&p.token),
            _ => None,
        }
    }

    /// Room a request refers to, surrounding whitespace removed
    ///
    /// Rooms are created under their trimmed name, so every lookup trims too.
    pub fn room_name(&self) -> Option<&str> {
        let room = match self {
            Message::JoinRoom(p) => &p.room,
            Message::LeaveRoom(p) => &p.room,
            Message::CreateRoom(p) => &p.room,
            Message::CloseRoom(p) => &p.room,
            Message::SendText(p) => &p.message.room,
            Message::PopulateHistory(p) => &p.room,
            _ => return None,
        };
        Some(room.trim())
    }

    /// Username a request claims to act as
    pub fn username(&self) -> Option<&str> {
        match self {
            Message::JoinRoom(p) => Some(&p.username),
            Message::LeaveRoom(p) => Some(&p.username),
            Message::SendText(p) => Some(&p.message.username),
            _ => None,
        }
    }

    pub fn notice(request: CommandKind, text: impl Into<String>) -> Self {
        Message::Notice(NoticePayload::success(request, text))
    }

    pub fn failure(request: CommandKind, err: &ChatError) -> Self {
        Message::Notice(NoticePayload::failure(request, err))
    }
}

/// Encode one message as a length-prefixed frame
pub fn encode(message: &Message) -> Result<Vec<u8>, ProtocolError> {
    let body = serde_json::to_vec(message)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(body.len()));
    }
    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decode the first frame in `buf`
///
/// Returns `Ok(None)` while the buffer holds less than one full frame;
/// otherwise the message and the number of bytes it occupied.
pub fn decode(buf: &[u8]) -> Result<Option<(Message, usize)>, ProtocolError> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }
    let mut header = [0u8; HEADER_LEN];
    header.copy_from_slice(&buf[..HEADER_LEN]);
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(len));
    }
    let total = HEADER_LEN + len;
    if buf.len() < total {
        return Ok(None);
    }
    let message = serde_json::from_slice(&buf[HEADER_LEN..total])?;
    Ok(Some((message, total)))
}

/// Buffered frame decoder over the read half of a connection
pub struct FrameReader<R> {
    reader: R,
    buffer: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: BytesMut::with_capacity(8 * 1024),
        }
    }

    /// Wait for the next complete frame
    ///
    /// Fails with [`ProtocolError::ConnectionClosed`] when the peer closes,
    /// including mid-frame.
    pub async fn read_message(&mut self) -> Result<Message, ProtocolError> {
        loop {
            if let Some((message, used)) = decode(&self.buffer)? {
                self.buffer.advance(used);
                return Ok(message);
            }

            self.buffer.reserve(4 * 1024);
            let read = self.reader.read_buf(&mut self.buffer).await?;
            if read == 0 {
                return Err(ProtocolError::ConnectionClosed);
            }
        }
    }
}

/// Encode and write one frame, flushing so peers see it promptly
pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}
