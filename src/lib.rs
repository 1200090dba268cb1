//! Multi-room TCP Chat Server Library
//!
//! A chat service where clients register, log in, and talk in named rooms
//! with a fixed capacity. Built on tokio with length-prefixed JSON frames.
//!
//! # Features
//! - Registration and salted password authentication
//! - Session tokens with expiry
//! - Room creation, joining, leaving and closing
//! - Real-time broadcast to every room member
//! - Persisted history with backfill on join
//! - Disconnection handling
//!
//! # Architecture
//! - `ChatServer` owns the registries, each behind its own lock
//! - Each connection has a `handler` task pair: a reader that dispatches
//!   into the server, and a writer draining the connection's queue
//! - Rooms hold `ClientId`s; broadcasts resolve them to queues
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//! use roomchat::{ChatServer, ServerConfig, Stores};
//!
//! #[tokio::main]
//! async fn main() {
//!     let listener = TcpListener::bind("127.0.0.1:4000").await.unwrap();
//!     let server = Arc::new(ChatServer::new(&ServerConfig::default(), Stores::in_memory()));
//!     server.run(listener).await;
//! }
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod history;
pub mod logging;
pub mod message;
pub mod password;
pub mod room;
pub mod server;
pub mod session;
pub mod store;
pub mod types;
pub mod user;

// Re-export main types for convenience
pub use config::ServerConfig;
pub use error::{ChatError, ProtocolError, SendError};
pub use handler::handle_connection;
pub use message::{CommandKind, ErrorCode, Message};
pub use room::Room;
pub use server::ChatServer;
pub use store::Stores;
pub use types::{ClientId, SessionToken};
