//! TCP connection handler
//!
//! Handles individual client connections: frame parsing, dispatch into
//! the ChatServer, and the outbound queue that serializes every write to
//! the socket.

use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::ProtocolError;
use crate::message::{write_message, FrameReader, Message};
use crate::server::ChatServer;

/// Handle a new TCP connection
///
/// Registers the connection, runs its read and write tasks, and removes it
/// from every room once either side stops.
pub async fn handle_connection(
    stream: TcpStream,
    server: Arc<ChatServer>,
) -> Result<(), ProtocolError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    let (reader, mut writer) = stream.into_split();

    // Create channel for server -> client messages
    let (msg_tx, mut msg_rx) = mpsc::channel::<Message>(server.outbound_queue());
    let client_id = server.connect(msg_tx.clone()).await;
    info!("Client {} connected from {}", client_id, peer_addr);

    // Spawn write task (queue -> socket); the only writer for this connection
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = msg_rx.recv().await {
            if let Err(e) = write_message(&mut writer, &msg).await {
                debug!("Write failed for {}: {}", client_id, e);
                break;
            }
        }
        debug!("Write task ended for {}", client_id);
        let _ = writer.shutdown().await;
    });

    // Spawn read task (socket -> dispatch -> direct reply)
    let read_server = Arc::clone(&server);
    let mut read_task = tokio::spawn(async move {
        let mut frames = FrameReader::new(reader);
        loop {
            let message = match frames.read_message().await {
                Ok(message) => message,
                Err(ProtocolError::ConnectionClosed) => {
                    debug!("Client {} closed the connection", client_id);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Dropping client {}: {}", client_id, e);
                    return Err(e);
                }
            };

            debug!(%client_id, command = ?message.command(), "message received");
            if let Some(reply) = read_server.dispatch(client_id, message).await {
                if msg_tx.send(reply).await.is_err() {
                    debug!("Outbound queue closed for {}", client_id);
                    return Ok(());
                }
            }
        }
    });

    // Wait for either task to complete
    let result = tokio::select! {
        joined = &mut read_task => match joined {
            Ok(result) => result,
            Err(e) => {
                error!("Read task for {} failed: {}", client_id, e);
                Ok(())
            }
        },
        _ = &mut write_task => {
            read_task.abort();
            Ok(())
        }
    };

    server.disconnect(client_id).await;
    info!("Client {} disconnected", client_id);

    result
}
