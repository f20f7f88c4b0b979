//! Local control socket: length-prefixed JSON over TCP.
//!
//! A client gets `Hello` with the current presentation state on connect,
//! the state again after each of its commands, and every broadcast after
//! that.

use std::sync::Arc;

use moe_proto::protocol::{Broadcast, Message, PROTOCOL_VERSION};
use moe_proto::state::StateManager;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::control::Control;
use crate::BroadcastMessage;

pub async fn bind(bind_address: &str, port: u16) -> anyhow::Result<TcpListener> {
    let addr = format!("{}:{}", bind_address, port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Control socket listening at {}", addr);
    Ok(listener)
}

pub fn serve(
    listener: TcpListener,
    state_manager: Arc<StateManager>,
    control: Arc<Control>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut client_id = 0usize;
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    client_id += 1;
                    info!("Client {} connected from {}", client_id, peer);
                    tokio::spawn(handle_client(
                        stream,
                        state_manager.clone(),
                        client_id,
                        control.clone(),
                        broadcast_tx.subscribe(),
                    ));
                }
                Err(e) => error!("Failed to accept connection: {}", e),
            }
        }
    })
}

async fn handle_client(
    stream: TcpStream,
    state_manager: Arc<StateManager>,
    client_id: usize,
    control: Arc<Control>,
    mut broadcast_rx: broadcast::Receiver<BroadcastMessage>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    match encode_hello(&state_manager).await {
        Ok(encoded) => {
            if write_half.write_all(&encoded).await.is_err() {
                return;
            }
        }
        Err(e) => warn!("Client {}: failed to encode hello: {}", client_id, e),
    }

    loop {
        tokio::select! {
            result = read_half.read(&mut tmp) => {
                let n = match result {
                    Ok(0) => {
                        info!("Client {} disconnected", client_id);
                        break;
                    }
                    Ok(n) => n,
                    Err(e) => {
                        error!("Read error from client {}: {}", client_id, e);
                        break;
                    }
                };
                read_buf.extend_from_slice(&tmp[..n]);

                while read_buf.len() >= 4 {
                    let (msg, consumed) = match Message::decode(&read_buf) {
                        Ok(decoded) => decoded,
                        Err(_) => break,
                    };
                    read_buf.drain(..consumed);
                    let Message::Command(cmd) = msg else { continue };

                    info!("Client {} sent {:?}", client_id, cmd);
                    if let Err(e) = control.handle(cmd).await {
                        error!("Client {} command failed: {}", client_id, e);
                        let toast = Broadcast::Toast { message: e.to_string() };
                        if send(&mut write_half, Message::Broadcast(toast)).await.is_err() {
                            return;
                        }
                    }
                    if send_state(&mut write_half, &state_manager).await.is_err() {
                        return;
                    }
                }
            }

            msg = broadcast_rx.recv() => {
                let outgoing = match msg {
                    Ok(BroadcastMessage::StateUpdated) => None,
                    Ok(BroadcastMessage::FavoriteChanged { song_id, favorite }) => {
                        Some(Broadcast::FavoriteChanged { song_id, favorite })
                    }
                    Ok(BroadcastMessage::Toast(message)) => Some(Broadcast::Toast { message }),
                    Ok(BroadcastMessage::Log(message)) => Some(Broadcast::Log { message }),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client {} missed {} broadcast messages", client_id, n);
                        None
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let written = match outgoing {
                    Some(b) => send(&mut write_half, Message::Broadcast(b)).await,
                    None => send_state(&mut write_half, &state_manager).await,
                };
                if written.is_err() {
                    break;
                }
            }
        }
    }
}

async fn send<W>(writer: &mut W, msg: Message) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&msg.encode()?).await?;
    Ok(())
}

async fn send_state<W>(writer: &mut W, state_manager: &StateManager) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let data = state_manager.get_state().await;
    send(writer, Message::Broadcast(Broadcast::State { data })).await
}

async fn encode_hello(state_manager: &StateManager) -> anyhow::Result<Vec<u8>> {
    let state = state_manager.get_state().await;
    Message::Broadcast(Broadcast::Hello {
        protocol_version: PROTOCOL_VERSION,
        state,
    })
    .encode()
}
