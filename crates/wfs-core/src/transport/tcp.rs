//! TCP listener with length-prefixed framing.
//!
//! TCP is a byte stream, so each OSC payload is preceded by a 4-byte
//! big-endian length. At most `MAX_TCP_CLIENTS` connections are served;
//! each client runs its own read task, and a read that cannot fill the
//! declared length before the peer closes ends only that client.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use wfs_protocol::codec::decode_packet;
use wfs_protocol::{MAX_FRAME_LEN, MAX_TCP_CLIENTS};

use crate::transport::Inbound;
use crate::{NetStats, TransportKind};

pub async fn run_tcp_listener(
    listener: TcpListener,
    tx: mpsc::Sender<Inbound>,
    stats: Arc<NetStats>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let local = listener.local_addr()?;
    let active = Arc::new(AtomicUsize::new(0));
    info!(addr = %local, max_clients = MAX_TCP_CLIENTS, "OSC TCP listener started");

    let mut shutdown_accept = shutdown.clone();

    loop {
        tokio::select! {
            _ = shutdown_accept.changed() => {
                if *shutdown_accept.borrow() {
                    break;
                }
            }
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        if active.load(Ordering::Acquire) >= MAX_TCP_CLIENTS {
                            warn!(from = %peer, "Rejecting TCP client, limit reached");
                            continue;
                        }
                        active.fetch_add(1, Ordering::AcqRel);
                        debug!(from = %peer, "TCP client connected");

                        let tx = tx.clone();
                        let stats = Arc::clone(&stats);
                        let active = Arc::clone(&active);
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            run_client(stream, tx, stats, shutdown).await;
                            active.fetch_sub(1, Ordering::AcqRel);
                        });
                    }
                    Err(e) => {
                        error!(addr = %local, "TCP accept error: {}", e);
                        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    }
                }
            }
        }
    }

    info!(addr = %local, "OSC TCP listener stopped");
    Ok(())
}

async fn run_client(
    mut stream: TcpStream,
    tx: mpsc::Sender<Inbound>,
    stats: Arc<NetStats>,
    mut shutdown: watch::Receiver<bool>,
) {
    let peer = match stream.peer_addr() {
        Ok(addr) => addr,
        Err(_) => return,
    };

    loop {
        let mut len_buf = [0u8; 4];
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            result = stream.read_exact(&mut len_buf) => {
                if result.is_err() {
                    debug!(from = %peer, "TCP client closed");
                    break;
                }
                let len = u32::from_be_bytes(len_buf) as usize;
                if len == 0 || len > MAX_FRAME_LEN {
                    warn!(from = %peer, len, "Invalid TCP frame length, dropping client");
                    break;
                }

                let mut payload = vec![0u8; len];
                if stream.read_exact(&mut payload).await.is_err() {
                    // Peer closed mid-frame: truncated connection
                    debug!(from = %peer, declared = len, "TCP client closed mid-frame");
                    break;
                }

                match decode_packet(&payload) {
                    Ok(packet) => {
                        let inbound = Inbound {
                            packet,
                            peer,
                            transport: TransportKind::Tcp,
                        };
                        if tx.send(inbound).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        stats.decode_errors.fetch_add(1, Ordering::Relaxed);
                        debug!(from = %peer, error = %e, "Dropping undecodable TCP frame");
                    }
                }
            }
        }
    }
}

/// Write one length-prefixed OSC payload.
pub async fn write_frame(stream: &mut TcpStream, payload: &[u8]) -> std::io::Result<()> {
    stream.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    stream.write_all(payload).await
}
