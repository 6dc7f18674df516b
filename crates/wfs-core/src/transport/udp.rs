//! UDP receive loop. One task per configured listen port; every datagram
//! is one self-delimiting OSC packet.

use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

use wfs_protocol::codec::decode_packet;
use wfs_protocol::MAX_FRAME_LEN;

use crate::transport::Inbound;
use crate::{NetStats, TransportKind};

pub async fn run_udp_receiver(
    socket: UdpSocket,
    tx: mpsc::Sender<Inbound>,
    stats: Arc<NetStats>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let local = socket.local_addr()?;
    info!(addr = %local, "OSC UDP receiver listening");

    let mut buf = vec![0u8; MAX_FRAME_LEN];

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((len, peer)) => match decode_packet(&buf[..len]) {
                        Ok(packet) => {
                            let inbound = Inbound {
                                packet,
                                peer,
                                transport: TransportKind::Udp,
                            };
                            if tx.send(inbound).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            stats.decode_errors.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                            debug!(from = %peer, error = %e, "Dropping undecodable datagram");
                        }
                    },
                    Err(e) => {
                        // One bad recv must not kill the loop
                        error!(addr = %local, "UDP receive error: {}", e);
                        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    }
                }
            }
        }
    }

    info!(addr = %local, "OSC UDP receiver stopped");
    Ok(())
}
