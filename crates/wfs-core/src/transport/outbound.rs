//! Outbound sender task.
//!
//! Single consumer of the outbound command channel. Owns one UDP send
//! socket shared by all datagram targets and one framed TCP connection
//! per TCP target, with reconnect attempts bounded to one per backoff
//! window. A send failure flips only that target's status; other targets
//! keep flowing.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use wfs_protocol::codec::encode_message;
use wfs_protocol::NUM_TARGETS;

use crate::netlog::{Direction, NetLog};
use crate::transport::{tcp, OutboundCmd};
use crate::{
    ConnectionStatus, NetStats, NetworkEvent, StatusTable, TargetConfig, TargetTable, Transport,
    TransportKind,
};

/// Minimum spacing between reconnect attempts per TCP target
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);
/// Connect attempt timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

pub struct OutboundCtx {
    pub targets: Arc<TargetTable>,
    pub statuses: Arc<StatusTable>,
    pub stats: Arc<NetStats>,
    pub log: Arc<NetLog>,
    pub events: mpsc::Sender<NetworkEvent>,
}

struct TcpLink {
    stream: Option<TcpStream>,
    last_attempt: Option<Instant>,
}

pub async fn run_outbound(
    mut rx: mpsc::Receiver<OutboundCmd>,
    ctx: OutboundCtx,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let udp = UdpSocket::bind("0.0.0.0:0").await?;
    let mut links: Vec<TcpLink> = (0..NUM_TARGETS)
        .map(|_| TcpLink {
            stream: None,
            last_attempt: None,
        })
        .collect();

    info!("Outbound sender started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            cmd = rx.recv() => {
                let Some(cmd) = cmd else { break };
                match cmd {
                    OutboundCmd::ToTarget { target, msg } => {
                        let config = ctx.targets.get(target);
                        if !config.tx_active() {
                            continue;
                        }
                        send_to_target(&udp, &mut links[target], &config, &msg, &ctx).await;
                    }
                    OutboundCmd::ToAddr { addr, msg } => {
                        let bytes = encode_message(&msg);
                        if let Err(e) = udp.send_to(&bytes, addr).await {
                            warn!(to = %addr, "Direct UDP send failed: {}", e);
                        } else {
                            ctx.stats
                                .messages_tx
                                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        }
                    }
                }
            }
        }
    }

    info!("Outbound sender stopped");
    Ok(())
}

async fn send_to_target(
    udp: &UdpSocket,
    link: &mut TcpLink,
    config: &TargetConfig,
    msg: &wfs_protocol::codec::OscMessage,
    ctx: &OutboundCtx,
) {
    let bytes = encode_message(msg);
    let dest = SocketAddr::new(config.ip, config.port);

    let sent = match config.transport {
        Transport::Udp => match udp.send_to(&bytes, dest).await {
            Ok(_) => true,
            Err(e) => {
                warn!(target = config.index, to = %dest, "UDP send failed: {}", e);
                false
            }
        },
        Transport::Tcp => send_framed(link, config, dest, &bytes, ctx).await,
    };

    if sent {
        ctx.stats
            .messages_tx
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let transport = match config.transport {
            Transport::Udp => TransportKind::Udp,
            Transport::Tcp => TransportKind::Tcp,
        };
        ctx.log.record(
            Direction::Tx,
            transport,
            config.protocol,
            config.ip,
            &msg.addr,
            &msg.args,
            Some(config.index),
        );
    }
}

async fn send_framed(
    link: &mut TcpLink,
    config: &TargetConfig,
    dest: SocketAddr,
    bytes: &[u8],
    ctx: &OutboundCtx,
) -> bool {
    if link.stream.is_none() {
        let backoff_over = link
            .last_attempt
            .map(|t| t.elapsed() >= RECONNECT_BACKOFF)
            .unwrap_or(true);
        if !backoff_over {
            return false;
        }
        link.last_attempt = Some(Instant::now());
        set_status(ctx, config.index, ConnectionStatus::Connecting).await;

        match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(dest)).await {
            Ok(Ok(stream)) => {
                info!(target = config.index, to = %dest, "TCP target connected");
                link.stream = Some(stream);
                set_status(ctx, config.index, ConnectionStatus::Connected).await;
            }
            Ok(Err(e)) => {
                debug!(target = config.index, to = %dest, "TCP connect failed: {}", e);
                set_status(ctx, config.index, ConnectionStatus::Error).await;
                return false;
            }
            Err(_) => {
                debug!(target = config.index, to = %dest, "TCP connect timed out");
                set_status(ctx, config.index, ConnectionStatus::Error).await;
                return false;
            }
        }
    }

    if let Some(stream) = link.stream.as_mut() {
        if let Err(e) = tcp::write_frame(stream, bytes).await {
            warn!(target = config.index, to = %dest, "TCP send failed: {}", e);
            link.stream = None;
            set_status(ctx, config.index, ConnectionStatus::Error).await;
            return false;
        }
        return true;
    }
    false
}

async fn set_status(ctx: &OutboundCtx, target: usize, status: ConnectionStatus) {
    if ctx.statuses.set(target, status) {
        let _ = ctx
            .events
            .send(NetworkEvent::ConnectionStatus { target, status })
            .await;
    }
}
