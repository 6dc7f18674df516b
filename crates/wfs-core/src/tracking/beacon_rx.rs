//! Multicast receiver for the binary tracking beacon.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, error, info};

use wfs_protocol::beacon;

use crate::tracking::{TrackingRouter, TrackingUpdate};
use crate::NetStats;

/// Create a multicast listener socket that joins the beacon group.
fn create_multicast_listener(
    group: Ipv4Addr,
    port: u16,
) -> std::io::Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;

    #[cfg(any(target_os = "macos", target_os = "freebsd"))]
    socket.set_reuse_port(true)?;

    let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
    socket.bind(&addr.into())?;

    // Join on all interfaces
    socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;

    socket.set_nonblocking(true)?;

    Ok(socket.into())
}

pub async fn run(
    group: Ipv4Addr,
    port: u16,
    router: Arc<TrackingRouter>,
    stats: Arc<NetStats>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let std_socket = create_multicast_listener(group, port)?;
    let socket = UdpSocket::from_std(std_socket)?;

    info!(group = %group, port, "Beacon receiver joined multicast group");

    let mut buf = [0u8; 1500];

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((len, peer)) => {
                        let Some(packet) = beacon::decode_packet(&buf[..len]) else {
                            stats.decode_errors.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                            debug!(from = %peer, "Dropping malformed beacon packet");
                            continue;
                        };
                        for tracker in packet.trackers {
                            if let Some([x, y, z]) = tracker.pos {
                                router.route(TrackingUpdate {
                                    tracking_id: i32::from(tracker.id),
                                    x: Some(x),
                                    y: Some(y),
                                    z: Some(z),
                                }).await;
                            }
                            if let Some(ori) = tracker.ori {
                                router.route_orientation(i32::from(tracker.id), ori).await;
                            }
                        }
                    }
                    Err(e) => {
                        error!("Beacon receive error: {}", e);
                        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    }
                }
            }
        }
    }

    info!("Beacon receiver stopped");
    Ok(())
}
