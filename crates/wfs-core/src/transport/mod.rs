pub mod outbound;
pub mod tcp;
pub mod udp;

use std::net::SocketAddr;

use wfs_protocol::codec::{OscMessage, OscPacket};

use crate::TransportKind;

/// A decoded inbound packet with its true sender. The sender address is
/// carried because IP filtering and loop prevention need it; a generic
/// receive abstraction would hide it.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub packet: OscPacket,
    pub peer: SocketAddr,
    pub transport: TransportKind,
}

/// Work items for the outbound sender task.
#[derive(Debug, Clone)]
pub enum OutboundCmd {
    /// Route through a configured target slot (UDP or framed TCP).
    ToTarget { target: usize, msg: OscMessage },
    /// One-shot UDP reply to an arbitrary peer (discovery replies).
    ToAddr { addr: SocketAddr, msg: OscMessage },
}
