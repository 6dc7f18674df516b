pub mod netlog;
pub mod orchestrator;
pub mod params;
pub mod ratelimit;
pub mod router;
pub mod tracking;
pub mod transport;

use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::Deserialize;

use wfs_protocol::NUM_TARGETS;

// ── Target configuration ────────────────────────────────────────────────

/// Transport a target is reached over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Udp,
    Tcp,
}

/// Which transport a decoded packet arrived on. Carried alongside every
/// inbound packet so one dispatch path can branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Udp,
    Tcp,
}

/// Protocol family spoken by a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum TargetProtocol {
    #[serde(rename = "disabled")]
    Disabled,
    #[serde(rename = "osc")]
    Osc,
    #[serde(rename = "remote")]
    Remote,
    #[serde(rename = "adm-osc")]
    AdmOsc,
}

/// Immutable snapshot of one target slot. Reconfiguration replaces the
/// whole struct; nothing mutates a live one.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TargetConfig {
    pub index: usize,
    pub transport: Transport,
    pub ip: IpAddr,
    pub port: u16,
    pub rx: bool,
    pub tx: bool,
    pub protocol: TargetProtocol,
}

impl TargetConfig {
    pub fn disabled(index: usize) -> Self {
        Self {
            index,
            transport: Transport::Udp,
            ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
            rx: false,
            tx: false,
            protocol: TargetProtocol::Disabled,
        }
    }

    pub fn is_active(&self) -> bool {
        self.protocol != TargetProtocol::Disabled
    }

    pub fn tx_active(&self) -> bool {
        self.is_active() && self.tx
    }
}

/// Shared view over the six target slots. The orchestrator owns writes;
/// the rate limiter and transports only read through this accessor.
pub struct TargetTable {
    slots: RwLock<[TargetConfig; NUM_TARGETS]>,
}

impl TargetTable {
    pub fn new(slots: [TargetConfig; NUM_TARGETS]) -> Self {
        Self {
            slots: RwLock::new(slots),
        }
    }

    pub fn empty() -> Self {
        Self::new(std::array::from_fn(TargetConfig::disabled))
    }

    pub fn get(&self, index: usize) -> TargetConfig {
        self.slots.read()[index].clone()
    }

    pub fn replace(&self, config: TargetConfig) {
        let mut slots = self.slots.write();
        let index = config.index;
        slots[index] = config;
    }

    pub fn all(&self) -> [TargetConfig; NUM_TARGETS] {
        self.slots.read().clone()
    }

    pub fn tx_active_indices(&self) -> Vec<usize> {
        self.slots
            .read()
            .iter()
            .filter(|t| t.tx_active())
            .map(|t| t.index)
            .collect()
    }

    /// Slot whose configured IP matches the peer, if any.
    pub fn find_by_ip(&self, ip: IpAddr) -> Option<usize> {
        self.slots
            .read()
            .iter()
            .find(|t| t.is_active() && t.ip == ip)
            .map(|t| t.index)
    }

    pub fn ip_allowed(&self, ip: IpAddr) -> bool {
        self.find_by_ip(ip).is_some()
    }
}

// ── Connection status ───────────────────────────────────────────────────

/// Transport-level reachability of a target (distinct from the Remote
/// handshake state, which lives in the orchestrator's links).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

pub struct StatusTable {
    slots: Mutex<[ConnectionStatus; NUM_TARGETS]>,
}

impl Default for StatusTable {
    fn default() -> Self {
        Self {
            slots: Mutex::new([ConnectionStatus::Disconnected; NUM_TARGETS]),
        }
    }
}

impl StatusTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the status actually changed.
    pub fn set(&self, index: usize, status: ConnectionStatus) -> bool {
        let mut slots = self.slots.lock();
        if slots[index] == status {
            return false;
        }
        slots[index] = status;
        true
    }

    pub fn get(&self, index: usize) -> ConnectionStatus {
        self.slots.lock()[index]
    }
}

// ── Events ──────────────────────────────────────────────────────────────

/// Everything the host application can observe from the networking core,
/// delivered over one mpsc channel.
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkEvent {
    ConnectionStatus {
        target: usize,
        status: ConnectionStatus,
    },
    RemoteConnected {
        target: usize,
        reconnect: bool,
    },
    RemoteDisconnected {
        target: usize,
    },
    ChannelSelected {
        target: usize,
        channel: u16,
    },
    PositionUpdate {
        channel: u16,
        x: Option<f32>,
        y: Option<f32>,
        z: Option<f32>,
    },
    OrientationUpdate {
        channel: u16,
        orientation: [f32; 3],
    },
}

// ── Statistics ──────────────────────────────────────────────────────────

/// Lock-free traffic counters, incremented on the receive/send paths.
#[derive(Debug, Default)]
pub struct NetStats {
    pub messages_rx: AtomicU64,
    pub messages_tx: AtomicU64,
    pub rejected: AtomicU64,
    pub unrecognized: AtomicU64,
    pub decode_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NetStatsSnapshot {
    pub messages_rx: u64,
    pub messages_tx: u64,
    pub rejected: u64,
    pub unrecognized: u64,
    pub decode_errors: u64,
}

impl NetStats {
    pub fn snapshot(&self) -> NetStatsSnapshot {
        NetStatsSnapshot {
            messages_rx: self.messages_rx.load(Ordering::Relaxed),
            messages_tx: self.messages_tx.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            unrecognized: self.unrecognized.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(index: usize, ip: [u8; 4], protocol: TargetProtocol) -> TargetConfig {
        TargetConfig {
            index,
            transport: Transport::Udp,
            ip: IpAddr::V4(Ipv4Addr::from(ip)),
            port: 9000 + index as u16,
            rx: true,
            tx: true,
            protocol,
        }
    }

    #[test]
    fn test_target_table_ip_lookup() {
        let table = TargetTable::empty();
        table.replace(target(1, [10, 0, 0, 5], TargetProtocol::Osc));
        table.replace(target(3, [10, 0, 0, 9], TargetProtocol::Disabled));

        assert_eq!(table.find_by_ip("10.0.0.5".parse().unwrap()), Some(1));
        // Disabled slots never match
        assert_eq!(table.find_by_ip("10.0.0.9".parse().unwrap()), None);
        assert!(!table.ip_allowed("10.0.0.6".parse().unwrap()));
    }

    #[test]
    fn test_target_replace_is_whole_struct() {
        let table = TargetTable::empty();
        table.replace(target(2, [192, 168, 1, 20], TargetProtocol::Remote));
        let before = table.get(2);
        assert!(before.tx_active());

        table.replace(TargetConfig::disabled(2));
        let after = table.get(2);
        assert!(!after.is_active());
        assert_eq!(after.port, 0);
    }

    #[test]
    fn test_status_table_reports_changes_once() {
        let statuses = StatusTable::new();
        assert!(statuses.set(0, ConnectionStatus::Connected));
        assert!(!statuses.set(0, ConnectionStatus::Connected));
        assert!(statuses.set(0, ConnectionStatus::Error));
        assert_eq!(statuses.get(0), ConnectionStatus::Error);
    }
}
