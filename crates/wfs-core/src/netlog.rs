//! Bounded in-memory traffic log.
//!
//! Every message that crosses the network boundary (or is rejected at
//! it) leaves one entry here for the GUI's monitor view. The ring drops
//! the oldest entry on overflow; persistence is the host's problem.

use std::collections::VecDeque;
use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use wfs_protocol::codec::OscValue;

use crate::{TargetProtocol, TransportKind};

pub const DEFAULT_LOG_CAPACITY: usize = 500;

/// Timestamp in microseconds since UNIX epoch
pub fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Rx,
    Tx,
    Rejected,
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp_us: u64,
    pub direction: Direction,
    pub transport: TransportKind,
    pub protocol: TargetProtocol,
    pub peer: IpAddr,
    pub addr: String,
    pub args: String,
    pub target: Option<usize>,
}

pub struct NetLog {
    entries: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
}

impl NetLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn push(&self, entry: LogEntry) {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn record(
        &self,
        direction: Direction,
        transport: TransportKind,
        protocol: TargetProtocol,
        peer: IpAddr,
        addr: &str,
        args: &[OscValue],
        target: Option<usize>,
    ) {
        self.push(LogEntry {
            timestamp_us: now_us(),
            direction,
            transport,
            protocol,
            peer,
            addr: addr.to_string(),
            args: format_args(args),
            target,
        });
    }

    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for NetLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

pub fn format_args(args: &[OscValue]) -> String {
    let mut out = String::new();
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        match arg {
            OscValue::Int(v) => out.push_str(&v.to_string()),
            OscValue::Float(v) => out.push_str(&format!("{v:.3}")),
            OscValue::Str(s) => out.push_str(s),
            OscValue::Blob(b) => out.push_str(&format!("blob[{}]", b.len())),
            OscValue::Bool(v) => out.push_str(if *v { "T" } else { "F" }),
        }
    }
    out
}
