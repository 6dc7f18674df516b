//! Outbound rate limiter with per-target coalescing.
//!
//! Rapid parameter churn (drag gestures, animation engines running at
//! 50 Hz) must not overwhelm slow Remote links. Each target owns a map
//! from coalescing key to the most recent message for that key; a key
//! enqueued again before the flush replaces the stored message. A flush
//! sends every queued message for targets whose minimum send interval
//! has elapsed. Key order within a flush is not guaranteed.
//!
//! The core is clock-injected; `run_flush_loop` owns the timer and
//! forwards due batches to the outbound sender task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use wfs_protocol::codec::{OscMessage, OscValue};
use wfs_protocol::{DEFAULT_MAX_RATE_HZ, NUM_TARGETS};

use crate::transport::OutboundCmd;
use crate::TargetTable;

/// Destination selector for `enqueue`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendTarget {
    Target(usize),
    /// Fan out to every target with tx enabled, coalescing independently
    /// per target.
    Broadcast,
}

#[derive(Debug, Default)]
pub struct LimiterStats {
    pub enqueued: AtomicU64,
    pub coalesced: AtomicU64,
    pub sent: AtomicU64,
}

struct Queues {
    pending: [HashMap<String, OscMessage>; NUM_TARGETS],
    last_send: [Option<Instant>; NUM_TARGETS],
    min_interval: Duration,
}

pub struct RateLimiter {
    targets: Arc<TargetTable>,
    inner: Mutex<Queues>,
    pub stats: LimiterStats,
}

/// Key under which consecutive updates collapse: the address, extended
/// by the channel id when the first argument is an integer channel.
pub fn coalescing_key(msg: &OscMessage) -> String {
    match msg.args.first() {
        Some(OscValue::Int(channel)) => format!("{}:{}", msg.addr, channel),
        _ => msg.addr.clone(),
    }
}

impl RateLimiter {
    pub fn new(targets: Arc<TargetTable>) -> Self {
        Self {
            targets,
            inner: Mutex::new(Queues {
                pending: std::array::from_fn(|_| HashMap::new()),
                last_send: [None; NUM_TARGETS],
                min_interval: rate_to_interval(DEFAULT_MAX_RATE_HZ),
            }),
            stats: LimiterStats::default(),
        }
    }

    pub fn set_max_rate(&self, hz: u32) {
        let interval = rate_to_interval(hz);
        self.inner.lock().min_interval = interval;
        info!(hz, "Outbound rate ceiling changed");
    }

    pub fn min_interval(&self) -> Duration {
        self.inner.lock().min_interval
    }

    pub fn enqueue(&self, target: SendTarget, msg: OscMessage) {
        match target {
            SendTarget::Target(index) => self.push(index, msg),
            SendTarget::Broadcast => {
                for index in self.targets.tx_active_indices() {
                    self.push(index, msg.clone());
                }
            }
        }
    }

    fn push(&self, index: usize, msg: OscMessage) {
        let key = coalescing_key(&msg);
        let mut inner = self.inner.lock();
        if inner.pending[index].insert(key, msg).is_some() {
            self.stats.coalesced.fetch_add(1, Ordering::Relaxed);
        }
        self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    /// Drain every target whose send window has elapsed. Returns the
    /// batches to transmit; the queue snapshot is taken under the lock so
    /// a racing enqueue either lands in this flush or the next one whole.
    pub fn tick(&self, now: Instant) -> Vec<(usize, Vec<OscMessage>)> {
        let mut due = Vec::new();
        let mut inner = self.inner.lock();
        let min_interval = inner.min_interval;
        for index in 0..NUM_TARGETS {
            if inner.pending[index].is_empty() {
                continue;
            }
            let ready = match inner.last_send[index] {
                Some(last) => now.saturating_duration_since(last) >= min_interval,
                None => true,
            };
            if !ready {
                continue;
            }
            let batch: Vec<OscMessage> = inner.pending[index].drain().map(|(_, m)| m).collect();
            inner.last_send[index] = Some(now);
            self.stats.sent.fetch_add(batch.len() as u64, Ordering::Relaxed);
            due.push((index, batch));
        }
        due
    }

    /// Drain everything immediately, ignoring send windows. Used for
    /// explicit state resend and shutdown.
    pub fn flush_all(&self, now: Instant) -> Vec<(usize, Vec<OscMessage>)> {
        let mut due = Vec::new();
        let mut inner = self.inner.lock();
        for index in 0..NUM_TARGETS {
            if inner.pending[index].is_empty() {
                continue;
            }
            let batch: Vec<OscMessage> = inner.pending[index].drain().map(|(_, m)| m).collect();
            inner.last_send[index] = Some(now);
            self.stats.sent.fetch_add(batch.len() as u64, Ordering::Relaxed);
            due.push((index, batch));
        }
        due
    }

    pub fn pending_count(&self, index: usize) -> usize {
        self.inner.lock().pending[index].len()
    }
}

fn rate_to_interval(hz: u32) -> Duration {
    Duration::from_millis(1000 / u64::from(hz.max(1)))
}

/// Periodic flush task. Forwards due batches to the outbound sender.
pub async fn run_flush_loop(
    limiter: Arc<RateLimiter>,
    out_tx: mpsc::Sender<OutboundCmd>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        interval_ms = limiter.min_interval().as_millis() as u64,
        "Rate limiter flush loop started"
    );

    loop {
        let period = limiter.min_interval();
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            _ = tokio::time::sleep(period) => {
                for (target, batch) in limiter.tick(Instant::now()) {
                    debug!(target, count = batch.len(), "Flushing coalesced batch");
                    for msg in batch {
                        if out_tx.send(OutboundCmd::ToTarget { target, msg }).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }

    // Final drain so nothing queued is lost on shutdown
    for (target, batch) in limiter.flush_all(Instant::now()) {
        for msg in batch {
            let _ = out_tx.send(OutboundCmd::ToTarget { target, msg }).await;
        }
    }
}
