//! Connection orchestrator.
//!
//! Owns per-target connection state and classifies every inbound packet:
//! standard parameter traffic, REMOTE handshake/control, ADM-OSC, or
//! noise. Applies IP filtering before anything reaches the router and
//! suppresses same-protocol echo so two DAW-class peers cannot feed each
//! other's updates back in a loop.

pub mod remote_link;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use wfs_protocol::codec::{OscMessage, OscPacket};
use wfs_protocol::{remote, CONNECTION_TIMEOUT_MS, HEARTBEAT_INTERVAL_MS, NUM_TARGETS};

use crate::netlog::{Direction, NetLog};
use crate::orchestrator::remote_link::{PongOutcome, RemoteLink, RemoteState};
use crate::params::{ParamId, ParameterStore, Scope, SharedStore, NUM_INPUT_CHANNELS};
use crate::ratelimit::{RateLimiter, SendTarget};
use crate::router::{self, ParamUpdate, RemoteInput};
use crate::transport::{Inbound, OutboundCmd};
use crate::{
    ConnectionStatus, NetStats, NetworkEvent, StatusTable, TargetProtocol, TargetTable, Transport,
    TransportKind,
};

pub struct OrchestratorConfig {
    pub device_name: String,
    pub remote_password: String,
    pub ip_filter: bool,
}

/// Shared pieces the orchestrator coordinates. Constructed once at the
/// composition root and handed in by Arc; no global state.
pub struct CoreHandles {
    pub targets: Arc<TargetTable>,
    pub statuses: Arc<StatusTable>,
    pub limiter: Arc<RateLimiter>,
    pub store: SharedStore,
    pub log: Arc<NetLog>,
    pub stats: Arc<NetStats>,
}

pub struct Orchestrator {
    targets: Arc<TargetTable>,
    statuses: Arc<StatusTable>,
    limiter: Arc<RateLimiter>,
    store: SharedStore,
    log: Arc<NetLog>,
    stats: Arc<NetStats>,
    links: Mutex<[RemoteLink; NUM_TARGETS]>,
    events: mpsc::Sender<NetworkEvent>,
    out_tx: mpsc::Sender<OutboundCmd>,
    ip_filter: AtomicBool,
    device_name: String,
    remote_password: String,
}

fn flatten_into(packet: OscPacket, out: &mut Vec<OscMessage>) {
    match packet {
        OscPacket::Message(msg) => out.push(msg),
        OscPacket::Bundle(bundle) => {
            for element in bundle.content {
                flatten_into(element, out);
            }
        }
    }
}

/// Protocol family an address belongs to, for the traffic log.
fn classify_protocol(addr: &str) -> TargetProtocol {
    if addr.starts_with(remote::REMOTE_INPUT_PREFIX)
        || addr.starts_with(remote::REMOTE_OUTPUT_PREFIX)
        || addr == remote::ADDR_FIND_DEVICE
    {
        TargetProtocol::Remote
    } else if addr.starts_with("/adm/") {
        TargetProtocol::AdmOsc
    } else {
        TargetProtocol::Osc
    }
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        handles: CoreHandles,
        events: mpsc::Sender<NetworkEvent>,
        out_tx: mpsc::Sender<OutboundCmd>,
    ) -> Self {
        Self {
            targets: handles.targets,
            statuses: handles.statuses,
            limiter: handles.limiter,
            store: handles.store,
            log: handles.log,
            stats: handles.stats,
            links: Mutex::new(std::array::from_fn(|_| RemoteLink::new())),
            events,
            out_tx,
            ip_filter: AtomicBool::new(config.ip_filter),
            device_name: config.device_name,
            remote_password: config.remote_password,
        }
    }

    pub fn set_ip_filter(&self, enabled: bool) {
        self.ip_filter.store(enabled, Ordering::Relaxed);
        info!(enabled, "IP filter toggled");
    }

    pub fn remote_state(&self, target: usize) -> RemoteState {
        self.links.lock()[target].state()
    }

    /// Mark datagram targets reachable at startup; a plain UDP target has
    /// no session to probe, so a valid active config is the only signal.
    pub async fn init_statuses(&self) {
        for config in self.targets.all() {
            if config.tx_active() && config.transport == Transport::Udp {
                if self.statuses.set(config.index, ConnectionStatus::Connected) {
                    let _ = self
                        .events
                        .send(NetworkEvent::ConnectionStatus {
                            target: config.index,
                            status: ConnectionStatus::Connected,
                        })
                        .await;
                }
            }
        }
    }

    // ── Inbound path ────────────────────────────────────────────────────

    pub async fn handle_inbound(&self, inbound: Inbound) {
        let peer_ip = inbound.peer.ip();

        let mut messages = Vec::new();
        flatten_into(inbound.packet, &mut messages);

        if self.ip_filter.load(Ordering::Relaxed) && !self.targets.ip_allowed(peer_ip) {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            for msg in &messages {
                self.log.record(
                    Direction::Rejected,
                    inbound.transport,
                    classify_protocol(&msg.addr),
                    peer_ip,
                    &msg.addr,
                    &msg.args,
                    None,
                );
            }
            debug!(from = %peer_ip, "Rejected traffic from unlisted peer");
            return;
        }

        let origin_target = self.targets.find_by_ip(peer_ip);
        for msg in messages {
            self.dispatch(msg, inbound.peer, inbound.transport, origin_target)
                .await;
        }
    }

    async fn dispatch(
        &self,
        msg: OscMessage,
        peer: SocketAddr,
        transport: TransportKind,
        origin_target: Option<usize>,
    ) {
        self.stats.messages_rx.fetch_add(1, Ordering::Relaxed);
        self.log.record(
            Direction::Rx,
            transport,
            classify_protocol(&msg.addr),
            peer.ip(),
            &msg.addr,
            &msg.args,
            origin_target,
        );

        if msg.addr == remote::ADDR_FIND_DEVICE {
            self.handle_find_device(&msg, peer).await;
            return;
        }

        if msg.addr.starts_with(remote::REMOTE_INPUT_PREFIX) {
            self.handle_remote(&msg, origin_target).await;
            return;
        }

        if msg.addr.starts_with("/adm/") {
            match router::parse_adm_input(&msg) {
                Ok(updates) => {
                    for update in updates {
                        self.apply_update(update, Some(TargetProtocol::AdmOsc)).await;
                    }
                }
                Err(e) => {
                    self.stats.unrecognized.fetch_add(1, Ordering::Relaxed);
                    debug!(addr = %msg.addr, error = %e, "Dropping ADM message");
                }
            }
            return;
        }

        match router::parse_input(&msg) {
            Ok(update) => self.apply_update(update, Some(TargetProtocol::Osc)).await,
            Err(e) => {
                self.stats.unrecognized.fetch_add(1, Ordering::Relaxed);
                debug!(addr = %msg.addr, error = %e, "Unrecognized address");
            }
        }
    }

    async fn handle_find_device(&self, msg: &OscMessage, peer: SocketAddr) {
        let password = msg.args.first().and_then(|a| a.as_str()).unwrap_or("");
        if !self.remote_password.is_empty() && password != self.remote_password {
            warn!(from = %peer, "findDevice with wrong password");
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            return;
        }
        info!(from = %peer, "Device discovery request");
        self.send_direct(peer, remote::device_found(&self.device_name))
            .await;
    }

    async fn handle_remote(&self, msg: &OscMessage, origin_target: Option<usize>) {
        let Some(target) = origin_target else {
            // Remote control only works against a configured slot
            self.stats.unrecognized.fetch_add(1, Ordering::Relaxed);
            debug!(addr = %msg.addr, "Remote message from unconfigured peer");
            return;
        };

        let parsed = match router::parse_remote_input(msg) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.stats.unrecognized.fetch_add(1, Ordering::Relaxed);
                debug!(addr = %msg.addr, error = %e, "Unrecognized remote message");
                return;
            }
        };

        match parsed {
            RemoteInput::Pong { seq } => {
                let outcome = self.links.lock()[target].on_pong(seq, Instant::now());
                match outcome {
                    PongOutcome::Established { reconnect } => {
                        info!(target, reconnect, "Remote link established");
                        let _ = self
                            .events
                            .send(NetworkEvent::RemoteConnected { target, reconnect })
                            .await;
                        self.resend_full_state(target);
                    }
                    PongOutcome::Heartbeat => {}
                    PongOutcome::Stale => debug!(target, seq, "Stale pong ignored"),
                }
            }
            RemoteInput::Ping { seq } => {
                self.send_to_target(target, remote::pong(seq)).await;
            }
            RemoteInput::SelectChannel { channel } => {
                if channel >= NUM_INPUT_CHANNELS {
                    self.stats.unrecognized.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                self.links.lock()[target].selected_channel = channel;
                let _ = self
                    .events
                    .send(NetworkEvent::ChannelSelected { target, channel })
                    .await;
                // Confirm the selection and its current position
                let x = self.store.get(ParamId::PositionX, channel);
                let y = self.store.get(ParamId::PositionY, channel);
                self.send_to_target(target, remote::channel_feedback(channel as i32))
                    .await;
                self.send_to_target(
                    target,
                    remote::position_feedback(channel as i32, x, y),
                )
                .await;
            }
            RemoteInput::PositionXY { x, y } => {
                let channel = self.links.lock()[target].selected_channel;
                self.apply_update(
                    ParamUpdate {
                        id: ParamId::PositionX,
                        channel,
                        value: x,
                    },
                    Some(TargetProtocol::Remote),
                )
                .await;
                self.apply_update(
                    ParamUpdate {
                        id: ParamId::PositionY,
                        channel,
                        value: y,
                    },
                    Some(TargetProtocol::Remote),
                )
                .await;
            }
            RemoteInput::PositionDelta { axis, direction } => {
                let channel = self.links.lock()[target].selected_channel;
                let id = axis.param();
                let value =
                    self.store.get(id, channel) + direction as f32 * remote::NUDGE_STEP;
                self.apply_update(
                    ParamUpdate { id, channel, value },
                    Some(TargetProtocol::Remote),
                )
                .await;
            }
            RemoteInput::ParamSet { name, value } => {
                let Some(id) = ParamId::from_wire(Scope::Input, &name) else {
                    self.stats.unrecognized.fetch_add(1, Ordering::Relaxed);
                    debug!(name = %name, "Remote set for unknown parameter");
                    return;
                };
                let channel = self.links.lock()[target].selected_channel;
                self.apply_update(
                    ParamUpdate { id, channel, value },
                    Some(TargetProtocol::Remote),
                )
                .await;
            }
            RemoteInput::ParamDelta { name, delta } => {
                let Some(id) = ParamId::from_wire(Scope::Input, &name) else {
                    self.stats.unrecognized.fetch_add(1, Ordering::Relaxed);
                    debug!(name = %name, "Remote delta for unknown parameter");
                    return;
                };
                let channel = self.links.lock()[target].selected_channel;
                let value = self.store.get(id, channel) + delta;
                self.apply_update(
                    ParamUpdate { id, channel, value },
                    Some(TargetProtocol::Remote),
                )
                .await;
            }
            RemoteInput::Disconnect => {
                info!(target, "Remote client disconnected");
                self.links.lock()[target].disconnect();
                let _ = self
                    .events
                    .send(NetworkEvent::RemoteDisconnected { target })
                    .await;
            }
        }
    }

    /// Write the parameter and propagate it, suppressing targets that
    /// speak the same protocol the update arrived on.
    async fn apply_update(&self, update: ParamUpdate, origin: Option<TargetProtocol>) {
        self.store.set(update.id, update.channel, update.value);

        let position = match update.id {
            ParamId::PositionX => Some((Some(update.value), None, None)),
            ParamId::PositionY => Some((None, Some(update.value), None)),
            ParamId::PositionZ => Some((None, None, Some(update.value))),
            _ => None,
        };
        if let Some((x, y, z)) = position {
            let _ = self
                .events
                .send(NetworkEvent::PositionUpdate {
                    channel: update.channel,
                    x,
                    y,
                    z,
                })
                .await;
        }

        self.broadcast_param(update.id, update.channel, update.value, origin);
    }

    /// Host-side change (GUI drag, animation engine): fan out everywhere.
    pub async fn handle_param_change(&self, id: ParamId, channel: u16, value: f32) {
        self.store.set(id, channel, value);
        self.broadcast_param(id, channel, value, None);
    }

    fn broadcast_param(
        &self,
        id: ParamId,
        channel: u16,
        value: f32,
        origin: Option<TargetProtocol>,
    ) {
        for config in self.targets.all() {
            if !config.tx_active() {
                continue;
            }
            // Loop prevention: never echo straight back into the protocol
            // family the update came from
            if origin == Some(config.protocol) {
                continue;
            }
            let msg = match config.protocol {
                TargetProtocol::Osc => router::build_output(id, channel, value),
                TargetProtocol::AdmOsc => match router::build_adm_output(id, channel, value) {
                    Ok(msg) => msg,
                    Err(_) => continue,
                },
                TargetProtocol::Remote => {
                    if self.links.lock()[config.index].state() != RemoteState::Connected {
                        continue;
                    }
                    build_remote_feedback(id, channel, value)
                }
                TargetProtocol::Disabled => continue,
            };
            self.limiter.enqueue(SendTarget::Target(config.index), msg);
        }
    }

    // ── Heartbeat / reconnect tick ──────────────────────────────────────

    pub async fn heartbeat_tick(&self, now: Instant) {
        let timeout = Duration::from_millis(CONNECTION_TIMEOUT_MS);
        for config in self.targets.all() {
            if config.protocol != TargetProtocol::Remote || !config.tx_active() {
                continue;
            }
            let (timed_out, seq) = {
                let mut links = self.links.lock();
                let link = &mut links[config.index];
                let timed_out = link.check_timeout(now, timeout);
                (timed_out, link.begin_ping(now))
            };
            if timed_out {
                warn!(target = config.index, "Remote heartbeat timed out");
                let _ = self
                    .events
                    .send(NetworkEvent::RemoteDisconnected {
                        target: config.index,
                    })
                    .await;
            }
            self.send_to_target(config.index, remote::ping(seq)).await;
        }
    }

    /// A freshly (re)connected Remote client has no session history, so
    /// push the complete picture: channel positions, channel parameters,
    /// stage configuration. Everything funnels through the limiter.
    fn resend_full_state(&self, target: usize) {
        const CHANNEL_PARAMS: [ParamId; 6] = [
            ParamId::InputGain,
            ParamId::InputMute,
            ParamId::Attenuation,
            ParamId::Doppler,
            ParamId::Spread,
            ParamId::ReverbSend,
        ];
        const CONFIG_PARAMS: [ParamId; 5] = [
            ParamId::MasterGain,
            ParamId::StageWidth,
            ParamId::StageDepth,
            ParamId::SpeakerSpacing,
            ParamId::ClusterCount,
        ];

        info!(target, "Resending full state to remote client");

        for channel in 0..NUM_INPUT_CHANNELS {
            let x = self.store.get(ParamId::PositionX, channel);
            let y = self.store.get(ParamId::PositionY, channel);
            self.limiter.enqueue(
                SendTarget::Target(target),
                remote::position_feedback(channel as i32, x, y),
            );
            for id in CHANNEL_PARAMS {
                let value = self.store.get(id, channel);
                self.limiter.enqueue(
                    SendTarget::Target(target),
                    remote::param_feedback(id.name(), channel as i32, value),
                );
            }
        }
        for id in CONFIG_PARAMS {
            let value = self.store.get(id, 0);
            self.limiter.enqueue(
                SendTarget::Target(target),
                remote::config_feedback(id.name(), value),
            );
        }
    }

    // ── Send helpers (bypass the limiter for control traffic) ───────────

    async fn send_to_target(&self, target: usize, msg: OscMessage) {
        let _ = self
            .out_tx
            .send(OutboundCmd::ToTarget { target, msg })
            .await;
    }

    async fn send_direct(&self, addr: SocketAddr, msg: OscMessage) {
        let _ = self.out_tx.send(OutboundCmd::ToAddr { addr, msg }).await;
    }
}

// ── Task loops ──────────────────────────────────────────────────────────

/// Consume decoded inbound packets from all transports.
pub async fn run_dispatch_loop(
    orchestrator: Arc<Orchestrator>,
    mut rx: mpsc::Receiver<Inbound>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            inbound = rx.recv() => {
                let Some(inbound) = inbound else { break };
                orchestrator.handle_inbound(inbound).await;
            }
        }
    }
}

/// Drive Remote heartbeats and timeout sweeps.
pub async fn run_heartbeat_loop(
    orchestrator: Arc<Orchestrator>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval =
        tokio::time::interval(Duration::from_millis(HEARTBEAT_INTERVAL_MS));
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            _ = interval.tick() => {
                orchestrator.heartbeat_tick(Instant::now()).await;
            }
        }
    }
}

fn build_remote_feedback(id: ParamId, channel: u16, value: f32) -> OscMessage {
    match id.scope() {
        Scope::Config => remote::config_feedback(id.name(), value),
        _ => remote::param_feedback(id.name(), channel as i32, value),
    }
}
