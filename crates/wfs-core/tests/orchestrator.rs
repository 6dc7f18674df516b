//! Orchestrator behavior tests: handshake, dispatch, loop prevention,
//! IP filtering and full-state resend, driven entirely through channels.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use wfs_core::netlog::{Direction, NetLog};
use wfs_core::orchestrator::remote_link::RemoteState;
use wfs_core::orchestrator::{CoreHandles, Orchestrator, OrchestratorConfig};
use wfs_core::params::{ParamId, ParameterStore};
use wfs_core::ratelimit::RateLimiter;
use wfs_core::transport::{Inbound, OutboundCmd};
use wfs_core::{
    NetStats, NetworkEvent, StatusTable, TargetConfig, TargetProtocol, TargetTable, Transport,
    TransportKind,
};
use wfs_protocol::codec::{OscMessage, OscPacket, OscValue};
use wfs_protocol::remote;

struct TestStore {
    values: Mutex<HashMap<(ParamId, u16), f32>>,
}

impl TestStore {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            values: Mutex::new(HashMap::new()),
        })
    }
}

impl ParameterStore for TestStore {
    fn get(&self, id: ParamId, channel: u16) -> f32 {
        *self
            .values
            .lock()
            .get(&(id, channel))
            .unwrap_or(&id.default_value())
    }

    fn set(&self, id: ParamId, channel: u16, value: f32) {
        self.values.lock().insert((id, channel), value);
    }
}

struct Rig {
    orchestrator: Arc<Orchestrator>,
    store: Arc<TestStore>,
    limiter: Arc<RateLimiter>,
    stats: Arc<NetStats>,
    log: Arc<NetLog>,
    out_rx: mpsc::Receiver<OutboundCmd>,
    event_rx: mpsc::Receiver<NetworkEvent>,
}

fn target(index: usize, last_octet: u8, protocol: TargetProtocol) -> TargetConfig {
    TargetConfig {
        index,
        transport: Transport::Udp,
        ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, last_octet)),
        port: 9000 + index as u16,
        rx: true,
        tx: true,
        protocol,
    }
}

fn rig(targets: Vec<TargetConfig>, ip_filter: bool) -> Rig {
    let table = TargetTable::empty();
    for t in targets {
        table.replace(t);
    }
    let targets = Arc::new(table);
    let statuses = Arc::new(StatusTable::new());
    let limiter = Arc::new(RateLimiter::new(Arc::clone(&targets)));
    let store = TestStore::new();
    let log = Arc::new(NetLog::default());
    let stats = Arc::new(NetStats::default());

    let (out_tx, out_rx) = mpsc::channel(2048);
    let (event_tx, event_rx) = mpsc::channel(2048);

    let orchestrator = Arc::new(Orchestrator::new(
        OrchestratorConfig {
            device_name: "WFS Unit Test".to_string(),
            remote_password: "wfs".to_string(),
            ip_filter,
        },
        CoreHandles {
            targets,
            statuses,
            limiter: Arc::clone(&limiter),
            store: store.clone(),
            log: Arc::clone(&log),
            stats: Arc::clone(&stats),
        },
        event_tx,
        out_tx,
    ));

    Rig {
        orchestrator,
        store,
        limiter,
        stats,
        log,
        out_rx,
        event_rx,
    }
}

fn inbound_from(ip: [u8; 4], msg: OscMessage) -> Inbound {
    Inbound {
        packet: OscPacket::Message(msg),
        peer: SocketAddr::new(IpAddr::V4(Ipv4Addr::from(ip)), 5000),
        transport: TransportKind::Udp,
    }
}

/// Pull the sequence number out of the next outbound ping for `target`.
async fn next_ping_seq(out_rx: &mut mpsc::Receiver<OutboundCmd>, target: usize) -> i32 {
    loop {
        match tokio::time::timeout(Duration::from_secs(1), out_rx.recv())
            .await
            .expect("timed out waiting for ping")
            .expect("outbound channel closed")
        {
            OutboundCmd::ToTarget { target: t, msg }
                if t == target && msg.addr == remote::ADDR_OUT_PING =>
            {
                return msg.args[0].as_i32().expect("ping without sequence");
            }
            _ => {}
        }
    }
}

fn drain_events(rx: &mut mpsc::Receiver<NetworkEvent>) -> Vec<NetworkEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// ---------------------------------------------------------------------------
// 1. Standard namespace dispatch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn wfs_message_updates_store_and_propagates_cross_protocol() {
    let mut r = rig(
        vec![
            target(0, 1, TargetProtocol::Osc),
            target(1, 2, TargetProtocol::AdmOsc),
        ],
        false,
    );

    let msg = OscMessage::new(
        "/wfs/input/positionX",
        vec![OscValue::Int(3), OscValue::Float(2.0)],
    );
    r.orchestrator.handle_inbound(inbound_from([10, 0, 0, 1], msg)).await;

    assert_eq!(r.store.get(ParamId::PositionX, 3), 2.0);
    assert_eq!(r.stats.messages_rx.load(Ordering::Relaxed), 1);

    // Same-protocol target (the OSC peer family) is suppressed; the ADM
    // target still gets the update
    assert_eq!(r.limiter.pending_count(0), 0);
    assert_eq!(r.limiter.pending_count(1), 1);

    let events = drain_events(&mut r.event_rx);
    assert!(events.iter().any(|e| matches!(
        e,
        NetworkEvent::PositionUpdate {
            channel: 3,
            x: Some(x),
            ..
        } if *x == 2.0
    )));
}

#[tokio::test]
async fn host_change_fans_out_everywhere() {
    let mut r = rig(
        vec![
            target(0, 1, TargetProtocol::Osc),
            target(1, 2, TargetProtocol::AdmOsc),
        ],
        false,
    );

    r.orchestrator
        .handle_param_change(ParamId::PositionY, 5, -1.5)
        .await;

    assert_eq!(r.limiter.pending_count(0), 1);
    assert_eq!(r.limiter.pending_count(1), 1);
    assert_eq!(r.store.get(ParamId::PositionY, 5), -1.5);
    let _ = drain_events(&mut r.event_rx);
}

#[tokio::test]
async fn unrecognized_addresses_are_counted_not_fatal() {
    let mut r = rig(vec![target(0, 1, TargetProtocol::Osc)], false);

    r.orchestrator
        .handle_inbound(inbound_from(
            [10, 0, 0, 1],
            OscMessage::new("/nonsense/path", vec![OscValue::Int(1)]),
        ))
        .await;

    assert_eq!(r.stats.unrecognized.load(Ordering::Relaxed), 1);

    // The next valid message still goes through
    r.orchestrator
        .handle_inbound(inbound_from(
            [10, 0, 0, 1],
            OscMessage::new("/wfs/masterGain", vec![OscValue::Float(-3.0)]),
        ))
        .await;
    assert_eq!(r.store.get(ParamId::MasterGain, 0), -3.0);
    let _ = drain_events(&mut r.event_rx);
}

// ---------------------------------------------------------------------------
// 2. IP filtering
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unlisted_peer_is_rejected_when_filter_on() {
    let mut r = rig(vec![target(0, 1, TargetProtocol::Osc)], true);

    let msg = OscMessage::new(
        "/wfs/input/gain",
        vec![OscValue::Int(0), OscValue::Float(6.0)],
    );
    r.orchestrator
        .handle_inbound(inbound_from([192, 168, 1, 99], msg.clone()))
        .await;

    assert_eq!(r.stats.rejected.load(Ordering::Relaxed), 1);
    assert_eq!(r.store.get(ParamId::InputGain, 0), 0.0);
    let entries = r.log.snapshot();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].direction, Direction::Rejected);

    // The listed peer passes the same filter
    r.orchestrator
        .handle_inbound(inbound_from([10, 0, 0, 1], msg))
        .await;
    assert_eq!(r.store.get(ParamId::InputGain, 0), 6.0);
    let _ = drain_events(&mut r.event_rx);
}

// ---------------------------------------------------------------------------
// 3. Remote handshake and heartbeat
// ---------------------------------------------------------------------------

#[tokio::test]
async fn handshake_connects_on_matching_pong_only() {
    let mut r = rig(vec![target(2, 7, TargetProtocol::Remote)], false);
    let now = Instant::now();

    r.orchestrator.heartbeat_tick(now).await;
    assert_eq!(r.orchestrator.remote_state(2), RemoteState::Connecting);
    let seq = next_ping_seq(&mut r.out_rx, 2).await;

    // A stale sequence is ignored
    r.orchestrator
        .handle_inbound(inbound_from(
            [10, 0, 0, 7],
            OscMessage::new(remote::ADDR_IN_PONG, vec![OscValue::Int(seq + 5)]),
        ))
        .await;
    assert_eq!(r.orchestrator.remote_state(2), RemoteState::Connecting);

    // The matching one completes the handshake
    r.orchestrator
        .handle_inbound(inbound_from(
            [10, 0, 0, 7],
            OscMessage::new(remote::ADDR_IN_PONG, vec![OscValue::Int(seq)]),
        ))
        .await;
    assert_eq!(r.orchestrator.remote_state(2), RemoteState::Connected);

    let events = drain_events(&mut r.event_rx);
    assert!(events.contains(&NetworkEvent::RemoteConnected {
        target: 2,
        reconnect: false,
    }));

    // Connecting queued the full state snapshot for this target
    assert!(r.limiter.pending_count(2) > 0);
}

#[tokio::test]
async fn heartbeat_timeout_disconnects_once() {
    let mut r = rig(vec![target(0, 7, TargetProtocol::Remote)], false);
    let t0 = Instant::now();

    r.orchestrator.heartbeat_tick(t0).await;
    let seq = next_ping_seq(&mut r.out_rx, 0).await;
    r.orchestrator
        .handle_inbound(inbound_from(
            [10, 0, 0, 7],
            OscMessage::new(remote::ADDR_IN_PONG, vec![OscValue::Int(seq)]),
        ))
        .await;
    assert_eq!(r.orchestrator.remote_state(0), RemoteState::Connected);
    let _ = drain_events(&mut r.event_rx);

    // Silence past the 6 s window
    r.orchestrator
        .heartbeat_tick(t0 + Duration::from_millis(6500))
        .await;
    let events = drain_events(&mut r.event_rx);
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, NetworkEvent::RemoteDisconnected { target: 0 }))
            .count(),
        1
    );

    // Further silent ticks never refire the disconnect
    r.orchestrator
        .heartbeat_tick(t0 + Duration::from_millis(9000))
        .await;
    assert!(drain_events(&mut r.event_rx).is_empty());
}

#[tokio::test]
async fn reconnect_resends_state_with_flag() {
    let mut r = rig(vec![target(0, 7, TargetProtocol::Remote)], false);
    let t0 = Instant::now();

    // First connect
    r.orchestrator.heartbeat_tick(t0).await;
    let seq = next_ping_seq(&mut r.out_rx, 0).await;
    r.orchestrator
        .handle_inbound(inbound_from(
            [10, 0, 0, 7],
            OscMessage::new(remote::ADDR_IN_PONG, vec![OscValue::Int(seq)]),
        ))
        .await;
    let _ = r.limiter.flush_all(Instant::now());
    let _ = drain_events(&mut r.event_rx);

    // Drop and reconnect
    r.orchestrator
        .heartbeat_tick(t0 + Duration::from_millis(7000))
        .await;
    let seq = next_ping_seq(&mut r.out_rx, 0).await;
    r.orchestrator
        .handle_inbound(inbound_from(
            [10, 0, 0, 7],
            OscMessage::new(remote::ADDR_IN_PONG, vec![OscValue::Int(seq)]),
        ))
        .await;

    let events = drain_events(&mut r.event_rx);
    assert!(events.contains(&NetworkEvent::RemoteConnected {
        target: 0,
        reconnect: true,
    }));
    assert!(r.limiter.pending_count(0) > 0);
}

#[tokio::test]
async fn inbound_ping_is_answered_with_pong() {
    let mut r = rig(vec![target(1, 7, TargetProtocol::Remote)], false);

    r.orchestrator
        .handle_inbound(inbound_from(
            [10, 0, 0, 7],
            OscMessage::new(remote::ADDR_IN_PING, vec![OscValue::Int(33)]),
        ))
        .await;

    let cmd = tokio::time::timeout(Duration::from_secs(1), r.out_rx.recv())
        .await
        .unwrap()
        .unwrap();
    match cmd {
        OutboundCmd::ToTarget { target, msg } => {
            assert_eq!(target, 1);
            assert_eq!(msg.addr, remote::ADDR_OUT_PONG);
            assert_eq!(msg.args[0], OscValue::Int(33));
        }
        OutboundCmd::ToAddr { .. } => panic!("pong must route through the target slot"),
    }
}

// ---------------------------------------------------------------------------
// 4. Remote control surface
// ---------------------------------------------------------------------------

#[tokio::test]
async fn remote_channel_select_and_position() {
    let mut r = rig(vec![target(0, 7, TargetProtocol::Remote)], false);
    let from = [10, 0, 0, 7];

    r.orchestrator
        .handle_inbound(inbound_from(
            from,
            OscMessage::new(remote::ADDR_IN_CHANNEL, vec![OscValue::Int(4)]),
        ))
        .await;

    let events = drain_events(&mut r.event_rx);
    assert!(events.contains(&NetworkEvent::ChannelSelected {
        target: 0,
        channel: 4,
    }));

    r.orchestrator
        .handle_inbound(inbound_from(
            from,
            OscMessage::new(
                remote::ADDR_IN_POSITION,
                vec![OscValue::Float(1.5), OscValue::Float(-2.5)],
            ),
        ))
        .await;

    assert_eq!(r.store.get(ParamId::PositionX, 4), 1.5);
    assert_eq!(r.store.get(ParamId::PositionY, 4), -2.5);
}

#[tokio::test]
async fn remote_delta_nudges_selected_channel() {
    let mut r = rig(vec![target(0, 7, TargetProtocol::Remote)], false);
    let from = [10, 0, 0, 7];

    r.store.set(ParamId::PositionZ, 0, 1.0);
    r.orchestrator
        .handle_inbound(inbound_from(
            from,
            OscMessage::new(
                remote::ADDR_IN_DELTA,
                vec![OscValue::Str("z".into()), OscValue::Int(-1)],
            ),
        ))
        .await;

    let expected = 1.0 - remote::NUDGE_STEP;
    assert!((r.store.get(ParamId::PositionZ, 0) - expected).abs() < 1e-6);
    let _ = drain_events(&mut r.event_rx);
}

#[tokio::test]
async fn find_device_replies_to_sender_with_password_check() {
    let mut r = rig(vec![target(0, 1, TargetProtocol::Osc)], false);
    let peer = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(172, 16, 0, 42)), 6010);

    // Wrong password: no reply
    r.orchestrator
        .handle_inbound(Inbound {
            packet: OscPacket::Message(OscMessage::new(
                remote::ADDR_FIND_DEVICE,
                vec![OscValue::Str("nope".into())],
            )),
            peer,
            transport: TransportKind::Udp,
        })
        .await;
    assert!(r.out_rx.try_recv().is_err());

    // Right password: unicast reply straight to the sender
    r.orchestrator
        .handle_inbound(Inbound {
            packet: OscPacket::Message(OscMessage::new(
                remote::ADDR_FIND_DEVICE,
                vec![OscValue::Str("wfs".into())],
            )),
            peer,
            transport: TransportKind::Udp,
        })
        .await;

    let cmd = tokio::time::timeout(Duration::from_secs(1), r.out_rx.recv())
        .await
        .unwrap()
        .unwrap();
    match cmd {
        OutboundCmd::ToAddr { addr, msg } => {
            assert_eq!(addr, peer);
            assert_eq!(msg.addr, remote::ADDR_DEVICE_FOUND);
            assert_eq!(msg.args[0], OscValue::Str("WFS Unit Test".into()));
        }
        OutboundCmd::ToTarget { .. } => panic!("discovery reply must go to the sender"),
    }
}

// ---------------------------------------------------------------------------
// 5. Bundles and coalescing through the whole inbound path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn bundle_messages_dispatch_in_order() {
    let mut r = rig(vec![target(0, 1, TargetProtocol::Osc)], false);

    let bundle = wfs_protocol::codec::OscBundle {
        time_tag: 0,
        content: vec![
            OscPacket::Message(OscMessage::new(
                "/wfs/input/gain",
                vec![OscValue::Int(0), OscValue::Float(1.0)],
            )),
            OscPacket::Message(OscMessage::new(
                "/wfs/input/gain",
                vec![OscValue::Int(0), OscValue::Float(2.0)],
            )),
        ],
    };
    r.orchestrator
        .handle_inbound(Inbound {
            packet: OscPacket::Bundle(bundle),
            peer: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 5000),
            transport: TransportKind::Udp,
        })
        .await;

    // Last message in the bundle wins
    assert_eq!(r.store.get(ParamId::InputGain, 0), 2.0);
    assert_eq!(r.stats.messages_rx.load(Ordering::Relaxed), 2);
    let _ = drain_events(&mut r.event_rx);
}

#[tokio::test]
async fn rapid_updates_coalesce_for_slow_targets() {
    let mut r = rig(
        vec![
            target(0, 1, TargetProtocol::Osc),
            target(1, 2, TargetProtocol::AdmOsc),
        ],
        false,
    );

    for i in 0..20 {
        r.orchestrator
            .handle_param_change(ParamId::PositionX, 3, i as f32)
            .await;
    }

    // One pending message per target, carrying the newest value
    assert_eq!(r.limiter.pending_count(0), 1);
    let batches = r.limiter.flush_all(Instant::now());
    for (_, batch) in batches {
        assert_eq!(batch.len(), 1);
        let update_value = match batch[0].args.last() {
            Some(OscValue::Float(v)) => *v,
            other => panic!("unexpected arg {other:?}"),
        };
        assert_eq!(update_value, 19.0);
    }
    assert_eq!(r.limiter.stats.coalesced.load(Ordering::Relaxed), 38);
    let _ = drain_events(&mut r.event_rx);
}
