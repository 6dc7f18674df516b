mod store;

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use wfs_core::orchestrator::{
    self, CoreHandles, Orchestrator, OrchestratorConfig,
};
use wfs_core::ratelimit::{self, RateLimiter};
use wfs_core::tracking::{beacon_rx, pattern, AxisTransform, TrackingRouter};
use wfs_core::transport::outbound::{run_outbound, OutboundCtx};
use wfs_core::transport::{tcp, udp};
use wfs_core::{netlog::NetLog, NetStats, NetworkEvent, StatusTable, TargetConfig, TargetTable};
use wfs_protocol::{
    DEFAULT_BEACON_GROUP, DEFAULT_BEACON_PORT, DEFAULT_MAX_RATE_HZ, DEFAULT_TCP_PORT,
    DEFAULT_UDP_PORT, NUM_TARGETS,
};

use crate::store::MemoryStore;

#[derive(Parser, Debug)]
#[command(name = "wfs-netd", about = "WFS OSC networking daemon")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/wfsnetd.toml")]
    config: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetdConfig {
    pub unit: UnitSection,
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
    #[serde(default)]
    pub tracking: TrackingSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnitSection {
    pub name: String,
    #[serde(default)]
    pub remote_password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkSection {
    #[serde(default = "default_udp_port")]
    pub udp_port: u16,
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,
    #[serde(default)]
    pub ip_filter: bool,
    #[serde(default = "default_max_rate")]
    pub max_rate_hz: u32,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            udp_port: default_udp_port(),
            tcp_port: default_tcp_port(),
            ip_filter: false,
            max_rate_hz: default_max_rate(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackingSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_pattern")]
    pub pattern: String,
    #[serde(default = "default_tracking_port")]
    pub listen_port: u16,
    #[serde(default)]
    pub offset: [f32; 3],
    #[serde(default = "default_scale")]
    pub scale: [f32; 3],
    #[serde(default)]
    pub flip: [bool; 3],
    #[serde(default)]
    pub beacon: BeaconSection,
}

impl Default for TrackingSection {
    fn default() -> Self {
        Self {
            enabled: false,
            pattern: default_pattern(),
            listen_port: default_tracking_port(),
            offset: [0.0; 3],
            scale: default_scale(),
            flip: [false; 3],
            beacon: BeaconSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BeaconSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_beacon_group")]
    pub group: String,
    #[serde(default = "default_beacon_port")]
    pub port: u16,
}

impl Default for BeaconSection {
    fn default() -> Self {
        Self {
            enabled: false,
            group: default_beacon_group(),
            port: default_beacon_port(),
        }
    }
}

// Default value functions
fn default_udp_port() -> u16 { DEFAULT_UDP_PORT }
fn default_tcp_port() -> u16 { DEFAULT_TCP_PORT }
fn default_max_rate() -> u32 { DEFAULT_MAX_RATE_HZ }
fn default_pattern() -> String { "/trk <ID> <x> <y> <z>".to_string() }
fn default_tracking_port() -> u16 { 7000 }
fn default_scale() -> [f32; 3] { [1.0; 3] }
fn default_beacon_group() -> String { DEFAULT_BEACON_GROUP.to_string() }
fn default_beacon_port() -> u16 { DEFAULT_BEACON_PORT }

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config_str = tokio::fs::read_to_string(&args.config).await.map_err(|e| {
        error!("Failed to read config file {:?}: {}", args.config, e);
        e
    })?;

    let config: NetdConfig = toml::from_str(&config_str).map_err(|e| {
        error!("Failed to parse config: {}", e);
        e
    })?;

    info!(
        unit = %config.unit.name,
        udp_port = config.network.udp_port,
        tcp_port = config.network.tcp_port,
        targets = config.targets.len(),
        "WFS networking daemon starting"
    );

    // Target slots
    let targets = Arc::new(TargetTable::empty());
    for target in &config.targets {
        if target.index >= NUM_TARGETS {
            warn!(index = target.index, "Ignoring target with out-of-range slot");
            continue;
        }
        targets.replace(target.clone());
    }

    let statuses = Arc::new(StatusTable::new());
    let stats = Arc::new(NetStats::default());
    let log = Arc::new(NetLog::default());
    let store = Arc::new(MemoryStore::new());

    let limiter = Arc::new(RateLimiter::new(Arc::clone(&targets)));
    limiter.set_max_rate(config.network.max_rate_hz);

    // Channels between the stages
    let (inbound_tx, inbound_rx) = mpsc::channel(256);
    let (outbound_tx, outbound_rx) = mpsc::channel(1024);
    let (event_tx, mut event_rx) = mpsc::channel::<NetworkEvent>(256);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let orchestrator = Arc::new(Orchestrator::new(
        OrchestratorConfig {
            device_name: config.unit.name.clone(),
            remote_password: config.unit.remote_password.clone(),
            ip_filter: config.network.ip_filter,
        },
        CoreHandles {
            targets: Arc::clone(&targets),
            statuses: Arc::clone(&statuses),
            limiter: Arc::clone(&limiter),
            store: store.clone(),
            log: Arc::clone(&log),
            stats: Arc::clone(&stats),
        },
        event_tx.clone(),
        outbound_tx.clone(),
    ));

    let mut handles = Vec::new();

    // UDP receiver
    {
        let socket =
            UdpSocket::bind((Ipv4Addr::UNSPECIFIED, config.network.udp_port)).await?;
        let tx = inbound_tx.clone();
        let stats = Arc::clone(&stats);
        let shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = udp::run_udp_receiver(socket, tx, stats, shutdown).await {
                error!("UDP receiver error: {}", e);
            }
        }));
    }

    // TCP listener
    {
        let listener =
            TcpListener::bind((Ipv4Addr::UNSPECIFIED, config.network.tcp_port)).await?;
        let tx = inbound_tx.clone();
        let stats = Arc::clone(&stats);
        let shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = tcp::run_tcp_listener(listener, tx, stats, shutdown).await {
                error!("TCP listener error: {}", e);
            }
        }));
    }

    // Outbound sender
    {
        let ctx = OutboundCtx {
            targets: Arc::clone(&targets),
            statuses: Arc::clone(&statuses),
            stats: Arc::clone(&stats),
            log: Arc::clone(&log),
            events: event_tx.clone(),
        };
        let shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = run_outbound(outbound_rx, ctx, shutdown).await {
                error!("Outbound sender error: {}", e);
            }
        }));
    }

    // Rate limiter flush loop
    {
        let limiter = Arc::clone(&limiter);
        let out_tx = outbound_tx.clone();
        let shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            ratelimit::run_flush_loop(limiter, out_tx, shutdown).await;
        }));
    }

    // Inbound dispatch
    {
        let orchestrator = Arc::clone(&orchestrator);
        let shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            orchestrator::run_dispatch_loop(orchestrator, inbound_rx, shutdown).await;
        }));
    }

    // Remote heartbeats
    {
        let orchestrator = Arc::clone(&orchestrator);
        let shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            orchestrator::run_heartbeat_loop(orchestrator, shutdown).await;
        }));
    }

    // Tracking receivers: one router per protocol so each keeps its own
    // enable gate
    let transform = AxisTransform {
        offset: config.tracking.offset,
        scale: config.tracking.scale,
        flip: config.tracking.flip,
    };

    if config.tracking.enabled {
        let path_pattern =
            pattern::PathPattern::parse(&config.tracking.pattern).map_err(|e| {
                error!(template = %config.tracking.pattern, "Invalid tracking pattern: {}", e);
                anyhow::anyhow!(e)
            })?;
        let socket =
            UdpSocket::bind((Ipv4Addr::UNSPECIFIED, config.tracking.listen_port)).await?;
        let router = TrackingRouter::new(store.clone(), event_tx.clone(), transform, true);
        let stats = Arc::clone(&stats);
        let shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) =
                pattern::run_pattern_receiver(socket, path_pattern, router, stats, shutdown).await
            {
                error!("Tracking pattern receiver error: {}", e);
            }
        }));
    }

    if config.tracking.beacon.enabled {
        let group: Ipv4Addr = config.tracking.beacon.group.parse()?;
        let port = config.tracking.beacon.port;
        let router = TrackingRouter::new(store.clone(), event_tx.clone(), transform, true);
        let stats = Arc::clone(&stats);
        let shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = beacon_rx::run(group, port, router, stats, shutdown).await {
                error!("Beacon receiver error: {}", e);
            }
        }));
    }

    // Event drain: the GUI/DSP layers subscribe here in the full rig;
    // the daemon surfaces them in the log
    handles.push(tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                NetworkEvent::ConnectionStatus { target, status } => {
                    info!(target, ?status, "Connection status changed");
                }
                NetworkEvent::RemoteConnected { target, reconnect } => {
                    info!(target, reconnect, "Remote client connected");
                }
                NetworkEvent::RemoteDisconnected { target } => {
                    info!(target, "Remote client disconnected");
                }
                NetworkEvent::ChannelSelected { target, channel } => {
                    info!(target, channel, "Remote channel selected");
                }
                NetworkEvent::PositionUpdate { .. } | NetworkEvent::OrientationUpdate { .. } => {}
            }
        }
    }));

    orchestrator.init_statuses().await;

    info!("Daemon running");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    let _ = shutdown_tx.send(true);
    // Release the remaining event senders so the drain task sees the
    // channel close once the workers are gone
    drop(event_tx);
    drop(orchestrator);

    for handle in handles {
        if tokio::time::timeout(Duration::from_secs(1), handle).await.is_err() {
            warn!("A task did not stop within the shutdown window");
        }
    }

    let snapshot = stats.snapshot();
    info!(
        rx = snapshot.messages_rx,
        tx = snapshot.messages_tx,
        rejected = snapshot.rejected,
        "Final traffic counters"
    );

    Ok(())
}
