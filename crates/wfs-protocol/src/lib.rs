pub mod beacon;
pub mod codec;
pub mod remote;

/// Protocol version announced in /deviceFound replies
pub const PROTOCOL_VERSION: i32 = 1;

/// Number of configurable OSC target slots
pub const NUM_TARGETS: usize = 6;

/// Maximum concurrent inbound TCP clients
pub const MAX_TCP_CLIENTS: usize = 16;

/// Upper bound for a single length-prefixed TCP frame
pub const MAX_FRAME_LEN: usize = 65_536;

/// Default listen ports
pub const DEFAULT_UDP_PORT: u16 = 8000;
pub const DEFAULT_TCP_PORT: u16 = 8001;

/// Default tracking beacon multicast endpoint
pub const DEFAULT_BEACON_GROUP: &str = "236.10.10.10";
pub const DEFAULT_BEACON_PORT: u16 = 56565;

/// Outbound flush ceiling
pub const DEFAULT_MAX_RATE_HZ: u32 = 50;

/// Remote heartbeat timing
pub const HEARTBEAT_INTERVAL_MS: u64 = 2000;
pub const CONNECTION_TIMEOUT_MS: u64 = 6000;
