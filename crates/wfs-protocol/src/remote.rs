//! REMOTE-protocol address surface and control message builders.
//!
//! Companion clients speak two disjoint address families: `/remoteInput/*`
//! (client → unit) and `/remoteOutput/*` (unit → client), plus the
//! discovery pair `/findDevice` / `/deviceFound`. Heartbeat control
//! messages carry a single int32 sequence number.

use crate::codec::{OscMessage, OscValue};
use crate::PROTOCOL_VERSION;

// ── Address constants ───────────────────────────────────────────────────

pub const REMOTE_INPUT_PREFIX: &str = "/remoteInput/";
pub const REMOTE_OUTPUT_PREFIX: &str = "/remoteOutput/";

pub const ADDR_FIND_DEVICE: &str = "/findDevice";
pub const ADDR_DEVICE_FOUND: &str = "/deviceFound";

pub const ADDR_IN_PING: &str = "/remoteInput/ping";
pub const ADDR_IN_PONG: &str = "/remoteInput/pong";
pub const ADDR_IN_CHANNEL: &str = "/remoteInput/channel";
pub const ADDR_IN_POSITION: &str = "/remoteInput/position";
pub const ADDR_IN_DELTA: &str = "/remoteInput/delta";
pub const ADDR_IN_PARAM: &str = "/remoteInput/param";
pub const ADDR_IN_PARAM_DELTA: &str = "/remoteInput/paramDelta";
pub const ADDR_IN_DISCONNECT: &str = "/remoteInput/disconnect";

pub const ADDR_OUT_PING: &str = "/remoteOutput/ping";
pub const ADDR_OUT_PONG: &str = "/remoteOutput/pong";
pub const ADDR_OUT_CHANNEL: &str = "/remoteOutput/channel";
pub const ADDR_OUT_POSITION: &str = "/remoteOutput/position";
/// Per-parameter feedback lives under these prefixes with the wire name
/// as the final segment, so the rate limiter coalesces each parameter
/// (and channel) independently.
pub const ADDR_OUT_PARAM_PREFIX: &str = "/remoteOutput/param/";
pub const ADDR_OUT_CONFIG_PREFIX: &str = "/remoteOutput/config/";

/// Position nudge applied per `/remoteInput/delta` step, in meters
pub const NUDGE_STEP: f32 = 0.1;

// ── Builders ────────────────────────────────────────────────────────────

pub fn ping(seq: i32) -> OscMessage {
    OscMessage::new(ADDR_OUT_PING, vec![OscValue::Int(seq)])
}

pub fn pong(seq: i32) -> OscMessage {
    OscMessage::new(ADDR_OUT_PONG, vec![OscValue::Int(seq)])
}

pub fn device_found(device_name: &str) -> OscMessage {
    OscMessage::new(
        ADDR_DEVICE_FOUND,
        vec![
            OscValue::Str(device_name.to_string()),
            OscValue::Int(PROTOCOL_VERSION),
        ],
    )
}

pub fn channel_feedback(channel: i32) -> OscMessage {
    OscMessage::new(ADDR_OUT_CHANNEL, vec![OscValue::Int(channel)])
}

pub fn position_feedback(channel: i32, x: f32, y: f32) -> OscMessage {
    OscMessage::new(
        ADDR_OUT_POSITION,
        vec![OscValue::Int(channel), OscValue::Float(x), OscValue::Float(y)],
    )
}

pub fn param_feedback(name: &str, channel: i32, value: f32) -> OscMessage {
    OscMessage::new(
        format!("{ADDR_OUT_PARAM_PREFIX}{name}"),
        vec![OscValue::Int(channel), OscValue::Float(value)],
    )
}

pub fn config_feedback(name: &str, value: f32) -> OscMessage {
    OscMessage::new(
        format!("{ADDR_OUT_CONFIG_PREFIX}{name}"),
        vec![OscValue::Float(value)],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_message, encode_message};

    #[test]
    fn test_ping_pong_carry_sequence() {
        let bytes = encode_message(&ping(41));
        let decoded = decode_message(&bytes).unwrap();
        assert_eq!(decoded.addr, ADDR_OUT_PING);
        assert_eq!(decoded.args, vec![OscValue::Int(41)]);

        let bytes = encode_message(&pong(41));
        let decoded = decode_message(&bytes).unwrap();
        assert_eq!(decoded.addr, ADDR_OUT_PONG);
    }

    #[test]
    fn test_device_found_reply() {
        let msg = device_found("WFS Unit A");
        assert_eq!(msg.args[0], OscValue::Str("WFS Unit A".to_string()));
        assert_eq!(msg.args[1], OscValue::Int(PROTOCOL_VERSION));
    }
}
