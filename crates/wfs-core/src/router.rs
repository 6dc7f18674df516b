//! Bidirectional mapping between OSC address patterns and typed
//! parameters, plus the REMOTE-protocol message grammar.
//!
//! The router never touches external state; it only classifies messages
//! into structured results the orchestrator applies. Numeric arguments
//! are accepted as int32 or float32 interchangeably, since DAW-class
//! peers disagree on which one to send.

use thiserror::Error;

use wfs_protocol::codec::{OscMessage, OscValue};
use wfs_protocol::remote;

use crate::params::{ParamId, Scope};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("unrecognized address")]
    Unrecognized,
    #[error("parameter has no mapping")]
    Unmapped,
}

/// A standard-namespace parameter write extracted from the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamUpdate {
    pub id: ParamId,
    pub channel: u16,
    pub value: f32,
}

/// Booleans arrive as T/F tags, ints or floats depending on the peer.
fn coerce_value(arg: &OscValue) -> Option<f32> {
    match arg {
        OscValue::Bool(true) => Some(1.0),
        OscValue::Bool(false) => Some(0.0),
        other => other.as_f32(),
    }
}

fn coerce_channel(arg: &OscValue) -> Option<u16> {
    let raw = arg.as_i32()?;
    u16::try_from(raw).ok()
}

// ── Standard namespace: /wfs/... ────────────────────────────────────────

pub fn parse_input(msg: &OscMessage) -> Result<ParamUpdate, RouteError> {
    let rest = msg.addr.strip_prefix("/wfs/").ok_or(RouteError::Unrecognized)?;
    let mut segments = rest.split('/');
    let first = segments.next().ok_or(RouteError::Unrecognized)?;

    match segments.next() {
        // /wfs/<scope>/<name> <ch> <value>
        Some(name) => {
            if segments.next().is_some() {
                return Err(RouteError::Unrecognized);
            }
            let scope = Scope::from_segment(first).ok_or(RouteError::Unrecognized)?;
            let id = ParamId::from_wire(scope, name).ok_or(RouteError::Unmapped)?;
            let channel = msg
                .args
                .first()
                .and_then(coerce_channel)
                .ok_or(RouteError::Unrecognized)?;
            if channel >= scope.channels() {
                return Err(RouteError::Unrecognized);
            }
            let value = msg
                .args
                .get(1)
                .and_then(coerce_value)
                .ok_or(RouteError::Unrecognized)?;
            Ok(ParamUpdate { id, channel, value })
        }
        // /wfs/<name> <value>
        None => {
            let id = ParamId::from_wire(Scope::Config, first).ok_or(RouteError::Unmapped)?;
            let value = msg
                .args
                .first()
                .and_then(coerce_value)
                .ok_or(RouteError::Unrecognized)?;
            Ok(ParamUpdate {
                id,
                channel: 0,
                value,
            })
        }
    }
}

pub fn build_output(id: ParamId, channel: u16, value: f32) -> OscMessage {
    let scope = id.scope();
    if id.channelled() {
        OscMessage::new(
            format!("/wfs/{}/{}", scope.segment(), id.name()),
            vec![OscValue::Int(channel as i32), OscValue::Float(value)],
        )
    } else {
        OscMessage::new(
            format!("/wfs/{}", id.name()),
            vec![OscValue::Float(value)],
        )
    }
}

// ── REMOTE namespace: /remoteInput/... ──────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub fn param(self) -> ParamId {
        match self {
            Axis::X => ParamId::PositionX,
            Axis::Y => ParamId::PositionY,
            Axis::Z => ParamId::PositionZ,
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "x" => Some(Axis::X),
            "y" => Some(Axis::Y),
            "z" => Some(Axis::Z),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RemoteInput {
    Ping { seq: i32 },
    Pong { seq: i32 },
    SelectChannel { channel: u16 },
    PositionXY { x: f32, y: f32 },
    PositionDelta { axis: Axis, direction: i32 },
    ParamSet { name: String, value: f32 },
    ParamDelta { name: String, delta: f32 },
    Disconnect,
}

pub fn parse_remote_input(msg: &OscMessage) -> Result<RemoteInput, RouteError> {
    match msg.addr.as_str() {
        remote::ADDR_IN_PING => {
            let seq = msg
                .args
                .first()
                .and_then(OscValue::as_i32)
                .ok_or(RouteError::Unrecognized)?;
            Ok(RemoteInput::Ping { seq })
        }
        remote::ADDR_IN_PONG => {
            let seq = msg
                .args
                .first()
                .and_then(OscValue::as_i32)
                .ok_or(RouteError::Unrecognized)?;
            Ok(RemoteInput::Pong { seq })
        }
        remote::ADDR_IN_CHANNEL => {
            let channel = msg
                .args
                .first()
                .and_then(coerce_channel)
                .ok_or(RouteError::Unrecognized)?;
            Ok(RemoteInput::SelectChannel { channel })
        }
        remote::ADDR_IN_POSITION => {
            let x = msg
                .args
                .first()
                .and_then(coerce_value)
                .ok_or(RouteError::Unrecognized)?;
            let y = msg
                .args
                .get(1)
                .and_then(coerce_value)
                .ok_or(RouteError::Unrecognized)?;
            Ok(RemoteInput::PositionXY { x, y })
        }
        remote::ADDR_IN_DELTA => {
            let axis = msg
                .args
                .first()
                .and_then(OscValue::as_str)
                .and_then(Axis::from_str)
                .ok_or(RouteError::Unrecognized)?;
            let direction = msg
                .args
                .get(1)
                .and_then(OscValue::as_i32)
                .ok_or(RouteError::Unrecognized)?;
            Ok(RemoteInput::PositionDelta { axis, direction })
        }
        remote::ADDR_IN_PARAM => {
            let name = msg
                .args
                .first()
                .and_then(OscValue::as_str)
                .ok_or(RouteError::Unrecognized)?
                .to_string();
            let value = msg
                .args
                .get(1)
                .and_then(coerce_value)
                .ok_or(RouteError::Unrecognized)?;
            Ok(RemoteInput::ParamSet { name, value })
        }
        remote::ADDR_IN_PARAM_DELTA => {
            let name = msg
                .args
                .first()
                .and_then(OscValue::as_str)
                .ok_or(RouteError::Unrecognized)?
                .to_string();
            let delta = msg
                .args
                .get(1)
                .and_then(coerce_value)
                .ok_or(RouteError::Unrecognized)?;
            Ok(RemoteInput::ParamDelta { name, delta })
        }
        remote::ADDR_IN_DISCONNECT => Ok(RemoteInput::Disconnect),
        _ => Err(RouteError::Unrecognized),
    }
}

// ── ADM-OSC subset: /adm/obj/<n>/... ────────────────────────────────────

/// Object position and gain, the subset rendering consoles actually send.
pub fn parse_adm_input(msg: &OscMessage) -> Result<Vec<ParamUpdate>, RouteError> {
    let rest = msg.addr.strip_prefix("/adm/obj/").ok_or(RouteError::Unrecognized)?;
    let (obj, leaf) = rest.split_once('/').ok_or(RouteError::Unrecognized)?;
    let channel: u16 = obj.parse().map_err(|_| RouteError::Unrecognized)?;

    let one = |id: ParamId| -> Result<Vec<ParamUpdate>, RouteError> {
        let value = msg
            .args
            .first()
            .and_then(coerce_value)
            .ok_or(RouteError::Unrecognized)?;
        Ok(vec![ParamUpdate { id, channel, value }])
    };

    match leaf {
        "x" => one(ParamId::PositionX),
        "y" => one(ParamId::PositionY),
        "z" => one(ParamId::PositionZ),
        "gain" => one(ParamId::InputGain),
        "xyz" => {
            let mut updates = Vec::with_capacity(3);
            for (pos, id) in [ParamId::PositionX, ParamId::PositionY, ParamId::PositionZ]
                .into_iter()
                .enumerate()
            {
                let value = msg
                    .args
                    .get(pos)
                    .and_then(coerce_value)
                    .ok_or(RouteError::Unrecognized)?;
                updates.push(ParamUpdate { id, channel, value });
            }
            Ok(updates)
        }
        _ => Err(RouteError::Unmapped),
    }
}

pub fn build_adm_output(id: ParamId, channel: u16, value: f32) -> Result<OscMessage, RouteError> {
    let leaf = match id {
        ParamId::PositionX => "x",
        ParamId::PositionY => "y",
        ParamId::PositionZ => "z",
        ParamId::InputGain => "gain",
        _ => return Err(RouteError::Unmapped),
    };
    Ok(OscMessage::new(
        format!("/adm/obj/{channel}/{leaf}"),
        vec![OscValue::Float(value)],
    ))
}
