//! Placeholder-pattern OSC tracking receiver.
//!
//! Users describe their tracker's wire format as a template string like
//! `/trk <ID> <x> <y> <z>`: an exact address followed by up to four
//! placeholders naming which argument position carries what. Any subset
//! of placeholders in any order is allowed; axes without a slot simply
//! never update.

use std::sync::Arc;

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, error, info};

use wfs_protocol::codec::{decode_packet, OscMessage, OscPacket};
use wfs_protocol::MAX_FRAME_LEN;

use crate::tracking::{TrackingRouter, TrackingUpdate};
use crate::NetStats;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("template must start with an OSC address")]
    MissingAddress,
    #[error("unknown placeholder `{0}`")]
    UnknownPlaceholder(String),
    #[error("duplicate placeholder `{0}`")]
    DuplicatePlaceholder(String),
}

/// A compiled tracking template. Owns no mutable state after parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    addr: String,
    id_slot: Option<usize>,
    x_slot: Option<usize>,
    y_slot: Option<usize>,
    z_slot: Option<usize>,
}

impl PathPattern {
    pub fn parse(template: &str) -> Result<Self, PatternError> {
        let mut tokens = template.split_whitespace();
        let addr = tokens
            .next()
            .filter(|t| t.starts_with('/'))
            .ok_or(PatternError::MissingAddress)?
            .to_string();

        let mut pattern = Self {
            addr,
            id_slot: None,
            x_slot: None,
            y_slot: None,
            z_slot: None,
        };

        for (position, token) in tokens.enumerate() {
            let slot = match token {
                "<ID>" => &mut pattern.id_slot,
                "<x>" => &mut pattern.x_slot,
                "<y>" => &mut pattern.y_slot,
                "<z>" => &mut pattern.z_slot,
                other => return Err(PatternError::UnknownPlaceholder(other.to_string())),
            };
            if slot.is_some() {
                return Err(PatternError::DuplicatePlaceholder(token.to_string()));
            }
            *slot = Some(position);
        }

        Ok(pattern)
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Exact address match, then positional extraction. A message whose
    /// address differs, or whose ID slot is missing/non-numeric, is not
    /// a tracker sample.
    pub fn matches(&self, msg: &OscMessage) -> Option<TrackingUpdate> {
        if msg.addr != self.addr {
            return None;
        }

        // Without an <ID> slot every sample belongs to tracker 0
        let tracking_id = match self.id_slot {
            Some(slot) => msg.args.get(slot)?.as_i32()?,
            None => 0,
        };

        let axis = |slot: Option<usize>| {
            slot.and_then(|s| msg.args.get(s)).and_then(|v| v.as_f32())
        };

        Some(TrackingUpdate {
            tracking_id,
            x: axis(self.x_slot),
            y: axis(self.y_slot),
            z: axis(self.z_slot),
        })
    }
}

/// UDP receive loop for pattern-matched tracking traffic.
pub async fn run_pattern_receiver(
    socket: UdpSocket,
    pattern: PathPattern,
    router: Arc<TrackingRouter>,
    stats: Arc<NetStats>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let local = socket.local_addr()?;
    info!(addr = %local, pattern = %pattern.addr, "Tracking pattern receiver listening");

    let mut buf = vec![0u8; MAX_FRAME_LEN];

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((len, peer)) => match decode_packet(&buf[..len]) {
                        Ok(packet) => route_packet(packet, &pattern, &router).await,
                        Err(e) => {
                            stats.decode_errors.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                            debug!(from = %peer, error = %e, "Dropping undecodable tracking datagram");
                        }
                    },
                    Err(e) => {
                        error!(addr = %local, "Tracking receive error: {}", e);
                        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    }
                }
            }
        }
    }

    info!(addr = %local, "Tracking pattern receiver stopped");
    Ok(())
}

fn route_packet<'a>(
    packet: OscPacket,
    pattern: &'a PathPattern,
    router: &'a TrackingRouter,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
    Box::pin(async move {
        match packet {
            OscPacket::Message(msg) => {
                if let Some(update) = pattern.matches(&msg) {
                    router.route(update).await;
                }
            }
            OscPacket::Bundle(bundle) => {
                for element in bundle.content {
                    route_packet(element, pattern, router).await;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wfs_protocol::codec::OscValue;

    #[test]
    fn test_parse_full_template() {
        let pattern = PathPattern::parse("/trk <ID> <x> <y> <z>").unwrap();
        assert_eq!(pattern.addr(), "/trk");

        let msg = OscMessage::new(
            "/trk",
            vec![
                OscValue::Int(3),
                OscValue::Float(1.0),
                OscValue::Float(2.0),
                OscValue::Float(3.0),
            ],
        );
        assert_eq!(
            pattern.matches(&msg),
            Some(TrackingUpdate {
                tracking_id: 3,
                x: Some(1.0),
                y: Some(2.0),
                z: Some(3.0),
            })
        );
    }

    #[test]
    fn test_reordered_subset_template() {
        let pattern = PathPattern::parse("/rig/pos <y> <ID> <x>").unwrap();
        let msg = OscMessage::new(
            "/rig/pos",
            vec![OscValue::Float(7.0), OscValue::Int(12), OscValue::Float(4.0)],
        );
        assert_eq!(
            pattern.matches(&msg),
            Some(TrackingUpdate {
                tracking_id: 12,
                x: Some(4.0),
                y: Some(7.0),
                z: None,
            })
        );
    }

    #[test]
    fn test_missing_axis_stays_absent() {
        // Template declares <z> but the message is short
        let pattern = PathPattern::parse("/trk <ID> <x> <z>").unwrap();
        let msg = OscMessage::new("/trk", vec![OscValue::Int(1), OscValue::Float(5.0)]);
        let update = pattern.matches(&msg).unwrap();
        assert_eq!(update.x, Some(5.0));
        assert_eq!(update.z, None);
    }

    #[test]
    fn test_address_must_match_exactly() {
        let pattern = PathPattern::parse("/trk <ID> <x>").unwrap();
        let msg = OscMessage::new("/trk/sub", vec![OscValue::Int(1), OscValue::Float(1.0)]);
        assert_eq!(pattern.matches(&msg), None);
    }

    #[test]
    fn test_id_accepts_float_wire_type() {
        let pattern = PathPattern::parse("/trk <ID> <x>").unwrap();
        let msg = OscMessage::new("/trk", vec![OscValue::Float(6.0), OscValue::Int(2)]);
        let update = pattern.matches(&msg).unwrap();
        assert_eq!(update.tracking_id, 6);
        assert_eq!(update.x, Some(2.0));
    }

    #[test]
    fn test_template_errors() {
        assert_eq!(
            PathPattern::parse("trk <ID>"),
            Err(PatternError::MissingAddress)
        );
        assert_eq!(
            PathPattern::parse("/trk <ID> <w>"),
            Err(PatternError::UnknownPlaceholder("<w>".to_string()))
        );
        assert_eq!(
            PathPattern::parse("/trk <x> <x>"),
            Err(PatternError::DuplicatePlaceholder("<x>".to_string()))
        );
    }
}
