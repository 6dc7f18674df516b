//! Motion-tracking receivers.
//!
//! Two wire formats feed the same pipeline: a user-configurable OSC
//! address template with placeholder slots, and the binary multicast
//! beacon. Raw coordinates pass through `(raw + offset) * scale` with
//! optional per-axis sign flip, then route to every input channel whose
//! trackingId parameter matches.

pub mod beacon_rx;
pub mod pattern;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::params::{ParamId, ParameterStore, SharedStore, NUM_INPUT_CHANNELS};
use crate::NetworkEvent;

/// One decoded tracker sample. Absent axes leave the channel untouched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackingUpdate {
    pub tracking_id: i32,
    pub x: Option<f32>,
    pub y: Option<f32>,
    pub z: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisTransform {
    pub offset: [f32; 3],
    pub scale: [f32; 3],
    pub flip: [bool; 3],
}

impl Default for AxisTransform {
    fn default() -> Self {
        Self {
            offset: [0.0; 3],
            scale: [1.0; 3],
            flip: [false; 3],
        }
    }
}

impl AxisTransform {
    pub fn apply(&self, axis: usize, raw: f32) -> f32 {
        let value = (raw + self.offset[axis]) * self.scale[axis];
        if self.flip[axis] {
            -value
        } else {
            value
        }
    }
}

/// Fans tracker samples out to matching input channels.
pub struct TrackingRouter {
    store: SharedStore,
    events: mpsc::Sender<NetworkEvent>,
    transform: AxisTransform,
    enabled: AtomicBool,
}

impl TrackingRouter {
    pub fn new(
        store: SharedStore,
        events: mpsc::Sender<NetworkEvent>,
        transform: AxisTransform,
        enabled: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            events,
            transform,
            enabled: AtomicBool::new(enabled),
        })
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn matching_channels(&self, tracking_id: i32) -> Vec<u16> {
        (0..NUM_INPUT_CHANNELS)
            .filter(|&channel| {
                let assigned = self.store.get(ParamId::TrackingId, channel);
                assigned >= 0.0 && assigned as i32 == tracking_id
            })
            .collect()
    }

    pub async fn route(&self, update: TrackingUpdate) {
        if !self.is_enabled() {
            return;
        }

        let x = update.x.map(|v| self.transform.apply(0, v));
        let y = update.y.map(|v| self.transform.apply(1, v));
        let z = update.z.map(|v| self.transform.apply(2, v));

        for channel in self.matching_channels(update.tracking_id) {
            if let Some(x) = x {
                self.store.set(ParamId::PositionX, channel, x);
            }
            if let Some(y) = y {
                self.store.set(ParamId::PositionY, channel, y);
            }
            if let Some(z) = z {
                self.store.set(ParamId::PositionZ, channel, z);
            }
            debug!(channel, id = update.tracking_id, "Tracking position routed");
            let _ = self
                .events
                .send(NetworkEvent::PositionUpdate { channel, x, y, z })
                .await;
        }
    }

    pub async fn route_orientation(&self, tracking_id: i32, orientation: [f32; 3]) {
        if !self.is_enabled() {
            return;
        }
        for channel in self.matching_channels(tracking_id) {
            let _ = self
                .events
                .send(NetworkEvent::OrientationUpdate {
                    channel,
                    orientation,
                })
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

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

    impl crate::params::ParameterStore for TestStore {
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

    #[test]
    fn test_transform_offset_scale_flip() {
        let transform = AxisTransform {
            offset: [1.0, 0.0, -2.0],
            scale: [2.0, 1.0, 0.5],
            flip: [false, true, false],
        };
        assert_eq!(transform.apply(0, 1.5), 5.0);
        assert_eq!(transform.apply(1, 3.0), -3.0);
        assert_eq!(transform.apply(2, 4.0), 1.0);
    }

    #[tokio::test]
    async fn test_routes_to_matching_channels_only() {
        let store = TestStore::new();
        let (tx, mut rx) = mpsc::channel(64);
        let router = TrackingRouter::new(store.clone(), tx, AxisTransform::default(), true);

        store.set(ParamId::TrackingId, 2, 7.0);
        store.set(ParamId::TrackingId, 5, 7.0);
        store.set(ParamId::TrackingId, 9, 8.0);

        router
            .route(TrackingUpdate {
                tracking_id: 7,
                x: Some(1.0),
                y: Some(2.0),
                z: None,
            })
            .await;

        let mut updated = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let NetworkEvent::PositionUpdate { channel, x, z, .. } = event {
                assert_eq!(x, Some(1.0));
                assert_eq!(z, None);
                updated.push(channel);
            }
        }
        updated.sort_unstable();
        assert_eq!(updated, vec![2, 5]);

        assert_eq!(store.get(ParamId::PositionX, 2), 1.0);
        assert_eq!(store.get(ParamId::PositionY, 5), 2.0);
        // Unmatched channel untouched
        assert_eq!(store.get(ParamId::PositionX, 9), 0.0);
    }

    #[tokio::test]
    async fn test_disabled_router_drops_updates() {
        let store = TestStore::new();
        let (tx, mut rx) = mpsc::channel(8);
        let router = TrackingRouter::new(store.clone(), tx, AxisTransform::default(), false);

        store.set(ParamId::TrackingId, 0, 1.0);
        router
            .route(TrackingUpdate {
                tracking_id: 1,
                x: Some(9.0),
                y: None,
                z: None,
            })
            .await;

        assert!(rx.try_recv().is_err());
        assert_eq!(store.get(ParamId::PositionX, 0), 0.0);
    }

    #[tokio::test]
    async fn test_pattern_sample_through_transform() {
        use crate::tracking::pattern::PathPattern;
        use wfs_protocol::codec::{OscMessage, OscValue};

        let store = TestStore::new();
        let (tx, mut rx) = mpsc::channel(8);
        let transform = AxisTransform {
            offset: [1.0, 0.0, 0.0],
            scale: [1.0; 3],
            flip: [false; 3],
        };
        let router = TrackingRouter::new(store.clone(), tx, transform, true);
        store.set(ParamId::TrackingId, 6, 3.0);

        let pattern = PathPattern::parse("/trk <ID> <x> <y>").unwrap();
        let msg = OscMessage::new(
            "/trk",
            vec![
                OscValue::Int(3),
                OscValue::Float(1.5),
                OscValue::Float(2.5),
            ],
        );
        router.route(pattern.matches(&msg).unwrap()).await;

        assert_eq!(store.get(ParamId::PositionX, 6), 2.5);
        assert_eq!(store.get(ParamId::PositionY, 6), 2.5);
        // z had no slot, so the channel's z is untouched
        assert_eq!(store.get(ParamId::PositionZ, 6), 0.0);
        assert!(matches!(
            rx.try_recv(),
            Ok(NetworkEvent::PositionUpdate {
                channel: 6,
                z: None,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_unassigned_channels_never_match() {
        let store = TestStore::new();
        let (tx, mut rx) = mpsc::channel(8);
        let router = TrackingRouter::new(store.clone(), tx, AxisTransform::default(), true);

        // TrackingId defaults to the unassigned sentinel (-1); an update
        // for id -1 must not route anywhere
        router
            .route(TrackingUpdate {
                tracking_id: -1,
                x: Some(1.0),
                y: None,
                z: None,
            })
            .await;
        assert!(rx.try_recv().is_err());
    }
}
