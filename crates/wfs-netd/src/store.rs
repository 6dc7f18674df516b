//! In-memory parameter store.
//!
//! The networking core only sees the `ParameterStore` trait; in the full
//! rig an adapter over the application's parameter tree sits here. The
//! daemon keeps a flat map so it can run (and be driven over the wire)
//! standalone.

use std::collections::HashMap;

use parking_lot::RwLock;

use wfs_core::params::{ParamId, ParameterStore};

#[derive(Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<(ParamId, u16), f32>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ParameterStore for MemoryStore {
    fn get(&self, id: ParamId, channel: u16) -> f32 {
        self.values
            .read()
            .get(&(id, channel))
            .copied()
            .unwrap_or_else(|| id.default_value())
    }

    fn set(&self, id: ParamId, channel: u16, value: f32) {
        self.values.write().insert((id, channel), value);
    }
}
