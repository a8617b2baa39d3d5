use crate::readings::{Channel, Reading};
use std::sync::{Arc, Mutex, PoisonError};

/// Payload replayed for a channel that has not produced a reading yet
pub const UNSET_JSON: &str = "{}";

/// Last known reading per channel. Single writer (the bridge), read by the
/// bus gateway when answering queries from its own task.
#[derive(Debug, Clone, Default)]
pub struct StateCache {
    slots: Arc<Mutex<[Option<Reading>; 4]>>,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites the slot unconditionally; delivery order from the source is trusted
    pub fn set(&self, channel: Channel, reading: Reading) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots[channel.index()] = Some(reading);
    }

    pub fn get(&self, channel: Channel) -> Option<Reading> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots[channel.index()].clone()
    }

    /// JSON for the current value, `{}` when the channel is still unset
    pub fn snapshot_json(&self, channel: Channel) -> String {
        self.get(channel)
            .map(|reading| reading.to_json())
            .unwrap_or_else(|| UNSET_JSON.to_string())
    }
}
