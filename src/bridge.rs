use crate::bus_gateway::{BusConnector, BusGateway};
use crate::config::TopicMap;
use crate::readings::{Channel, Reading, SourceEvent};
use crate::state_cache::StateCache;
use crate::time_series::TimeSeriesForwarder;
use std::sync::Arc;
use tokio::sync::mpsc::Receiver;
use tracing::{debug, info};

enum BridgeState<K: BusConnector> {
    WaitingForSource(Option<K>),
    Active(Arc<BusGateway<K::Client>>),
}

/// Wires the reading source to the cache, the bus and the time-series sink.
///
/// Nothing happens until the source reports ready; from then on the bridge
/// stays active for the life of the process, bus reconnects included.
pub struct Bridge<K: BusConnector> {
    state: BridgeState<K>,
    topics: TopicMap,
    cache: StateCache,
    forwarder: TimeSeriesForwarder,
}

impl<K: BusConnector> Bridge<K> {
    pub fn new(connector: K, topics: TopicMap, forwarder: TimeSeriesForwarder) -> Self {
        Self {
            state: BridgeState::WaitingForSource(Some(connector)),
            topics,
            cache: StateCache::new(),
            forwarder,
        }
    }

    pub fn cache(&self) -> &StateCache {
        &self.cache
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, BridgeState::Active(_))
    }

    /// The connected gateway, once the source has reported ready
    pub fn gateway(&self) -> Option<&Arc<BusGateway<K::Client>>> {
        match &self.state {
            BridgeState::Active(gateway) => Some(gateway),
            BridgeState::WaitingForSource(_) => None,
        }
    }

    /// Handles source events until the source side of the channel closes
    pub async fn run(mut self, mut events: Receiver<SourceEvent>) {
        info!("Bridge waiting for reading source");
        while let Some(event) = events.recv().await {
            self.handle_event(event);
        }
        info!("Reading source closed, bridge exiting");
    }

    pub fn handle_event(&mut self, event: SourceEvent) {
        match event {
            SourceEvent::Ready => self.activate(),
            SourceEvent::Reading(channel, reading) => self.handle_reading(channel, reading),
        }
    }

    fn activate(&mut self) {
        let BridgeState::WaitingForSource(connector) = &mut self.state else {
            debug!("Reading source reported ready again, ignoring");
            return;
        };
        let Some(connector) = connector.take() else {
            return;
        };
        info!("Reading source ready, connecting to bus");
        let gateway = connector.connect(self.topics.clone(), self.cache.clone());
        self.state = BridgeState::Active(gateway);
    }

    fn handle_reading(&mut self, channel: Channel, reading: Reading) {
        let BridgeState::Active(gateway) = &self.state else {
            debug!("Dropping {channel} reading, bus not connected yet");
            return;
        };
        debug!("New {channel} reading {reading:?}");

        self.cache.set(channel, reading.clone());
        gateway.publish_reading(channel, &reading);
        // Fire and forget: the sink task logs its own failures
        let _ = self.forwarder.forward(channel, &reading);
    }
}
