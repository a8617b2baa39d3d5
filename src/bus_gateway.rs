use crate::config::TopicMap;
use crate::error::BridgeError;
use crate::readings::{Channel, Reading};
use crate::state_cache::StateCache;
use rumqttc::{AsyncClient, QoS};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Minimal pub/sub surface the gateway needs. Calls must not block; delivery
/// is at most once and the gateway never waits for an acknowledgement.
pub trait BusClient: Send + Sync + 'static {
    fn subscribe(&self, topic: &str) -> Result<(), BridgeError>;
    fn publish(&self, topic: &str, payload: String) -> Result<(), BridgeError>;
}

impl BusClient for AsyncClient {
    fn subscribe(&self, topic: &str) -> Result<(), BridgeError> {
        self.try_subscribe(topic, QoS::AtMostOnce)?;
        Ok(())
    }

    fn publish(&self, topic: &str, payload: String) -> Result<(), BridgeError> {
        self.try_publish(topic, QoS::AtMostOnce, false, payload)?;
        Ok(())
    }
}

/// Builds a connected gateway once the reading source is ready
pub trait BusConnector {
    type Client: BusClient;

    fn connect(self, topics: TopicMap, cache: StateCache) -> Arc<BusGateway<Self::Client>>;
}

/// Topic wiring between the bridge and the bus: readings out to canonical
/// topics, queries in on `<topic>?` answered from the cache.
pub struct BusGateway<C> {
    client: C,
    topics: TopicMap,
    cache: StateCache,
}

impl<C: BusClient> BusGateway<C> {
    pub fn new(client: C, topics: TopicMap, cache: StateCache) -> Self {
        Self {
            client,
            topics,
            cache,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Runs on every (re)connect; queries sent before this are lost
    pub fn on_connected(&self) {
        info!("MQTT session opened");
        for channel in Channel::ALL {
            let topic = self.topics.query_topic(channel);
            if let Err(e) = self.client.subscribe(&topic) {
                warn!("Failed to subscribe to {topic}: {e}");
            }
        }
    }

    /// Replays the cached value for a query topic to the topic named in the payload.
    /// Messages on any other topic are ignored.
    pub fn handle_message(&self, topic: &str, payload: &[u8]) {
        debug!("Received {topic} : {}", String::from_utf8_lossy(payload));

        let Some(channel) = self.topics.channel_for_query(topic) else {
            return;
        };
        let Ok(response_topic) = std::str::from_utf8(payload) else {
            warn!("Ignoring query on {topic} with a non UTF-8 reply topic");
            return;
        };

        let content = self.cache.snapshot_json(channel);
        debug!("Sending {channel} content {content} to {response_topic}");
        if let Err(e) = self.client.publish(response_topic, content) {
            warn!("Failed to answer {channel} query on {response_topic}: {e}");
        }
    }

    pub fn publish_reading(&self, channel: Channel, reading: &Reading) {
        let topic = self.topics.topic(channel);
        if let Err(e) = self.client.publish(topic, reading.to_json()) {
            warn!("Failed to publish {channel} to {topic}: {e}");
        }
    }
}
