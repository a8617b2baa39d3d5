use crate::bus_gateway::{BusClient, BusConnector, BusGateway};
use crate::config::{MqttConfig, TopicMap};
use crate::error::BridgeError;
use crate::state_cache::StateCache;
use rand_core::{OsRng, RngCore};
use reqwest::Url;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Wait between reconnect attempts once the event loop reports an error
pub const RECONNECT_PERIOD: Duration = Duration::from_secs(5);

const DEFAULT_MQTT_PORT: u16 = 1883;
const REQUEST_CAPACITY: usize = 64;

/// Random per-process client id so concurrent bridges never kick each other off the broker
pub fn random_client_id() -> String {
    let mut bytes = [0u8; 8];
    OsRng.fill_bytes(&mut bytes);
    format!("raven_{}", hex::encode(bytes))
}

/// Builds client options from an `mqtt://[user:pass@]host[:port]` url.
/// Explicit credentials take precedence over ones embedded in the url.
pub fn mqtt_options(config: &MqttConfig, client_id: String) -> Result<MqttOptions, BridgeError> {
    let invalid = || BridgeError::Config("MQTT_URL".to_string(), config.url.clone());
    let url = Url::parse(&config.url).map_err(|_| invalid())?;
    let host = url.host_str().ok_or_else(invalid)?;
    let port = url.port().unwrap_or(DEFAULT_MQTT_PORT);

    let mut options = MqttOptions::new(client_id, host, port);
    options.set_keep_alive(config.keep_alive);

    let username = config
        .username
        .clone()
        .or_else(|| Some(url.username().to_string()).filter(|u| !u.is_empty()));
    let password = config
        .password
        .clone()
        .or_else(|| url.password().map(str::to_string));
    if let Some(username) = username {
        options.set_credentials(username, password.unwrap_or_default());
    }
    Ok(options)
}

/// Connects the gateway to a real broker through `rumqttc`
pub struct MqttConnector {
    options: MqttOptions,
}

impl MqttConnector {
    pub fn new(config: &MqttConfig) -> Result<Self, BridgeError> {
        let client_id = random_client_id();
        let options = mqtt_options(config, client_id)?;
        Ok(Self { options })
    }

    pub fn client_id(&self) -> String {
        self.options.client_id()
    }
}

impl BusConnector for MqttConnector {
    type Client = AsyncClient;

    fn connect(self, topics: TopicMap, cache: StateCache) -> Arc<BusGateway<AsyncClient>> {
        let (host, port) = self.options.broker_address();
        info!("Connecting to MQTT broker {host}:{port} as {}", self.client_id());

        let (client, event_loop) = AsyncClient::new(self.options, REQUEST_CAPACITY);
        let gateway = Arc::new(BusGateway::new(client, topics, cache));
        let handler = Arc::clone(&gateway);
        tokio::spawn(async move {
            drive_event_loop(event_loop, handler).await;
        });
        gateway
    }
}

/// Polls the connection forever. `rumqttc` reconnects on the next poll after
/// an error, so the loop only has to pace those attempts.
async fn drive_event_loop<C: BusClient>(mut event_loop: EventLoop, gateway: Arc<BusGateway<C>>) {
    loop {
        match event_loop.poll().await {
            Ok(event) => dispatch_event(&gateway, &event),
            Err(e) => {
                warn!("MQTT error: {e}");
                tokio::time::sleep(RECONNECT_PERIOD).await;
            }
        }
    }
}

/// Routes one transport event into the gateway
pub fn dispatch_event<C: BusClient>(gateway: &BusGateway<C>, event: &Event) {
    match event {
        Event::Incoming(Packet::ConnAck(_)) => gateway.on_connected(),
        Event::Incoming(Packet::Publish(publish)) => {
            gateway.handle_message(&publish.topic, &publish.payload)
        }
        Event::Incoming(Packet::Disconnect) => info!("MQTT close"),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus_gateway::tests::RecordingClient;
    use crate::readings::{Channel, Reading};
    use rumqttc::{ConnAck, ConnectReturnCode, Publish, QoS};

    fn mqtt_config(url: &str) -> MqttConfig {
        MqttConfig {
            url: url.to_string(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_client_id_is_random_hex() {
        let first = random_client_id();
        let second = random_client_id();
        assert!(first.starts_with("raven_"));
        assert_eq!(first.len(), "raven_".len() + 16);
        assert!(first["raven_".len()..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(first, second);
    }

    #[test]
    fn test_options_from_url() {
        let options = mqtt_options(&mqtt_config("mqtt://broker.local:1884"), "id".into()).unwrap();
        assert_eq!(
            options.broker_address(),
            ("broker.local".to_string(), 1884)
        );
        assert_eq!(options.keep_alive(), Duration::from_secs(60));
        assert_eq!(options.credentials(), None);

        let options = mqtt_options(&mqtt_config("mqtt://localhost"), "id".into()).unwrap();
        assert_eq!(options.broker_address(), ("localhost".to_string(), 1883));
    }

    #[test]
    fn test_credentials() {
        let options =
            mqtt_options(&mqtt_config("mqtt://user:pw@localhost"), "id".into()).unwrap();
        assert_eq!(
            options.credentials(),
            Some(("user".to_string(), "pw".to_string()))
        );

        let mut config = mqtt_config("mqtt://user:pw@localhost");
        config.username = Some("meter".to_string());
        config.password = Some("secret".to_string());
        let options = mqtt_options(&config, "id".into()).unwrap();
        assert_eq!(
            options.credentials(),
            Some(("meter".to_string(), "secret".to_string()))
        );
    }

    #[test]
    fn test_invalid_url() {
        assert!(mqtt_options(&mqtt_config("not a url"), "id".into()).is_err());
        assert!(mqtt_options(&mqtt_config("unix:/tmp/socket"), "id".into()).is_err());
    }

    #[test]
    fn test_dispatch_connack_and_queries() {
        let cache = StateCache::new();
        let gateway = BusGateway::new(RecordingClient::default(), TopicMap::default(), cache.clone());
        cache.set(Channel::EnergyIn, Reading::new(11.0, "2024-01-01T00:00:00Z"));

        let connack = Event::Incoming(Packet::ConnAck(ConnAck::new(
            ConnectReturnCode::Success,
            false,
        )));
        dispatch_event(&gateway, &connack);
        assert_eq!(gateway.client().subscriptions.lock().unwrap().len(), 4);

        let query = Event::Incoming(Packet::Publish(Publish::new(
            "/sce/energy/in?",
            QoS::AtMostOnce,
            "/reply",
        )));
        dispatch_event(&gateway, &query);
        assert_eq!(
            *gateway.client().published.lock().unwrap(),
            vec![(
                "/reply".to_string(),
                r#"{"value":11,"timestamp":"2024-01-01T00:00:00Z"}"#.to_string()
            )]
        );
    }
}
