use crate::error::BridgeError;
use crate::readings::Channel;
use std::env;
use std::net::SocketAddr;
use std::time::Duration;

/// Suffix appended to a canonical topic to form its query topic
pub const QUERY_SUFFIX: &str = "?";

pub const DEFAULT_POWER_TOPIC: &str = "/house/meter/power/demand";
pub const DEFAULT_ENERGY_IN_TOPIC: &str = "/sce/energy/in";
pub const DEFAULT_ENERGY_OUT_TOPIC: &str = "/sce/energy/out";
pub const DEFAULT_ENERGY_NET_TOPIC: &str = "/sce/energy/net";
pub const DEFAULT_MQTT_URL: &str = "mqtt://localhost:1883";

/// Canonical bus topic per channel, fixed at startup
#[derive(Debug, Clone, PartialEq)]
pub struct TopicMap {
    pub power: String,
    pub energy_in: String,
    pub energy_out: String,
    pub energy_net: String,
}

impl Default for TopicMap {
    fn default() -> Self {
        Self {
            power: DEFAULT_POWER_TOPIC.to_string(),
            energy_in: DEFAULT_ENERGY_IN_TOPIC.to_string(),
            energy_out: DEFAULT_ENERGY_OUT_TOPIC.to_string(),
            energy_net: DEFAULT_ENERGY_NET_TOPIC.to_string(),
        }
    }
}

impl TopicMap {
    pub fn topic(&self, channel: Channel) -> &str {
        match channel {
            Channel::Power => &self.power,
            Channel::EnergyIn => &self.energy_in,
            Channel::EnergyOut => &self.energy_out,
            Channel::EnergyNet => &self.energy_net,
        }
    }

    pub fn query_topic(&self, channel: Channel) -> String {
        format!("{}{}", self.topic(channel), QUERY_SUFFIX)
    }

    /// Exact match of an inbound topic against the four query topics
    pub fn channel_for_query(&self, topic: &str) -> Option<Channel> {
        let requested = topic.strip_suffix(QUERY_SUFFIX)?;
        Channel::ALL
            .into_iter()
            .find(|channel| self.topic(*channel) == requested)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MqttConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
}

/// Where mirrored readings are written. Absent means no mirroring.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkConfig {
    pub url: String,
    pub bucket: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeterConfig {
    pub address: SocketAddr,
    pub poll_interval: Duration,
    pub power_register: u16,
    pub energy_in_register: u16,
    pub energy_out_register: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    pub mqtt: MqttConfig,
    pub topics: TopicMap,
    pub sink: Option<SinkConfig>,
}

impl BridgeConfig {
    pub fn from_env() -> Result<Self, BridgeError> {
        let mqtt = MqttConfig {
            url: env::var("MQTT_URL").unwrap_or_else(|_| DEFAULT_MQTT_URL.to_string()),
            username: read_optional("MQTT_USER"),
            password: read_optional("MQTT_PASS"),
            keep_alive: Duration::from_secs(60),
        };
        let topics = TopicMap {
            power: read_with_default("POWER_TOPIC", DEFAULT_POWER_TOPIC),
            energy_in: read_with_default("ENERGY_IN_TOPIC", DEFAULT_ENERGY_IN_TOPIC),
            energy_out: read_with_default("ENERGY_OUT_TOPIC", DEFAULT_ENERGY_OUT_TOPIC),
            energy_net: read_with_default("ENERGY_NET_TOPIC", DEFAULT_ENERGY_NET_TOPIC),
        };
        let sink = read_optional("INFLUX_URL").map(|url| SinkConfig {
            url: url.trim_end_matches('/').to_string(),
            bucket: env::var("INFLUX_BUCKET").unwrap_or_default(),
            id: env::var("INFLUX_ID").unwrap_or_default(),
        });

        Ok(Self { mqtt, topics, sink })
    }
}

impl MeterConfig {
    // Float input registers, two words each. Override per meter model.
    pub const DEFAULT_POWER_REGISTER: u16 = 1013;
    pub const DEFAULT_ENERGY_IN_REGISTER: u16 = 1162;
    pub const DEFAULT_ENERGY_OUT_REGISTER: u16 = 1164;

    pub fn from_env() -> Result<Self, BridgeError> {
        let address = env::var("METER_MODBUS")
            .map_err(|_| BridgeError::MissingConfig("METER_MODBUS".to_string()))?;
        let address = address
            .parse()
            .map_err(|_| BridgeError::Config("METER_MODBUS".to_string(), address))?;
        Ok(Self {
            address,
            poll_interval: Duration::from_millis(read_u64_with_default("METER_POLL_MS", 1000)?),
            power_register: read_u16_with_default(
                "METER_POWER_REGISTER",
                Self::DEFAULT_POWER_REGISTER,
            )?,
            energy_in_register: read_u16_with_default(
                "METER_ENERGY_IN_REGISTER",
                Self::DEFAULT_ENERGY_IN_REGISTER,
            )?,
            energy_out_register: read_u16_with_default(
                "METER_ENERGY_OUT_REGISTER",
                Self::DEFAULT_ENERGY_OUT_REGISTER,
            )?,
        })
    }
}

/// Unset and empty variables are both treated as absent
fn read_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.is_empty())
}

fn read_with_default(key: &str, default: &str) -> String {
    read_optional(key).unwrap_or_else(|| default.to_string())
}

fn read_u64_with_default(key: &str, default: u64) -> Result<u64, BridgeError> {
    match read_optional(key) {
        Some(value) => value
            .parse()
            .map_err(|_| BridgeError::Config(key.to_string(), value)),
        None => Ok(default),
    }
}

fn read_u16_with_default(key: &str, default: u16) -> Result<u16, BridgeError> {
    match read_optional(key) {
        Some(value) => value
            .parse()
            .map_err(|_| BridgeError::Config(key.to_string(), value)),
        None => Ok(default),
    }
}
