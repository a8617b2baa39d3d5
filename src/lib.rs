//! Meter to MQTT bridge library
//!
//! Caches the last reading of each meter channel, republishes new readings
//! to their MQTT topics, answers `<topic>?` queries from the cache and
//! mirrors readings to an InfluxDB style time-series sink on a best-effort basis.

pub mod bridge;
pub mod bus_gateway;
pub mod config;
pub mod error;
pub mod meter_reader;
pub mod mqtt;
pub mod readings;
pub mod state_cache;
pub mod time_series;

// Re-export commonly used types for easier access
pub use bridge::Bridge;
pub use bus_gateway::{BusClient, BusConnector, BusGateway};
pub use config::{BridgeConfig, MeterConfig, SinkConfig, TopicMap};
pub use error::BridgeError;
pub use meter_reader::ModbusMeterReader;
pub use mqtt::MqttConnector;
pub use readings::{Channel, Reading, SourceEvent};
pub use state_cache::StateCache;
pub use time_series::TimeSeriesForwarder;
