#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("invalid value for {0}: {1}")]
    Config(String, String),
    #[error("missing required env: {0}")]
    MissingConfig(String),
    #[error("bus client error: {0}")]
    Bus(#[from] rumqttc::ClientError),
    #[error("sink request failed: {0}")]
    Sink(#[from] reqwest::Error),
    #[error("sink rejected write with status {0}")]
    SinkStatus(u16),
    #[error("unparseable timestamp `{0}`: {1}")]
    Timestamp(String, chrono::ParseError),
    #[error("timestamp `{0}` is outside the nanosecond range")]
    TimestampRange(String),
}
