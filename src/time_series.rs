use crate::config::SinkConfig;
use crate::error::BridgeError;
use crate::readings::{Channel, Reading};
use chrono::DateTime;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Best-effort mirror of readings into an InfluxDB compatible write endpoint.
///
/// Every failure on this path is logged and dropped: the bus publish is the
/// delivery that matters, and the next reading supersedes a lost one anyway.
#[derive(Debug, Clone)]
pub struct TimeSeriesForwarder {
    sink: Option<SinkConfig>,
    client: reqwest::Client,
}

/// Upper bound on one write, connect included
pub const SINK_TIMEOUT: Duration = Duration::from_secs(10);

impl TimeSeriesForwarder {
    pub fn new(sink: Option<SinkConfig>) -> Result<Self, BridgeError> {
        Self::with_timeout(sink, SINK_TIMEOUT)
    }

    pub fn with_timeout(
        sink: Option<SinkConfig>,
        timeout: Duration,
    ) -> Result<Self, BridgeError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { sink, client })
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Spawns the write and returns immediately. `None` when no sink is configured.
    ///
    /// The handle is only useful to tests; the bridge drops it.
    pub fn forward(&self, channel: Channel, reading: &Reading) -> Option<JoinHandle<()>> {
        let sink = self.sink.clone()?;
        let client = self.client.clone();
        let reading = reading.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = write_point(&client, &sink, channel.measurement(), &reading).await {
                warn!("Dropped {channel} reading for time-series sink: {e}");
            }
        }))
    }
}

/// Issues a single line-protocol write for one reading
pub async fn write_point(
    client: &reqwest::Client,
    sink: &SinkConfig,
    measurement: &str,
    reading: &Reading,
) -> Result<(), BridgeError> {
    let timestamp_ns = rfc3339_to_ns(&reading.timestamp)?;
    let url = format!("{}/write?db={}", sink.url, sink.bucket);
    let body = line_protocol(measurement, &sink.id, reading.value, timestamp_ns);
    debug!("POST {url} {body}");

    let response = client.post(&url).body(body).send().await?;
    let status = response.status();
    debug!("Sink answered {status}");
    if !status.is_success() {
        return Err(BridgeError::SinkStatus(status.as_u16()));
    }
    Ok(())
}

/// `<measurement>,id=<id> value=<value> <timestamp_ns>`
pub fn line_protocol(measurement: &str, id: &str, value: f64, timestamp_ns: i64) -> String {
    format!("{measurement},id={id} value={value} {timestamp_ns}")
}

/// Influx timestamps are unix nanoseconds. Only millisecond precision of the
/// input is kept, matching what the meter driver reports. Nanoseconds in an
/// i64 run out in 2262; later timestamps are rejected.
pub fn rfc3339_to_ns(timestamp: &str) -> Result<i64, BridgeError> {
    let parsed = DateTime::parse_from_rfc3339(timestamp)
        .map_err(|e| BridgeError::Timestamp(timestamp.to_string(), e))?;
    parsed
        .timestamp_millis()
        .checked_mul(1_000_000)
        .ok_or_else(|| BridgeError::TimestampRange(timestamp.to_string()))
}
