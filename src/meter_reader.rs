use crate::config::MeterConfig;
use crate::readings::{Channel, Reading, SourceEvent};
use chrono::{SecondsFormat, Utc};
use std::time::Duration;
use tokio::sync::mpsc::{error::SendError, Sender};
use tokio::time::{interval, sleep, Interval, MissedTickBehavior};
use tokio_modbus::prelude::*;
use tracing::{info, warn};

/// One poll of the meter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeterSample {
    pub power: f32,
    pub energy_in: f32,
    pub energy_out: f32,
}

impl MeterSample {
    pub fn energy_net(&self) -> f32 {
        self.energy_in - self.energy_out
    }

    /// Splits the poll into one reading per channel, all sharing the timestamp
    pub fn readings(&self, timestamp: &str) -> [(Channel, Reading); 4] {
        [
            (Channel::Power, Reading::new(widen(self.power), timestamp)),
            (Channel::EnergyIn, Reading::new(widen(self.energy_in), timestamp)),
            (Channel::EnergyOut, Reading::new(widen(self.energy_out), timestamp)),
            (Channel::EnergyNet, Reading::new(widen(self.energy_net()), timestamp)),
        ]
    }
}

/// Reading source backed by a Modbus TCP energy meter.
///
/// Sends `Ready` after the first successful connection, then one reading per
/// channel on every poll. Stops once the bridge drops its receiver.
pub struct ModbusMeterReader {
    config: MeterConfig,
    events: Sender<SourceEvent>,
    connection: Option<client::Context>,
    announced_ready: bool,
}

impl ModbusMeterReader {
    pub fn new(config: MeterConfig, events: Sender<SourceEvent>) -> Self {
        Self {
            config,
            events,
            connection: None,
            announced_ready: false,
        }
    }

    /// Spawns the reader onto its own task
    pub fn spawn(self) {
        tokio::spawn(async move {
            let mut reader = self;
            reader.run().await;
        });
    }

    async fn run(&mut self) {
        info!("Starting meter reader for {}", self.config.address);

        let mut read_interval = poll_interval(self.config.poll_interval);
        let mut consecutive_errors = 0u32;

        loop {
            read_interval.tick().await;

            match self.read_sample_with_retry().await {
                Ok(sample) => {
                    consecutive_errors = 0;
                    if self.send_sample(sample).await.is_err() {
                        info!("Bridge closed its reading channel, stopping meter reader");
                        break;
                    }
                }
                Err(e) => {
                    consecutive_errors += 1;
                    warn!("Meter read error ({consecutive_errors} in a row): {e}");
                    self.connection = None;
                    if self.events.is_closed() {
                        break;
                    }
                }
            }
        }
    }

    async fn send_sample(&mut self, sample: MeterSample) -> Result<(), SendError<SourceEvent>> {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        for (channel, reading) in sample.readings(&timestamp) {
            self.events
                .send(SourceEvent::Reading(channel, reading))
                .await?;
        }
        Ok(())
    }

    async fn read_sample_with_retry(&mut self) -> Result<MeterSample, String> {
        if self.connection.is_none() {
            self.connection = self.connect_with_retry().await;
        }
        if self.connection.is_none() {
            return Err("No connection available".to_string());
        }

        if !self.announced_ready {
            // Readings are only meaningful once the transport is up
            self.announced_ready = true;
            self.events
                .send(SourceEvent::Ready)
                .await
                .map_err(|e| format!("Bridge gone: {e}"))?;
        }

        let power = self.read_f32(self.config.power_register).await?;
        let energy_in = self.read_f32(self.config.energy_in_register).await?;
        let energy_out = self.read_f32(self.config.energy_out_register).await?;
        Ok(MeterSample {
            power,
            energy_in,
            energy_out,
        })
    }

    async fn connect_with_retry(&mut self) -> Option<client::Context> {
        const MAX_RETRIES: u32 = 3;

        for attempt in 1..=MAX_RETRIES {
            info!(
                "Connecting to meter at {} (attempt {attempt}/{MAX_RETRIES})",
                self.config.address
            );
            match tcp::connect(self.config.address).await {
                Ok(connection) => {
                    info!("Connected to meter");
                    return Some(connection);
                }
                Err(e) => {
                    warn!("Connection attempt {attempt} failed: {e}");
                    if attempt < MAX_RETRIES {
                        sleep(Duration::from_secs(1 << (attempt - 1))).await;
                    }
                }
            }
        }
        None
    }

    /// Reads one float spread over two input registers
    async fn read_f32(&mut self, register: u16) -> Result<f32, String> {
        let connection = self
            .connection
            .as_mut()
            .ok_or("No connection available")?;

        // tokio-modbus returns Result<Result<Vec<u16>, ExceptionCode>, Error>
        match connection.read_input_registers(register, 2).await {
            Ok(Ok(words)) if words.len() >= 2 => Ok(merge_u16_f32(words[0], words[1])),
            Ok(Ok(_)) => Err(format!("Short read of register {register}")),
            Ok(Err(exception)) => Err(format!("Modbus exception on {register}: {exception:?}")),
            Err(e) => Err(format!("Modbus read of {register} failed: {e:?}")),
        }
    }
}

/// A slow poll pushes the schedule back instead of firing the missed ticks in a burst
fn poll_interval(period: Duration) -> Interval {
    let mut ticks = interval(period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticks
}

/// Keeps the shortest decimal form of the register value, so 0.1 is
/// published as 0.1 and not 0.10000000149011612
fn widen(value: f32) -> f64 {
    value.to_string().parse().unwrap_or(value as f64)
}

/// Converts two u16 values into a f32 (little-endian word order)
pub fn merge_u16_f32(low: u16, high: u16) -> f32 {
    let combined: u32 = (low as u32) | ((high as u32) << 16);
    f32::from_bits(combined)
}
