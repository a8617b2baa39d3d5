use serde::Serializer;
use serde_derive::{Deserialize, Serialize};
use std::fmt;

/// The four logical measurement streams published by the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Power,
    EnergyIn,
    EnergyOut,
    EnergyNet,
}

impl Channel {
    pub const ALL: [Channel; 4] = [
        Channel::Power,
        Channel::EnergyIn,
        Channel::EnergyOut,
        Channel::EnergyNet,
    ];

    /// Measurement name used when mirroring to the time-series sink
    pub fn measurement(self) -> &'static str {
        match self {
            Channel::Power => "power",
            Channel::EnergyIn => "energy_in",
            Channel::EnergyOut => "energy_out",
            Channel::EnergyNet => "energy_net",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Channel::Power => 0,
            Channel::EnergyIn => 1,
            Channel::EnergyOut => 2,
            Channel::EnergyNet => 3,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.measurement())
    }
}

/// A timestamped sample for one channel, as emitted by the meter driver.
///
/// The timestamp is kept as the wall-clock string the driver produced so it
/// can be republished untouched; it is only parsed when mirrored to the sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    #[serde(serialize_with = "serialize_meter_value")]
    pub value: f64,
    pub timestamp: String,
}

impl Reading {
    pub fn new(value: f64, timestamp: impl Into<String>) -> Self {
        Self {
            value,
            timestamp: timestamp.into(),
        }
    }

    pub fn to_json(&self) -> String {
        // Two plain fields, serialization cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Events produced by a reading source
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    /// The source transport is open and readings will follow
    Ready,
    Reading(Channel, Reading),
}

/// Whole numbers go out as integers (`42`, not `42.0`) so subscribers see the
/// same payload the meter driver reported.
fn serialize_meter_value<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        serializer.serialize_i64(*value as i64)
    } else {
        serializer.serialize_f64(*value)
    }
}
