use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

mod decode;

pub use decode::{decode, ReadingError};

/// Raw color sensor intensities.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorChannels {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// A validated device payload, before the pipeline has stamped it.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedReading {
    pub fruit_id: String,
    pub fruit_type: String,
    pub channels: ColorChannels,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
}

/// One accepted sensor observation.
///
/// Fields are private so a reading cannot change after the coordinator has
/// stamped it.
#[derive(Clone, Debug, PartialEq)]
pub struct Reading {
    reading_id: Uuid,
    fruit_id: String,
    fruit_type: String,
    channels: ColorChannels,
    temperature: Option<f64>,
    humidity: Option<f64>,
    observed_at: DateTime<Utc>,
}

impl Reading {
    /// Stamps a decoded payload with a fresh UUIDv7 and the ingestion time.
    pub fn accept(decoded: DecodedReading, observed_at: DateTime<Utc>) -> Self {
        Self::from_parts(Uuid::now_v7(), decoded, observed_at)
    }

    /// Rebuilds a reading that was already accepted (e.g. loaded from storage).
    pub fn from_parts(
        reading_id: Uuid,
        decoded: DecodedReading,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            reading_id,
            fruit_id: decoded.fruit_id,
            fruit_type: decoded.fruit_type,
            channels: decoded.channels,
            temperature: decoded.temperature,
            humidity: decoded.humidity,
            observed_at,
        }
    }

    pub fn reading_id(&self) -> Uuid {
        self.reading_id
    }

    pub fn fruit_id(&self) -> &str {
        &self.fruit_id
    }

    pub fn fruit_type(&self) -> &str {
        &self.fruit_type
    }

    pub fn channels(&self) -> ColorChannels {
        self.channels
    }

    pub fn temperature(&self) -> Option<f64> {
        self.temperature
    }

    pub fn humidity(&self) -> Option<f64> {
        self.humidity
    }

    pub fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }
}
