use crate::reading::Reading;
use crate::rules::{Classification, Label};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Server → Viewer message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SensorEvent {
    /// Sent once, to the newly registered viewer only.
    Connected {
        message: String,
        timestamp: DateTime<Utc>,
    },
    /// Sent to every viewer for each accepted reading.
    SensorUpdate(SensorUpdate),
}

impl SensorEvent {
    pub fn connected() -> Self {
        SensorEvent::Connected {
            message: "Connected to SIGMA live feed".to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn sensor_update(reading: &Reading, classification: &Classification) -> Self {
        SensorEvent::SensorUpdate(SensorUpdate::new(reading, classification))
    }

    /// Event kind as it appears in the `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            SensorEvent::Connected { .. } => "connected",
            SensorEvent::SensorUpdate(_) => "sensor_update",
        }
    }
}

/// Flattened reading + classification, as viewers consume it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorUpdate {
    pub reading_id: Uuid,
    pub fruit_id: String,
    pub fruit_type: String,
    pub label: Label,
    pub confidence: f64,
    pub r: u8,
    pub g: u8,
    pub b: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    pub observed_at: DateTime<Utc>,
}

impl SensorUpdate {
    pub fn new(reading: &Reading, classification: &Classification) -> Self {
        let channels = reading.channels();
        Self {
            reading_id: reading.reading_id(),
            fruit_id: reading.fruit_id().to_string(),
            fruit_type: reading.fruit_type().to_string(),
            label: classification.label,
            confidence: classification.confidence,
            r: channels.r,
            g: channels.g,
            b: channels.b,
            temperature: reading.temperature(),
            humidity: reading.humidity(),
            observed_at: reading.observed_at(),
        }
    }
}
