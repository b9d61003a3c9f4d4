use super::{ColorChannels, DecodedReading};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Why an inbound payload was rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReadingError {
    /// Not well-formed JSON, or a required field is missing or mistyped.
    #[error("malformed reading: {0}")]
    Decode(String),

    /// A color channel lies outside 0..=255.
    #[error("channel {channel} out of range: {value} (expected 0..=255)")]
    Range { channel: char, value: i64 },
}

/// Wire shape of a device message. Everything is optional here so that
/// missing fields produce a named error instead of a serde message.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePayload {
    fruit_id: Option<String>,
    fruit_type: Option<String>,
    color_sensor: Option<WireChannels>,
    temperature: Option<f64>,
    humidity: Option<f64>,
}

#[derive(Deserialize)]
struct WireChannels {
    r: Option<i64>,
    g: Option<i64>,
    b: Option<i64>,
}

/// Decodes and validates a device payload.
///
/// The payload's `fruitId` is authoritative. `subject` only appears in error
/// messages so a rejected message can be traced back to its publisher.
///
/// Validation rules:
/// - Payload must be a JSON object
/// - Required: non-empty `fruitId`, non-empty `fruitType`, integer `colorSensor.r/g/b`
/// - Channels must be within 0..=255 (rejected, never clamped)
/// - `temperature`/`humidity` absent or null → None
pub fn decode(subject: &str, payload: &[u8]) -> Result<DecodedReading, ReadingError> {
    let value: Value = serde_json::from_slice(payload)
        .map_err(|e| ReadingError::Decode(format!("{} (subject '{}')", e, subject)))?;

    // Derived struct deserializers also accept sequences; only objects are readings
    let fields = match &value {
        Value::Object(fields) => fields,
        _ => {
            return Err(ReadingError::Decode(format!(
                "payload must be a JSON object (subject '{}')",
                subject
            )))
        }
    };
    if let Some(color) = fields.get("colorSensor") {
        if !color.is_object() && !color.is_null() {
            return Err(ReadingError::Decode("colorSensor must be an object".to_string()));
        }
    }

    let wire: WirePayload = serde_json::from_value(value)
        .map_err(|e| ReadingError::Decode(format!("{} (subject '{}')", e, subject)))?;

    let fruit_id = required_text(wire.fruit_id, "fruitId")?;
    let fruit_type = required_text(wire.fruit_type, "fruitType")?;

    let color = wire
        .color_sensor
        .ok_or_else(|| ReadingError::Decode("colorSensor is required".to_string()))?;

    let channels = ColorChannels {
        r: channel('r', color.r)?,
        g: channel('g', color.g)?,
        b: channel('b', color.b)?,
    };

    Ok(DecodedReading {
        fruit_id,
        fruit_type,
        channels,
        temperature: wire.temperature,
        humidity: wire.humidity,
    })
}

fn required_text(value: Option<String>, field: &str) -> Result<String, ReadingError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        Some(_) => Err(ReadingError::Decode(format!("{} must not be empty", field))),
        None => Err(ReadingError::Decode(format!("{} is required", field))),
    }
}

fn channel(name: char, value: Option<i64>) -> Result<u8, ReadingError> {
    let value = value
        .ok_or_else(|| ReadingError::Decode(format!("colorSensor.{} is required", name)))?;

    u8::try_from(value).map_err(|_| ReadingError::Range {
        channel: name,
        value,
    })
}
