//! Message types carried over the ECOS MQTT namespace
//!
//! Devices publish loosely shaped JSON. Inbound payloads are normalised into
//! validated [`TelemetryMessage`] and [`ControlCommand`] values before they
//! reach the rest of the gateway.

use super::topics::{parse_topic, EcosTopic};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Data quality reported alongside a measurement
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QualityFlag {
    #[default]
    Valid,
    Suspect,
    Invalid,
}

impl QualityFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityFlag::Valid => "valid",
            QualityFlag::Suspect => "suspect",
            QualityFlag::Invalid => "invalid",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "valid" => Some(QualityFlag::Valid),
            "suspect" => Some(QualityFlag::Suspect),
            "invalid" => Some(QualityFlag::Invalid),
            _ => None,
        }
    }
}

/// Validated telemetry reading
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryMessage {
    pub sensor_id: String,
    pub project_code: String,
    pub device_id: String,
    pub measurement_type: String,
    pub measurement_value: f64,
    pub unit: String,
    /// ISO 8601 timestamp as sent by the device
    pub timestamp: String,
    #[serde(default)]
    pub quality_flag: QualityFlag,
}

impl TelemetryMessage {
    /// Build an outbound reading stamped with the current time
    pub fn new(
        project_code: &str,
        device_id: &str,
        measurement_type: &str,
        measurement_value: f64,
        unit: &str,
        quality_flag: QualityFlag,
    ) -> Self {
        Self {
            sensor_id: device_id.to_string(),
            project_code: project_code.to_string(),
            device_id: device_id.to_string(),
            measurement_type: measurement_type.to_string(),
            measurement_value,
            unit: unit.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            quality_flag,
        }
    }

    /// Normalise a device payload received on `ecos/{project}/{device}/telemetry`
    ///
    /// `sensor_id` falls back to the device id, `timestamp` to now and
    /// `quality_flag` to valid. `measurement_value` may be a number or a
    /// numeric string.
    pub fn from_payload(
        project_code: &str,
        device_id: &str,
        payload: &[u8],
    ) -> Result<Self, MessageError> {
        let object = parse_object(payload)?;

        let sensor_id = optional_string(&object, "sensor_id")?.unwrap_or_else(|| device_id.to_string());
        let measurement_type = required_string(&object, "measurement_type")?;
        let unit = required_string(&object, "unit")?;
        let measurement_value = match object.get("measurement_value") {
            None | Some(Value::Null) => return Err(MessageError::MissingField("measurement_value")),
            Some(value) => coerce_number(value).ok_or_else(|| MessageError::InvalidField {
                field: "measurement_value",
                reason: format!("expected a number, got {value}"),
            })?,
        };
        let timestamp =
            optional_string(&object, "timestamp")?.unwrap_or_else(|| Utc::now().to_rfc3339());
        let quality_flag = match optional_string(&object, "quality_flag")? {
            None => QualityFlag::default(),
            Some(flag) => QualityFlag::parse(&flag).ok_or_else(|| MessageError::InvalidField {
                field: "quality_flag",
                reason: format!("'{flag}' is not one of valid, suspect, invalid"),
            })?,
        };

        let message = Self {
            sensor_id,
            project_code: project_code.to_string(),
            device_id: device_id.to_string(),
            measurement_type,
            measurement_value,
            unit,
            timestamp,
            quality_flag,
        };
        message.validate()?;
        Ok(message)
    }

    /// All string fields must be non-empty and the value finite
    pub fn validate(&self) -> Result<(), MessageError> {
        let fields = [
            ("sensor_id", &self.sensor_id),
            ("project_code", &self.project_code),
            ("device_id", &self.device_id),
            ("measurement_type", &self.measurement_type),
            ("unit", &self.unit),
            ("timestamp", &self.timestamp),
        ];
        for (name, value) in fields {
            if value.is_empty() {
                return Err(MessageError::EmptyField(name));
            }
        }

        if !self.measurement_value.is_finite() {
            return Err(MessageError::InvalidField {
                field: "measurement_value",
                reason: "must be finite".to_string(),
            });
        }

        Ok(())
    }

    /// Payload published on the telemetry topic; project and device live in the topic
    pub fn wire_payload(&self) -> Value {
        serde_json::json!({
            "sensor_id": self.sensor_id,
            "measurement_type": self.measurement_type,
            "measurement_value": self.measurement_value,
            "unit": self.unit,
            "timestamp": self.timestamp,
            "quality_flag": self.quality_flag,
        })
    }
}

/// Command sent to a device on its control topic
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlCommand {
    pub action: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default = "current_timestamp")]
    pub timestamp: String,
}

impl ControlCommand {
    pub fn new(action: &str, params: Map<String, Value>) -> Self {
        Self {
            action: action.to_string(),
            params,
            timestamp: current_timestamp(),
        }
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self, MessageError> {
        let command: ControlCommand = serde_json::from_slice(payload)?;
        if command.action.is_empty() {
            return Err(MessageError::EmptyField("action"));
        }
        Ok(command)
    }
}

fn current_timestamp() -> String {
    Utc::now().to_rfc3339()
}

/// Decoded message handed from the MQTT event loop to the inbound processor
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Telemetry(TelemetryMessage),
    Control {
        project_code: String,
        device_id: String,
        command: ControlCommand,
    },
    Dispatcher {
        subtopic: String,
        payload: Value,
    },
}

impl InboundMessage {
    /// Short label used in logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::Telemetry(_) => "telemetry",
            InboundMessage::Control { .. } => "control",
            InboundMessage::Dispatcher { .. } => "dispatcher",
        }
    }
}

/// Classify a topic and decode its payload. Topics outside the ECOS layout
/// yield `Ok(None)`.
pub fn decode_inbound(topic: &str, payload: &[u8]) -> Result<Option<InboundMessage>, MessageError> {
    match parse_topic(topic) {
        EcosTopic::Telemetry {
            project_code,
            device_id,
        } => TelemetryMessage::from_payload(&project_code, &device_id, payload)
            .map(|message| Some(InboundMessage::Telemetry(message))),
        EcosTopic::Control {
            project_code,
            device_id,
        } => ControlCommand::from_payload(payload).map(|command| {
            Some(InboundMessage::Control {
                project_code,
                device_id,
                command,
            })
        }),
        EcosTopic::Dispatcher { subtopic } => {
            let payload: Value = serde_json::from_slice(payload)?;
            Ok(Some(InboundMessage::Dispatcher { subtopic, payload }))
        }
        EcosTopic::Unrecognized => Ok(None),
    }
}

/// Payload decoding failures
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("Invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("Payload must be a JSON object")]
    NotAnObject,
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("Field {0} cannot be empty")]
    EmptyField(&'static str),
    #[error("Invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

fn parse_object(payload: &[u8]) -> Result<Map<String, Value>, MessageError> {
    match serde_json::from_slice::<Value>(payload)? {
        Value::Object(object) => Ok(object),
        _ => Err(MessageError::NotAnObject),
    }
}

fn required_string(object: &Map<String, Value>, field: &'static str) -> Result<String, MessageError> {
    optional_string(object, field)?.ok_or(MessageError::MissingField(field))
}

fn optional_string(
    object: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<String>, MessageError> {
    match object.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.clone())),
        Some(other) => Err(MessageError::InvalidField {
            field,
            reason: format!("expected a string, got {other}"),
        }),
    }
}

fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_telemetry_defaults() {
        let payload = json!({
            "measurement_type": "voltage",
            "measurement_value": 12.5,
            "unit": "V"
        });
        let message =
            TelemetryMessage::from_payload("P08", "bulb-001", payload.to_string().as_bytes())
                .unwrap();

        assert_eq!(message.sensor_id, "bulb-001");
        assert_eq!(message.project_code, "P08");
        assert_eq!(message.measurement_value, 12.5);
        assert_eq!(message.quality_flag, QualityFlag::Valid);
        assert!(chrono::DateTime::parse_from_rfc3339(&message.timestamp).is_ok());
    }

    #[test]
    fn test_numeric_string_value_is_accepted() {
        let payload = br#"{"sensor_id":"s1","measurement_type":"flow","measurement_value":" 3.25 ","unit":"L/s","quality_flag":"suspect"}"#;
        let message = TelemetryMessage::from_payload("P13", "hydro-1", payload).unwrap();
        assert_eq!(message.sensor_id, "s1");
        assert_eq!(message.measurement_value, 3.25);
        assert_eq!(message.quality_flag, QualityFlag::Suspect);
    }

    #[test]
    fn test_missing_required_fields() {
        let no_type = br#"{"measurement_value":1,"unit":"V"}"#;
        assert!(matches!(
            TelemetryMessage::from_payload("P08", "d", no_type),
            Err(MessageError::MissingField("measurement_type"))
        ));

        let no_value = br#"{"measurement_type":"v","unit":"V"}"#;
        assert!(matches!(
            TelemetryMessage::from_payload("P08", "d", no_value),
            Err(MessageError::MissingField("measurement_value"))
        ));
    }

    #[test]
    fn test_rejects_bad_payloads() {
        assert!(matches!(
            TelemetryMessage::from_payload("P08", "d", b"not json"),
            Err(MessageError::InvalidJson(_))
        ));
        assert!(matches!(
            TelemetryMessage::from_payload("P08", "d", b"[1,2]"),
            Err(MessageError::NotAnObject)
        ));

        let bad_value = br#"{"measurement_type":"v","measurement_value":"abc","unit":"V"}"#;
        assert!(matches!(
            TelemetryMessage::from_payload("P08", "d", bad_value),
            Err(MessageError::InvalidField { field: "measurement_value", .. })
        ));

        let empty_unit = br#"{"measurement_type":"v","measurement_value":1,"unit":""}"#;
        assert!(matches!(
            TelemetryMessage::from_payload("P08", "d", empty_unit),
            Err(MessageError::EmptyField("unit"))
        ));

        let bad_flag = br#"{"measurement_type":"v","measurement_value":1,"unit":"V","quality_flag":"great"}"#;
        assert!(TelemetryMessage::from_payload("P08", "d", bad_flag).is_err());
    }

    #[test]
    fn test_wire_payload_omits_routing_fields() {
        let message = TelemetryMessage::new("P08", "bulb-001", "voltage", 12.5, "V", QualityFlag::Valid);
        let payload = message.wire_payload();
        assert_eq!(payload["sensor_id"], "bulb-001");
        assert_eq!(payload["quality_flag"], "valid");
        assert!(payload.get("project_code").is_none());
        assert!(payload.get("device_id").is_none());
    }

    #[test]
    fn test_control_command_parsing() {
        let command = ControlCommand::from_payload(br#"{"action":"dim","params":{"level":40}}"#)
            .unwrap();
        assert_eq!(command.action, "dim");
        assert_eq!(command.params["level"], 40);
        assert!(!command.timestamp.is_empty());

        assert!(ControlCommand::from_payload(br#"{"params":{}}"#).is_err());
        assert!(ControlCommand::from_payload(br#"{"action":""}"#).is_err());
    }

    #[test]
    fn test_decode_inbound_by_topic() {
        let telemetry = decode_inbound(
            "ecos/P09/awg-01/telemetry",
            br#"{"measurement_type":"humidity","measurement_value":82,"unit":"%"}"#,
        )
        .unwrap();
        assert!(matches!(telemetry, Some(InboundMessage::Telemetry(ref m)) if m.project_code == "P09"));

        let control = decode_inbound("ecos/P08/bulb-001/control", br#"{"action":"off"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(control.kind(), "control");

        let dispatcher =
            decode_inbound("ecos/dispatcher/commands", br#"{"action":"status"}"#).unwrap();
        assert!(matches!(
            dispatcher,
            Some(InboundMessage::Dispatcher { ref subtopic, .. }) if subtopic == "commands"
        ));

        assert!(decode_inbound("other/topic", b"{}").unwrap().is_none());
        assert!(decode_inbound("ecos/dispatcher/x", b"{").is_err());
    }
}
