//! Request bodies for the connectivity, firmware and deployment endpoints
//! along with their validation rules.

use crate::error::{GatewayError, GatewayResult};
use crate::forecasting::series::parse_timestamp;
use crate::protocol::{is_project_code, telemetry_topic, QualityFlag, PROJECT_CODE_PATTERN};
use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const INGEST_WINDOW_DAYS: i64 = 30;
pub const MAX_IDENTIFIER_LEN: usize = 255;

static CHECKSUM_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-fA-F0-9]{64}$").expect("checksum pattern is valid"));

static VERSION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^v?\d+\.\d+\.\d+$").expect("version pattern is valid"));

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9-]+(\.[A-Za-z0-9-]+)*\.[A-Za-z]{2,}$")
        .expect("email pattern is valid")
});

fn require_non_empty(field: &str, value: &str) -> GatewayResult<()> {
    if value.is_empty() {
        return Err(GatewayError::invalid_input(format!("{field} must not be empty")));
    }
    Ok(())
}

fn require_identifier(field: &str, value: &str) -> GatewayResult<()> {
    require_non_empty(field, value)?;
    if value.chars().count() > MAX_IDENTIFIER_LEN {
        return Err(GatewayError::invalid_input(format!(
            "{field} must be at most {MAX_IDENTIFIER_LEN} characters"
        )));
    }
    Ok(())
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_PATTERN.is_match(email)
}

/// Body of `POST /api/iot/ingest`
#[derive(Debug, Clone, Deserialize)]
pub struct IngestRequest {
    pub sensor_id: String,
    pub project_code: String,
    pub device_id: String,
    pub measurement_type: String,
    pub measurement_value: f64,
    pub unit: String,
    pub timestamp: String,
    #[serde(default)]
    pub quality_flag: QualityFlag,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IngestEcho {
    pub sensor_id: String,
    pub measurement_type: String,
    pub measurement_value: f64,
    pub unit: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IngestReceipt {
    pub topic: String,
    pub ingested: bool,
    pub quality_flag: QualityFlag,
    pub echo: IngestEcho,
}

impl IngestRequest {
    /// Accept readings no newer than `now` and no older than the ingest window
    pub fn ingest_at(&self, now: DateTime<Utc>) -> GatewayResult<IngestReceipt> {
        for (field, value) in [
            ("sensor_id", &self.sensor_id),
            ("project_code", &self.project_code),
            ("device_id", &self.device_id),
            ("measurement_type", &self.measurement_type),
            ("unit", &self.unit),
        ] {
            require_non_empty(field, value)?;
        }
        if !self.measurement_value.is_finite() {
            return Err(GatewayError::invalid_input(
                "measurement_value must be a finite number",
            ));
        }

        let timestamp = parse_timestamp(&self.timestamp)
            .map_err(|e| GatewayError::invalid_input(e.to_string()))?;
        if timestamp > now {
            return Err(GatewayError::invalid_input("Timestamp cannot be in the future"));
        }
        if timestamp < now - Duration::days(INGEST_WINDOW_DAYS) {
            return Err(GatewayError::invalid_input(
                "Timestamp too old for ingestion window",
            ));
        }

        Ok(IngestReceipt {
            topic: telemetry_topic(&self.project_code, &self.device_id),
            ingested: true,
            quality_flag: self.quality_flag,
            echo: IngestEcho {
                sensor_id: self.sensor_id.clone(),
                measurement_type: self.measurement_type.clone(),
                measurement_value: self.measurement_value,
                unit: self.unit.clone(),
                timestamp: timestamp.to_rfc3339(),
            },
        })
    }
}

fn default_role() -> String {
    "USER".to_string()
}

/// Body of `POST /api/auth/token`
#[derive(Debug, Clone, Deserialize)]
pub struct TokenRequest {
    pub user_id: String,
    pub email: String,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub project_access: Vec<String>,
}

impl TokenRequest {
    pub fn validate(&self) -> GatewayResult<()> {
        require_non_empty("user_id", &self.user_id)?;
        if !is_valid_email(&self.email) {
            return Err(GatewayError::invalid_input(format!(
                "'{}' is not a valid email address",
                self.email
            )));
        }
        Ok(())
    }
}

/// Body of `POST /api/firmware/flash`
#[derive(Debug, Clone, Deserialize)]
pub struct FirmwareRequest {
    pub device_id: String,
    pub project_code: String,
    pub firmware_version: String,
    pub checksum: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FirmwareReceipt {
    pub project: String,
    pub device_id: String,
    pub firmware_version: String,
    pub checksum: String,
    pub status: String,
    pub queued_at: String,
}

impl FirmwareRequest {
    pub fn queue(&self) -> GatewayResult<FirmwareReceipt> {
        require_identifier("device_id", &self.device_id)?;
        require_identifier("project_code", &self.project_code)?;

        if !CHECKSUM_PATTERN.is_match(&self.checksum) {
            return Err(GatewayError::invalid_input(
                "Invalid firmware checksum format; expected 64 hex chars",
            ));
        }
        if !VERSION_PATTERN.is_match(&self.firmware_version) {
            return Err(GatewayError::invalid_input("Invalid firmware version format"));
        }

        Ok(FirmwareReceipt {
            project: self.project_code.clone(),
            device_id: self.device_id.clone(),
            firmware_version: self.firmware_version.clone(),
            checksum: self.checksum.clone(),
            status: "queued".to_string(),
            queued_at: Utc::now().to_rfc3339(),
        })
    }
}

/// Body of `POST /api/deployment/status`
#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentRequest {
    pub zone: String,
    pub project_code: String,
    #[serde(default)]
    pub inputs_from: Vec<String>,
    #[serde(default)]
    pub outputs_to: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DeploymentStatus {
    pub zone: String,
    pub project: String,
    pub inputs_from: Vec<String>,
    pub invalid_inputs_from: Vec<String>,
    pub outputs_to: Vec<String>,
    pub invalid_outputs_to: Vec<String>,
    pub project_code_pattern: String,
    pub synergy_ready: bool,
    pub updated_at: String,
}

fn split_codes(codes: &[String]) -> (Vec<String>, Vec<String>) {
    codes.iter().cloned().partition(|code| is_project_code(code))
}

impl DeploymentRequest {
    pub fn status(&self) -> GatewayResult<DeploymentStatus> {
        require_non_empty("zone", &self.zone)?;
        require_non_empty("project_code", &self.project_code)?;

        let (inputs_from, invalid_inputs_from) = split_codes(&self.inputs_from);
        let (outputs_to, invalid_outputs_to) = split_codes(&self.outputs_to);
        let synergy_ready = !inputs_from.is_empty() && !outputs_to.is_empty();

        Ok(DeploymentStatus {
            zone: self.zone.clone(),
            project: self.project_code.clone(),
            inputs_from,
            invalid_inputs_from,
            outputs_to,
            invalid_outputs_to,
            project_code_pattern: PROJECT_CODE_PATTERN.to_string(),
            synergy_ready,
            updated_at: Utc::now().to_rfc3339(),
        })
    }
}
