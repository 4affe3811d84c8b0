//! Hardware scaffolding manifest and device control requests

use crate::error::{GatewayError, GatewayResult};
use crate::protocol::control_topic;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Failed to read hardware manifest: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse hardware manifest: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One initiative's hardware profile. Fields beyond `code` and
/// `controlActions` are carried through untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HardwareProfile {
    pub code: String,
    #[serde(
        rename = "controlActions",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub control_actions: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl HardwareProfile {
    /// An empty action list allows everything
    pub fn check_action(&self, action: &str) -> GatewayResult<()> {
        if self.control_actions.is_empty() || self.control_actions.iter().any(|a| a == action) {
            return Ok(());
        }
        Err(GatewayError::invalid_input(format!(
            "Action '{action}' not allowed. Allowed: {}",
            list_repr(&self.control_actions)
        )))
    }
}

fn list_repr(items: &[String]) -> String {
    let quoted: Vec<String> = items.iter().map(|item| format!("'{item}'")).collect();
    format!("[{}]", quoted.join(", "))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HardwareManifest {
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default, deserialize_with = "skip_invalid_profiles")]
    pub initiatives: Vec<HardwareProfile>,
}

/// Drop entries that are not valid profiles instead of failing the manifest
fn skip_invalid_profiles<'de, D>(deserializer: D) -> Result<Vec<HardwareProfile>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries = Vec::<Value>::deserialize(deserializer)?;
    Ok(entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| match serde_json::from_value(entry) {
            Ok(profile) => Some(profile),
            Err(e) => {
                warn!(index, error = %e, "Skipping invalid hardware manifest entry");
                None
            }
        })
        .collect())
}

impl HardwareManifest {
    /// Load from disk; a missing file yields an empty manifest
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        if !path.exists() {
            info!(path = %path.display(), "No hardware manifest found; serving an empty one");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let manifest: HardwareManifest = serde_json::from_str(&content)?;
        info!(
            path = %path.display(),
            initiatives = manifest.initiatives.len(),
            "Loaded hardware manifest"
        );
        Ok(manifest)
    }

    pub fn find_profile(&self, project_code: &str) -> Option<&HardwareProfile> {
        self.initiatives.iter().find(|profile| profile.code == project_code)
    }

    pub fn require_profile(&self, project_code: &str) -> GatewayResult<&HardwareProfile> {
        self.find_profile(project_code)
            .ok_or_else(|| GatewayError::not_found("Unknown project_code"))
    }
}

/// Body of `POST /hardware/{code}/control`
#[derive(Debug, Clone, Deserialize)]
pub struct ControlRequest {
    pub device_id: String,
    pub action: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl ControlRequest {
    pub fn validate(&self) -> GatewayResult<()> {
        if self.device_id.is_empty() {
            return Err(GatewayError::invalid_input("device_id must not be empty"));
        }
        if self.action.is_empty() {
            return Err(GatewayError::invalid_input("action must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ControlReceipt {
    pub status: String,
    pub mqtt_enabled: bool,
    pub published: bool,
    pub project_code: String,
    pub device_id: String,
    pub action: String,
    pub topic: String,
    pub allowed_actions: Vec<String>,
}

impl ControlReceipt {
    pub fn accepted(
        profile: &HardwareProfile,
        request: &ControlRequest,
        mqtt_enabled: bool,
        published: bool,
    ) -> Self {
        Self {
            status: "accepted".to_string(),
            mqtt_enabled,
            published,
            project_code: profile.code.clone(),
            device_id: request.device_id.clone(),
            action: request.action.clone(),
            topic: control_topic(&profile.code, &request.device_id),
            allowed_actions: profile.control_actions.clone(),
        }
    }
}
