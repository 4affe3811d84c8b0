//! Shared helpers for the gateway integration tests

use ecos_gateway::config::GatewayConfig;
use ecos_gateway::dispatcher::Dispatcher;
use ecos_gateway::gateway::auth::TokenSigner;
use ecos_gateway::gateway::billing::SaasTiers;
use ecos_gateway::gateway::hardware::HardwareManifest;
use ecos_gateway::gateway::{AppState, SharedState};
use ecos_gateway::testing::MockTransport;
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

pub const TEST_SECRET: &str = "integration-test-secret";

/// Manifest with an AWG and a geothermal profile
#[allow(dead_code)]
pub const TEST_MANIFEST: &str = r#"{
  "metadata": {"version": "test"},
  "initiatives": [
    {
      "code": "P09",
      "name": "Atmospheric Water Generation",
      "controlActions": ["start", "stop", "set_target_humidity"]
    },
    {
      "code": "P10",
      "name": "Geothermal Heat Storage",
      "controlActions": ["store_heat", "release_heat"]
    }
  ]
}"#;

#[allow(dead_code)]
pub fn write_manifest() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{TEST_MANIFEST}").unwrap();
    file
}

#[allow(dead_code)]
pub fn test_manifest() -> HardwareManifest {
    serde_json::from_str(TEST_MANIFEST).unwrap()
}

/// Config with MQTT switched on or off, bound to loopback
#[allow(dead_code)]
pub fn test_config(mqtt_enabled: bool) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.server.host = "127.0.0.1".to_string();
    config.mqtt.enabled = mqtt_enabled;
    config
}

/// State without a transport, as when MQTT is disabled
#[allow(dead_code)]
pub fn offline_state() -> SharedState {
    AppState::from_parts(
        test_config(false),
        TokenSigner::new(TEST_SECRET, 24),
        test_manifest(),
        SaasTiers::default(),
        Arc::new(Dispatcher::new()),
    )
    .shared()
}

/// State with MQTT enabled and publishes captured by `transport`
#[allow(dead_code)]
pub fn connected_state(transport: Arc<MockTransport>) -> SharedState {
    AppState::from_parts(
        test_config(true),
        TokenSigner::new(TEST_SECRET, 24),
        test_manifest(),
        SaasTiers::default(),
        Arc::new(Dispatcher::new()),
    )
    .with_transport(transport)
    .shared()
}
