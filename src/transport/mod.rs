//! Transport layer for device and dispatcher traffic
//!
//! [`Transport`] abstracts the broker connection so the gateway and its tests
//! can swap the MQTT client for [`crate::testing::MockTransport`].

use crate::protocol::{ControlCommand, InboundMessage, TelemetryMessage};
use crate::transport::mqtt::ConnectionState;

pub mod mqtt;

#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn connect(&mut self) -> Result<(), Self::Error>;

    async fn disconnect(&mut self) -> Result<(), Self::Error>;

    /// Publish a reading on its telemetry topic (QoS 1)
    async fn publish_telemetry(&self, message: &TelemetryMessage) -> Result<(), Self::Error>;

    /// Publish a command on a device's control topic (QoS 2)
    async fn publish_control(
        &self,
        project_code: &str,
        device_id: &str,
        command: &ControlCommand,
    ) -> Result<(), Self::Error>;

    /// Publish raw bytes to any topic
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool)
        -> Result<(), Self::Error>;

    fn is_connected(&self) -> bool;

    /// None until a connection has been attempted
    fn connection_state(&self) -> Option<ConnectionState>;

    fn is_permanently_disconnected(&self) -> bool;

    /// Route decoded inbound messages to this channel
    fn set_inbound_sender(&self, sender: tokio::sync::mpsc::Sender<InboundMessage>);
}

pub type MqttTransport = mqtt::MqttClient;

/// Shared handle the gateway publishes through
pub type SharedTransport = std::sync::Arc<dyn Transport<Error = mqtt::MqttError>>;
