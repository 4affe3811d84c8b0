//! Mock implementations for testing
//!
//! [`MockTransport`] records what the gateway publishes and can be told to
//! fail, so HTTP handlers and processors run without a broker.

use crate::protocol::{ControlCommand, InboundMessage, TelemetryMessage};
use crate::transport::mqtt::{ConnectionState, MqttError};
use crate::transport::Transport;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

pub type PublishedMessage = (String, Vec<u8>);

/// (project code, device id, command)
pub type PublishedControl = (String, String, ControlCommand);

/// Mock transport for testing
#[derive(Debug, Default)]
pub struct MockTransport {
    pub published_telemetry: Arc<Mutex<Vec<TelemetryMessage>>>,
    pub published_controls: Arc<Mutex<Vec<PublishedControl>>>,
    pub published_messages: Arc<Mutex<Vec<PublishedMessage>>>,
    pub should_fail: bool,
    pub inbound_sender: std::sync::Mutex<Option<mpsc::Sender<InboundMessage>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Default::default()
        }
    }

    fn failure(&self) -> MqttError {
        MqttError::NotConnected {
            state: ConnectionState::Disconnected("Mock disconnection".to_string()),
        }
    }

    pub async fn get_published_telemetry(&self) -> Vec<TelemetryMessage> {
        self.published_telemetry.lock().await.clone()
    }

    pub async fn get_published_controls(&self) -> Vec<PublishedControl> {
        self.published_controls.lock().await.clone()
    }

    pub async fn get_published_messages(&self) -> Vec<PublishedMessage> {
        self.published_messages.lock().await.clone()
    }

    pub async fn clear_history(&self) {
        self.published_telemetry.lock().await.clear();
        self.published_controls.lock().await.clear();
        self.published_messages.lock().await.clear();
    }

    /// Push a message as if it had arrived from the broker
    pub async fn inject(&self, message: InboundMessage) -> bool {
        let sender = self
            .inbound_sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        match sender {
            Some(sender) => sender.send(message).await.is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MqttError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        if self.should_fail {
            Err(MqttError::Connection("Mock connection failure".to_string()))
        } else {
            Ok(())
        }
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn publish_telemetry(&self, message: &TelemetryMessage) -> Result<(), Self::Error> {
        if self.should_fail {
            return Err(self.failure());
        }
        self.published_telemetry.lock().await.push(message.clone());
        Ok(())
    }

    async fn publish_control(
        &self,
        project_code: &str,
        device_id: &str,
        command: &ControlCommand,
    ) -> Result<(), Self::Error> {
        if self.should_fail {
            return Err(self.failure());
        }
        self.published_controls.lock().await.push((
            project_code.to_string(),
            device_id.to_string(),
            command.clone(),
        ));
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, _retain: bool) -> Result<(), Self::Error> {
        if self.should_fail {
            return Err(self.failure());
        }
        self.published_messages
            .lock()
            .await
            .push((topic.to_string(), payload));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.should_fail
    }

    fn connection_state(&self) -> Option<ConnectionState> {
        if self.should_fail {
            Some(ConnectionState::Disconnected("Mock disconnection".to_string()))
        } else {
            Some(ConnectionState::Connected)
        }
    }

    fn is_permanently_disconnected(&self) -> bool {
        false
    }

    fn set_inbound_sender(&self, sender: mpsc::Sender<InboundMessage>) {
        *self.inbound_sender.lock().unwrap_or_else(|e| e.into_inner()) = Some(sender);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[tokio::test]
    async fn test_records_publishes() {
        let transport = MockTransport::new();
        let command = ControlCommand::new("start", Map::new());
        transport
            .publish_control("P09", "awg-01", &command)
            .await
            .unwrap();
        transport
            .publish("ecos/dispatcher/status", b"{}".to_vec(), false)
            .await
            .unwrap();

        let controls = transport.get_published_controls().await;
        assert_eq!(controls.len(), 1);
        assert_eq!(controls[0].0, "P09");
        assert_eq!(controls[0].2.action, "start");
        assert_eq!(transport.get_published_messages().await.len(), 1);

        transport.clear_history().await;
        assert!(transport.get_published_controls().await.is_empty());
    }

    #[tokio::test]
    async fn test_failure_mode() {
        let mut transport = MockTransport::with_failure();
        assert!(transport.connect().await.is_err());
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.publish("t", vec![], false).await,
            Err(MqttError::NotConnected { .. })
        ));
    }

    #[tokio::test]
    async fn test_inject_reaches_sender() {
        let transport = MockTransport::new();
        let message = InboundMessage::Dispatcher {
            subtopic: "commands".to_string(),
            payload: serde_json::json!({"action": "status"}),
        };
        assert!(!transport.inject(message.clone()).await);

        let (tx, mut rx) = mpsc::channel(1);
        transport.set_inbound_sender(tx);
        assert!(transport.inject(message.clone()).await);
        assert_eq!(rx.recv().await, Some(message));
    }
}
