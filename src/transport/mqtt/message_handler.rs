//! Pure routing and decoding of MQTT events
//!
//! The supervisor task hands every `rumqttc` event to [`MessageHandler`] and
//! acts on the returned [`EventRoute`]; publishes are decoded into
//! [`InboundMessage`] values and passed to the [`MessageForwarder`].

use super::connection::MqttError;
use crate::protocol::{decode_inbound, parse_topic, EcosTopic, InboundMessage, SUBSCRIPTION_FILTERS};
use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::v5::{mqttbytes::QoS, Event};
use serde::Serialize;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub struct MessageHandler;

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    ConnectionAcknowledged,
    MessageReceived {
        topic: String,
        payload: Vec<u8>,
        retain: bool,
    },
    Disconnected,
    SubscriptionConfirmed { packet_id: u16, filters: usize },
    /// PingResp, PubAck and the like
    InfrastructureEvent(String),
    OutgoingEvent,
}

/// What to do with a received publish
#[derive(Debug)]
pub enum Disposition {
    Forward(InboundMessage),
    Ignore(&'static str),
    Reject {
        topic: EcosTopic,
        error: crate::protocol::MessageError,
    },
}

impl MessageHandler {
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(Packet::ConnAck(_)) => EventRoute::ConnectionAcknowledged,
            Event::Incoming(Packet::Publish(publish)) => EventRoute::MessageReceived {
                topic: String::from_utf8_lossy(&publish.topic).to_string(),
                payload: publish.payload.to_vec(),
                retain: publish.retain,
            },
            Event::Incoming(Packet::Disconnect(_)) => EventRoute::Disconnected,
            Event::Incoming(Packet::SubAck(suback)) => EventRoute::SubscriptionConfirmed {
                packet_id: suback.pkid,
                filters: suback.return_codes.len(),
            },
            Event::Incoming(other) => EventRoute::InfrastructureEvent(format!("{other:?}")),
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Decode a publish into an inbound message. Retained messages are
    /// replays of past traffic and are never acted on.
    pub fn classify(topic: &str, payload: &[u8], retain: bool) -> Disposition {
        if retain {
            return Disposition::Ignore("retained message");
        }

        match decode_inbound(topic, payload) {
            Ok(Some(message)) => Disposition::Forward(message),
            Ok(None) => Disposition::Ignore("topic outside the ECOS namespace"),
            Err(error) => Disposition::Reject {
                topic: parse_topic(topic),
                error,
            },
        }
    }

    /// Control traffic is exactly-once, everything else at-least-once
    pub fn qos_for_topic(topic: &str) -> QoS {
        if topic.ends_with("/control") {
            QoS::ExactlyOnce
        } else {
            QoS::AtLeastOnce
        }
    }

    /// Filters issued after every ConnAck
    pub fn subscriptions() -> Vec<(&'static str, QoS)> {
        SUBSCRIPTION_FILTERS
            .iter()
            .map(|filter| (*filter, Self::qos_for_topic(filter)))
            .collect()
    }

    pub fn format_payload<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, MqttError> {
        serde_json::to_vec(value).map_err(MqttError::SerializationError)
    }
}

/// Hands decoded messages to the inbound processor
#[derive(Default)]
pub struct MessageForwarder {
    sender: Mutex<Option<mpsc::Sender<InboundMessage>>>,
}

impl MessageForwarder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_sender(&self, sender: mpsc::Sender<InboundMessage>) {
        let mut slot = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(sender);
    }

    pub fn has_sender(&self) -> bool {
        self.sender
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    /// Forward a message; dropped with a warning when nobody is listening
    pub async fn forward(&self, message: InboundMessage) -> Result<(), String> {
        let sender = {
            let slot = self.sender.lock().unwrap_or_else(|e| e.into_inner());
            slot.clone()
        };

        let Some(sender) = sender else {
            warn!(kind = message.kind(), "No inbound processor attached; message dropped");
            return Err("No inbound sender configured".to_string());
        };

        debug!(kind = message.kind(), "Forwarding inbound message");
        sender
            .send(message)
            .await
            .map_err(|e| format!("Inbound processor is gone: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{MessageError, QualityFlag};
    use bytes::Bytes;
    use rumqttc::v5::mqttbytes::v5::{
        ConnAck, ConnectReturnCode, Disconnect, DisconnectReasonCode, Publish,
    };

    fn publish_event(topic: &str, payload: &str, retain: bool) -> Event {
        Event::Incoming(Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtLeastOnce,
            retain,
            topic: Bytes::from(topic.to_string()),
            pkid: 7,
            payload: Bytes::from(payload.to_string()),
            properties: None,
        }))
    }

    #[test]
    fn test_route_connection_events() {
        let connack = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
            properties: None,
        }));
        assert_eq!(
            MessageHandler::route_mqtt_event(&connack),
            EventRoute::ConnectionAcknowledged
        );

        let disconnect = Event::Incoming(Packet::Disconnect(Disconnect {
            reason_code: DisconnectReasonCode::NormalDisconnection,
            properties: None,
        }));
        assert_eq!(
            MessageHandler::route_mqtt_event(&disconnect),
            EventRoute::Disconnected
        );
    }

    #[test]
    fn test_route_publish() {
        let event = publish_event("ecos/P09/awg-01/telemetry", "{}", true);
        assert_eq!(
            MessageHandler::route_mqtt_event(&event),
            EventRoute::MessageReceived {
                topic: "ecos/P09/awg-01/telemetry".to_string(),
                payload: b"{}".to_vec(),
                retain: true,
            }
        );
    }

    #[test]
    fn test_classify_telemetry() {
        let payload = br#"{"measurement_type": "humidity", "measurement_value": "72.5", "unit": "%"}"#;
        match MessageHandler::classify("ecos/P09/awg-01/telemetry", payload, false) {
            Disposition::Forward(InboundMessage::Telemetry(message)) => {
                assert_eq!(message.project_code, "P09");
                assert_eq!(message.sensor_id, "awg-01");
                assert_eq!(message.measurement_value, 72.5);
                assert_eq!(message.quality_flag, QualityFlag::Valid);
            }
            other => panic!("unexpected disposition: {other:?}"),
        }
    }

    #[test]
    fn test_classify_ignores_retained_and_foreign_topics() {
        assert!(matches!(
            MessageHandler::classify("ecos/P10/loop/control", br#"{"action": "open"}"#, true),
            Disposition::Ignore(_)
        ));
        assert!(matches!(
            MessageHandler::classify("factory/line-1/status", b"{}", false),
            Disposition::Ignore(_)
        ));
    }

    #[test]
    fn test_classify_rejects_bad_payloads() {
        match MessageHandler::classify("ecos/P09/awg-01/telemetry", b"not json", false) {
            Disposition::Reject { topic, error } => {
                assert!(matches!(topic, EcosTopic::Telemetry { .. }));
                assert!(matches!(error, MessageError::InvalidJson(_)));
            }
            other => panic!("unexpected disposition: {other:?}"),
        }

        assert!(matches!(
            MessageHandler::classify("ecos/P10/loop/control", br#"{"params": {}}"#, false),
            Disposition::Reject { .. }
        ));
    }

    #[test]
    fn test_qos_selection() {
        assert_eq!(MessageHandler::qos_for_topic("ecos/P08/bulb/control"), QoS::ExactlyOnce);
        assert_eq!(MessageHandler::qos_for_topic("ecos/P08/bulb/telemetry"), QoS::AtLeastOnce);
        assert_eq!(MessageHandler::qos_for_topic("ecos/dispatcher/commands"), QoS::AtLeastOnce);

        assert_eq!(
            MessageHandler::subscriptions(),
            vec![
                ("ecos/+/+/telemetry", QoS::AtLeastOnce),
                ("ecos/+/+/control", QoS::ExactlyOnce),
                ("ecos/dispatcher/#", QoS::AtLeastOnce),
            ]
        );
    }

    #[tokio::test]
    async fn test_forwarder_delivers_to_sender() {
        let forwarder = MessageForwarder::new();
        let message = InboundMessage::Dispatcher {
            subtopic: "commands".to_string(),
            payload: serde_json::json!({"action": "status"}),
        };

        assert!(!forwarder.has_sender());
        assert!(forwarder.forward(message.clone()).await.is_err());

        let (tx, mut rx) = mpsc::channel(4);
        forwarder.set_sender(tx);
        assert!(forwarder.has_sender());
        forwarder.forward(message.clone()).await.unwrap();
        assert_eq!(rx.recv().await, Some(message));
    }
}
