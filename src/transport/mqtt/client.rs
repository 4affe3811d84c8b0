//! MQTT client I/O for the gateway
//!
//! Owns the `rumqttc` client and a supervisor task that polls the event loop,
//! subscribes on every ConnAck, forwards decoded messages to the inbound
//! processor and reconnects with the fixed backoff schedule.

use super::connection::{configure_mqtt_options, ConnectionState, MqttError, ReconnectConfig};
use super::health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
use super::message_handler::{Disposition, EventRoute, MessageForwarder, MessageHandler};
use crate::config::MqttSection;
use crate::observability::metrics;
use crate::protocol::{
    control_topic, telemetry_topic, validate_topic_segment, ControlCommand, EcosTopic,
    InboundMessage, TelemetryMessage,
};
use crate::transport::Transport;
use async_trait::async_trait;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, EventLoop};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

const REQUEST_CHANNEL_CAPACITY: usize = 10;

pub struct MqttClient {
    config: MqttSection,
    client: Arc<Mutex<AsyncClient>>,
    /// Held until `connect` moves it into the supervisor task
    event_loop: Option<Mutex<EventLoop>>,
    event_loop_handle: Option<JoinHandle<()>>,
    state_rx: Option<watch::Receiver<ConnectionState>>,
    state_tx: Option<watch::Sender<ConnectionState>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    reconnect_config: ReconnectConfig,
    forwarder: Arc<MessageForwarder>,
}

impl MqttClient {
    pub fn new(config: MqttSection) -> Result<Self, MqttError> {
        let reconnect_config = ReconnectConfig::from_section(&config);
        HealthMonitor::validate_reconnect_config(&reconnect_config)
            .map_err(MqttError::Connection)?;
        let (client, event_loop) = Self::create_connection(&config)?;

        Ok(Self {
            config,
            client: Arc::new(Mutex::new(client)),
            event_loop: Some(Mutex::new(event_loop)),
            event_loop_handle: None,
            state_rx: None,
            state_tx: None,
            shutdown_tx: None,
            reconnect_config,
            forwarder: Arc::new(MessageForwarder::new()),
        })
    }

    fn create_connection(config: &MqttSection) -> Result<(AsyncClient, EventLoop), MqttError> {
        let options = configure_mqtt_options(config)?;
        Ok(AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY))
    }

    #[allow(clippy::type_complexity)]
    fn setup_connection_channels() -> (
        (
            watch::Sender<ConnectionState>,
            watch::Receiver<ConnectionState>,
        ),
        (watch::Sender<bool>, watch::Receiver<bool>),
    ) {
        (
            watch::channel(ConnectionState::Connecting),
            watch::channel(false),
        )
    }

    /// Resolve once the supervisor reports Connected, or fail on timeout or
    /// a permanent failure.
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let wait = async {
            loop {
                match &*state_rx.borrow_and_update() {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::PermanentlyDisconnected(reason) => {
                        return Err(MqttError::Connection(format!(
                            "Permanently disconnected: {reason}"
                        )));
                    }
                    _ => {}
                }
                if state_rx.changed().await.is_err() {
                    return Err(MqttError::Connection("State channel closed".to_string()));
                }
            }
        };

        tokio::time::timeout(timeout, wait).await.map_err(|_| {
            MqttError::Connection("ConnAck timeout - no connection confirmation received".to_string())
        })?
    }

    /// Start the supervisor and wait for the first ConnAck. On timeout the
    /// supervisor keeps retrying in the background.
    pub async fn connect(&mut self) -> Result<(), MqttError> {
        let event_loop = self
            .event_loop
            .take()
            .ok_or_else(|| MqttError::Connection("Event loop already started".to_string()))?
            .into_inner();

        let ((state_tx, state_rx), (shutdown_tx, shutdown_rx)) = Self::setup_connection_channels();
        self.state_rx = Some(state_rx.clone());
        self.state_tx = Some(state_tx.clone());
        self.shutdown_tx = Some(shutdown_tx);

        info!(broker = %self.config.broker_url, "Connecting to MQTT broker");
        metrics().mqtt_connection_attempt();

        let supervisor = Supervisor {
            config: self.config.clone(),
            client: self.client.clone(),
            state_tx,
            shutdown_rx,
            reconnect_config: self.reconnect_config.clone(),
            forwarder: self.forwarder.clone(),
            attempts: 0,
        };
        let span = crate::mqtt_span!(client_id = %self.config.client_id);
        self.event_loop_handle = Some(tokio::spawn(supervisor.run(event_loop).instrument(span)));

        let timeout = HealthMonitor::calculate_connection_timeout(
            &self.reconnect_config,
            Duration::from_secs(self.config.connect_timeout_secs),
        );
        Self::wait_for_connection_confirmation(state_rx, timeout).await
    }

    pub async fn disconnect(&mut self) -> Result<(), MqttError> {
        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(true);
        }

        if self.event_loop_handle.is_some() {
            let client = self.client.lock().await;
            if let Err(e) = client.disconnect().await {
                debug!("Disconnect request not delivered: {}", e);
            }
        }

        if let Some(state_tx) = &self.state_tx {
            let _ = state_tx.send(ConnectionState::Disconnected(
                "Client disconnected".to_string(),
            ));
        }
        metrics().mqtt_connection_lost();

        if let Some(handle) = self.event_loop_handle.take() {
            match tokio::time::timeout(Duration::from_secs(2), handle).await {
                Ok(Ok(())) => info!("MQTT supervisor stopped"),
                Ok(Err(e)) if !e.is_cancelled() => warn!("MQTT supervisor ended with error: {}", e),
                Err(_) => warn!("MQTT supervisor did not stop in time"),
                _ => {}
            }
        }

        info!("MQTT client disconnected");
        Ok(())
    }

    /// None until `connect` has been called
    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.state_rx.as_ref().map(|rx| rx.borrow().clone())
    }

    pub fn is_permanently_disconnected(&self) -> bool {
        matches!(
            self.connection_state(),
            Some(ConnectionState::PermanentlyDisconnected(_))
        )
    }

    pub fn set_inbound_sender(&self, sender: mpsc::Sender<InboundMessage>) {
        self.forwarder.set_sender(sender);
    }

    fn check_connection_state(&self) -> Result<(), MqttError> {
        let state = self
            .connection_state()
            .unwrap_or_else(|| ConnectionState::Disconnected("Never connected".to_string()));
        if !HealthMonitor::can_publish(&state) {
            return Err(MqttError::NotConnected { state });
        }
        Ok(())
    }

    async fn publish_with_qos(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), MqttError> {
        self.check_connection_state()?;

        let client = self.client.lock().await;
        let result = client.publish(topic, qos, retain, payload).await;
        match result {
            Ok(()) => {
                metrics().mqtt_message_published();
                debug!(topic = %topic, ?qos, "Published MQTT message");
                Ok(())
            }
            Err(e) => {
                metrics().mqtt_publish_failed();
                Err(MqttError::PublishFailed(Box::new(e)))
            }
        }
    }

    /// Telemetry goes out at QoS 1 on `ecos/{project}/{device}/telemetry`
    pub async fn publish_telemetry(&self, message: &TelemetryMessage) -> Result<(), MqttError> {
        validate_topic_segment(&message.project_code)?;
        validate_topic_segment(&message.device_id)?;

        let topic = telemetry_topic(&message.project_code, &message.device_id);
        let payload = MessageHandler::format_payload(&message.wire_payload())?;
        self.publish_with_qos(&topic, QoS::AtLeastOnce, false, payload)
            .await
    }

    /// Commands go out at QoS 2 on `ecos/{project}/{device}/control`
    pub async fn publish_control(
        &self,
        project_code: &str,
        device_id: &str,
        command: &ControlCommand,
    ) -> Result<(), MqttError> {
        validate_topic_segment(project_code)?;
        validate_topic_segment(device_id)?;

        let topic = control_topic(project_code, device_id);
        let payload = MessageHandler::format_payload(command)?;
        self.publish_with_qos(&topic, QoS::ExactlyOnce, false, payload)
            .await?;
        info!(topic = %topic, action = %command.action, "Published control command");
        Ok(())
    }
}

/// State owned by the background task that drives the event loop
struct Supervisor {
    config: MqttSection,
    client: Arc<Mutex<AsyncClient>>,
    state_tx: watch::Sender<ConnectionState>,
    shutdown_rx: watch::Receiver<bool>,
    reconnect_config: ReconnectConfig,
    forwarder: Arc<MessageForwarder>,
    attempts: u32,
}

impl Supervisor {
    async fn run(mut self, mut event_loop: EventLoop) {
        loop {
            tokio::select! {
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping MQTT supervisor");
                        break;
                    }
                }
                polled = event_loop.poll() => {
                    let keep_running = match polled {
                        Ok(event) => {
                            let route = MessageHandler::route_mqtt_event(&event);
                            self.process_event_route(route, &mut event_loop).await
                        }
                        Err(e) => {
                            metrics().mqtt_connection_lost();
                            self.transition(ConnectionEvent::NetworkError(e.to_string()));
                            self.reconnect(&mut event_loop).await
                        }
                    };
                    if !keep_running {
                        break;
                    }
                }
            }
        }
        info!("MQTT supervisor stopped");
    }

    fn transition(&self, event: ConnectionEvent) {
        let _ = self
            .state_tx
            .send(HealthMonitor::determine_next_state(event));
    }

    /// Returns false when the supervisor should stop
    async fn process_event_route(&mut self, route: EventRoute, event_loop: &mut EventLoop) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged => {
                self.attempts = 0;
                metrics().mqtt_connection_established();
                self.transition(ConnectionEvent::ConnAckReceived);
                self.subscribe_all().await;
                true
            }
            EventRoute::MessageReceived {
                topic,
                payload,
                retain,
            } => {
                self.handle_message(&topic, &payload, retain).await;
                true
            }
            EventRoute::Disconnected => {
                metrics().mqtt_connection_lost();
                self.transition(ConnectionEvent::DisconnectedByBroker);
                self.reconnect(event_loop).await
            }
            EventRoute::SubscriptionConfirmed { packet_id, filters } => {
                debug!(packet_id, filters, "Subscription acknowledged");
                true
            }
            EventRoute::InfrastructureEvent(event) => {
                debug!(target: "mqtt_transport", "MQTT event: {}", event);
                true
            }
            EventRoute::OutgoingEvent => true,
        }
    }

    async fn subscribe_all(&self) {
        let client = self.client.lock().await;
        for (filter, qos) in MessageHandler::subscriptions() {
            match client.subscribe(filter, qos).await {
                Ok(()) => info!(filter, "Subscribed"),
                Err(e) => error!(filter, "Failed to subscribe: {}", e),
            }
        }
    }

    async fn handle_message(&self, topic: &str, payload: &[u8], retain: bool) {
        match MessageHandler::classify(topic, payload, retain) {
            Disposition::Forward(message) => {
                if let Err(e) = self.forwarder.forward(message).await {
                    warn!(topic = %topic, "Inbound message not delivered: {}", e);
                }
            }
            Disposition::Ignore(reason) => {
                debug!(topic = %topic, reason, "Ignoring MQTT message");
            }
            Disposition::Reject { topic: kind, error } => {
                if matches!(kind, EcosTopic::Telemetry { .. }) {
                    metrics().telemetry_rejected();
                }
                warn!(topic = %topic, error = %error, "Rejected MQTT message");
            }
        }
    }

    /// Sleep unless shutdown arrives first; false means stop
    async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
        tokio::select! {
            changed = shutdown_rx.changed() => changed.is_ok() && !*shutdown_rx.borrow(),
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
        }
    }

    async fn reconnect(&mut self, event_loop: &mut EventLoop) -> bool {
        let decision = HealthMonitor::should_attempt_reconnection(
            self.attempts,
            &self.reconnect_config,
            *self.shutdown_rx.borrow(),
        );

        match decision {
            ReconnectionDecision::Proceed { attempt, delay_ms } => {
                self.attempts = attempt;
                self.transition(ConnectionEvent::ReconnectionStarted(attempt));
                info!(attempt, delay_ms, "Reconnecting to MQTT broker");

                if !Self::interruptible_sleep(self.shutdown_rx.clone(), delay_ms).await {
                    return false;
                }

                metrics().mqtt_connection_attempt();
                match MqttClient::create_connection(&self.config) {
                    Ok((client, new_event_loop)) => {
                        *event_loop = new_event_loop;
                        *self.client.lock().await = client;
                    }
                    Err(e) => error!("Failed to create MQTT connection: {}", e),
                }
                true
            }
            ReconnectionDecision::AbortShutdownRequested => false,
            ReconnectionDecision::AbortMaxAttemptsExceeded => {
                let reason = format!("Max reconnection attempts ({}) exceeded", self.attempts);
                self.transition(ConnectionEvent::PermanentFailure(reason));
                false
            }
        }
    }
}

#[async_trait]
impl Transport for MqttClient {
    type Error = MqttError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        MqttClient::connect(self).await
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        MqttClient::disconnect(self).await
    }

    async fn publish_telemetry(&self, message: &TelemetryMessage) -> Result<(), Self::Error> {
        MqttClient::publish_telemetry(self, message).await
    }

    async fn publish_control(
        &self,
        project_code: &str,
        device_id: &str,
        command: &ControlCommand,
    ) -> Result<(), Self::Error> {
        MqttClient::publish_control(self, project_code, device_id, command).await
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), Self::Error> {
        self.publish_with_qos(topic, MessageHandler::qos_for_topic(topic), retain, payload)
            .await
    }

    fn is_connected(&self) -> bool {
        matches!(self.connection_state(), Some(ConnectionState::Connected))
    }

    fn connection_state(&self) -> Option<ConnectionState> {
        MqttClient::connection_state(self)
    }

    fn is_permanently_disconnected(&self) -> bool {
        MqttClient::is_permanently_disconnected(self)
    }

    fn set_inbound_sender(&self, sender: mpsc::Sender<InboundMessage>) {
        MqttClient::set_inbound_sender(self, sender)
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(true);
        }
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::QualityFlag;

    fn offline_config() -> MqttSection {
        MqttSection {
            enabled: true,
            broker_url: "mqtt://localhost:1883".to_string(),
            ..MqttSection::default()
        }
    }

    #[test]
    fn test_setup_connection_channels() {
        let ((state_tx, state_rx), (shutdown_tx, shutdown_rx)) =
            MqttClient::setup_connection_channels();

        assert_eq!(*state_rx.borrow(), ConnectionState::Connecting);
        assert!(!*shutdown_rx.borrow());

        state_tx.send(ConnectionState::Connected).unwrap();
        assert_eq!(*state_rx.borrow(), ConnectionState::Connected);
        shutdown_tx.send(true).unwrap();
        assert!(*shutdown_rx.borrow());
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_success() {
        let ((state_tx, state_rx), _) = MqttClient::setup_connection_channels();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = state_tx.send(ConnectionState::Connected);
        });

        let result =
            MqttClient::wait_for_connection_confirmation(state_rx, Duration::from_millis(500)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_wait_survives_transient_disconnects() {
        let ((state_tx, state_rx), _) = MqttClient::setup_connection_channels();
        tokio::spawn(async move {
            let _ = state_tx.send(ConnectionState::Disconnected("refused".to_string()));
            tokio::time::sleep(Duration::from_millis(5)).await;
            let _ = state_tx.send(ConnectionState::Reconnecting(1));
            tokio::time::sleep(Duration::from_millis(5)).await;
            let _ = state_tx.send(ConnectionState::Connected);
            tokio::time::sleep(Duration::from_millis(100)).await;
        });

        let result =
            MqttClient::wait_for_connection_confirmation(state_rx, Duration::from_millis(500)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_timeout() {
        let ((state_tx, state_rx), _) = MqttClient::setup_connection_channels();
        let _keep_open = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            drop(state_tx);
        });

        let result =
            MqttClient::wait_for_connection_confirmation(state_rx, Duration::from_millis(10)).await;
        let message = result.unwrap_err().to_string();
        assert!(message.contains("ConnAck timeout"), "{message}");
    }

    #[tokio::test]
    async fn test_wait_fails_on_permanent_disconnect() {
        let ((state_tx, state_rx), _) = MqttClient::setup_connection_channels();
        state_tx
            .send(ConnectionState::PermanentlyDisconnected("gave up".to_string()))
            .unwrap();

        let result =
            MqttClient::wait_for_connection_confirmation(state_rx, Duration::from_millis(100)).await;
        assert!(result.unwrap_err().to_string().contains("gave up"));
    }

    #[tokio::test]
    async fn test_interruptible_sleep() {
        let (_, (shutdown_tx, shutdown_rx)) = MqttClient::setup_connection_channels();
        assert!(Supervisor::interruptible_sleep(shutdown_rx.clone(), 5).await);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let _ = shutdown_tx.send(true);
        });
        assert!(!Supervisor::interruptible_sleep(shutdown_rx, 1_000).await);
    }

    #[tokio::test]
    async fn test_state_before_connect() {
        let client = MqttClient::new(offline_config()).unwrap();
        assert!(client.connection_state().is_none());
        assert!(!client.is_permanently_disconnected());
        assert!(!Transport::is_connected(&client));
    }

    #[tokio::test]
    async fn test_publish_fails_without_connection() {
        let client = MqttClient::new(offline_config()).unwrap();
        let reading = TelemetryMessage::new("P09", "awg-01", "humidity", 71.0, "%", QualityFlag::Valid);

        assert!(matches!(
            client.publish_telemetry(&reading).await,
            Err(MqttError::NotConnected { .. })
        ));
        assert!(matches!(
            client
                .publish_control("P09", "awg-01", &ControlCommand::new("start", Default::default()))
                .await,
            Err(MqttError::NotConnected { .. })
        ));
        assert!(Transport::publish(&client, "ecos/dispatcher/x", b"{}".to_vec(), false)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_publish_rejects_wildcard_segments() {
        let client = MqttClient::new(offline_config()).unwrap();
        let result = client
            .publish_control("P09", "awg/#", &ControlCommand::new("start", Default::default()))
            .await;
        assert!(matches!(result, Err(MqttError::InvalidTopic(_))));
    }

    #[tokio::test]
    async fn test_zero_attempt_limit_is_rejected() {
        let mut config = offline_config();
        config.max_reconnect_attempts = Some(0);
        assert!(MqttClient::new(config).is_err());
    }

    #[tokio::test]
    async fn test_disconnect_without_connection() {
        let mut client = MqttClient::new(offline_config()).unwrap();
        assert!(client.disconnect().await.is_ok());
    }
}
