//! Inbound message processing
//!
//! The MQTT supervisor decodes publishes into [`InboundMessage`] values and
//! sends them down a channel; [`InboundProcessor`] drains that channel.
//! Telemetry marks its project active in the dispatcher, control commands
//! are logged and dispatcher payloads that name an `action` are executed.

use crate::dispatcher::{DispatchAction, DispatchResponse, Dispatcher};
use crate::observability::metrics;
use crate::protocol::{ControlCommand, InboundMessage, TelemetryMessage};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub const INBOUND_CHANNEL_CAPACITY: usize = 256;

/// What the processor did with one message
#[derive(Debug, PartialEq)]
pub enum InboundOutcome {
    TelemetryRecorded { project_code: String },
    ControlLogged { project_code: String, action: String },
    Dispatched(DispatchResponse),
    /// Dispatcher traffic without an action, e.g. results published by peers
    DispatcherNotice { subtopic: String },
    Rejected { reason: String },
}

pub struct InboundProcessor {
    dispatcher: Arc<Dispatcher>,
}

impl InboundProcessor {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    pub fn channel() -> (mpsc::Sender<InboundMessage>, mpsc::Receiver<InboundMessage>) {
        mpsc::channel(INBOUND_CHANNEL_CAPACITY)
    }

    /// Drain the channel until every sender is gone
    pub async fn run(self, mut receiver: mpsc::Receiver<InboundMessage>) {
        info!("Inbound processor running");
        while let Some(message) = receiver.recv().await {
            let outcome = self.process(message);
            debug!(?outcome, "Inbound message processed");
        }
        info!("Inbound processor stopped");
    }

    pub fn process(&self, message: InboundMessage) -> InboundOutcome {
        match message {
            InboundMessage::Telemetry(reading) => self.record_telemetry(&reading),
            InboundMessage::Control {
                project_code,
                device_id,
                command,
            } => Self::log_control(project_code, &device_id, &command),
            InboundMessage::Dispatcher { subtopic, payload } => {
                self.run_dispatcher_payload(subtopic, payload)
            }
        }
    }

    fn record_telemetry(&self, reading: &TelemetryMessage) -> InboundOutcome {
        metrics().telemetry_received();
        self.dispatcher.mark_project_active(&reading.project_code);
        info!(
            project_code = %reading.project_code,
            device_id = %reading.device_id,
            sensor_id = %reading.sensor_id,
            measurement_type = %reading.measurement_type,
            value = reading.measurement_value,
            unit = %reading.unit,
            quality = reading.quality_flag.as_str(),
            "Telemetry received"
        );
        InboundOutcome::TelemetryRecorded {
            project_code: reading.project_code.clone(),
        }
    }

    fn log_control(project_code: String, device_id: &str, command: &ControlCommand) -> InboundOutcome {
        metrics().control_received();
        info!(
            project_code = %project_code,
            device_id,
            action = %command.action,
            "Control command observed"
        );
        InboundOutcome::ControlLogged {
            project_code,
            action: command.action.clone(),
        }
    }

    fn run_dispatcher_payload(&self, subtopic: String, payload: Value) -> InboundOutcome {
        let Value::Object(object) = payload else {
            warn!(subtopic = %subtopic, "Dispatcher payload is not an object");
            return InboundOutcome::Rejected {
                reason: "Dispatcher payload must be a JSON object".to_string(),
            };
        };

        let action = match object.get("action") {
            None | Some(Value::Null) => {
                debug!(subtopic = %subtopic, "Dispatcher message without action");
                return InboundOutcome::DispatcherNotice { subtopic };
            }
            Some(Value::String(action)) => action.clone(),
            Some(other) => {
                return InboundOutcome::Rejected {
                    reason: format!("action must be a string, got {other}"),
                }
            }
        };

        let params = match object.get("params") {
            Some(Value::Object(params)) => params.clone(),
            _ => Map::new(),
        };

        match DispatchAction::parse(&action, &params) {
            Ok(parsed) => {
                info!(subtopic = %subtopic, action = %action, "Running dispatcher action from MQTT");
                InboundOutcome::Dispatched(self.dispatcher.dispatch(parsed))
            }
            Err(e) => {
                warn!(subtopic = %subtopic, error = %e, "Invalid dispatcher action");
                InboundOutcome::Rejected {
                    reason: e.to_string(),
                }
            }
        }
    }
}
