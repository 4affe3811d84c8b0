//! Cross-project coordination
//!
//! The dispatcher turns forecast signals from one initiative into hardware
//! commands for another (solar excess driving water generation or ground-loop
//! heat storage). Commands wait in an in-memory queue until hardware picks
//! them up. A single [`Dispatcher`] is shared behind an `Arc` by the HTTP
//! gateway and the MQTT inbound processor.

use crate::dispatch_span;
use crate::observability::metrics;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

/// Irradiance above this (W/m²) counts as excess solar power
pub const IRRADIANCE_BASELINE: f64 = 500.0;
pub const MIN_EXCESS_POWER: f64 = 200.0;
pub const MIN_HUMIDITY: f64 = 70.0;
pub const AWG_RUN_HOURS: u32 = 2;
/// Fraction of solar excess recoverable as storable heat
pub const HEAT_RECOVERY_EFFICIENCY: f64 = 0.3;
/// Minimum storable heat (kW) worth a storage cycle
pub const MIN_STORABLE_HEAT_KW: f64 = 5.0;

const ENERGY_SOURCE: &str = "solar_excess";

/// Initiative a command is addressed to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TargetProject {
    #[serde(rename = "P09_AWG")]
    Awg,
    #[serde(rename = "P10_GEOTHERMAL")]
    Geothermal,
}

/// Hardware instruction with its parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "command", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HardwareCommand {
    StartProduction {
        duration_hours: u32,
        expected_output: f64,
        energy_source: String,
    },
    StoreHeat {
        heat_kw: f64,
        source: String,
    },
}

/// Queued command awaiting hardware execution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchCommand {
    pub command_id: Uuid,
    pub project: TargetProject,
    #[serde(flatten)]
    pub command: HardwareCommand,
    pub timestamp: String,
}

impl DispatchCommand {
    fn new(project: TargetProject, command: HardwareCommand) -> Self {
        Self {
            command_id: Uuid::new_v4(),
            project,
            command,
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// Result of a coordination attempt
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CoordinationOutcome {
    Dispatched {
        action: DispatchCommand,
        reasoning: String,
    },
    Hold {
        reasoning: String,
    },
}

impl CoordinationOutcome {
    pub fn is_dispatched(&self) -> bool {
        matches!(self, CoordinationOutcome::Dispatched { .. })
    }

    pub fn reasoning(&self) -> &str {
        match self {
            CoordinationOutcome::Dispatched { reasoning, .. } => reasoning,
            CoordinationOutcome::Hold { reasoning } => reasoning,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SystemStatus {
    pub timestamp: String,
    pub active_projects: usize,
    pub pending_commands: usize,
    pub system_health: String,
}

/// Solar forecast signal; only the predicted irradiance matters here
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct SolarSignal {
    #[serde(default)]
    pub predicted_irradiance: f64,
}

/// Humidity forecast signal
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct HumiditySignal {
    #[serde(default)]
    pub predicted_humidity: f64,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct SolarAwgParams {
    #[serde(default)]
    pub solar_forecast: SolarSignal,
    #[serde(default)]
    pub humidity_forecast: HumiditySignal,
    #[serde(default)]
    pub water_demand: f64,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct GeothermalSolarParams {
    #[serde(default)]
    pub solar_excess: f64,
    #[serde(default)]
    pub geothermal_capacity: f64,
}

/// Named dispatcher action with its parameters
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchAction {
    CoordinateSolarAwg(SolarAwgParams),
    CoordinateGeothermalSolar(GeothermalSolarParams),
    GetQueue,
    ClearQueue,
    Status,
    Unknown(String),
}

impl DispatchAction {
    /// Parse an action name and its params object; missing params take defaults
    pub fn parse(action: &str, params: &Map<String, Value>) -> Result<Self, DispatchError> {
        let parsed = match action {
            "coordinate_solar_awg" => {
                DispatchAction::CoordinateSolarAwg(decode_params(action, params)?)
            }
            "coordinate_geothermal_solar" => {
                DispatchAction::CoordinateGeothermalSolar(decode_params(action, params)?)
            }
            "get_queue" => DispatchAction::GetQueue,
            "clear_queue" => DispatchAction::ClearQueue,
            "status" => DispatchAction::Status,
            other => DispatchAction::Unknown(other.to_string()),
        };
        Ok(parsed)
    }

    pub fn name(&self) -> &str {
        match self {
            DispatchAction::CoordinateSolarAwg(_) => "coordinate_solar_awg",
            DispatchAction::CoordinateGeothermalSolar(_) => "coordinate_geothermal_solar",
            DispatchAction::GetQueue => "get_queue",
            DispatchAction::ClearQueue => "clear_queue",
            DispatchAction::Status => "status",
            DispatchAction::Unknown(name) => name,
        }
    }
}

fn decode_params<T: for<'de> Deserialize<'de>>(
    action: &str,
    params: &Map<String, Value>,
) -> Result<T, DispatchError> {
    serde_json::from_value(Value::Object(params.clone())).map_err(|source| {
        DispatchError::InvalidParams {
            action: action.to_string(),
            source,
        }
    })
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Invalid params for {action}: {source}")]
    InvalidParams {
        action: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Response of [`Dispatcher::dispatch`]
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum DispatchResponse {
    Coordination(CoordinationOutcome),
    Queue { queue: Vec<DispatchCommand> },
    Status(SystemStatus),
    Message {
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl DispatchResponse {
    fn cleared() -> Self {
        DispatchResponse::Message {
            status: "cleared".to_string(),
            message: None,
        }
    }

    fn unknown_action(action: &str) -> Self {
        DispatchResponse::Message {
            status: "error".to_string(),
            message: Some(format!("Unknown action: {action}")),
        }
    }
}

/// Thread-safe coordination state
#[derive(Debug, Default)]
pub struct Dispatcher {
    active_projects: Mutex<BTreeSet<String>>,
    command_queue: Mutex<Vec<DispatchCommand>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start AWG production when excess solar meets high humidity
    pub fn coordinate_solar_awg(
        &self,
        solar_forecast: &SolarSignal,
        humidity_forecast: &HumiditySignal,
        water_demand: f64,
    ) -> CoordinationOutcome {
        let surplus = solar_forecast.predicted_irradiance - IRRADIANCE_BASELINE;
        let excess_power = surplus.max(0.0);
        let humidity = humidity_forecast.predicted_humidity;

        if excess_power > MIN_EXCESS_POWER && humidity > MIN_HUMIDITY {
            let action = DispatchCommand::new(
                TargetProject::Awg,
                HardwareCommand::StartProduction {
                    duration_hours: AWG_RUN_HOURS,
                    expected_output: water_demand,
                    energy_source: ENERGY_SOURCE.to_string(),
                },
            );
            self.enqueue(action.clone());
            info!(
                command_id = %action.command_id,
                excess_power,
                humidity,
                "Dispatched AWG production"
            );

            CoordinationOutcome::Dispatched {
                action,
                reasoning: "Excess solar power and high humidity detected".to_string(),
            }
        } else {
            metrics().command_held();
            debug!(excess_power, humidity, "Holding AWG production");
            // A clamped surplus reads as a plain zero
            let power = if surplus > 0.0 {
                format!("{excess_power:?}")
            } else {
                "0".to_string()
            };
            CoordinationOutcome::Hold {
                reasoning: format!("Conditions not optimal (power={power}, humidity={humidity:?})"),
            }
        }
    }

    /// Store recoverable solar heat in the ground loop
    pub fn coordinate_geothermal_solar(
        &self,
        solar_excess: f64,
        geothermal_capacity: f64,
    ) -> CoordinationOutcome {
        let storable_heat = (solar_excess * HEAT_RECOVERY_EFFICIENCY).min(geothermal_capacity);

        if storable_heat > MIN_STORABLE_HEAT_KW {
            let action = DispatchCommand::new(
                TargetProject::Geothermal,
                HardwareCommand::StoreHeat {
                    heat_kw: storable_heat,
                    source: ENERGY_SOURCE.to_string(),
                },
            );
            self.enqueue(action.clone());
            info!(
                command_id = %action.command_id,
                heat_kw = storable_heat,
                "Dispatched ground loop heat storage"
            );

            CoordinationOutcome::Dispatched {
                action,
                reasoning: "Solar excess heat available for ground loop storage".to_string(),
            }
        } else {
            metrics().command_held();
            debug!(storable_heat, "Holding heat storage");
            CoordinationOutcome::Hold {
                reasoning: "Insufficient heat for storage".to_string(),
            }
        }
    }

    /// Snapshot of pending commands in insertion order
    pub fn command_queue(&self) -> Vec<DispatchCommand> {
        self.queue().clone()
    }

    pub fn clear_command_queue(&self) {
        let mut queue = self.queue();
        let cleared = queue.len();
        queue.clear();
        info!(cleared, "Command queue cleared");
    }

    pub fn mark_project_active(&self, project_code: &str) {
        let mut active = lock(&self.active_projects);
        if active.insert(project_code.to_string()) {
            info!(project_code, "Project became active");
        }
    }

    pub fn active_projects(&self) -> Vec<String> {
        lock(&self.active_projects).iter().cloned().collect()
    }

    pub fn system_status(&self) -> SystemStatus {
        SystemStatus {
            timestamp: Utc::now().to_rfc3339(),
            active_projects: lock(&self.active_projects).len(),
            pending_commands: self.queue().len(),
            system_health: "operational".to_string(),
        }
    }

    /// Execute a named action
    pub fn dispatch(&self, action: DispatchAction) -> DispatchResponse {
        let span = dispatch_span!(action = action.name());
        let _guard = span.enter();

        match action {
            DispatchAction::CoordinateSolarAwg(params) => {
                DispatchResponse::Coordination(self.coordinate_solar_awg(
                    &params.solar_forecast,
                    &params.humidity_forecast,
                    params.water_demand,
                ))
            }
            DispatchAction::CoordinateGeothermalSolar(params) => DispatchResponse::Coordination(
                self.coordinate_geothermal_solar(params.solar_excess, params.geothermal_capacity),
            ),
            DispatchAction::GetQueue => DispatchResponse::Queue {
                queue: self.command_queue(),
            },
            DispatchAction::ClearQueue => {
                self.clear_command_queue();
                DispatchResponse::cleared()
            }
            DispatchAction::Status => DispatchResponse::Status(self.system_status()),
            DispatchAction::Unknown(name) => DispatchResponse::unknown_action(&name),
        }
    }

    fn enqueue(&self, command: DispatchCommand) {
        self.queue().push(command);
        metrics().command_dispatched();
    }

    fn queue(&self) -> MutexGuard<'_, Vec<DispatchCommand>> {
        lock(&self.command_queue)
    }
}

// A panic while holding the lock cannot leave the queue half-written, so a
// poisoned lock is still safe to use.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn solar(irradiance: f64) -> SolarSignal {
        SolarSignal {
            predicted_irradiance: irradiance,
        }
    }

    fn humidity(value: f64) -> HumiditySignal {
        HumiditySignal {
            predicted_humidity: value,
        }
    }

    #[test]
    fn test_solar_awg_dispatches() {
        let dispatcher = Dispatcher::new();
        let outcome = dispatcher.coordinate_solar_awg(&solar(800.0), &humidity(75.0), 50.0);

        match &outcome {
            CoordinationOutcome::Dispatched { action, reasoning } => {
                assert_eq!(action.project, TargetProject::Awg);
                assert_eq!(
                    action.command,
                    HardwareCommand::StartProduction {
                        duration_hours: 2,
                        expected_output: 50.0,
                        energy_source: "solar_excess".to_string()
                    }
                );
                assert_eq!(reasoning, "Excess solar power and high humidity detected");
            }
            other => panic!("expected dispatch, got {other:?}"),
        }
        assert_eq!(dispatcher.command_queue().len(), 1);
    }

    #[test]
    fn test_solar_awg_thresholds_are_strict() {
        let dispatcher = Dispatcher::new();
        // Exactly 200 W/m² of excess is not enough
        let outcome = dispatcher.coordinate_solar_awg(&solar(700.0), &humidity(75.0), 10.0);
        assert_eq!(
            outcome,
            CoordinationOutcome::Hold {
                reasoning: "Conditions not optimal (power=200.0, humidity=75.0)".to_string()
            }
        );

        let outcome = dispatcher.coordinate_solar_awg(&solar(900.0), &humidity(70.0), 10.0);
        assert!(!outcome.is_dispatched());

        let outcome = dispatcher.coordinate_solar_awg(&solar(100.0), &humidity(90.0), 10.0);
        assert_eq!(
            outcome.reasoning(),
            "Conditions not optimal (power=0, humidity=90.0)"
        );

        let outcome = dispatcher.coordinate_solar_awg(&solar(IRRADIANCE_BASELINE), &humidity(90.0), 10.0);
        assert_eq!(
            outcome.reasoning(),
            "Conditions not optimal (power=0, humidity=90.0)"
        );
        assert!(dispatcher.command_queue().is_empty());
    }

    #[test]
    fn test_geothermal_storage() {
        let dispatcher = Dispatcher::new();
        let outcome = dispatcher.coordinate_geothermal_solar(50.0, 100.0);
        match outcome {
            CoordinationOutcome::Dispatched { action, .. } => {
                assert_eq!(action.project, TargetProject::Geothermal);
                match action.command {
                    HardwareCommand::StoreHeat { heat_kw, source } => {
                        assert!((heat_kw - 15.0).abs() < 1e-9);
                        assert_eq!(source, "solar_excess");
                    }
                    other => panic!("unexpected command {other:?}"),
                }
            }
            other => panic!("expected dispatch, got {other:?}"),
        }

        // Capacity caps the storable heat
        let capped = dispatcher.coordinate_geothermal_solar(1000.0, 5.0);
        assert_eq!(capped.reasoning(), "Insufficient heat for storage");
    }

    #[test]
    fn test_queue_lifecycle() {
        let dispatcher = Dispatcher::new();
        dispatcher.coordinate_solar_awg(&solar(800.0), &humidity(75.0), 50.0);
        dispatcher.coordinate_geothermal_solar(50.0, 100.0);

        let queue = dispatcher.command_queue();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue[0].project, TargetProject::Awg);
        assert_eq!(queue[1].project, TargetProject::Geothermal);
        assert_ne!(queue[0].command_id, queue[1].command_id);

        dispatcher.clear_command_queue();
        assert!(dispatcher.command_queue().is_empty());
    }

    #[test]
    fn test_system_status_counts() {
        let dispatcher = Dispatcher::new();
        dispatcher.mark_project_active("P09");
        dispatcher.mark_project_active("P09");
        dispatcher.mark_project_active("P12");
        dispatcher.coordinate_geothermal_solar(50.0, 100.0);

        let status = dispatcher.system_status();
        assert_eq!(status.active_projects, 2);
        assert_eq!(status.pending_commands, 1);
        assert_eq!(status.system_health, "operational");
        assert_eq!(dispatcher.active_projects(), vec!["P09", "P12"]);
    }

    #[test]
    fn test_command_serialization_shape() {
        let dispatcher = Dispatcher::new();
        dispatcher.coordinate_solar_awg(&solar(800.0), &humidity(75.0), 50.0);
        let value = serde_json::to_value(&dispatcher.command_queue()[0]).unwrap();

        assert_eq!(value["project"], "P09_AWG");
        assert_eq!(value["command"], "START_PRODUCTION");
        assert_eq!(value["duration_hours"], 2);
        assert_eq!(value["energy_source"], "solar_excess");
        assert!(value["command_id"].is_string());
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_dispatch_actions() {
        let dispatcher = Dispatcher::new();
        let params = json!({
            "solar_forecast": {"predicted_irradiance": 800.0, "confidence_lower": 700.0},
            "humidity_forecast": {"predicted_humidity": 75.0},
            "water_demand": 50.0
        });
        let action =
            DispatchAction::parse("coordinate_solar_awg", params.as_object().unwrap()).unwrap();
        let value = serde_json::to_value(dispatcher.dispatch(action)).unwrap();
        assert_eq!(value["status"], "dispatched");
        assert_eq!(value["action"]["project"], "P09_AWG");

        let queue = dispatcher.dispatch(DispatchAction::GetQueue);
        assert_eq!(serde_json::to_value(queue).unwrap()["queue"].as_array().unwrap().len(), 1);

        let cleared = serde_json::to_value(dispatcher.dispatch(DispatchAction::ClearQueue)).unwrap();
        assert_eq!(cleared, json!({"status": "cleared"}));
        assert!(dispatcher.command_queue().is_empty());

        let status = serde_json::to_value(dispatcher.dispatch(DispatchAction::Status)).unwrap();
        assert_eq!(status["system_health"], "operational");
    }

    #[test]
    fn test_unknown_and_defaulted_actions() {
        let dispatcher = Dispatcher::new();
        let empty = Map::new();

        let unknown = DispatchAction::parse("launch_rocket", &empty).unwrap();
        let value = serde_json::to_value(dispatcher.dispatch(unknown)).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["message"], "Unknown action: launch_rocket");

        // Missing params default to zero, which always holds
        let action = DispatchAction::parse("coordinate_geothermal_solar", &empty).unwrap();
        let value = serde_json::to_value(dispatcher.dispatch(action)).unwrap();
        assert_eq!(value["status"], "hold");
    }

    #[test]
    fn test_invalid_params_are_rejected() {
        let params = json!({"solar_excess": "lots"});
        let result = DispatchAction::parse("coordinate_geothermal_solar", params.as_object().unwrap());
        assert!(matches!(result, Err(DispatchError::InvalidParams { .. })));
    }
}
