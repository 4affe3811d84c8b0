//! Pure reconnection and state-transition logic for the MQTT client
//!
//! Nothing here touches the network; the client's supervisor task feeds
//! events in and acts on the decisions that come out.

use super::connection::{ConnectionState, ReconnectConfig};
use std::time::Duration;
use tracing::{error, info, warn};

pub struct HealthMonitor;

/// Decision result for a reconnection attempt
#[derive(Debug, PartialEq)]
pub enum ReconnectionDecision {
    Proceed { attempt: u32, delay_ms: u64 },
    AbortShutdownRequested,
    AbortMaxAttemptsExceeded,
}

/// Connection events that drive state transitions
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    ConnAckReceived,
    DisconnectedByBroker,
    NetworkError(String),
    ReconnectionStarted(u32),
    PermanentFailure(String),
}

impl HealthMonitor {
    /// Decide whether the supervisor should try again, and after how long
    pub fn should_attempt_reconnection(
        current_attempts: u32,
        config: &ReconnectConfig,
        shutdown_requested: bool,
    ) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }

        if let Some(max_attempts) = config.max_attempts {
            if current_attempts >= max_attempts {
                return ReconnectionDecision::AbortMaxAttemptsExceeded;
            }
        }

        let attempt = current_attempts + 1;
        ReconnectionDecision::Proceed {
            attempt,
            delay_ms: config.calculate_backoff_delay(attempt),
        }
    }

    /// How long `connect` waits for the first ConnAck. Bounded schedules wait
    /// for every retry plus a grace period; unbounded ones use `default`.
    pub fn calculate_connection_timeout(config: &ReconnectConfig, default: Duration) -> Duration {
        match config.calculate_max_total_time() {
            Some(total_ms) => Duration::from_millis(total_ms) + default,
            None => default,
        }
    }

    pub fn determine_next_state(event: ConnectionEvent) -> ConnectionState {
        match event {
            ConnectionEvent::ConnAckReceived => {
                info!("MQTT broker accepted the gateway connection");
                ConnectionState::Connected
            }
            ConnectionEvent::DisconnectedByBroker => {
                warn!("MQTT broker closed the gateway connection");
                ConnectionState::Disconnected("Broker disconnected".to_string())
            }
            ConnectionEvent::NetworkError(reason) => {
                error!(reason = %reason, "MQTT event loop error");
                ConnectionState::Disconnected(reason)
            }
            ConnectionEvent::ReconnectionStarted(attempt) => ConnectionState::Reconnecting(attempt),
            ConnectionEvent::PermanentFailure(reason) => {
                error!(reason = %reason, "MQTT connection permanently failed");
                ConnectionState::PermanentlyDisconnected(reason)
            }
        }
    }

    pub fn can_publish(state: &ConnectionState) -> bool {
        matches!(state, ConnectionState::Connected)
    }

    pub fn validate_reconnect_config(config: &ReconnectConfig) -> Result<(), String> {
        if config.max_attempts == Some(0) {
            return Err("max_attempts must be greater than 0 or None for unlimited".to_string());
        }
        if config.sustained_delay == 0 {
            return Err("sustained_delay must be greater than 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounded(max_attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            max_attempts: Some(max_attempts),
            ..ReconnectConfig::default()
        }
    }

    #[test]
    fn test_reconnection_follows_backoff_pattern() {
        let config = ReconnectConfig::default();
        let decisions: Vec<ReconnectionDecision> = [0, 1, 2, 3, 9]
            .into_iter()
            .map(|attempts| HealthMonitor::should_attempt_reconnection(attempts, &config, false))
            .collect();

        assert_eq!(
            decisions,
            vec![
                ReconnectionDecision::Proceed { attempt: 1, delay_ms: 25 },
                ReconnectionDecision::Proceed { attempt: 2, delay_ms: 50 },
                ReconnectionDecision::Proceed { attempt: 3, delay_ms: 100 },
                ReconnectionDecision::Proceed { attempt: 4, delay_ms: 250 },
                ReconnectionDecision::Proceed { attempt: 10, delay_ms: 250 },
            ]
        );
    }

    #[test]
    fn test_shutdown_wins_over_retry() {
        let decision = HealthMonitor::should_attempt_reconnection(0, &ReconnectConfig::default(), true);
        assert_eq!(decision, ReconnectionDecision::AbortShutdownRequested);
    }

    #[test]
    fn test_bounded_attempts_are_exhausted() {
        let config = bounded(3);
        assert!(matches!(
            HealthMonitor::should_attempt_reconnection(2, &config, false),
            ReconnectionDecision::Proceed { attempt: 3, .. }
        ));
        assert_eq!(
            HealthMonitor::should_attempt_reconnection(3, &config, false),
            ReconnectionDecision::AbortMaxAttemptsExceeded
        );
    }

    #[test]
    fn test_connection_timeout() {
        let default = Duration::from_secs(10);
        assert_eq!(
            HealthMonitor::calculate_connection_timeout(&ReconnectConfig::default(), default),
            default
        );
        assert_eq!(
            HealthMonitor::calculate_connection_timeout(&bounded(4), default),
            Duration::from_millis(425) + default
        );
    }

    #[test]
    fn test_state_transitions() {
        assert_eq!(
            HealthMonitor::determine_next_state(ConnectionEvent::ConnAckReceived),
            ConnectionState::Connected
        );
        assert_eq!(
            HealthMonitor::determine_next_state(ConnectionEvent::DisconnectedByBroker),
            ConnectionState::Disconnected("Broker disconnected".to_string())
        );
        assert_eq!(
            HealthMonitor::determine_next_state(ConnectionEvent::NetworkError("refused".to_string())),
            ConnectionState::Disconnected("refused".to_string())
        );
        assert_eq!(
            HealthMonitor::determine_next_state(ConnectionEvent::ReconnectionStarted(2)),
            ConnectionState::Reconnecting(2)
        );
        assert_eq!(
            HealthMonitor::determine_next_state(ConnectionEvent::PermanentFailure("gave up".to_string())),
            ConnectionState::PermanentlyDisconnected("gave up".to_string())
        );
    }

    #[test]
    fn test_only_connected_state_publishes() {
        assert!(HealthMonitor::can_publish(&ConnectionState::Connected));
        for state in [
            ConnectionState::Connecting,
            ConnectionState::Disconnected("x".to_string()),
            ConnectionState::Reconnecting(1),
            ConnectionState::PermanentlyDisconnected("x".to_string()),
        ] {
            assert!(!HealthMonitor::can_publish(&state), "{state:?}");
        }
    }

    #[test]
    fn test_validate_reconnect_config() {
        assert!(HealthMonitor::validate_reconnect_config(&ReconnectConfig::default()).is_ok());
        assert!(HealthMonitor::validate_reconnect_config(&bounded(10)).is_ok());
        assert!(HealthMonitor::validate_reconnect_config(&bounded(0)).is_err());

        let no_delay = ReconnectConfig {
            sustained_delay: 0,
            ..ReconnectConfig::default()
        };
        assert!(HealthMonitor::validate_reconnect_config(&no_delay).is_err());
    }
}
