//! Thread-safe metrics collection system
//!
//! Atomic counters for HTTP traffic, dispatcher decisions and MQTT traffic,
//! plus a bounded window of request latencies.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const MAX_LATENCY_SAMPLES: usize = 1000;

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Thread-safe metrics collector using atomics and mutexes
pub struct MetricsCollector {
    http_requests: AtomicU64,
    http_failures: AtomicU64,
    request_latencies: Mutex<VecDeque<u64>>,

    commands_dispatched: AtomicU64,
    commands_held: AtomicU64,

    mqtt_connected: AtomicBool,
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    telemetry_received: AtomicU64,
    telemetry_rejected: AtomicU64,
    control_received: AtomicU64,
    messages_published: AtomicU64,
    publish_failures: AtomicU64,

    uptime_start: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            http_requests: AtomicU64::new(0),
            http_failures: AtomicU64::new(0),
            request_latencies: Mutex::new(VecDeque::with_capacity(MAX_LATENCY_SAMPLES)),
            commands_dispatched: AtomicU64::new(0),
            commands_held: AtomicU64::new(0),
            mqtt_connected: AtomicBool::new(false),
            connection_attempts: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            telemetry_received: AtomicU64::new(0),
            telemetry_rejected: AtomicU64::new(0),
            control_received: AtomicU64::new(0),
            messages_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            uptime_start: AtomicU64::new(current_timestamp()),
        }
    }

    // HTTP metrics
    pub fn http_request_completed(&self, duration: Duration, success: bool) {
        self.http_requests.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.http_failures.fetch_add(1, Ordering::Relaxed);
        }

        if let Ok(mut latencies) = self.request_latencies.lock() {
            if latencies.len() == MAX_LATENCY_SAMPLES {
                latencies.pop_front();
            }
            latencies.push_back(duration.as_millis() as u64);
        }
    }

    // Dispatcher metrics
    pub fn command_dispatched(&self) {
        self.commands_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn command_held(&self) {
        self.commands_held.fetch_add(1, Ordering::Relaxed);
    }

    // MQTT metrics
    pub fn mqtt_connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(true, Ordering::Relaxed);
    }

    pub fn mqtt_connection_lost(&self) {
        self.mqtt_connected.store(false, Ordering::Relaxed);
    }

    pub fn telemetry_received(&self) {
        self.telemetry_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn telemetry_rejected(&self) {
        self.telemetry_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn control_received(&self) {
        self.control_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_message_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Reset all metrics (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.http_requests,
            &self.http_failures,
            &self.commands_dispatched,
            &self.commands_held,
            &self.connection_attempts,
            &self.connections_established,
            &self.telemetry_received,
            &self.telemetry_rejected,
            &self.control_received,
            &self.messages_published,
            &self.publish_failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.mqtt_connected.store(false, Ordering::Relaxed);
        self.uptime_start
            .store(current_timestamp(), Ordering::Relaxed);
        if let Ok(mut latencies) = self.request_latencies.lock() {
            latencies.clear();
        }
    }

    fn latency_statistics(&self) -> (f64, f64, f64) {
        let Ok(latencies) = self.request_latencies.lock() else {
            return (0.0, 0.0, 0.0);
        };
        if latencies.is_empty() {
            return (0.0, 0.0, 0.0);
        }

        let mut sorted: Vec<u64> = latencies.iter().copied().collect();
        sorted.sort_unstable();
        let avg = sorted.iter().sum::<u64>() as f64 / sorted.len() as f64;
        (avg, percentile(&sorted, 50.0), percentile(&sorted, 95.0))
    }

    /// Point-in-time copy of every metric
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let (avg_ms, p50_ms, p95_ms) = self.latency_statistics();

        MetricsSnapshot {
            timestamp: now,
            http: HttpMetrics {
                requests: self.http_requests.load(Ordering::Relaxed),
                failures: self.http_failures.load(Ordering::Relaxed),
                avg_latency_ms: avg_ms,
                p50_latency_ms: p50_ms,
                p95_latency_ms: p95_ms,
            },
            dispatcher: DispatcherMetrics {
                commands_dispatched: self.commands_dispatched.load(Ordering::Relaxed),
                commands_held: self.commands_held.load(Ordering::Relaxed),
            },
            mqtt: MqttMetrics {
                connected: self.mqtt_connected.load(Ordering::Relaxed),
                connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
                connections_established: self.connections_established.load(Ordering::Relaxed),
                telemetry_received: self.telemetry_received.load(Ordering::Relaxed),
                telemetry_rejected: self.telemetry_rejected.load(Ordering::Relaxed),
                control_received: self.control_received.load(Ordering::Relaxed),
                messages_published: self.messages_published.load(Ordering::Relaxed),
                publish_failures: self.publish_failures.load(Ordering::Relaxed),
            },
            uptime_seconds: now.saturating_sub(self.uptime_start.load(Ordering::Relaxed)),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: u64,
    pub http: HttpMetrics,
    pub dispatcher: DispatcherMetrics,
    pub mqtt: MqttMetrics,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HttpMetrics {
    pub requests: u64,
    pub failures: u64,
    pub avg_latency_ms: f64,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatcherMetrics {
    pub commands_dispatched: u64,
    pub commands_held: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MqttMetrics {
    pub connected: bool,
    pub connection_attempts: u64,
    pub connections_established: u64,
    pub telemetry_received: u64,
    pub telemetry_rejected: u64,
    pub control_received: u64,
    pub messages_published: u64,
    pub publish_failures: u64,
}

fn percentile(sorted: &[u64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((pct / 100.0) * (sorted.len() - 1) as f64).round() as usize;
    sorted[rank.min(sorted.len() - 1)] as f64
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_counters() {
        let collector = MetricsCollector::new();
        collector.http_request_completed(Duration::from_millis(10), true);
        collector.http_request_completed(Duration::from_millis(30), false);

        let snapshot = collector.get_metrics();
        assert_eq!(snapshot.http.requests, 2);
        assert_eq!(snapshot.http.failures, 1);
        assert_eq!(snapshot.http.avg_latency_ms, 20.0);
    }

    #[test]
    fn test_mqtt_connection_flag() {
        let collector = MetricsCollector::new();
        collector.mqtt_connection_attempt();
        collector.mqtt_connection_established();
        assert!(collector.get_metrics().mqtt.connected);

        collector.mqtt_connection_lost();
        let snapshot = collector.get_metrics();
        assert!(!snapshot.mqtt.connected);
        assert_eq!(snapshot.mqtt.connection_attempts, 1);
        assert_eq!(snapshot.mqtt.connections_established, 1);
    }

    #[test]
    fn test_reset_clears_counters() {
        let collector = MetricsCollector::new();
        collector.command_dispatched();
        collector.command_held();
        collector.telemetry_received();
        collector.telemetry_rejected();
        collector.mqtt_publish_failed();
        collector.reset();

        let snapshot = collector.get_metrics();
        assert_eq!(snapshot.dispatcher.commands_dispatched, 0);
        assert_eq!(snapshot.dispatcher.commands_held, 0);
        assert_eq!(snapshot.mqtt.telemetry_received, 0);
        assert_eq!(snapshot.mqtt.publish_failures, 0);
    }

    #[test]
    fn test_latency_window_is_bounded() {
        let collector = MetricsCollector::new();
        for ms in 0..(MAX_LATENCY_SAMPLES as u64 + 50) {
            collector.http_request_completed(Duration::from_millis(ms), true);
        }
        let latencies = collector.request_latencies.lock().unwrap();
        assert_eq!(latencies.len(), MAX_LATENCY_SAMPLES);
        // Oldest samples are evicted first
        assert_eq!(latencies.front(), Some(&50));
        assert_eq!(latencies.back(), Some(&(MAX_LATENCY_SAMPLES as u64 + 49)));
    }

    #[test]
    fn test_percentile() {
        assert_eq!(percentile(&[], 50.0), 0.0);
        assert_eq!(percentile(&[5], 95.0), 5.0);
        assert_eq!(percentile(&[1, 2, 3, 4, 5], 50.0), 3.0);
        assert_eq!(percentile(&[1, 2, 3, 4, 5], 100.0), 5.0);
    }
}
