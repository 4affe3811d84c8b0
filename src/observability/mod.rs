//! Observability for the ECOS gateway
//!
//! Structured logging through `tracing` and a process-wide metrics collector
//! that the HTTP surface exports at `GET /metrics`.

pub mod logging;
pub mod metrics;

pub use logging::{init_default_logging, init_logging, LogFormat};
pub use metrics::{metrics, MetricsCollector, MetricsSnapshot};

// Span macros for structured logging
pub use logging::{dispatch_span, mqtt_span, request_span};
