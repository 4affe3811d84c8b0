//! ECOS gateway
//!
//! Rust implementation of the ECOS platform core: an HTTP API gateway in
//! front of the thirteen environmental initiatives, the forecasting and
//! optimisation "brains" behind it, a cross-project dispatcher, the readiness
//! checklist and an MQTT service for device telemetry and control.
//!
//! # Overview
//!
//! - [`gateway`]: `warp` routes, token signing, billing and hardware manifest
//! - [`forecasting`] and [`solvers`]: per-initiative models
//! - [`dispatcher`]: coordination between solar, AWG and geothermal
//! - [`checklist`]: readiness scoring across levels 1-4
//! - [`transport`] and [`processing`]: MQTT client and inbound message handling
//!
//! # Quick Start
//!
//! ```rust
//! use ecos_gateway::dispatcher::{Dispatcher, HumiditySignal, SolarSignal};
//!
//! let dispatcher = Dispatcher::new();
//! let outcome = dispatcher.coordinate_solar_awg(
//!     &SolarSignal { predicted_irradiance: 800.0 },
//!     &HumiditySignal { predicted_humidity: 75.0 },
//!     100.0,
//! );
//! assert!(outcome.is_dispatched());
//! assert_eq!(dispatcher.command_queue().len(), 1);
//! ```

pub mod checklist;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod forecasting;
pub mod gateway;
pub mod observability;
pub mod processing;
pub mod protocol;
pub mod solvers;
pub mod testing;
pub mod transport;

pub use error::{GatewayError, GatewayResult};
