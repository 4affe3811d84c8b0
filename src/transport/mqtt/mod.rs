//! MQTT client for the ECOS namespace
//!
//! Split the same way as the rest of the transport code: pure logic is kept
//! apart from I/O so it can be tested without a broker.
//!
//! - [`connection`] - states, backoff schedule, errors and client options
//! - [`message_handler`] - event routing, payload decoding and forwarding
//! - [`health_monitor`] - reconnection decisions and state transitions
//! - [`client`] - the `rumqttc` client and its supervisor task
//!
//! # Usage
//!
//! ```rust,no_run
//! use ecos_gateway::config::MqttSection;
//! use ecos_gateway::transport::mqtt::MqttClient;
//!
//! # tokio_test::block_on(async {
//! let config = MqttSection {
//!     enabled: true,
//!     ..MqttSection::default()
//! };
//!
//! let mut client = MqttClient::new(config)?;
//! let (tx, mut rx) = tokio::sync::mpsc::channel(64);
//! client.set_inbound_sender(tx);
//! client.connect().await?;
//! while let Some(message) = rx.recv().await {
//!     println!("{}", message.kind());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;

pub use client::MqttClient;
pub use connection::{ConnectionState, MqttError, ReconnectConfig};
pub use health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
pub use message_handler::{Disposition, EventRoute, MessageForwarder, MessageHandler};
