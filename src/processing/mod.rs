//! Processing of messages received from the broker

pub mod inbound;

pub use inbound::{InboundOutcome, InboundProcessor, INBOUND_CHANNEL_CAPACITY};
