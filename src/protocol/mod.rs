//! ECOS MQTT topic scheme and message types

pub mod messages;
pub mod topics;

pub use messages::*;
pub use topics::*;
