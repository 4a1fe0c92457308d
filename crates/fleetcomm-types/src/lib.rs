//! Core types for the fleetcomm agent communications server.
//!
//! This crate defines the value types shared by the transport layer and the
//! server kernel: endpoints, agents, inbound commands, and the top-level
//! error type. It contains no business logic.

pub mod agent;
pub mod command;
pub mod endpoint;
pub mod error;

pub use agent::Agent;
pub use command::{CommandResponse, InboundCommand};
pub use endpoint::{Endpoint, EndpointKey};
pub use error::{FleetError, FleetResult};
