//! fleetcomm kernel: the server side of agent communications.
//!
//! The [`CommunicationsService`] starts the transport container from the
//! prepared configuration, tracks live agents, hands out cached outbound
//! clients and exposes the admin operations. Inbound commands go through a
//! [`CommandDispatcher`]: token authentication, then admission against the
//! current concurrency limits, then the business handler.

pub mod auth;
pub mod client_cache;
pub mod comms;
pub mod concurrency;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod preferences;
pub mod properties;
pub mod upgrade;

pub use auth::{CommandAuthenticator, SecurityTokenCache};
pub use client_cache::OutboundClientCache;
pub use comms::{CommsSettings, CommunicationsService};
pub use concurrency::ConcurrencyLimitRegistry;
pub use config::{ServerConfig, ServerIdentity};
pub use dispatch::{CategoryMap, CommandDispatcher, CommandHandler};
pub use error::{KernelError, KernelResult};
pub use preferences::PreferencesStore;
pub use properties::PropertiesFile;
