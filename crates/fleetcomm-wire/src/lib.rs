//! fleetcomm wire layer, everything between the server core and the
//! transport container.
//!
//! ## Architecture
//!
//! - **ServiceContainer / OutboundClient**: traits implemented by the external
//!   connection container
//! - **AgentDirectory**: token lookup and liveness against the agent store
//! - **AgentRegistry**: live agent endpoints keyed by `host:port`
//! - **RegistryDiscoveryListener**: feeds discovery events into the registry
//! - **ConcurrencyManager**: immutable limiter snapshot used for admission
//! - **SenderConfig**: per-destination outbound client configuration

pub mod concurrency;
pub mod directory;
pub mod discovery;
pub mod registry;
pub mod sender;
pub mod transport;

pub use concurrency::{AdmissionPermit, ConcurrencyManager, RpcCategory, GLOBAL_LIMIT_NAME};
pub use directory::AgentDirectory;
pub use discovery::{DiscoveryListener, RegistryDiscoveryListener};
pub use registry::AgentRegistry;
pub use sender::SenderConfig;
pub use transport::{
    CallTime, ContainerMetrics, InvocationHandler, OutboundClient, ServiceContainer, WireError,
};
