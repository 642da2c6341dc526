//! Relay coordinator: room/peer registry and signaling message router

mod actor;
mod server;
mod types;

pub use actor::RegistryHandle;
pub use server::{DEFAULT_RELAY_PORT, RelayServer};
pub use types::{OutboundMessage, RelayError};
