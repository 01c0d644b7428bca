//! WebSocket connection state, membership, pumps and the upgrade handler.

pub mod connection;
pub mod pumps;
pub mod registry;
pub mod session;
pub mod upgrade;
