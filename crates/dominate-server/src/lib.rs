//! # dominate-server
//!
//! The realtime event hub and its HTTP surface.
//!
//! - [`websocket::registry::ConnectionRegistry`] owns the membership set of
//!   live connections and performs every fan-out.
//! - [`websocket::pumps`] drive one connection's inbound (liveness) and
//!   outbound (delivery + heartbeat) halves.
//! - [`publisher::Publisher`] is the handle request handlers call after
//!   committing a mutation.
//! - [`server::DominateServer`] wires the registry into an Axum router
//!   (`/ws`, `/api/online`, `/health`, `/metrics`) and owns shutdown.

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod metrics;
pub mod publisher;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use publisher::Publisher;
pub use server::DominateServer;
pub use websocket::registry::{ConnectionRegistry, FanOut};
