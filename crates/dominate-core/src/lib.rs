//! # dominate-core
//!
//! Foundation types shared by every Dominate crate:
//!
//! - **Branded IDs**: [`ids::ConnectionId`] newtype plus the caller-supplied [`ids::Identity`]
//! - **Events**: the [`events::EventKind`] taxonomy, [`events::EventEnvelope`] and the
//!   serialized, shareable [`events::Frame`]
//! - **Errors**: [`errors::HubError`] covering every hub failure class
//! - **Logging**: `tracing` subscriber setup and in-memory capture for tests

#![deny(unsafe_code)]

pub mod constants;
pub mod errors;
pub mod events;
pub mod ids;
pub mod logging;
