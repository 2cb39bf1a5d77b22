//! Event system shared by the supervisor, the session client and the orchestrator
//!
//! This module provides:
//! - `AvatarEvent`: typed lifecycle/session events
//! - `EventBus`: broadcast channel for distributing events to subscribers

mod bus;
mod types;

pub use bus::EventBus;
pub use types::{AvatarEvent, EventEmitter, EventKind, EventSource};
