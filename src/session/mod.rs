//! The avatar session
//!
//! - `SessionClient`: the single live session and every avatar action
//! - `WorldConnector` / `WorldLink`: the seam to the world
//! - `GatewayConnector`: production link over the JSON-lines gateway
//! - `MockConnector` / `MockWorld`: in-memory world for tests
//! - `MotionLock`: exclusive ownership of the movement controls

pub mod client;
mod error;
pub mod gateway;
pub mod link;
pub mod mock;
pub mod models;
pub mod motion;

pub use client::{SessionClient, SessionState, DEFAULT_ENTITY_RANGE};
pub use error::{LinkError, SessionError};
pub use gateway::GatewayConnector;
pub use link::{WorldConnector, WorldLink};
pub use mock::{MockConnector, MockWorld};
pub use models::*;
pub use motion::MotionLock;
