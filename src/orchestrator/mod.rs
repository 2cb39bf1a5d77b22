//! Orchestrator: brings the transport, the world server and the session up
//! in order and tears them down in reverse

pub mod runner;

pub use runner::{Orchestrator, OrchestratorError, Phase, GRACE_PERIOD};
