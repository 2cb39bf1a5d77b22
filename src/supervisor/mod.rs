//! World server process supervision
//!
//! - `ProcessSupervisor`: spawn, readiness detection, termination
//! - `properties`: idempotent rewriting of `eula.txt` / `server.properties`

mod error;
pub mod process;
pub mod properties;

pub use error::SupervisorError;
pub use process::{ProcessState, ProcessSupervisor, READINESS_MARKER, STARTUP_TIMEOUT};
