//! MCP (Model Context Protocol) server implementation
//!
//! Exposes the avatar as two resources and a fixed catalog of tools over
//! JSON-RPC 2.0 on stdio.

pub mod handlers;
pub mod protocol;
pub mod resources;
pub mod server;
pub mod tools;

pub use handlers::{DispatchError, ToolDispatcher};
pub use protocol::*;
pub use server::McpServer;
