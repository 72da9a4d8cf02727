//! MCP (Model Context Protocol) server
//!
//! Exposes the task tools over stdio JSON-RPC for AI coding assistants.

pub mod handlers;
pub mod protocol;
pub mod server;
pub mod tools;

pub use handlers::ToolHandler;
pub use protocol::*;
pub use server::McpServer;
