//! MCPEngine — Model Context Protocol server and client framework.
//!
//! JSON-RPC 2.0 sessions over stdio, Server-Sent Events and unary HTTP,
//! with tool, resource and prompt registries and bearer-token scope checks.

pub mod auth;
pub mod client;
pub mod config;
pub mod prompts;
pub mod protocol;
pub mod resources;
pub mod server;
pub mod session;
pub mod tools;
pub mod transport;
pub mod types;

pub use client::{ClientSession, ClientSessionBuilder};
pub use config::ServerSettings;
pub use server::{McpServer, McpServerBuilder};
pub use session::{RequestContext, Session};
pub use transport::{StdioTransport, Transport};
pub use types::{McpError, McpResult};
