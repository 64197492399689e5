//! Tool registry and the built-in demo tool.

pub mod echo;
pub mod registry;

pub use registry::{Tool, ToolHandler, ToolRegistry};
