//! Prompt registry and the built-in demo prompt.

pub mod greeting;
pub mod registry;

pub use registry::{Prompt, PromptHandler, PromptRegistry};
