//! Resource registry, URI templates and the built-in demo resource.

pub mod registry;
pub mod server_info;
pub mod template;

pub use registry::{Resource, ResourceBody, ResourceHandler, ResourceRegistry, ResourceRequest};
pub use template::UriTemplate;
