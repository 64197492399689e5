//! Resource: info://server — name, version and start time of the running server.

use serde_json::json;

use crate::session::RequestContext;
use crate::types::{McpResult, SERVER_NAME, SERVER_VERSION};

use super::{Resource, ResourceBody, ResourceRequest};

/// Lifespan state of the demo server.
#[derive(Debug, Clone)]
pub struct ServerStarted {
    pub at: chrono::DateTime<chrono::Utc>,
}

pub fn resource() -> McpResult<Resource> {
    Ok(Resource::new("info://server", read)?
        .name("Server Info")
        .description("Name, version and start time of this server")
        .mime_type("application/json"))
}

async fn read(_req: ResourceRequest, ctx: RequestContext) -> McpResult<ResourceBody> {
    let started_at = ctx.lifespan::<ServerStarted>().map(|s| s.at.to_rfc3339());
    let body = json!({
        "name": SERVER_NAME,
        "version": SERVER_VERSION,
        "started_at": started_at,
    });
    Ok(serde_json::to_string_pretty(&body)?.into())
}
