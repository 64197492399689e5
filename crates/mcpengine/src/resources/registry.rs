//! Resource registration and dispatch.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::session::RequestContext;
use crate::types::{
    McpError, McpResult, ReadResourceResult, ResourceContent, ResourceDefinition,
    ResourceTemplateDefinition,
};

use super::template::UriTemplate;

pub const DEFAULT_MIME_TYPE: &str = "text/plain";

/// A concrete read: the requested URI plus any template variables it bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRequest {
    pub uri: String,
    pub variables: HashMap<String, String>,
}

impl ResourceRequest {
    pub fn var(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(String::as_str)
    }
}

/// Resource payload. Bytes go over the wire base64-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceBody {
    Text(String),
    Bytes(Vec<u8>),
}

impl From<String> for ResourceBody {
    fn from(s: String) -> Self {
        ResourceBody::Text(s)
    }
}

impl From<&str> for ResourceBody {
    fn from(s: &str) -> Self {
        ResourceBody::Text(s.to_string())
    }
}

impl From<Vec<u8>> for ResourceBody {
    fn from(b: Vec<u8>) -> Self {
        ResourceBody::Bytes(b)
    }
}

#[async_trait]
pub trait ResourceHandler: Send + Sync {
    async fn read(&self, request: ResourceRequest, ctx: RequestContext) -> McpResult<ResourceBody>;
}

#[async_trait]
impl<F, Fut> ResourceHandler for F
where
    F: Fn(ResourceRequest, RequestContext) -> Fut + Send + Sync,
    Fut: Future<Output = McpResult<ResourceBody>> + Send + 'static,
{
    async fn read(&self, request: ResourceRequest, ctx: RequestContext) -> McpResult<ResourceBody> {
        (self)(request, ctx).await
    }
}

/// A static resource or a URI template, depending on whether its URI has `{variables}`.
#[derive(Clone)]
pub struct Resource {
    pub uri: UriTemplate,
    pub name: String,
    pub description: Option<String>,
    pub mime_type: String,
    pub scopes: BTreeSet<String>,
    handler: Arc<dyn ResourceHandler>,
}

impl Resource {
    /// The name defaults to the URI.
    pub fn new(uri: &str, handler: impl ResourceHandler + 'static) -> McpResult<Self> {
        Ok(Self {
            uri: UriTemplate::parse(uri)?,
            name: uri.to_string(),
            description: None,
            mime_type: DEFAULT_MIME_TYPE.to_string(),
            scopes: BTreeSet::new(),
            handler: Arc::new(handler),
        })
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    pub fn scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_template(&self) -> bool {
        self.uri.is_template()
    }

    fn definition(&self) -> ResourceDefinition {
        ResourceDefinition {
            uri: self.uri.to_string(),
            name: self.name.clone(),
            description: self.description.clone(),
            mime_type: Some(self.mime_type.clone()),
        }
    }

    fn template_definition(&self) -> ResourceTemplateDefinition {
        ResourceTemplateDefinition {
            uri_template: self.uri.to_string(),
            name: self.name.clone(),
            description: self.description.clone(),
            mime_type: Some(self.mime_type.clone()),
        }
    }
}

#[derive(Default)]
pub struct ResourceRegistry {
    resources: Vec<Resource>,
    by_uri: HashMap<String, usize>,
    templates: Vec<Resource>,
    warn_on_duplicate: bool,
}

impl ResourceRegistry {
    pub fn new(warn_on_duplicate: bool) -> Self {
        Self {
            warn_on_duplicate,
            ..Self::default()
        }
    }

    /// Register `resource`; a URI or template already present is kept and false is returned.
    pub fn add(&mut self, resource: Resource) -> bool {
        let key = resource.uri.as_str();
        let exists = if resource.is_template() {
            self.templates.iter().any(|t| t.uri.as_str() == key)
        } else {
            self.by_uri.contains_key(key)
        };
        if exists {
            if self.warn_on_duplicate {
                tracing::warn!(uri = key, "Resource already exists");
            }
            return false;
        }

        if resource.is_template() {
            self.templates.push(resource);
        } else {
            self.by_uri
                .insert(key.to_string(), self.resources.len());
            self.resources.push(resource);
        }
        true
    }

    pub fn list(&self) -> Vec<ResourceDefinition> {
        self.resources.iter().map(Resource::definition).collect()
    }

    pub fn list_templates(&self) -> Vec<ResourceTemplateDefinition> {
        self.templates
            .iter()
            .map(Resource::template_definition)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.iter().chain(self.templates.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.templates.is_empty()
    }

    /// Exact URIs win over templates; templates are tried in registration order.
    pub fn resolve(&self, uri: &str) -> Option<(&Resource, HashMap<String, String>)> {
        if let Some(&i) = self.by_uri.get(uri) {
            return Some((&self.resources[i], HashMap::new()));
        }
        self.templates
            .iter()
            .find_map(|t| t.uri.matches(uri).map(|vars| (t, vars)))
    }

    pub async fn read(&self, uri: &str, ctx: RequestContext) -> McpResult<ReadResourceResult> {
        let (resource, variables) = self
            .resolve(uri)
            .ok_or_else(|| McpError::ResourceNotFound(uri.to_string()))?;

        tracing::debug!(uri, request_id = %ctx.request_id, "Reading resource");
        let request = ResourceRequest {
            uri: uri.to_string(),
            variables,
        };
        let body = resource.handler.read(request, ctx).await.map_err(|e| {
            tracing::error!(uri, "Resource read failed: {e}");
            e
        })?;

        let mime_type = Some(resource.mime_type.clone());
        let content = match body {
            ResourceBody::Text(text) => ResourceContent::text(uri, mime_type, text),
            ResourceBody::Bytes(bytes) => ResourceContent {
                uri: uri.to_string(),
                mime_type,
                text: None,
                blob: Some(STANDARD.encode(bytes)),
            },
        };
        Ok(ReadResourceResult {
            contents: vec![content],
        })
    }
}
