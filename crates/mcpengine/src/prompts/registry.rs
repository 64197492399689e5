//! Prompt registration and rendering.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::session::RequestContext;
use crate::types::{
    McpError, McpResult, PromptArgument, PromptDefinition, PromptGetParams, PromptGetResult,
    PromptMessage,
};

#[async_trait]
pub trait PromptHandler: Send + Sync {
    async fn render(
        &self,
        arguments: Map<String, Value>,
        ctx: RequestContext,
    ) -> McpResult<Vec<PromptMessage>>;
}

#[async_trait]
impl<F, Fut> PromptHandler for F
where
    F: Fn(Map<String, Value>, RequestContext) -> Fut + Send + Sync,
    Fut: Future<Output = McpResult<Vec<PromptMessage>>> + Send + 'static,
{
    async fn render(
        &self,
        arguments: Map<String, Value>,
        ctx: RequestContext,
    ) -> McpResult<Vec<PromptMessage>> {
        (self)(arguments, ctx).await
    }
}

#[derive(Clone)]
pub struct Prompt {
    pub definition: PromptDefinition,
    pub scopes: BTreeSet<String>,
    handler: Arc<dyn PromptHandler>,
}

impl Prompt {
    pub fn new(name: impl Into<String>, handler: impl PromptHandler + 'static) -> Self {
        Self {
            definition: PromptDefinition {
                name: name.into(),
                description: None,
                arguments: None,
            },
            scopes: BTreeSet::new(),
            handler: Arc::new(handler),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.definition.description = Some(description.into());
        self
    }

    pub fn argument(
        mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        self.definition
            .arguments
            .get_or_insert_with(Vec::new)
            .push(PromptArgument {
                name: name.into(),
                description: Some(description.into()),
                required,
            });
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

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    fn check_required(&self, arguments: &Map<String, Value>) -> McpResult<()> {
        let missing: Vec<&str> = self
            .definition
            .arguments
            .iter()
            .flatten()
            .filter(|a| a.required && !arguments.contains_key(&a.name))
            .map(|a| a.name.as_str())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(McpError::InvalidParams(format!(
                "Missing required arguments: {}",
                missing.join(", ")
            )))
        }
    }
}

#[derive(Default)]
pub struct PromptRegistry {
    prompts: Vec<Prompt>,
    index: HashMap<String, usize>,
    warn_on_duplicate: bool,
}

impl PromptRegistry {
    pub fn new(warn_on_duplicate: bool) -> Self {
        Self {
            warn_on_duplicate,
            ..Self::default()
        }
    }

    pub fn add(&mut self, prompt: Prompt) -> bool {
        if self.index.contains_key(prompt.name()) {
            if self.warn_on_duplicate {
                tracing::warn!(prompt = prompt.name(), "Prompt already exists");
            }
            return false;
        }
        self.index
            .insert(prompt.name().to_string(), self.prompts.len());
        self.prompts.push(prompt);
        true
    }

    pub fn get(&self, name: &str) -> Option<&Prompt> {
        self.index.get(name).map(|&i| &self.prompts[i])
    }

    pub fn list(&self) -> Vec<PromptDefinition> {
        self.prompts.iter().map(|p| p.definition.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Prompt> {
        self.prompts.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }

    pub async fn get_prompt(
        &self,
        params: PromptGetParams,
        ctx: RequestContext,
    ) -> McpResult<PromptGetResult> {
        self.invoke(&params.name, params.arguments.unwrap_or_default(), ctx)
            .await
    }

    /// Look up `name`, check its required arguments and render it.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: Map<String, Value>,
        ctx: RequestContext,
    ) -> McpResult<PromptGetResult> {
        let prompt = self
            .get(name)
            .ok_or_else(|| McpError::PromptNotFound(name.to_string()))?;
        prompt.check_required(&arguments)?;

        let messages = prompt.handler.render(arguments, ctx).await.map_err(|e| {
            tracing::error!(prompt = %name, "Prompt failed: {e}");
            e
        })?;
        Ok(PromptGetResult {
            description: prompt.definition.description.clone(),
            messages,
        })
    }
}
