//! Static mapping from tool, prompt and resource names to required scopes.

use std::collections::{BTreeSet, HashMap};

use serde_json::Value;

use crate::resources::UriTemplate;

/// Required scopes per registered item. Immutable once the server is built.
#[derive(Debug, Clone, Default)]
pub struct ScopeMapping {
    tools: HashMap<String, BTreeSet<String>>,
    prompts: HashMap<String, BTreeSet<String>>,
    resources: HashMap<String, BTreeSet<String>>,
    resource_templates: Vec<(UriTemplate, BTreeSet<String>)>,
}

fn to_set<I, S>(scopes: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    scopes.into_iter().map(Into::into).collect()
}

impl ScopeMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tool<I, S>(mut self, name: impl Into<String>, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools.insert(name.into(), to_set(scopes));
        self
    }

    pub fn prompt<I, S>(mut self, name: impl Into<String>, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prompts.insert(name.into(), to_set(scopes));
        self
    }

    /// `uri` may be a `{var}` template; concrete URIs are then matched against it.
    pub fn resource<I, S>(mut self, uri: &str, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let scopes = to_set(scopes);
        match UriTemplate::parse(uri) {
            Ok(template) if template.is_template() => {
                self.resource_templates.push((template, scopes));
            }
            _ => {
                self.resources.insert(uri.to_string(), scopes);
            }
        }
        self
    }

    pub fn tool_scopes(&self, name: &str) -> BTreeSet<String> {
        self.tools.get(name).cloned().unwrap_or_default()
    }

    pub fn prompt_scopes(&self, name: &str) -> BTreeSet<String> {
        self.prompts.get(name).cloned().unwrap_or_default()
    }

    pub fn resource_scopes(&self, uri: &str) -> BTreeSet<String> {
        if let Some(scopes) = self.resources.get(uri) {
            return scopes.clone();
        }
        self.resource_templates
            .iter()
            .find(|(t, _)| t.matches(uri).is_some())
            .map(|(_, s)| s.clone())
            .unwrap_or_default()
    }

    /// Scopes a request needs, keyed by `params.name` or `params.uri` depending on the method.
    pub fn required_for(&self, method: &str, params: Option<&Value>) -> BTreeSet<String> {
        let field = |key: &str| {
            params
                .and_then(|p| p.get(key))
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        match method {
            "tools/call" => field("name")
                .map(|n| self.tool_scopes(&n))
                .unwrap_or_default(),
            "prompts/get" => field("name")
                .map(|n| self.prompt_scopes(&n))
                .unwrap_or_default(),
            "resources/read" => field("uri")
                .map(|u| self.resource_scopes(&u))
                .unwrap_or_default(),
            _ => BTreeSet::new(),
        }
    }

    /// Union of every scope in the mapping, advertised in challenges.
    pub fn application_scopes(&self) -> BTreeSet<String> {
        self.tools
            .values()
            .chain(self.prompts.values())
            .chain(self.resources.values())
            .chain(self.resource_templates.iter().map(|(_, s)| s))
            .flatten()
            .cloned()
            .collect()
    }
}
