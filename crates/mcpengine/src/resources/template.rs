//! `{var}`-style resource URI templates.

use std::collections::HashMap;

use crate::types::{McpError, McpResult};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Variable(String),
}

/// A URI pattern such as `notes://{folder}/{id}`.
///
/// A variable matches one or more characters up to the next literal and never spans `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl UriTemplate {
    pub fn parse(raw: &str) -> McpResult<Self> {
        let mut segments = Vec::new();
        let mut rest = raw;
        while let Some(open) = rest.find('{') {
            if open > 0 {
                segments.push(Segment::Literal(rest[..open].to_string()));
            }
            let close = rest[open..].find('}').ok_or_else(|| {
                McpError::InvalidParams(format!("Unclosed variable in URI template: {raw}"))
            })? + open;
            let name = &rest[open + 1..close];
            if name.is_empty() || name.contains('{') {
                return Err(McpError::InvalidParams(format!(
                    "Bad variable name in URI template: {raw}"
                )));
            }
            if matches!(segments.last(), Some(Segment::Variable(_))) {
                return Err(McpError::InvalidParams(format!(
                    "Adjacent variables in URI template: {raw}"
                )));
            }
            segments.push(Segment::Variable(name.to_string()));
            rest = &rest[close + 1..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }
        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_template(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Variable(_)))
    }

    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Variable(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Bind variables against `uri`, or `None` when it does not fit.
    pub fn matches(&self, uri: &str) -> Option<HashMap<String, String>> {
        let mut bound = HashMap::new();
        let mut rest = uri;
        let mut iter = self.segments.iter().peekable();

        while let Some(segment) = iter.next() {
            match segment {
                Segment::Literal(lit) => rest = rest.strip_prefix(lit.as_str())?,
                Segment::Variable(name) => {
                    let end = match iter.peek() {
                        Some(Segment::Literal(next)) => rest.find(next.as_str())?,
                        _ => rest.len(),
                    };
                    let value = &rest[..end];
                    if value.is_empty() || value.contains('/') {
                        return None;
                    }
                    bound.insert(name.clone(), value.to_string());
                    rest = &rest[end..];
                }
            }
        }

        rest.is_empty().then_some(bound)
    }
}

impl std::fmt::Display for UriTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_variables() {
        let t = UriTemplate::parse("notes://{folder}/{id}.md").unwrap();
        let vars = t.matches("notes://inbox/42.md").unwrap();
        assert_eq!(vars["folder"], "inbox");
        assert_eq!(vars["id"], "42");
        assert_eq!(t.variables().collect::<Vec<_>>(), ["folder", "id"]);
    }

    #[test]
    fn rejects_non_matching_uris() {
        let t = UriTemplate::parse("notes://{folder}/{id}").unwrap();
        assert!(t.matches("notes://inbox").is_none());
        assert!(t.matches("notes://a/b/c").is_none());
        assert!(t.matches("other://a/b").is_none());
    }

    #[test]
    fn literal_uri_matches_itself_only() {
        let t = UriTemplate::parse("info://server").unwrap();
        assert!(!t.is_template());
        assert_eq!(t.matches("info://server"), Some(HashMap::new()));
        assert!(t.matches("info://server/x").is_none());
    }

    #[test]
    fn malformed_templates_fail() {
        assert!(UriTemplate::parse("notes://{id").is_err());
        assert!(UriTemplate::parse("notes://{}").is_err());
        assert!(UriTemplate::parse("notes://{a}{b}").is_err());
    }
}
