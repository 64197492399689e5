//! Identity provider configuration.

use std::time::Duration;

use url::Url;

use crate::error::JwksError;

const DEFAULT_LEEWAY_SECS: u64 = 60;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 20;

/// How the `aud` claim is treated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudiencePolicy {
    /// The token must name at least one of these audiences.
    Strict(Vec<String>),
    /// The `aud` claim is not checked.
    Disabled,
}

/// Settings for validating bearer tokens issued by an external identity provider.
#[derive(Debug, Clone)]
pub struct IdpConfig {
    pub issuer_url: Url,
    pub audience: AudiencePolicy,
    pub allow_unauthenticated_list: bool,
    /// `None` fetches the key set on every call.
    pub jwks_cache_ttl: Option<Duration>,
    pub leeway_secs: u64,
    pub http_timeout: Duration,
}

impl IdpConfig {
    /// Create a config for the given issuer with strict audience checking.
    pub fn new(issuer_url: &str, audience: impl Into<String>) -> Result<Self, JwksError> {
        Ok(Self {
            issuer_url: parse_issuer(issuer_url)?,
            audience: AudiencePolicy::Strict(vec![audience.into()]),
            allow_unauthenticated_list: false,
            jwks_cache_ttl: None,
            leeway_secs: DEFAULT_LEEWAY_SECS,
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        })
    }

    /// Create a config that skips the `aud` check.
    pub fn without_audience(issuer_url: &str) -> Result<Self, JwksError> {
        let mut config = Self::new(issuer_url, String::new())?;
        config.audience = AudiencePolicy::Disabled;
        Ok(config)
    }

    pub fn allow_unauthenticated_list(mut self, allow: bool) -> Self {
        self.allow_unauthenticated_list = allow;
        self
    }

    pub fn with_jwks_cache_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.jwks_cache_ttl = ttl;
        self
    }

    /// The issuer as it appears in the `iss` claim (no trailing slash).
    pub fn issuer(&self) -> String {
        self.issuer_url.as_str().trim_end_matches('/').to_string()
    }
}

fn parse_issuer(issuer_url: &str) -> Result<Url, JwksError> {
    let url = Url::parse(issuer_url).map_err(|e| JwksError::InvalidIssuer(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(JwksError::InvalidIssuer(format!(
            "unsupported scheme '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_audience_by_default() {
        let config = IdpConfig::new("https://idp.example.com", "my-api").unwrap();
        assert_eq!(
            config.audience,
            AudiencePolicy::Strict(vec!["my-api".to_string()])
        );
        assert!(!config.allow_unauthenticated_list);
        assert!(config.jwks_cache_ttl.is_none());
    }

    #[test]
    fn issuer_drops_trailing_slash() {
        let config = IdpConfig::without_audience("https://idp.example.com/realms/a/").unwrap();
        assert_eq!(config.issuer(), "https://idp.example.com/realms/a");
        assert_eq!(config.audience, AudiencePolicy::Disabled);
    }

    #[test]
    fn rejects_non_http_issuer() {
        assert!(IdpConfig::without_audience("ftp://idp.example.com").is_err());
        assert!(IdpConfig::without_audience("not a url").is_err());
    }
}
