//! Configuration loading and resolution.
//!
//! Every setting resolves in the same order: explicit value (CLI flag),
//! then the `MCPENGINE_*` environment variable, then the built-in default.

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use mcpengine_auth::{IdpConfig, JwksError};

use crate::auth::{AuthBackend, BearerTokenBackend, NoAuth, ScopeMapping};

pub const ENV_PREFIX: &str = "MCPENGINE_";

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_SSE_PATH: &str = "/sse";
pub const DEFAULT_MESSAGE_PATH: &str = "/messages/";
pub const DEFAULT_MCP_PATH: &str = "/mcp";
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_HTTP_SESSION_IDLE_SECS: u64 = 600;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Authentication is enabled but no issuer URL was given (set MCPENGINE_ISSUER_URL)")]
    MissingIssuer,

    #[error("Audience verification is enabled but no audience was given (set MCPENGINE_AUDIENCE)")]
    MissingAudience,

    #[error(transparent)]
    Idp(#[from] JwksError),
}

/// Values given explicitly, typically from the command line. `None` defers to the environment.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub sse_path: Option<String>,
    pub message_path: Option<String>,
    pub mcp_path: Option<String>,
    pub log_level: Option<String>,
    pub authentication_enabled: Option<bool>,
    pub issuer_url: Option<String>,
    pub audience: Option<String>,
    pub verify_audience: Option<bool>,
    pub allow_unauthenticated_list: Option<bool>,
    pub jwks_cache_ttl_secs: Option<u64>,
    pub http_sessions: Option<bool>,
    pub http_session_idle_secs: Option<u64>,
}

/// Fully resolved server settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerSettings {
    pub host: IpAddr,
    pub port: u16,
    pub sse_path: String,
    pub message_path: String,
    pub mcp_path: String,
    pub log_level: String,
    pub authentication_enabled: bool,
    pub issuer_url: Option<String>,
    pub audience: Option<String>,
    pub verify_audience: bool,
    pub allow_unauthenticated_list: bool,
    pub jwks_cache_ttl: Option<Duration>,
    /// Track unary HTTP sessions by header instead of serving each POST alone.
    pub http_sessions: bool,
    pub http_session_idle: Duration,
}

impl ServerSettings {
    /// Resolve against the process environment.
    pub fn resolve(overrides: SettingsOverrides) -> Result<Self, ConfigError> {
        Self::resolve_with(overrides, |key| std::env::var(key).ok())
    }

    /// Resolve with `lookup` standing in for the environment.
    pub fn resolve_with(
        overrides: SettingsOverrides,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let env = Env { lookup };

        let host_raw = overrides
            .host
            .or_else(|| env.get("HOST"))
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        let host = parse_value("HOST", &host_raw)?;

        let settings = Self {
            host,
            port: pick(overrides.port, env.parse("PORT")?, DEFAULT_PORT),
            sse_path: pick(overrides.sse_path, env.get("SSE_PATH"), DEFAULT_SSE_PATH.into()),
            message_path: pick(
                overrides.message_path,
                env.get("MESSAGE_PATH"),
                DEFAULT_MESSAGE_PATH.into(),
            ),
            mcp_path: pick(overrides.mcp_path, env.get("MCP_PATH"), DEFAULT_MCP_PATH.into()),
            log_level: pick(
                overrides.log_level,
                env.get("LOG_LEVEL"),
                DEFAULT_LOG_LEVEL.into(),
            )
            .to_ascii_lowercase(),
            authentication_enabled: pick(
                overrides.authentication_enabled,
                env.flag("AUTHENTICATION_ENABLED")?,
                false,
            ),
            issuer_url: overrides.issuer_url.or_else(|| env.get("ISSUER_URL")),
            audience: overrides.audience.or_else(|| env.get("AUDIENCE")),
            verify_audience: pick(
                overrides.verify_audience,
                env.flag("VERIFY_AUDIENCE")?,
                true,
            ),
            allow_unauthenticated_list: pick(
                overrides.allow_unauthenticated_list,
                env.flag("ALLOW_UNAUTHENTICATED_LIST")?,
                false,
            ),
            jwks_cache_ttl: overrides
                .jwks_cache_ttl_secs
                .or(env.parse("JWKS_CACHE_TTL_SECS")?)
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            http_sessions: pick(overrides.http_sessions, env.flag("HTTP_SESSIONS")?, false),
            http_session_idle: Duration::from_secs(pick(
                overrides.http_session_idle_secs,
                env.parse("HTTP_SESSION_IDLE_SECS")?,
                DEFAULT_HTTP_SESSION_IDLE_SECS,
            )),
        };

        if settings.authentication_enabled && settings.issuer_url.is_none() {
            return Err(ConfigError::MissingIssuer);
        }
        Ok(settings)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Identity provider settings, or `None` when authentication is off.
    pub fn idp_config(&self) -> Result<Option<IdpConfig>, ConfigError> {
        if !self.authentication_enabled {
            return Ok(None);
        }
        let issuer = self.issuer_url.as_deref().ok_or(ConfigError::MissingIssuer)?;
        let config = if self.verify_audience {
            let audience = self.audience.as_deref().ok_or(ConfigError::MissingAudience)?;
            IdpConfig::new(issuer, audience)?
        } else {
            IdpConfig::without_audience(issuer)?
        };
        Ok(Some(
            config
                .allow_unauthenticated_list(self.allow_unauthenticated_list)
                .with_jwks_cache_ttl(self.jwks_cache_ttl),
        ))
    }

    /// State for the unary HTTP binding, tracked or stateless per `http_sessions`.
    #[cfg(feature = "http")]
    pub fn http_state(
        &self,
        server: Arc<crate::server::McpServer>,
        auth: Arc<dyn AuthBackend>,
    ) -> Arc<crate::transport::HttpState> {
        use crate::transport::HttpState;
        if self.http_sessions {
            HttpState::with_sessions(server, auth, self.http_session_idle)
        } else {
            HttpState::new(server, auth)
        }
    }

    /// The backend guarding the network transports.
    pub fn auth_backend(
        &self,
        scopes: Arc<ScopeMapping>,
    ) -> Result<Arc<dyn AuthBackend>, ConfigError> {
        match self.idp_config()? {
            Some(config) => {
                tracing::info!(issuer = %config.issuer(), "Auth: bearer token required");
                Ok(Arc::new(BearerTokenBackend::from_config(config, scopes)?))
            }
            None => Ok(Arc::new(NoAuth)),
        }
    }
}

fn pick<T>(explicit: Option<T>, env: Option<T>, default: T) -> T {
    explicit.or(env).unwrap_or(default)
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: format!("{ENV_PREFIX}{key}"),
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(&format!("{ENV_PREFIX}{key}")).filter(|v| !v.trim().is_empty())
    }

    fn parse<T: FromStr>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T::Err: std::fmt::Display,
    {
        self.get(key).map(|raw| parse_value(key, &raw)).transpose()
    }

    fn flag(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        let Some(raw) = self.get(key) else {
            return Ok(None);
        };
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidValue {
                key: format!("{ENV_PREFIX}{key}"),
                value: raw,
                reason: "expected a boolean".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_without_env() {
        let s = ServerSettings::resolve_with(SettingsOverrides::default(), env(&[])).unwrap();
        assert_eq!(s.socket_addr().to_string(), "127.0.0.1:8000");
        assert_eq!(s.sse_path, "/sse");
        assert_eq!(s.message_path, "/messages/");
        assert_eq!(s.mcp_path, "/mcp");
        assert!(!s.authentication_enabled);
        assert!(s.verify_audience);
        assert!(s.jwks_cache_ttl.is_none());
        assert!(!s.http_sessions);
        assert_eq!(s.http_session_idle, Duration::from_secs(600));
    }

    #[test]
    fn http_sessions_are_opt_in() {
        let s = ServerSettings::resolve_with(
            SettingsOverrides::default(),
            env(&[
                ("MCPENGINE_HTTP_SESSIONS", "true"),
                ("MCPENGINE_HTTP_SESSION_IDLE_SECS", "30"),
            ]),
        )
        .unwrap();
        assert!(s.http_sessions);
        assert_eq!(s.http_session_idle, Duration::from_secs(30));
    }

    #[test]
    fn explicit_beats_env_beats_default() {
        let overrides = SettingsOverrides {
            port: Some(9100),
            ..Default::default()
        };
        let s = ServerSettings::resolve_with(
            overrides,
            env(&[("MCPENGINE_PORT", "9000"), ("MCPENGINE_SSE_PATH", "/events")]),
        )
        .unwrap();
        assert_eq!(s.port, 9100);
        assert_eq!(s.sse_path, "/events");
    }

    #[test]
    fn auth_without_issuer_is_rejected() {
        let err = ServerSettings::resolve_with(
            SettingsOverrides::default(),
            env(&[("MCPENGINE_AUTHENTICATION_ENABLED", "true")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingIssuer));
    }

    #[test]
    fn bad_values_name_the_variable() {
        let err = ServerSettings::resolve_with(
            SettingsOverrides::default(),
            env(&[("MCPENGINE_PORT", "eighty")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("MCPENGINE_PORT"));

        let err = ServerSettings::resolve_with(
            SettingsOverrides::default(),
            env(&[("MCPENGINE_VERIFY_AUDIENCE", "maybe")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("MCPENGINE_VERIFY_AUDIENCE"));
    }

    #[test]
    fn idp_config_follows_audience_flag() {
        let s = ServerSettings::resolve_with(
            SettingsOverrides::default(),
            env(&[
                ("MCPENGINE_AUTHENTICATION_ENABLED", "1"),
                ("MCPENGINE_ISSUER_URL", "https://idp.example.com"),
                ("MCPENGINE_VERIFY_AUDIENCE", "false"),
                ("MCPENGINE_ALLOW_UNAUTHENTICATED_LIST", "yes"),
                ("MCPENGINE_JWKS_CACHE_TTL_SECS", "300"),
            ]),
        )
        .unwrap();
        let config = s.idp_config().unwrap().unwrap();
        assert_eq!(config.audience, mcpengine_auth::AudiencePolicy::Disabled);
        assert!(config.allow_unauthenticated_list);
        assert_eq!(config.jwks_cache_ttl, Some(Duration::from_secs(300)));
    }

    #[test]
    fn strict_audience_requires_a_value() {
        let s = ServerSettings::resolve_with(
            SettingsOverrides {
                authentication_enabled: Some(true),
                issuer_url: Some("https://idp.example.com".into()),
                ..Default::default()
            },
            env(&[]),
        )
        .unwrap();
        assert!(matches!(s.idp_config(), Err(ConfigError::MissingAudience)));
    }

    #[test]
    fn disabled_auth_builds_no_backend() {
        let s = ServerSettings::resolve_with(SettingsOverrides::default(), env(&[])).unwrap();
        assert!(s.idp_config().unwrap().is_none());
        assert!(s.auth_backend(Arc::new(ScopeMapping::new())).is_ok());
    }
}
