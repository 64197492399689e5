//! JSON Web Key Set retrieval from the issuer's discovery document.

use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use url::Url;

use crate::config::IdpConfig;
use crate::error::JwksError;

pub const OAUTH_WELL_KNOWN_PATH: &str = ".well-known/oauth-authorization-server";

/// Source of the verification keys for bearer tokens.
#[async_trait]
pub trait JwksProvider: Send + Sync {
    async fn fetch(&self) -> Result<JwkSet, JwksError>;
}

#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    #[serde(default)]
    jwks_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawKeySet {
    #[serde(default)]
    keys: Vec<serde_json::Value>,
}

/// Fetches the discovery document and then the key set, on every call.
pub struct HttpJwksProvider {
    http: reqwest::Client,
    discovery_url: Url,
}

impl HttpJwksProvider {
    pub fn new(config: &IdpConfig) -> Result<Self, JwksError> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| JwksError::Discovery {
                url: config.issuer(),
                message: e.to_string(),
            })?;

        Ok(Self {
            http,
            discovery_url: discovery_url(config)?,
        })
    }

    pub fn discovery_url(&self) -> &Url {
        &self.discovery_url
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<T, reqwest::Error> {
        self.http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json::<T>()
            .await
    }
}

#[async_trait]
impl JwksProvider for HttpJwksProvider {
    async fn fetch(&self) -> Result<JwkSet, JwksError> {
        let discovery_url = self.discovery_url.as_str();
        tracing::debug!("Fetching discovery document from {discovery_url}");

        let document: DiscoveryDocument = self
            .get_json(discovery_url)
            .await
            .map_err(|e| JwksError::Discovery {
                url: discovery_url.to_string(),
                message: e.to_string(),
            })?;

        let jwks_uri = document.jwks_uri.ok_or(JwksError::MissingJwksUri)?;
        tracing::debug!("Fetching key set from {jwks_uri}");

        let raw: RawKeySet = self
            .get_json(&jwks_uri)
            .await
            .map_err(|e| JwksError::KeySet {
                url: jwks_uri.clone(),
                message: e.to_string(),
            })?;

        let keys = raw
            .keys
            .into_iter()
            .filter_map(|value| match serde_json::from_value::<Jwk>(value) {
                Ok(jwk) => Some(jwk),
                Err(e) => {
                    tracing::warn!("Skipping unsupported key in {jwks_uri}: {e}");
                    None
                }
            })
            .collect();

        Ok(JwkSet { keys })
    }
}

/// `{issuer}/.well-known/oauth-authorization-server`, keeping any issuer path.
pub fn discovery_url(config: &IdpConfig) -> Result<Url, JwksError> {
    let base = format!("{}/", config.issuer());
    Url::parse(&base)
        .and_then(|u| u.join(OAUTH_WELL_KNOWN_PATH))
        .map_err(|e| JwksError::InvalidIssuer(e.to_string()))
}

struct CachedKeys {
    fetched_at: Instant,
    keys: JwkSet,
}

/// TTL cache in front of another provider.
///
/// The lock is held for the duration of a refresh, so concurrent callers that
/// miss the cache wait for the one in-flight fetch instead of issuing their own.
/// An entry older than the TTL is never returned.
pub struct CachedJwksProvider<P> {
    inner: P,
    ttl: Duration,
    cache: Mutex<Option<CachedKeys>>,
}

impl<P: JwksProvider> CachedJwksProvider<P> {
    pub fn new(inner: P, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cache: Mutex::new(None),
        }
    }
}

#[async_trait]
impl<P: JwksProvider> JwksProvider for CachedJwksProvider<P> {
    async fn fetch(&self) -> Result<JwkSet, JwksError> {
        let mut guard = self.cache.lock().await;

        if let Some(cached) = guard.as_ref() {
            if cached.fetched_at.elapsed() < self.ttl {
                return Ok(cached.keys.clone());
            }
            tracing::debug!("Cached key set expired, refreshing");
        }

        // A failed refresh leaves the cache empty.
        *guard = None;
        let keys = self.inner.fetch().await?;
        *guard = Some(CachedKeys {
            fetched_at: Instant::now(),
            keys: keys.clone(),
        });
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingProvider {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl JwksProvider for CountingProvider {
        async fn fetch(&self) -> Result<JwkSet, JwksError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(JwkSet { keys: Vec::new() })
        }
    }

    #[test]
    fn discovery_url_keeps_issuer_path() {
        let config = IdpConfig::without_audience("https://idp.example.com/realms/main").unwrap();
        assert_eq!(
            discovery_url(&config).unwrap().as_str(),
            "https://idp.example.com/realms/main/.well-known/oauth-authorization-server"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cache_serves_within_ttl_and_refreshes_after() {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = CachedJwksProvider::new(
            CountingProvider {
                calls: calls.clone(),
            },
            Duration::from_secs(60),
        );

        provider.fetch().await.unwrap();
        provider.fetch().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        provider.fetch().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_misses_fetch_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = Arc::new(CachedJwksProvider::new(
            CountingProvider {
                calls: calls.clone(),
            },
            Duration::from_secs(60),
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let provider = provider.clone();
                tokio::spawn(async move { provider.fetch().await.map(|_| ()) })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
