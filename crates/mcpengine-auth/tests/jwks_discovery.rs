//! Key discovery against a mock identity provider.

use std::time::Duration;

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mcpengine_auth::{
    AuthError, HttpJwksProvider, IdpConfig, JwksProvider, JwksTokenVerifier, TokenVerifier,
};

const PRIVATE_KEY: &[u8] = include_bytes!("fixtures/rsa_private.pem");
const PUBLIC_JWK: &str = include_str!("fixtures/rsa_public.jwk.json");

// ─────────────────────── helpers ───────────────────────

/// Start a mock issuer publishing the test key. `expected_fetches` bounds the key-set requests.
async fn mock_issuer(expected_fetches: u64) -> MockServer {
    let server = MockServer::start().await;
    let jwk: Value = serde_json::from_str(PUBLIC_JWK).unwrap();

    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-authorization-server"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issuer": server.uri(),
            "jwks_uri": format!("{}/keys", server.uri()),
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/keys"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "keys": [jwk, { "kty": "unknown-kind", "kid": "junk" }]
        })))
        .expect(expected_fetches)
        .mount(&server)
        .await;

    server
}

fn token_for(issuer: &str, scope: &str) -> String {
    let now = jsonwebtoken::get_current_timestamp();
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some("test-key".to_string());
    encode(
        &header,
        &json!({
            "sub": "user-7",
            "iss": issuer,
            "iat": now,
            "exp": now + 600,
            "scope": scope,
        }),
        &EncodingKey::from_rsa_pem(PRIVATE_KEY).unwrap(),
    )
    .unwrap()
}

// ═══════════════════════════════════════════════════════
// DISCOVERY
// ═══════════════════════════════════════════════════════

#[tokio::test]
async fn fetches_keys_through_discovery_document() {
    let server = mock_issuer(1).await;
    let config = IdpConfig::without_audience(&server.uri()).unwrap();
    let provider = HttpJwksProvider::new(&config).unwrap();

    let keys = provider.fetch().await.unwrap();
    assert_eq!(keys.keys.len(), 1, "unsupported keys are skipped");
    assert!(keys.find("test-key").is_some());
}

#[tokio::test]
async fn missing_jwks_uri_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-authorization-server"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "issuer": "x" })))
        .mount(&server)
        .await;

    let config = IdpConfig::without_audience(&server.uri()).unwrap();
    let provider = HttpJwksProvider::new(&config).unwrap();
    assert!(provider.fetch().await.is_err());
}

// ═══════════════════════════════════════════════════════
// VERIFICATION
// ═══════════════════════════════════════════════════════

#[tokio::test]
async fn verifier_refetches_keys_on_every_call_without_cache() {
    let server = mock_issuer(2).await;
    let config = IdpConfig::without_audience(&server.uri()).unwrap();
    let verifier = JwksTokenVerifier::new(config).unwrap();

    let token = token_for(&server.uri(), "notes:read");
    for _ in 0..2 {
        let claims = verifier.verify(&token).await.unwrap();
        assert_eq!(claims.sub.as_deref(), Some("user-7"));
    }
    // `expect(2)` is checked when the mock server drops.
}

#[tokio::test]
async fn verifier_with_cache_fetches_once() {
    let server = mock_issuer(1).await;
    let config = IdpConfig::without_audience(&server.uri())
        .unwrap()
        .with_jwks_cache_ttl(Some(Duration::from_secs(300)));
    let verifier = JwksTokenVerifier::new(config).unwrap();

    let token = token_for(&server.uri(), "");
    for _ in 0..3 {
        verifier.verify(&token).await.unwrap();
    }
}

#[tokio::test]
async fn unreachable_issuer_reads_as_invalid_credentials() {
    let config = IdpConfig::without_audience("http://127.0.0.1:9").unwrap();
    let verifier = JwksTokenVerifier::new(config).unwrap();

    let err = verifier.verify("a.b.c").await.unwrap_err();
    assert_eq!(err, AuthError::authentication("Invalid credentials"));
}
