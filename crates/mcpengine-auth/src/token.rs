//! Bearer token verification against a JSON Web Key Set.

use async_trait::async_trait;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::jwk::{Jwk, JwkSet, KeyAlgorithm};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::config::{AudiencePolicy, IdpConfig};
use crate::context::AuthContext;
use crate::error::{AuthError, AuthResult, JwksError};
use crate::jwks::{CachedJwksProvider, HttpJwksProvider, JwksProvider};
use crate::scopes::parse_scopes;

/// Claims read from a verified access token.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub exp: Option<u64>,
    #[serde(default)]
    pub iat: Option<u64>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub sid: Option<String>,
}

impl Claims {
    /// Build the per-request context. Fails when the token has no subject.
    pub fn into_context(self, token: &str) -> AuthResult<AuthContext> {
        let subject = self
            .sub
            .ok_or_else(|| AuthError::authentication("Invalid credentials"))?;
        let scopes = parse_scopes(self.scope.as_deref().unwrap_or(""));

        let mut ctx = AuthContext::new(subject, scopes, token);
        ctx.name = self.name;
        ctx.email = self.email;
        ctx.session_id = self.sid;
        Ok(ctx)
    }
}

/// Turns a raw bearer token into verified claims.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> AuthResult<Claims>;
}

/// Verifies tokens with keys published by the configured issuer.
pub struct JwksTokenVerifier {
    provider: Box<dyn JwksProvider>,
    config: IdpConfig,
}

impl JwksTokenVerifier {
    /// Fetch keys over HTTP, cached when `jwks_cache_ttl` is set.
    pub fn new(config: IdpConfig) -> Result<Self, JwksError> {
        let http = HttpJwksProvider::new(&config)?;
        let provider: Box<dyn JwksProvider> = match config.jwks_cache_ttl {
            Some(ttl) => Box::new(CachedJwksProvider::new(http, ttl)),
            None => Box::new(http),
        };
        Ok(Self { provider, config })
    }

    pub fn with_provider(config: IdpConfig, provider: impl JwksProvider + 'static) -> Self {
        Self {
            provider: Box::new(provider),
            config,
        }
    }

    pub fn config(&self) -> &IdpConfig {
        &self.config
    }
}

#[async_trait]
impl TokenVerifier for JwksTokenVerifier {
    async fn verify(&self, token: &str) -> AuthResult<Claims> {
        let keys = self.provider.fetch().await?;
        validate_token(&keys, token, &self.config)
    }
}

/// Verify `token` against `jwks`.
///
/// Checks signature, `exp`, `iat`, `iss` and, under [`AudiencePolicy::Strict`], `aud`.
/// The signing algorithm is the one the matching key declares, never the token's.
pub fn validate_token(jwks: &JwkSet, token: &str, config: &IdpConfig) -> AuthResult<Claims> {
    let header = decode_header(token).map_err(|e| {
        AuthError::authentication(format!("Invalid token: error decoding header: {e}"))
    })?;

    let kid = header
        .kid
        .ok_or_else(|| AuthError::authentication("Invalid token: header missing 'kid'"))?;

    let jwk = jwks.find(&kid).ok_or_else(|| {
        AuthError::authentication(format!("Invalid token: no matching key for kid '{kid}'"))
    })?;

    let algorithm = key_algorithm(jwk)?;
    let key = DecodingKey::from_jwk(jwk)
        .map_err(|e| AuthError::authentication(format!("Invalid token: unusable key: {e}")))?;

    let issuer = config.issuer();
    let mut validation = Validation::new(algorithm);
    validation.leeway = config.leeway_secs;
    validation.set_issuer(&[issuer.clone(), format!("{issuer}/")]);
    validation.set_required_spec_claims(&["exp", "iss", "sub"]);
    match &config.audience {
        AudiencePolicy::Strict(audiences) => validation.set_audience(audiences.as_slice()),
        AudiencePolicy::Disabled => validation.validate_aud = false,
    }

    let data = decode::<Claims>(token, &key, &validation).map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => AuthError::authentication("Token has expired"),
        ErrorKind::ImmatureSignature => AuthError::authentication("Token is not yet valid"),
        _ => AuthError::authentication(format!("Invalid token: {e}")),
    })?;

    check_issued_at(&data.claims, config.leeway_secs)?;
    Ok(data.claims)
}

fn key_algorithm(jwk: &Jwk) -> AuthResult<Algorithm> {
    match jwk.common.key_algorithm {
        None | Some(KeyAlgorithm::RS256) => Ok(Algorithm::RS256),
        Some(KeyAlgorithm::RS384) => Ok(Algorithm::RS384),
        Some(KeyAlgorithm::RS512) => Ok(Algorithm::RS512),
        Some(KeyAlgorithm::PS256) => Ok(Algorithm::PS256),
        Some(KeyAlgorithm::PS384) => Ok(Algorithm::PS384),
        Some(KeyAlgorithm::PS512) => Ok(Algorithm::PS512),
        Some(KeyAlgorithm::ES256) => Ok(Algorithm::ES256),
        Some(KeyAlgorithm::ES384) => Ok(Algorithm::ES384),
        Some(KeyAlgorithm::EdDSA) => Ok(Algorithm::EdDSA),
        Some(other) => Err(AuthError::authentication(format!(
            "Invalid token: key algorithm {other:?} is not accepted"
        ))),
    }
}

fn check_issued_at(claims: &Claims, leeway_secs: u64) -> AuthResult<()> {
    let iat = claims
        .iat
        .ok_or_else(|| AuthError::authentication("Invalid token: missing 'iat' claim"))?;
    let now = jsonwebtoken::get_current_timestamp();
    if iat > now + leeway_secs {
        return Err(AuthError::authentication(
            "Invalid token: issued in the future",
        ));
    }
    Ok(())
}
