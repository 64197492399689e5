//! Method-level authentication and scope enforcement.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use mcpengine_auth::{
    join_scopes, missing_scopes, AuthContext, AuthError, AuthResult, IdpConfig, JwksError,
    JwksTokenVerifier, TokenVerifier,
};

use crate::types::JsonRpcMessage;

use super::scopes::ScopeMapping;

/// Methods that always require a token.
pub const PROTECTED_METHODS: &[&str] = &["tools/call", "resources/read", "prompts/get"];

/// Listing methods, gated unless unauthenticated listing is allowed.
pub const LIST_METHODS: &[&str] = &[
    "tools/list",
    "resources/list",
    "resources/templates/list",
    "prompts/list",
];

/// Decides whether an inbound message may be dispatched, before dispatch.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// `Ok(None)` lets the message through without an identity.
    async fn authenticate(
        &self,
        authorization: Option<&str>,
        message: &JsonRpcMessage,
    ) -> AuthResult<Option<AuthContext>>;

    /// Scopes advertised in `WWW-Authenticate` challenges.
    fn application_scopes(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }
}

/// Lets everything through.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuth;

#[async_trait]
impl AuthBackend for NoAuth {
    async fn authenticate(
        &self,
        _authorization: Option<&str>,
        _message: &JsonRpcMessage,
    ) -> AuthResult<Option<AuthContext>> {
        Ok(None)
    }
}

/// Split `Authorization: Bearer <token>`; the scheme is case-insensitive.
pub fn extract_bearer(header: Option<&str>) -> AuthResult<&str> {
    let header = header
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or_else(|| AuthError::authentication("No valid auth header"))?;

    let (scheme, token) = header
        .split_once(' ')
        .ok_or_else(|| AuthError::authentication("Invalid credentials"))?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::authentication(format!(
            "Invalid auth schema \"{scheme}\", must be Bearer"
        )));
    }
    let token = token.trim();
    if token.is_empty() || token.contains(' ') {
        return Err(AuthError::authentication("Invalid credentials"));
    }
    Ok(token)
}

/// Validates bearer tokens and enforces the scope mapping on gated methods.
pub struct BearerTokenBackend {
    verifier: Arc<dyn TokenVerifier>,
    scopes: Arc<ScopeMapping>,
    allow_unauthenticated_list: bool,
}

impl BearerTokenBackend {
    pub fn new(verifier: impl TokenVerifier + 'static, scopes: Arc<ScopeMapping>) -> Self {
        Self {
            verifier: Arc::new(verifier),
            scopes,
            allow_unauthenticated_list: false,
        }
    }

    /// Verify tokens against the identity provider described by `config`.
    pub fn from_config(config: IdpConfig, scopes: Arc<ScopeMapping>) -> Result<Self, JwksError> {
        let allow = config.allow_unauthenticated_list;
        Ok(Self::new(JwksTokenVerifier::new(config)?, scopes).allow_unauthenticated_list(allow))
    }

    pub fn allow_unauthenticated_list(mut self, allow: bool) -> Self {
        self.allow_unauthenticated_list = allow;
        self
    }

    pub fn gates(&self, method: &str) -> bool {
        PROTECTED_METHODS.contains(&method)
            || (!self.allow_unauthenticated_list && LIST_METHODS.contains(&method))
    }
}

#[async_trait]
impl AuthBackend for BearerTokenBackend {
    async fn authenticate(
        &self,
        authorization: Option<&str>,
        message: &JsonRpcMessage,
    ) -> AuthResult<Option<AuthContext>> {
        let JsonRpcMessage::Request(request) = message else {
            return Ok(None);
        };
        if !self.gates(&request.method) {
            return Ok(None);
        }

        let token = extract_bearer(authorization)?;
        let claims = self.verifier.verify(token).await?;
        let ctx = claims.into_context(token)?;

        let required = self
            .scopes
            .required_for(&request.method, request.params.as_ref());
        let missing = missing_scopes(&required, &ctx.scopes);
        if !missing.is_empty() {
            tracing::info!(
                subject = %ctx.subject,
                method = %request.method,
                missing = %join_scopes(&missing),
                "Request denied: missing scopes"
            );
            return Err(AuthError::authorization(format!(
                "Invalid auth scopes, needed: {}, received: {}",
                join_scopes(&required),
                join_scopes(&ctx.scopes)
            )));
        }

        tracing::info!(
            subject = %ctx.subject,
            scopes = %join_scopes(&ctx.scopes),
            method = %request.method,
            "Request authenticated"
        );
        Ok(Some(ctx))
    }

    fn application_scopes(&self) -> BTreeSet<String> {
        self.scopes.application_scopes()
    }
}
