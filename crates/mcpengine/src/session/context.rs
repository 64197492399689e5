//! Per-request context handed to tool, resource and prompt handlers.

use std::any::Any;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};

use mcpengine_auth::AuthContext;

use crate::types::{
    CreateMessageParams, CreateMessageResult, ListRootsResult, LogLevel, LogMessageParams,
    McpError, McpResult, ProgressParams, ProgressToken, RequestId, METHOD_CREATE_MESSAGE,
    METHOD_LIST_ROOTS, NOTIFICATION_MESSAGE, NOTIFICATION_PROGRESS,
};

use super::peer::Peer;

/// Minimum level for `notifications/message`, shared by a session's requests.
#[derive(Debug, Clone)]
pub struct LevelFilter(Arc<AtomicU8>);

impl Default for LevelFilter {
    fn default() -> Self {
        Self(Arc::new(AtomicU8::new(LogLevel::Debug as u8)))
    }
}

impl LevelFilter {
    pub fn set(&self, level: LogLevel) {
        self.0.store(level as u8, Ordering::Relaxed);
    }

    pub fn get(&self) -> LogLevel {
        match self.0.load(Ordering::Relaxed) {
            0 => LogLevel::Debug,
            1 => LogLevel::Info,
            2 => LogLevel::Notice,
            3 => LogLevel::Warning,
            4 => LogLevel::Error,
            5 => LogLevel::Critical,
            6 => LogLevel::Alert,
            _ => LogLevel::Emergency,
        }
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        level >= self.get()
    }
}

/// Everything a handler may need besides its arguments.
///
/// Built once per inbound request and dropped with it.
#[derive(Clone)]
pub struct RequestContext {
    pub request_id: RequestId,
    pub auth: Option<AuthContext>,
    pub progress_token: Option<ProgressToken>,
    lifespan: Arc<dyn Any + Send + Sync>,
    peer: Peer,
    log_level: LevelFilter,
}

impl RequestContext {
    pub fn new(
        request_id: RequestId,
        auth: Option<AuthContext>,
        lifespan: Arc<dyn Any + Send + Sync>,
        peer: Peer,
        log_level: LevelFilter,
    ) -> Self {
        Self {
            request_id,
            auth,
            progress_token: None,
            lifespan,
            peer,
            log_level,
        }
    }

    pub fn with_progress_token(mut self, token: Option<ProgressToken>) -> Self {
        self.progress_token = token;
        self
    }

    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    pub(crate) fn log_filter(&self) -> &LevelFilter {
        &self.log_level
    }

    /// State produced by the server's lifespan hook, if it is a `T`.
    pub fn lifespan<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.lifespan.downcast_ref::<T>()
    }

    pub fn auth(&self) -> Option<&AuthContext> {
        self.auth.as_ref()
    }

    /// The caller's identity, or an authentication error carried on the JSON-RPC response.
    pub fn require_auth(&self) -> McpResult<&AuthContext> {
        self.auth
            .as_ref()
            .ok_or_else(|| McpError::Authentication("Authentication required".to_string()))
    }

    pub fn require_scope(&self, scope: &str) -> McpResult<&AuthContext> {
        let auth = self.require_auth()?;
        if !auth.has_scope(scope) {
            return Err(McpError::Authorization(format!("Missing required scope: {scope}")));
        }
        Ok(auth)
    }

    /// Ask the client to sample from its model.
    pub async fn create_message(&self, params: &CreateMessageParams) -> McpResult<CreateMessageResult> {
        self.peer
            .request_typed(METHOD_CREATE_MESSAGE, params, None)
            .await
    }

    /// Ask the client for its roots.
    pub async fn list_roots(&self) -> McpResult<ListRootsResult> {
        self.peer
            .request_typed(METHOD_LIST_ROOTS, &serde_json::json!({}), None)
            .await
    }

    /// Send a log message to the client unless it is below the session's level.
    pub fn log(&self, level: LogLevel, data: impl Into<Value>) -> McpResult<()> {
        if !self.log_level.enabled(level) {
            return Ok(());
        }
        let params = LogMessageParams {
            level,
            logger: None,
            data: data.into(),
        };
        self.peer
            .notify(NOTIFICATION_MESSAGE, Some(serde_json::to_value(params)?))
    }

    pub fn info(&self, message: &str) -> McpResult<()> {
        self.log(LogLevel::Info, json!(message))
    }

    /// Report progress when the caller asked for it; a no-op otherwise.
    pub fn report_progress(&self, progress: f64, total: Option<f64>) -> McpResult<()> {
        let Some(token) = self.progress_token.clone() else {
            return Ok(());
        };
        let params = ProgressParams {
            progress_token: token,
            progress,
            total,
        };
        self.peer
            .notify(NOTIFICATION_PROGRESS, Some(serde_json::to_value(params)?))
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .field("auth", &self.auth)
            .field("progress_token", &self.progress_token)
            .finish_non_exhaustive()
    }
}
