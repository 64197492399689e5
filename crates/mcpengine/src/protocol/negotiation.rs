//! Session phases and capability negotiation during initialization.

use crate::server::McpServer;
use crate::types::{
    negotiate_version, ClientCapabilities, Implementation, InitializeParams, InitializeResult,
    McpError, McpResult,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Uninitialized,
    Initializing,
    Initialized,
    Closed,
}

/// What the client told us during `initialize`, plus the session phase.
#[derive(Debug, Clone, Default)]
pub struct Handshake {
    phase: Phase,
    pub client_capabilities: Option<ClientCapabilities>,
    pub client_info: Option<Implementation>,
    pub protocol_version: Option<String>,
}

impl Handshake {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Handle `initialize`. Only valid once, from `Uninitialized`.
    pub fn begin(
        &mut self,
        params: InitializeParams,
        server: &McpServer,
    ) -> McpResult<InitializeResult> {
        if self.phase != Phase::Uninitialized {
            return Err(McpError::InvalidRequest(
                "Invalid request state: session is already initialized".to_string(),
            ));
        }

        let version = negotiate_version(&params.protocol_version);
        if version != params.protocol_version {
            tracing::warn!(
                requested = %params.protocol_version,
                answered = version,
                "Unsupported protocol version requested; answering with latest"
            );
        }

        tracing::info!(
            "Initializing session for client {} v{}",
            params.client_info.name,
            params.client_info.version
        );

        self.client_capabilities = Some(params.capabilities);
        self.client_info = Some(params.client_info);
        self.protocol_version = Some(version.to_string());
        self.phase = Phase::Initializing;

        Ok(InitializeResult {
            protocol_version: version.to_string(),
            capabilities: server.capabilities(),
            server_info: server.info().clone(),
            instructions: server.instructions().map(str::to_string),
        })
    }

    /// Handle `notifications/initialized`. Returns false when it arrived out of order.
    pub fn complete(&mut self) -> bool {
        if self.phase != Phase::Initializing {
            return false;
        }
        self.phase = Phase::Initialized;
        tracing::info!("MCP handshake complete");
        true
    }

    /// Skip the handshake for exchanges that carry no connection state.
    pub fn assume_initialized(&mut self) {
        self.phase = Phase::Initialized;
    }

    pub fn close(&mut self) {
        self.phase = Phase::Closed;
    }

    /// Gate a request other than `initialize` and `ping`.
    pub fn admit(&self, method: &str) -> McpResult<()> {
        match self.phase {
            Phase::Initialized => Ok(()),
            Phase::Closed => Err(McpError::InvalidRequest("Session is closed".to_string())),
            Phase::Uninitialized | Phase::Initializing => {
                Err(McpError::NotInitialized(method.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LATEST_PROTOCOL_VERSION;

    fn params(version: &str) -> InitializeParams {
        InitializeParams {
            protocol_version: version.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: Implementation::new("inspector", "1.0"),
        }
    }

    #[test]
    fn walks_through_phases() {
        let server = McpServer::builder("t").build();
        let mut hs = Handshake::default();
        assert_eq!(hs.admit("tools/list").unwrap_err().code(), -32600);

        let result = hs.begin(params("2024-11-05"), &server).unwrap();
        assert_eq!(result.protocol_version, "2024-11-05");
        assert_eq!(hs.phase(), Phase::Initializing);
        assert!(hs.admit("tools/list").is_err());

        assert!(hs.complete());
        assert!(hs.admit("tools/list").is_ok());

        hs.close();
        assert!(hs.admit("tools/list").is_err());
    }

    #[test]
    fn second_initialize_is_rejected() {
        let server = McpServer::builder("t").build();
        let mut hs = Handshake::default();
        hs.begin(params("2025-03-26"), &server).unwrap();
        assert_eq!(
            hs.begin(params("2025-03-26"), &server).unwrap_err().code(),
            -32600
        );
    }

    #[test]
    fn unknown_version_gets_latest() {
        let server = McpServer::builder("t").build();
        let mut hs = Handshake::default();
        let result = hs.begin(params("2000-01-01"), &server).unwrap();
        assert_eq!(result.protocol_version, LATEST_PROTOCOL_VERSION);
    }

    #[test]
    fn assumed_initialized_admits_requests() {
        let mut hs = Handshake::default();
        hs.assume_initialized();
        assert!(hs.admit("tools/call").is_ok());
        assert!(!hs.complete());
        assert_eq!(hs.phase(), Phase::Initialized);
    }

    #[test]
    fn initialized_out_of_order_is_ignored() {
        let mut hs = Handshake::default();
        assert!(!hs.complete());
        assert_eq!(hs.phase(), Phase::Uninitialized);
    }
}
