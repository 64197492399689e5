//! MCPEngine — entry point serving the built-in demo server.

#[cfg(feature = "http")]
use clap::Args;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[cfg(feature = "http")]
use mcpengine::config::{ServerSettings, SettingsOverrides};
use mcpengine::config::DEFAULT_LOG_LEVEL;
use mcpengine::server::demo_server;
use mcpengine::transport::stdio;
use mcpengine::types::{LATEST_PROTOCOL_VERSION, SUPPORTED_PROTOCOL_VERSIONS};

#[derive(Parser)]
#[command(
    name = "mcpengine",
    about = "MCP server framework — JSON-RPC sessions over stdio, SSE and HTTP with bearer-token scopes",
    version
)]
struct Cli {
    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve over stdin/stdout (default).
    Serve,

    /// Serve one JSON-RPC message per HTTP POST.
    #[cfg(feature = "http")]
    ServeHttp {
        #[command(flatten)]
        net: NetArgs,

        /// Route accepting JSON-RPC POSTs.
        #[arg(long)]
        mcp_path: Option<String>,

        /// Issue `mcp-session-id` on initialize and keep sessions between POSTs.
        #[arg(long)]
        sessions: bool,

        /// Drop tracked sessions after this many idle seconds.
        #[arg(long)]
        session_idle_secs: Option<u64>,
    },

    /// Serve over Server-Sent Events plus a POST endpoint.
    #[cfg(feature = "http")]
    ServeSse {
        #[command(flatten)]
        net: NetArgs,

        /// Route opening the event stream.
        #[arg(long)]
        sse_path: Option<String>,

        /// Route accepting client messages.
        #[arg(long)]
        message_path: Option<String>,
    },

    /// Print server capabilities and registered items as JSON.
    Info,

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   mcpengine completions bash > ~/.local/share/bash-completion/completions/mcpengine
    ///   mcpengine completions zsh > ~/.zfunc/_mcpengine
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

/// Listener and identity provider flags. Unset flags fall back to `MCPENGINE_*` variables.
#[cfg(feature = "http")]
#[derive(Args)]
struct NetArgs {
    /// Listen address.
    #[arg(long)]
    host: Option<String>,

    /// Listen port.
    #[arg(long)]
    port: Option<u16>,

    /// Require bearer tokens on protected methods.
    #[arg(long)]
    auth: bool,

    /// Token issuer; keys are discovered from its metadata document.
    #[arg(long)]
    issuer_url: Option<String>,

    /// Expected `aud` claim.
    #[arg(long)]
    audience: Option<String>,

    /// Skip the `aud` check.
    #[arg(long)]
    no_verify_audience: bool,

    /// Let list methods through without a token.
    #[arg(long)]
    allow_unauthenticated_list: bool,

    /// Cache the issuer's key set for this many seconds (0 disables).
    #[arg(long)]
    jwks_cache_ttl: Option<u64>,
}

#[cfg(feature = "http")]
impl NetArgs {
    fn into_overrides(self, log_level: Option<String>) -> SettingsOverrides {
        SettingsOverrides {
            host: self.host,
            port: self.port,
            log_level,
            authentication_enabled: self.auth.then_some(true),
            issuer_url: self.issuer_url,
            audience: self.audience,
            verify_audience: self.no_verify_audience.then_some(false),
            allow_unauthenticated_list: self.allow_unauthenticated_list.then_some(true),
            jwks_cache_ttl_secs: self.jwks_cache_ttl,
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Resolve log level: CLI flag > env var > default. RUST_LOG overrides all three.
    let log_level = cli
        .log_level
        .clone()
        .or_else(|| std::env::var("MCPENGINE_LOG_LEVEL").ok())
        .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let server = demo_server()?;
            tracing::info!(server = %server.info().name, "MCPEngine server (stdio)");
            stdio::serve(server).await?;
        }

        #[cfg(feature = "http")]
        Commands::ServeHttp {
            net,
            mcp_path,
            sessions,
            session_idle_secs,
        } => {
            let settings = ServerSettings::resolve(SettingsOverrides {
                mcp_path,
                http_sessions: sessions.then_some(true),
                http_session_idle_secs: session_idle_secs,
                ..net.into_overrides(cli.log_level)
            })?;
            let server = demo_server()?;
            let auth = settings.auth_backend(server.scopes().clone())?;
            mcpengine::transport::http::serve(
                settings.http_state(server, auth),
                settings.socket_addr(),
                &settings.mcp_path,
            )
            .await?;
        }

        #[cfg(feature = "http")]
        Commands::ServeSse {
            net,
            sse_path,
            message_path,
        } => {
            let settings = ServerSettings::resolve(SettingsOverrides {
                sse_path,
                message_path,
                ..net.into_overrides(cli.log_level)
            })?;
            let server = demo_server()?;
            let auth = settings.auth_backend(server.scopes().clone())?;
            mcpengine::transport::sse::serve(
                server,
                auth,
                settings.socket_addr(),
                &settings.sse_path,
                &settings.message_path,
            )
            .await?;
        }

        Commands::Info => {
            let server = demo_server()?;
            let tools = server.tools().list();
            let info = serde_json::json!({
                "server": server.info(),
                "protocol_version": LATEST_PROTOCOL_VERSION,
                "supported_versions": SUPPORTED_PROTOCOL_VERSIONS,
                "capabilities": server.capabilities(),
                "tools": tools.iter().map(|t| &t.name).collect::<Vec<_>>(),
                "tool_count": tools.len(),
                "prompts": server.prompts().list().into_iter().map(|p| p.name).collect::<Vec<_>>(),
                "resources": server.resources().list().into_iter().map(|r| r.uri).collect::<Vec<_>>(),
                "scopes": server.scopes().application_scopes(),
            });
            println!("{}", serde_json::to_string_pretty(&info)?);
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "mcpengine", &mut std::io::stdout());
        }
    }

    Ok(())
}
