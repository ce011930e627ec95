use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use zeroize::Zeroizing;

use crate::access::filter::UnknownRolePolicy;

/// Default key shared with the token issuer.
pub const DEFAULT_AES_KEY: &str = "k8s-mcp-client";

/// The transport the server speaks on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Transport {
    /// JSON-RPC lines over stdin/stdout.
    Stdio,
    /// One-shot JSON-RPC over HTTP POST.
    Http,
    /// Long-lived server-sent event stream plus a message endpoint.
    Sse,
    /// Bidirectional streamable HTTP on a single endpoint.
    Streamable,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Stdio => "stdio",
            Transport::Http => "http",
            Transport::Sse => "sse",
            Transport::Streamable => "streamable",
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "kube-mcp-gate", about = "Kubernetes operations exposed as role-gated MCP tools")]
struct CliArgs {
    /// Transport type (stdio, http, sse or streamable).
    #[arg(short = 't', long, env = "MCP_TRANSPORT", value_enum, default_value = "stdio")]
    transport: Transport,

    /// Port to listen on for the HTTP based transports.
    #[arg(long, env = "MCP_ADDR", default_value_t = 8080)]
    addr: u16,

    /// PostgreSQL URL of the database holding the `clusters` table.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// SOCKS5 proxy used to reach the Kubernetes API servers.
    #[arg(long, env = "MCP_PROXY")]
    proxy: Option<String>,

    /// Key the identity tokens are encrypted with.
    #[arg(long, env = "MCP_AES_KEY", default_value = DEFAULT_AES_KEY, hide_env_values = true)]
    aes_key: String,

    /// Sliding session lifetime, in minutes.
    #[arg(long, env = "SESSION_TTL_MINUTES", default_value_t = 30)]
    session_ttl_minutes: u64,

    /// How often expired sessions are swept, in seconds.
    #[arg(long, env = "SESSION_SWEEP_SECONDS", default_value_t = 60)]
    session_sweep_seconds: u64,

    /// Allow one user to hold several live sessions.
    #[arg(long, env = "ALLOW_MULTI_SESSION", default_value_t = false)]
    allow_multi_session: bool,

    /// What an empty or unrecognised role may see (guest or deny).
    #[arg(long, env = "UNKNOWN_ROLE_POLICY", value_enum, default_value = "guest")]
    unknown_role_policy: UnknownRolePolicy,

    /// Identity token used to seed the stdio session.
    #[arg(long, env = "MCP_STDIO_TOKEN", hide_env_values = true)]
    stdio_token: Option<String>,
}

/// The application's configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Which transport to serve.
    pub transport: Transport,
    /// Listen port for HTTP transports.
    pub port: u16,
    /// The URL of the PostgreSQL database.
    pub database_url: Option<String>,
    /// Optional SOCKS5 proxy for Kubernetes calls.
    pub proxy: Option<String>,
    /// Key for identity token decryption.
    pub aes_key: Zeroizing<String>,
    /// Sliding session TTL.
    pub session_ttl: Duration,
    /// Interval between expiry sweeps.
    pub sweep_interval: Duration,
    /// Whether a user may hold more than one session.
    pub allow_multi_session: bool,
    /// Visibility tier for callers without a recognised role.
    pub unknown_role_policy: UnknownRolePolicy,
    /// Identity token for the stdio transport.
    pub stdio_token: Option<String>,
}

impl Config {
    /// Creates a new `Config` from environment variables and command line flags.
    ///
    /// Flags win over environment variables, which win over defaults.
    pub fn from_env() -> Result<Self> {
        let args = CliArgs::try_parse().context("Invalid command line arguments")?;
        Self::from_args(args)
    }

    fn from_args(args: CliArgs) -> Result<Self> {
        if args.session_ttl_minutes == 0 {
            anyhow::bail!("SESSION_TTL_MINUTES must be greater than zero");
        }
        if args.session_sweep_seconds == 0 {
            anyhow::bail!("SESSION_SWEEP_SECONDS must be greater than zero");
        }
        if args.aes_key.is_empty() {
            anyhow::bail!("MCP_AES_KEY must not be empty");
        }

        Ok(Self {
            transport: args.transport,
            port: args.addr,
            database_url: args.database_url.filter(|s| !s.trim().is_empty()),
            proxy: args.proxy.filter(|s| !s.trim().is_empty()),
            aes_key: Zeroizing::new(args.aes_key),
            session_ttl: Duration::from_secs(args.session_ttl_minutes * 60),
            sweep_interval: Duration::from_secs(args.session_sweep_seconds),
            allow_multi_session: args.allow_multi_session,
            unknown_role_policy: args.unknown_role_policy,
            stdio_token: args.stdio_token.filter(|s| !s.trim().is_empty()),
        })
    }

    /// A configuration suitable for in-process use, with every default applied.
    pub fn with_defaults(transport: Transport) -> Self {
        Self {
            transport,
            port: 8080,
            database_url: None,
            proxy: None,
            aes_key: Zeroizing::new(DEFAULT_AES_KEY.to_string()),
            session_ttl: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(60),
            allow_multi_session: false,
            unknown_role_policy: UnknownRolePolicy::Guest,
            stdio_token: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Config> {
        let mut argv = vec!["kube-mcp-gate"];
        argv.extend_from_slice(args);
        Config::from_args(CliArgs::try_parse_from(argv)?)
    }

    #[test]
    fn flags_override_defaults() {
        let config = parse(&[
            "--transport",
            "streamable",
            "--addr",
            "9000",
            "--session-ttl-minutes",
            "5",
            "--unknown-role-policy",
            "deny",
        ])
        .unwrap();

        assert_eq!(config.transport, Transport::Streamable);
        assert_eq!(config.port, 9000);
        assert_eq!(config.session_ttl, Duration::from_secs(300));
        assert_eq!(config.unknown_role_policy, UnknownRolePolicy::Deny);
        assert!(!config.allow_multi_session);
    }

    #[test]
    fn zero_ttl_is_rejected() {
        assert!(parse(&["--session-ttl-minutes", "0"]).is_err());
    }

    #[test]
    fn blank_proxy_is_ignored() {
        let config = parse(&["--proxy", "  "]).unwrap();
        assert!(config.proxy.is_none());
    }
}
