//! Open command - run a tunnel until interrupted

use super::{prompt_passphrase, CommandContext, Runnable};
use anyhow::Result;
use bastion_tunnel::config::Config;
use bastion_tunnel::error::{Error, KeyFormatError};
use bastion_tunnel::keys::{KeyMaterializer, KeySpec};
use bastion_tunnel::tunnel::{HostKeyPolicy, TunnelConnection, TunnelEndpoint, TunnelOptions};
use clap::Parser;
use std::path::PathBuf;

/// Arguments for the open command
#[derive(Parser, Debug, Clone)]
pub struct OpenArgs {
    /// Destination as seen from the jump host (host:port)
    #[arg(short = 't', long, value_parser = parse_endpoint)]
    pub target: Option<TunnelEndpoint>,

    /// Jump host name or address
    #[arg(short = 'J', long)]
    pub jump_host: Option<String>,

    /// Jump host SSH port
    #[arg(short = 'p', long)]
    pub jump_port: Option<u16>,

    /// User on the jump host
    #[arg(short = 'u', long)]
    pub user: Option<String>,

    /// Private key file (OpenSSH, PKCS#1, PKCS#8, SEC1 or DSA PEM)
    #[arg(short = 'i', long)]
    pub identity_file: Option<PathBuf>,

    /// Prompt for the jump host password
    #[arg(long)]
    pub ask_password: bool,

    /// Local address to listen on
    #[arg(long)]
    pub local_host: Option<String>,

    /// Local port to listen on (0 picks a free port)
    #[arg(short = 'L', long)]
    pub local_port: Option<u16>,

    /// Connect and handshake timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Host key policy: accept-any, accept-new or strict
    #[arg(long)]
    pub host_key_policy: Option<HostKeyPolicy>,

    /// known_hosts file to verify the jump host against
    #[arg(long)]
    pub known_hosts: Option<PathBuf>,
}

impl OpenArgs {
    /// Layer the flags over the loaded configuration.
    pub fn merge_into(&self, mut config: Config) -> Config {
        if let Some(target) = &self.target {
            config.target.host = Some(target.host.clone());
            config.target.port = Some(target.port);
        }
        if let Some(host) = &self.jump_host {
            config.jump.host = Some(host.clone());
        }
        if let Some(port) = self.jump_port {
            config.jump.port = port;
        }
        if let Some(user) = &self.user {
            config.jump.user = Some(user.clone());
        }
        if let Some(file) = &self.identity_file {
            config.jump.identity_file = Some(file.clone());
        }
        if let Some(host) = &self.local_host {
            config.local.host = host.clone();
        }
        if let Some(port) = self.local_port {
            config.local.port = port;
        }
        if let Some(timeout) = self.timeout {
            config.jump.connect_timeout = timeout;
        }
        if let Some(policy) = self.host_key_policy {
            config.jump.host_key_policy = policy;
        }
        if let Some(file) = &self.known_hosts {
            config.jump.known_hosts_file = Some(file.clone());
        }
        config
    }

    /// Execute the open command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let mut options = self.merge_into(ctx.config.clone()).tunnel_options()?;

        if self.ask_password {
            options.password = Some(prompt_passphrase("Jump host password")?);
        }
        if needs_passphrase(&options) && ctx.is_interactive() {
            options.key_passphrase = Some(prompt_passphrase("Private key passphrase")?);
        }

        if options.host_key_policy == HostKeyPolicy::AcceptAny {
            ctx.output
                .warning("Host key checking is disabled (host-key-policy = accept-any)");
        }

        let spinner = ctx
            .output
            .create_spinner(&format!("Connecting to {}", options.jump));
        let opened = TunnelConnection::open(options).await;
        if let Some(sp) = &spinner {
            sp.finish_and_clear();
        }
        let mut tunnel = opened?;
        let bound = tunnel.bound_address()?;

        if ctx.output.is_json() {
            ctx.output.json(&serde_json::json!({
                "type": "tunnel",
                "local": bound,
                "jump": tunnel.jump(),
                "remote": tunnel.remote(),
            }))?;
        } else {
            ctx.output.success(&format!(
                "Listening on {} -> {} via {}",
                bound,
                tunnel.remote(),
                tunnel.jump()
            ));
            ctx.output.hint("Press Ctrl-C to close the tunnel");
        }
        ctx.output.flush();

        let interrupted = tokio::signal::ctrl_c().await;
        tunnel.close().await?;
        interrupted?;

        ctx.output.info("Tunnel closed");
        Ok(0)
    }
}

#[async_trait::async_trait]
impl Runnable for OpenArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        self.execute(ctx).await
    }
}

/// Whether the configured key is encrypted and no passphrase was given.
fn needs_passphrase(options: &TunnelOptions) -> bool {
    match (&options.private_key, &options.key_passphrase) {
        (Some(raw), None) => matches!(
            KeyMaterializer::new().materialize(&KeySpec::new(raw.as_slice())),
            Err(Error::KeyFormat(KeyFormatError::PassphraseRequired { .. }))
        ),
        _ => false,
    }
}

/// Parse `host:port`, `[v6]:port` or a bare IPv6 address with a trailing port.
fn parse_endpoint(value: &str) -> std::result::Result<TunnelEndpoint, String> {
    let (host, port) = value
        .rsplit_once(':')
        .ok_or_else(|| format!("expected host:port, got '{}'", value))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(format!("missing host in '{}'", value));
    }
    let port = port
        .parse::<u16>()
        .map_err(|e| format!("invalid port in '{}': {}", value, e))?;
    Ok(TunnelEndpoint::new(host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: OpenArgs,
    }

    fn parse(args: &[&str]) -> OpenArgs {
        let mut argv = vec!["open"];
        argv.extend_from_slice(args);
        Harness::try_parse_from(argv).unwrap().args
    }

    #[test]
    fn test_parse_endpoint() {
        assert_eq!(
            parse_endpoint("db.internal:5432").unwrap(),
            TunnelEndpoint::new("db.internal", 5432)
        );
        assert_eq!(
            parse_endpoint("[fe80::1]:22").unwrap(),
            TunnelEndpoint::new("fe80::1", 22)
        );
        assert!(parse_endpoint("db.internal").is_err());
        assert!(parse_endpoint(":5432").is_err());
        assert!(parse_endpoint("db:99999").is_err());
    }

    #[test]
    fn test_flags_override_config() {
        let args = parse(&[
            "--target",
            "db.internal:5432",
            "-J",
            "bastion",
            "-u",
            "deploy",
            "-L",
            "15432",
            "--host-key-policy",
            "strict",
        ]);

        let mut config = Config::default();
        config.jump.host = Some("from-config".to_string());
        config.jump.port = 2222;
        let merged = args.merge_into(config);

        assert_eq!(merged.jump.host.as_deref(), Some("bastion"));
        assert_eq!(merged.jump.port, 2222);
        assert_eq!(merged.jump.user.as_deref(), Some("deploy"));
        assert_eq!(merged.target.host.as_deref(), Some("db.internal"));
        assert_eq!(merged.target.port, Some(5432));
        assert_eq!(merged.local.port, 15432);
        assert_eq!(merged.jump.host_key_policy, HostKeyPolicy::Strict);
    }

    #[test]
    fn test_needs_passphrase_only_for_encrypted_keys() {
        let fixture = |name: &str| {
            std::fs::read(format!(
                "{}/tests/fixtures/keys/{}",
                env!("CARGO_MANIFEST_DIR"),
                name
            ))
            .unwrap()
        };
        let base = TunnelOptions::new(
            TunnelEndpoint::new("bastion", 22),
            "deploy",
            TunnelEndpoint::new("db", 5432),
        );

        assert!(needs_passphrase(&base.clone().private_key(fixture("openssh_ed25519_enc.key"))));
        assert!(!needs_passphrase(&base.clone().private_key(fixture("openssh_ed25519.key"))));
        assert!(!needs_passphrase(
            &base
                .clone()
                .private_key(fixture("openssh_ed25519_enc.key"))
                .key_passphrase("anything")
        ));
        assert!(!needs_passphrase(&base));
    }
}
