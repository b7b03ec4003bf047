//! bastion-tunnel - local TCP tunnels through an SSH jump host
//!
//! This is the main entry point for the bastion-tunnel CLI.

mod cli;

use anyhow::Result;
use bastion_tunnel::config::Config;
use cli::commands::{CommandContext, Runnable};
use cli::{Cli, Commands};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    if cli.verbosity() >= 2 {
        eprintln!("bastion-tunnel v{}", bastion_tunnel::version());
    }

    let exit_code = match run(&cli).await {
        Ok(code) => code,
        Err(err) => {
            let output = cli::output::OutputFormatter::new(!cli.no_color, cli.is_json(), cli.verbosity());
            output.error(&format!("{:#}", err));
            exit_code_for(&err)
        }
    };

    std::process::exit(exit_code);
}

async fn run(cli: &Cli) -> Result<i32> {
    let config = Config::load(cli.config.as_deref())?;

    // Create command context
    let mut ctx = CommandContext::new(cli, config);

    // Execute the appropriate command
    match &cli.command {
        Commands::Open(args) => args.run(&mut ctx).await,
        Commands::InspectKey(args) => args.run(&mut ctx).await,
        Commands::ConvertKey(args) => args.run(&mut ctx).await,
    }
}

/// Map library errors to their exit codes; anything else exits with 1.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<bastion_tunnel::error::Error>())
        .map_or(1, bastion_tunnel::error::Error::exit_code)
}

/// Initialize logging based on verbosity level
fn init_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(verbosity >= 3))
        .with(env_filter)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use bastion_tunnel::error::Error;

    #[test]
    fn test_exit_code_from_library_error() {
        let err = anyhow::Error::new(Error::TunnelClosed);
        assert_eq!(exit_code_for(&err), Error::TunnelClosed.exit_code());

        let wrapped = anyhow::Error::new(Error::AuthMaterial("none".to_string())).context("opening tunnel");
        assert_eq!(exit_code_for(&wrapped), Error::AuthMaterial(String::new()).exit_code());
    }

    #[test]
    fn test_exit_code_for_other_errors() {
        assert_eq!(exit_code_for(&anyhow::anyhow!("boom")), 1);
    }
}
