//! Subcommands module for the bastion-tunnel CLI

pub mod convert_key;
pub mod inspect_key;
pub mod open;

use crate::cli::output::OutputFormatter;
use anyhow::{Context, Result};
use bastion_tunnel::config::Config;
use bastion_tunnel::error::{Error, KeyFormatError};
use bastion_tunnel::keys::{KeyMaterializer, KeySpec, MaterializedKey};
use std::io::IsTerminal;
use std::path::Path;
use zeroize::Zeroizing;

/// Common context shared between commands
pub struct CommandContext {
    /// Configuration
    pub config: Config,
    /// Output formatter
    pub output: OutputFormatter,
}

impl CommandContext {
    /// Create a new command context from CLI arguments
    pub fn new(cli: &crate::cli::Cli, config: Config) -> Self {
        let output = OutputFormatter::new(!cli.no_color, cli.is_json(), cli.verbosity());

        Self { config, output }
    }

    /// Whether prompts can be shown.
    pub fn is_interactive(&self) -> bool {
        !self.output.is_json() && std::io::stdin().is_terminal()
    }

    /// Materialize a key file, prompting for its passphrase when the key is
    /// encrypted and none was configured.
    pub fn load_key(&self, path: &Path, passphrase: Option<&str>) -> Result<MaterializedKey> {
        let raw = Zeroizing::new(
            std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?,
        );
        let materializer = KeyMaterializer::new();

        match materializer.materialize(&KeySpec::new(raw.as_slice()).with_optional_passphrase(passphrase)) {
            Err(Error::KeyFormat(KeyFormatError::PassphraseRequired { .. }))
                if passphrase.is_none() && self.is_interactive() =>
            {
                let prompted = prompt_passphrase(&format!("Passphrase for {}", path.display()))?;
                Ok(materializer.materialize(&KeySpec::new(raw.as_slice()).with_passphrase(&prompted))?)
            }
            other => Ok(other?),
        }
    }
}

/// Read a secret from the terminal without echo.
pub fn prompt_passphrase(prompt: &str) -> Result<Zeroizing<String>> {
    let passphrase = dialoguer::Password::new()
        .with_prompt(prompt)
        .allow_empty_password(true)
        .interact()?;
    Ok(Zeroizing::new(passphrase))
}

/// Read a new secret with confirmation.
pub fn prompt_new_passphrase(prompt: &str) -> Result<Zeroizing<String>> {
    let passphrase = dialoguer::Password::new()
        .with_prompt(prompt)
        .with_confirmation("Confirm passphrase", "Passphrases do not match")
        .interact()?;
    Ok(Zeroizing::new(passphrase))
}

/// Trait for runnable commands
#[async_trait::async_trait]
pub trait Runnable {
    /// Execute the command
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32>;
}
