//! Convert-key command - write a private key in the OpenSSH encoding

use super::{prompt_new_passphrase, CommandContext, Runnable};
use anyhow::{bail, Context, Result};
use bastion_tunnel::keys::{MaterializedKey, Passphrase};
use clap::Parser;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

/// Arguments for the convert-key command
#[derive(Parser, Debug, Clone)]
pub struct ConvertKeyArgs {
    /// Private key file in any supported encoding
    pub path: PathBuf,

    /// Write the converted key here instead of stdout
    #[arg(short = 'o', long = "out")]
    pub out: Option<PathBuf>,

    /// Encrypt the output with a new passphrase (prompted)
    #[arg(long, conflicts_with = "no_passphrase")]
    pub new_passphrase: bool,

    /// Write the output unencrypted
    #[arg(long)]
    pub no_passphrase: bool,

    /// Overwrite the output file if it exists
    #[arg(short = 'f', long)]
    pub force: bool,
}

impl ConvertKeyArgs {
    /// Execute the convert-key command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let key = ctx.load_key(&self.path, ctx.config.jump.key_passphrase.as_deref())?;

        let converted = if self.new_passphrase {
            let passphrase = prompt_new_passphrase("New passphrase")?;
            key.key().to_openssh(&Passphrase::from_text(Some(passphrase.as_str())))?
        } else {
            self.encode(&key)?
        };

        match &self.out {
            Some(out) => {
                write_private(out, converted.as_bytes(), self.force)?;
                ctx.output.success(&format!(
                    "Wrote {} {} key to {} (from {})",
                    key.family(),
                    key.key().algorithm(),
                    out.display(),
                    key.source_encoding()
                ));
            }
            None => {
                print!("{}", converted.as_str());
                ctx.output.flush();
            }
        }
        Ok(0)
    }

    /// The converted text when no new passphrase is requested.
    fn encode(&self, key: &MaterializedKey) -> Result<Zeroizing<String>> {
        if self.no_passphrase {
            Ok(key.key().to_openssh(&Passphrase::none())?)
        } else {
            Ok(Zeroizing::new(key.openssh().to_string()))
        }
    }
}

#[async_trait::async_trait]
impl Runnable for ConvertKeyArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        self.execute(ctx).await
    }
}

/// Write `contents` readable by the owner only.
fn write_private(path: &Path, contents: &[u8], force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options
        .open(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    file.write_all(contents)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
