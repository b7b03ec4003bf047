//! Inspect-key command - describe a private key file

use super::{CommandContext, Runnable};
use anyhow::Result;
use bastion_tunnel::error::KeyEncoding;
use bastion_tunnel::keys::{KeyFamily, MaterializedKey};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;

/// Arguments for the inspect-key command
#[derive(Parser, Debug, Clone)]
pub struct InspectKeyArgs {
    /// Private key file
    pub path: PathBuf,
}

/// What `inspect-key` reports about a key.
#[derive(Debug, Serialize)]
pub struct KeyReport {
    pub path: PathBuf,
    pub family: KeyFamily,
    pub algorithm: String,
    pub encoding: KeyEncoding,
    pub fingerprint: String,
    pub public_key: String,
}

impl KeyReport {
    pub fn new(path: PathBuf, key: &MaterializedKey) -> Result<Self> {
        Ok(Self {
            path,
            family: key.family(),
            algorithm: key.key().algorithm().to_string(),
            encoding: key.source_encoding(),
            fingerprint: key.fingerprint().to_string(),
            public_key: key.key().public_key().to_openssh()?,
        })
    }
}

impl InspectKeyArgs {
    /// Execute the inspect-key command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let key = ctx.load_key(&self.path, ctx.config.jump.key_passphrase.as_deref())?;
        let report = KeyReport::new(self.path.clone(), &key)?;

        if ctx.output.is_json() {
            ctx.output.json(&report)?;
            return Ok(0);
        }

        ctx.output.section(&report.path.display().to_string());
        ctx.output.field("family", report.family);
        ctx.output.field("algorithm", &report.algorithm);
        ctx.output.field("encoding", report.encoding);
        ctx.output.field("fingerprint", &report.fingerprint);
        ctx.output.field("public key", &report.public_key);
        if let Some(warning) = usage_warning(report.family) {
            ctx.output.warning(warning);
        }
        if key.was_reencoded() {
            ctx.output
                .hint("convert-key writes this key in the OpenSSH encoding");
        }
        Ok(0)
    }
}

/// Caveat about using a key of `family` as tunnel credentials.
fn usage_warning(family: KeyFamily) -> Option<&'static str> {
    match family {
        KeyFamily::Dsa => Some("DSA keys are rejected by the tunnel's SSH client"),
        _ => None,
    }
}

#[async_trait::async_trait]
impl Runnable for InspectKeyArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        self.execute(ctx).await
    }
}
