//! `known_hosts` parsing and jump-host key verification.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use ssh_key::PublicKey;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, trace, warn};

/// What to do with the jump host's key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostKeyPolicy {
    /// Accept any key without consulting `known_hosts`.
    AcceptAny,
    /// Reject keys that differ from `known_hosts`; accept unknown hosts
    /// (OpenSSH `StrictHostKeyChecking=accept-new`).
    #[default]
    AcceptNew,
    /// Only accept hosts already present in `known_hosts`.
    Strict,
}

impl HostKeyPolicy {
    /// Whether a key with the given verification status is accepted.
    pub fn accepts(self, status: HostKeyStatus) -> bool {
        match (self, status) {
            (HostKeyPolicy::AcceptAny, _) => true,
            (_, HostKeyStatus::Verified) => true,
            (HostKeyPolicy::AcceptNew, HostKeyStatus::Unknown) => true,
            (HostKeyPolicy::Strict, HostKeyStatus::Unknown) => false,
            (_, HostKeyStatus::Mismatch) => false,
        }
    }
}

impl fmt::Display for HostKeyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HostKeyPolicy::AcceptAny => "accept-any",
            HostKeyPolicy::AcceptNew => "accept-new",
            HostKeyPolicy::Strict => "strict",
        };
        f.write_str(name)
    }
}

impl FromStr for HostKeyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "accept-any" | "no" | "off" => Ok(HostKeyPolicy::AcceptAny),
            "accept-new" => Ok(HostKeyPolicy::AcceptNew),
            "strict" | "yes" => Ok(HostKeyPolicy::Strict),
            other => Err(format!(
                "unknown host key policy '{}' (expected accept-any, accept-new or strict)",
                other
            )),
        }
    }
}

/// Result of looking a host key up in `known_hosts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKeyStatus {
    /// Key matches an entry for the host.
    Verified,
    /// No entry for the host.
    Unknown,
    /// The host has entries, none with this key.
    Mismatch,
}

#[derive(Debug, Clone)]
enum HostField {
    /// Comma-separated patterns.
    Patterns(Vec<String>),
    /// `|1|salt|hash`: HMAC-SHA1 of the host name under `salt`.
    Hashed { salt: Vec<u8>, hash: Vec<u8> },
}

#[derive(Debug, Clone)]
struct KnownHostEntry {
    hosts: HostField,
    key: PublicKey,
}

/// Parsed `known_hosts` file.
#[derive(Debug, Clone, Default)]
pub struct KnownHosts {
    entries: Vec<KnownHostEntry>,
}

impl KnownHosts {
    pub fn empty() -> Self {
        Self::default()
    }

    /// `~/.ssh/known_hosts`
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".ssh").join("known_hosts"))
    }

    /// Load a file; a missing or unreadable file yields no entries.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let known_hosts = Self::parse(&content);
                debug!(path = %path.display(), entry_count = known_hosts.len(), "Loaded known_hosts entries");
                known_hosts
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "No usable known_hosts file");
                Self::empty()
            }
        }
    }

    /// Parse `known_hosts` content. Marker lines (`@cert-authority`,
    /// `@revoked`) and malformed lines are skipped.
    pub fn parse(content: &str) -> Self {
        let entries = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(parse_line)
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up `key` for `host:port`.
    pub fn check(&self, host: &str, port: u16, key: &PublicKey) -> HostKeyStatus {
        let mut seen_host = false;

        for entry in &self.entries {
            let matched = match &entry.hosts {
                HostField::Patterns(patterns) => host_matches(patterns, host, port),
                HostField::Hashed { salt, hash } => hashed_host_matches(salt, hash, host, port),
            };
            if !matched {
                continue;
            }
            if entry.key.key_data() == key.key_data() {
                return HostKeyStatus::Verified;
            }
            seen_host = true;
        }

        if seen_host {
            warn!(host = %host, port = port, "Host key differs from known_hosts");
            HostKeyStatus::Mismatch
        } else {
            HostKeyStatus::Unknown
        }
    }
}

fn parse_line(line: &str) -> Option<KnownHostEntry> {
    if line.starts_with('@') {
        trace!("Skipping known_hosts marker line");
        return None;
    }

    let mut parts = line.split_whitespace();
    let hosts = parts.next()?;
    let key_type = parts.next()?;
    let key_base64 = parts.next()?;

    let hosts = match hosts.strip_prefix("|1|") {
        Some(hashed) => match parse_hashed(hashed) {
            Some(field) => field,
            None => {
                trace!("Skipping malformed hashed known_hosts entry");
                return None;
            }
        },
        None => HostField::Patterns(hosts.split(',').map(str::to_string).collect()),
    };

    let key = match PublicKey::from_openssh(&format!("{} {}", key_type, key_base64)) {
        Ok(key) => key,
        Err(e) => {
            trace!(key_type = %key_type, error = %e, "Failed to parse key, skipping entry");
            return None;
        }
    };

    Some(KnownHostEntry { hosts, key })
}

fn parse_hashed(field: &str) -> Option<HostField> {
    let (salt, hash) = field.split_once('|')?;
    Some(HostField::Hashed {
        salt: BASE64.decode(salt).ok()?,
        hash: BASE64.decode(hash).ok()?,
    })
}

/// Hashed entries store `host` for port 22 and `[host]:port` otherwise.
fn hashed_host_matches(salt: &[u8], hash: &[u8], host: &str, port: u16) -> bool {
    let target = if port == 22 {
        host.to_string()
    } else {
        format!("[{}]:{}", host, port)
    };

    let Ok(mut mac) = Hmac::<Sha1>::new_from_slice(salt) else {
        return false;
    };
    mac.update(target.as_bytes());
    mac.verify_slice(hash).is_ok()
}

/// A host matches when some pattern matches and no negated pattern does.
fn host_matches(patterns: &[String], host: &str, port: u16) -> bool {
    let mut matched = false;
    for pattern in patterns {
        if let Some(negated) = pattern.strip_prefix('!') {
            if pattern_matches(negated, host, port) {
                return false;
            }
        } else if pattern_matches(pattern, host, port) {
            matched = true;
        }
    }
    matched
}

/// `host`, `[host]:port`, or a `*`/`?` wildcard (port 22 implied unless
/// bracketed).
fn pattern_matches(pattern: &str, host: &str, port: u16) -> bool {
    if let Some(rest) = pattern.strip_prefix('[') {
        if let Some((pattern_host, tail)) = rest.split_once(']') {
            let pattern_port = tail
                .strip_prefix(':')
                .and_then(|p| p.parse::<u16>().ok())
                .unwrap_or(22);
            return pattern_port == port && wildcard_match(pattern_host, host);
        }
    }

    port == 22 && wildcard_match(pattern, host)
}

fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(c) if *c == '?' || c.eq_ignore_ascii_case(&text[t]) => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    t = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|c| *c == '*')
}
