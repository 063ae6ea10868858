//! Command-line argument parsing and configuration.
//!
//! Supports:
//! - CLI arguments via clap
//! - TOML configuration file
//! - Merging CLI with file config (CLI takes precedence)

use crate::core::config::DEFAULT_ORIGIN;
use crate::core::connection::webrtc::IceServer;
use crate::core::handshake::HandshakeMode;
use crate::core::session::SessionConfig;
use crate::core::transfer::WireShape;
use anyhow::Context;
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

/// Signaling variant, as typed on the command line.
#[derive(ValueEnum, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModeOption {
    /// Exchange connection codes by hand.
    #[default]
    Manual,
    /// Use a signaling relay that assigns peer ids.
    Relay,
}

impl From<ModeOption> for HandshakeMode {
    fn from(value: ModeOption) -> Self {
        match value {
            ModeOption::Manual => HandshakeMode::Manual,
            ModeOption::Relay => HandshakeMode::Relay,
        }
    }
}

/// Peerlink - direct peer-to-peer chat and file transfer.
#[derive(Parser, Deserialize, Clone, Debug, Default)]
#[command(author, version, about)]
#[command(propagate_version = true)]
#[serde(default)]
pub struct Args {
    /// How the two endpoints exchange connection details.
    #[clap(long, value_enum)]
    pub mode: Option<ModeOption>,

    /// WebSocket URL of the signaling relay (relay mode).
    #[clap(long)]
    pub relay_url: Option<Url>,

    /// Base URL of shareable links.
    #[clap(long)]
    pub origin: Option<Url>,

    /// STUN server URL. Repeat to add more.
    #[clap(long = "stun")]
    pub stun: Vec<String>,

    /// Send files as one base64 JSON frame instead of binary chunks.
    #[clap(long)]
    pub whole_file: bool,

    /// Verbosity level (-v, -vv, -vvv).
    #[clap(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Directory for all persistent data (identity, peers, downloads, logs).
    /// Defaults to ~/.peerlink/
    #[clap(long)]
    pub conf: Option<PathBuf>,
}

impl Args {
    /// Load Args from CLI + TOML file (if it exists).
    /// CLI values override those from the file.
    pub fn load() -> Self {
        let mut cli_args = Args::parse();

        // Resolve relative paths to absolute before any working directory change
        cli_args.conf = cli_args.conf.map(Self::resolve_path);

        let default_path = PathBuf::from("config.toml");
        if let Some(file_args) = Self::from_file(&default_path) {
            return Self::merge(file_args, cli_args);
        }

        cli_args
    }

    /// Resolve a potentially relative path to an absolute one.
    fn resolve_path(p: PathBuf) -> PathBuf {
        if p.is_absolute() {
            p
        } else {
            std::env::current_dir().unwrap_or_default().join(p)
        }
    }

    /// Load args from a TOML file.
    fn from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        let content = fs::read_to_string(path).ok()?;
        match toml::from_str::<Args>(&content) {
            Ok(args) => Some(args),
            Err(e) => {
                eprintln!("ignoring {}: {e}", path.display());
                None
            }
        }
    }

    /// Merge file args with CLI args (CLI takes precedence).
    fn merge(mut file: Args, cli: Args) -> Args {
        if cli.mode.is_some() {
            file.mode = cli.mode;
        }
        if cli.relay_url.is_some() {
            file.relay_url = cli.relay_url;
        }
        if cli.origin.is_some() {
            file.origin = cli.origin;
        }
        if !cli.stun.is_empty() {
            file.stun = cli.stun;
        }
        if cli.whole_file {
            file.whole_file = true;
        }
        if cli.verbose > 0 {
            file.verbose = cli.verbose;
        }
        if cli.conf.is_some() {
            file.conf = cli.conf;
        }
        file.conf = file.conf.map(Self::resolve_path);
        file
    }

    pub fn mode(&self) -> HandshakeMode {
        self.mode.unwrap_or_default().into()
    }

    /// Session settings derived from these arguments.
    pub fn session_config(&self) -> anyhow::Result<SessionConfig> {
        let origin = match &self.origin {
            Some(origin) => origin.clone(),
            None => Url::parse(DEFAULT_ORIGIN).context("invalid default origin")?,
        };
        let mut config = SessionConfig::new(self.mode(), origin);
        if self.whole_file {
            config.wire = WireShape::WholeFile;
        }
        Ok(config)
    }

    /// Relay to connect to; required in relay mode.
    pub fn relay_url(&self) -> anyhow::Result<Option<Url>> {
        match (self.mode(), &self.relay_url) {
            (HandshakeMode::Relay, None) => anyhow::bail!("relay mode needs --relay-url"),
            (HandshakeMode::Relay, Some(url)) => Ok(Some(url.clone())),
            (HandshakeMode::Manual, _) => Ok(None),
        }
    }

    pub fn ice_servers(&self) -> Vec<IceServer> {
        if self.stun.is_empty() {
            IceServer::default_servers()
        } else {
            self.stun.iter().map(IceServer::stun).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_file() {
        let file: Args = toml::from_str(
            r#"
            mode = "relay"
            relay_url = "ws://relay.example:8080/"
            stun = ["stun:file.example:3478"]
            verbose = 2
            "#,
        )
        .unwrap();
        let cli = Args::parse_from(["peerlink", "--stun", "stun:cli.example:3478", "--whole-file"]);

        let merged = Args::merge(file, cli);
        assert_eq!(merged.mode(), HandshakeMode::Relay);
        assert_eq!(merged.verbose, 2);
        assert!(merged.whole_file);
        assert_eq!(merged.stun, vec!["stun:cli.example:3478".to_string()]);
        assert_eq!(
            merged.relay_url().unwrap().map(|u| u.to_string()).as_deref(),
            Some("ws://relay.example:8080/")
        );
    }

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["peerlink"]);
        assert_eq!(args.mode(), HandshakeMode::Manual);
        assert_eq!(args.relay_url().unwrap(), None);
        assert_eq!(args.ice_servers(), IceServer::default_servers());

        let config = args.session_config().unwrap();
        assert_eq!(config.origin.as_str(), "http://localhost:5173/");
        assert_eq!(config.wire, WireShape::Chunked);
    }

    #[test]
    fn test_relay_mode_requires_url() {
        let args = Args::parse_from(["peerlink", "--mode", "relay"]);
        assert!(args.relay_url().is_err());
    }
}
