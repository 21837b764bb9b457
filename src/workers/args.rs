//! Command-line argument parsing and configuration.
//!
//! Supports:
//! - CLI arguments via clap
//! - TOML configuration file (`<conf>/config.toml`, then `./config.toml`)
//! - Merging CLI with file config (CLI takes precedence)

use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::config::DEFAULT_STUN_SERVERS;

/// Pastewire - serverless P2P chat and file sharing.
#[derive(Parser, Deserialize, Clone, Debug, Default)]
#[command(author, version, about)]
#[command(propagate_version = true)]
#[serde(default, rename_all = "kebab-case")]
pub struct Args {
    /// Nickname shown to peers. Defaults to "User <id>".
    #[clap(long)]
    pub nickname: Option<String>,

    /// STUN server URL. Repeat for several; replaces the defaults.
    #[clap(long = "stun", value_name = "URL")]
    pub stun: Vec<String>,

    /// Directory where received files are saved. Defaults to the
    /// platform download directory.
    #[clap(long)]
    pub download_dir: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv).
    #[clap(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Directory for logs and config.toml. Defaults to ~/.pastewire/
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
        cli_args.download_dir = cli_args.download_dir.map(Self::resolve_path);

        let mut candidates = Vec::new();
        if let Some(conf) = &cli_args.conf {
            candidates.push(conf.join("config.toml"));
        }
        candidates.push(PathBuf::from("config.toml"));

        match candidates.iter().find_map(|p| Self::from_file(p)) {
            Some(file_args) => Self::merge(file_args, cli_args),
            None => cli_args,
        }
    }

    /// STUN servers to use, falling back to the built-in list.
    pub fn stun_servers(&self) -> Vec<String> {
        if self.stun.is_empty() {
            DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect()
        } else {
            self.stun.clone()
        }
    }

    /// Where received files go when saved.
    pub fn download_dir(&self) -> PathBuf {
        self.download_dir
            .clone()
            .or_else(dirs::download_dir)
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_default())
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
        Self::from_toml(&content)
    }

    fn from_toml(content: &str) -> Option<Self> {
        toml::from_str::<Args>(content).ok()
    }

    /// Merge file args with CLI args (CLI takes precedence).
    fn merge(mut file: Args, cli: Args) -> Args {
        if cli.nickname.is_some() {
            file.nickname = cli.nickname;
        }
        if !cli.stun.is_empty() {
            file.stun = cli.stun;
        }
        if cli.download_dir.is_some() {
            file.download_dir = cli.download_dir;
        }
        if cli.verbose > 0 {
            file.verbose = cli.verbose;
        }
        if cli.conf.is_some() {
            file.conf = cli.conf;
        }
        file
    }
}
