//! Data directory for logs and the optional `config.toml`.
//!
//! Defaults to `~/.pastewire/`, overridable with `--conf`. Initialized once
//! at startup; later calls to [`init`] return the first directory.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

pub fn init(custom: Option<&Path>) -> Result<&'static Path> {
    let dir = match custom {
        Some(p) => p.to_path_buf(),
        None => dirs::home_dir()
            .context("no home directory found")?
            .join(".pastewire"),
    };
    Ok(DATA_DIR.get_or_init(|| dir).as_path())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_sticky() {
        let first = init(Some(Path::new("/tmp/pastewire-a"))).unwrap();
        let second = init(Some(Path::new("/tmp/pastewire-b"))).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, Path::new("/tmp/pastewire-a"));
    }
}
