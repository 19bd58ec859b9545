//! Optional per-project configuration (`lens.toml` in the project root).
//!
//! Server selection is the harness's job, not the core's: the file names the
//! language server to launch for this project. Command-line flags win over
//! the file.

use std::path::Path;

use anyhow::{Context, Result};
use lens_lsp::ServerLaunch;
use serde::Deserialize;

pub const CONFIG_FILE_NAME: &str = "lens.toml";

#[derive(Debug, Default, Deserialize)]
pub struct HarnessConfig {
    pub server: Option<ServerLaunch>,
}

impl HarnessConfig {
    /// Load `lens.toml` from the project root. A missing file is an empty
    /// config; a malformed file is an error worth surfacing.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILE_NAME);
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_empty_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = HarnessConfig::load(dir.path()).unwrap();
        assert!(config.server.is_none());
    }

    #[test]
    fn test_server_section_parses() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "[server]\ncommand = \"typescript-language-server\"\nargs = [\"--stdio\"]\n",
        )
        .unwrap();

        let config = HarnessConfig::load(dir.path()).unwrap();
        let server = config.server.unwrap();
        assert_eq!(server.command, "typescript-language-server");
        assert_eq!(server.args, vec!["--stdio"]);
    }

    #[test]
    fn test_args_default_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "[server]\ncommand = \"rust-analyzer\"\n",
        )
        .unwrap();

        let config = HarnessConfig::load(dir.path()).unwrap();
        assert!(config.server.unwrap().args.is_empty());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "[server\ncommand = 3").unwrap();
        assert!(HarnessConfig::load(dir.path()).is_err());
    }
}
