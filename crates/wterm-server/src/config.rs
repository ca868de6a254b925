//! Server configuration: TOML file + CLI overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;
use wterm_core::{WtermError, WtermResult};

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default, rename = "profile")]
    pub profiles: Vec<Profile>,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            port: default_port(),
        }
    }
}

/// One `[[profile]]` entry: a named backend a client can connect to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Profile {
    /// A local pseudo-terminal plus the host filesystem.
    #[serde(alias = "PTY")]
    Pty {
        name: String,
        /// Program and arguments; empty runs `$SHELL`.
        #[serde(default)]
        cmd: Vec<String>,
        #[serde(default)]
        cwd: Option<String>,
        /// When set, clients must answer the "password" question.
        #[serde(default)]
        password: Option<String>,
    },
}

impl Profile {
    pub fn name(&self) -> &str {
        match self {
            Profile::Pty { name, .. } => name,
        }
    }

    fn default_shell() -> Self {
        Profile::Pty {
            name: "Local Shell".to_string(),
            cmd: Vec::new(),
            cwd: None,
            password: None,
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    32300
}

/// Resolved server configuration (CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: String,
    pub port: u16,
    /// Profiles in file order; ids are 1-based positions.
    pub profiles: Vec<Profile>,
}

impl ServerConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(
        config_path: Option<&Path>,
        cli_listen: Option<&str>,
        cli_port: Option<u16>,
    ) -> WtermResult<Self> {
        let file_config = match config_path.map(|p| expand_tilde(&p.to_string_lossy())) {
            Some(path) if path.exists() => {
                info!(path = %path.display(), "loading config file");
                let content = std::fs::read_to_string(&path)?;
                parse(&content)?
            }
            Some(path) => {
                info!(path = %path.display(), "config file not found, using defaults");
                ConfigFile::default()
            }
            None => ConfigFile::default(),
        };
        Ok(Self::from_file(file_config, cli_listen, cli_port))
    }

    fn from_file(file: ConfigFile, cli_listen: Option<&str>, cli_port: Option<u16>) -> Self {
        let mut profiles = file.profiles;
        if profiles.is_empty() {
            profiles.push(Profile::default_shell());
        }
        Self {
            listen: cli_listen
                .map(str::to_string)
                .unwrap_or(file.server.listen),
            port: cli_port.unwrap_or(file.server.port),
            profiles,
        }
    }

    /// Look up a profile by its 1-based id.
    pub fn profile(&self, id: usize) -> Option<&Profile> {
        id.checked_sub(1).and_then(|i| self.profiles.get(i))
    }
}

fn parse(content: &str) -> WtermResult<ConfigFile> {
    toml::from_str(content).map_err(|e| WtermError::Other(format!("config parse error: {e}")))
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_tilde(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_include_a_shell_profile() {
        let config = ServerConfig::from_file(ConfigFile::default(), None, None);
        assert_eq!(config.listen, "127.0.0.1");
        assert_eq!(config.port, 32300);
        assert_eq!(config.profiles.len(), 1);
        assert_eq!(config.profile(1).map(Profile::name), Some("Local Shell"));
        assert!(config.profile(0).is_none());
        assert!(config.profile(2).is_none());
    }

    #[test]
    fn parses_profiles_in_order() {
        let file = parse(
            r#"
            [server]
            port = 9000

            [[profile]]
            type = "pty"
            name = "bash"
            cmd = ["/bin/bash", "-l"]
            cwd = "/tmp"

            [[profile]]
            type = "PTY"
            name = "locked"
            password = "pw"
            "#,
        )
        .unwrap();
        let config = ServerConfig::from_file(file, Some("0.0.0.0"), None);
        assert_eq!(config.listen, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(
            config.profile(1),
            Some(&Profile::Pty {
                name: "bash".into(),
                cmd: vec!["/bin/bash".into(), "-l".into()],
                cwd: Some("/tmp".into()),
                password: None,
            })
        );
        assert_eq!(config.profile(2).map(Profile::name), Some("locked"));
    }

    #[test]
    fn cli_port_overrides_file() {
        let file = parse("[server]\nport = 9000\n").unwrap();
        let config = ServerConfig::from_file(file, None, Some(1234));
        assert_eq!(config.port, 1234);
    }

    #[test]
    fn unknown_profile_type_is_an_error() {
        let err = parse("[[profile]]\ntype = \"serial\"\nname = \"tty\"\n").unwrap_err();
        assert!(err.to_string().contains("config parse error"));
    }

    #[test]
    fn missing_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("absent.toml");
        let config = ServerConfig::load(Some(&path), None, Some(1)).unwrap();
        assert_eq!(config.port, 1);
        assert_eq!(config.profiles.len(), 1);
    }

    #[test]
    fn tilde_expands_to_home() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/x/y"), home.join("x/y"));
        }
        assert_eq!(expand_tilde("/abs"), PathBuf::from("/abs"));
    }
}
