//! Startup configuration: CLI flags merged over an optional TOML file.
//!
//! The core only consumes two values: the control endpoint URL for the
//! persistent uplink connection and the static-asset directory it passes
//! through to the web-frontend collaborator. Both are validated once here;
//! a malformed endpoint is a fatal startup error.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tracing::debug;

#[derive(Parser, Debug, Default)]
#[command(name = "topside", about = "Run the topside half of the robot")]
pub struct Cli {
    /// Control system endpoint, e.g. ws://bottomside.local:8080/control
    #[arg(long)]
    pub bottom_url: Option<String>,

    /// Directory of static assets served by the web frontend
    #[arg(long)]
    pub static_dir: Option<PathBuf>,

    /// TOML config file; defaults to <config dir>/topside/config.toml
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// On-disk layout of the optional config file.
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct ConfigFile {
    pub bottom_url: Option<String>,
    pub static_dir: Option<PathBuf>,
}

/// Fully resolved and validated startup configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub bottom_url: String,
    pub static_dir: PathBuf,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("no control endpoint configured; pass --bottom-url or set bottom_url in the config file")]
    MissingBottomUrl,

    #[error("no static asset directory configured; pass --static-dir or set static_dir in the config file")]
    MissingStaticDir,

    #[error("invalid control endpoint {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl Config {
    /// Resolves the configuration from CLI flags and the config file; flags
    /// win over file values.
    pub fn load(cli: Cli) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => read_config_file(path)?,
            None => match default_config_path() {
                // The default file is optional; an explicit --config is not.
                Some(path) if path.exists() => read_config_file(&path)?,
                _ => ConfigFile::default(),
            },
        };

        let bottom_url = cli
            .bottom_url
            .or(file.bottom_url)
            .ok_or(ConfigError::MissingBottomUrl)?;
        let static_dir = cli
            .static_dir
            .or(file.static_dir)
            .ok_or(ConfigError::MissingStaticDir)?;

        validate_endpoint(&bottom_url)?;
        Ok(Self {
            bottom_url,
            static_dir,
        })
    }
}

fn read_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    debug!(path = %path.display(), "reading config file");
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("topside").join("config.toml"))
}

/// The endpoint must parse as a WebSocket client request up front; the
/// rest of the process assumes it can dial without re-validating.
fn validate_endpoint(url: &str) -> Result<(), ConfigError> {
    let request = url
        .into_client_request()
        .map_err(|e| ConfigError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
    match request.uri().scheme_str() {
        Some("ws") | Some("wss") => Ok(()),
        other => Err(ConfigError::InvalidUrl {
            url: url.to_string(),
            reason: format!("scheme must be ws or wss, got {:?}", other.unwrap_or("none")),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("topside-{}-{}", std::process::id(), name));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn flags_alone_are_enough() {
        let cli = Cli::parse_from([
            "topside",
            "--bottom-url",
            "ws://bottomside.local:8080/control",
            "--static-dir",
            "/srv/topside/static",
        ]);
        let config = Config::load(cli).unwrap();
        assert_eq!(config.bottom_url, "ws://bottomside.local:8080/control");
        assert_eq!(config.static_dir, PathBuf::from("/srv/topside/static"));
    }

    #[test]
    fn flags_override_file_values() {
        let path = temp_file(
            "override.toml",
            "bottom_url = \"ws://from-file:1/control\"\nstatic_dir = \"/from/file\"\n",
        );
        let cli = Cli {
            bottom_url: Some("ws://from-flag:2/control".into()),
            static_dir: None,
            config: Some(path.clone()),
        };
        let config = Config::load(cli).unwrap();
        assert_eq!(config.bottom_url, "ws://from-flag:2/control");
        assert_eq!(config.static_dir, PathBuf::from("/from/file"));
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn missing_endpoint_is_rejected() {
        let cli = Cli {
            static_dir: Some("/srv/static".into()),
            ..Cli::default()
        };
        assert!(matches!(
            Config::load(cli),
            Err(ConfigError::MissingBottomUrl)
        ));
    }

    #[test]
    fn malformed_endpoint_is_rejected() {
        let cli = Cli {
            bottom_url: Some("not a url".into()),
            static_dir: Some("/srv/static".into()),
            config: None,
        };
        assert!(matches!(
            Config::load(cli),
            Err(ConfigError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn non_websocket_scheme_is_rejected() {
        let cli = Cli {
            bottom_url: Some("http://bottomside.local/control".into()),
            static_dir: Some("/srv/static".into()),
            config: None,
        };
        match Config::load(cli) {
            Err(ConfigError::InvalidUrl { url, .. }) => {
                assert_eq!(url, "http://bottomside.local/control");
            }
            other => panic!("expected invalid URL, got {other:?}"),
        }
    }

    #[test]
    fn unreadable_explicit_config_file_is_an_error() {
        let cli = Cli {
            bottom_url: Some("ws://bottomside.local/control".into()),
            static_dir: Some("/srv/static".into()),
            config: Some("/definitely/not/here.toml".into()),
        };
        assert!(matches!(Config::load(cli), Err(ConfigError::Read { .. })));
    }

    #[test]
    fn malformed_config_file_is_an_error() {
        let path = temp_file("broken.toml", "bottom_url = [not toml");
        let cli = Cli {
            bottom_url: None,
            static_dir: None,
            config: Some(path.clone()),
        };
        assert!(matches!(Config::load(cli), Err(ConfigError::Parse { .. })));
        fs::remove_file(path).unwrap();
    }
}
