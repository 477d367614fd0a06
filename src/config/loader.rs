//! Configuration file loader with position-aware error reporting.

use std::fs;
use std::path::Path;

use crate::config::error::ConfigError;
use crate::config::schema::ClientConfig;

/// Stateless configuration loader.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load client configuration from a TOML file.
    ///
    /// Returns `ConfigError::NotFound` if the file does not exist, or
    /// `ConfigError::ReadError` for other I/O failures. The result is not
    /// validated; call [`ClientConfig::validate`] (or start a client) for that.
    pub fn load_from_path(path: &Path) -> Result<ClientConfig, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound {
                    path: path.to_path_buf(),
                }
            } else {
                ConfigError::ReadError {
                    path: path.to_path_buf(),
                    source: e,
                }
            }
        })?;
        tracing::debug!(path = %path.display(), "loaded configuration file");
        Self::parse_toml(&content, path)
    }

    /// Parse a TOML string into `ClientConfig` with position-aware error reporting.
    fn parse_toml(content: &str, path: &Path) -> Result<ClientConfig, ConfigError> {
        toml::from_str(content).map_err(|e| {
            let (line, column) = e
                .span()
                .map(|span| {
                    let line = content[..span.start].matches('\n').count() + 1;
                    let last_newline = content[..span.start]
                        .rfind('\n')
                        .map(|p| p + 1)
                        .unwrap_or(0);
                    let column = span.start - last_newline + 1;
                    (line, column)
                })
                .unwrap_or((0, 0));
            ConfigError::ParseError {
                path: path.to_path_buf(),
                line,
                column,
                message: e.message().to_string(),
            }
        })
    }
}
