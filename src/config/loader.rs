//! Configuration loading from disk.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::schema::{DirectiveError, ServerConfig};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading and building.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),

    #[error("site {site:?}: {source}")]
    Site {
        site: String,
        #[source]
        source: DirectiveError,
    },

    #[error("pattern {pattern:?} is registered more than once on {address}")]
    DuplicatePattern { pattern: String, address: String },

    #[error("failed to open access log {}: {source}", path.display())]
    AccessLog {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<ServerConfig, ConfigError> {
    let config: ServerConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [[site]]
            addresses = [":8080"]
            directives = [{{ name = "redirect", params = ["https://example.org"] }}]
            "#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.sites[0].addresses, vec![":8080"]);
    }

    #[test]
    fn test_missing_file() {
        let err = load_config(Path::new("/nonexistent/portico.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(parse_config("[[site]"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_validation_error_lists_everything() {
        let err = parse_config(
            r#"
            [[site]]
            addresses = []
            "#,
        )
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("has no addresses"));
        assert!(message.contains("missing backend"));
    }
}
