use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "IMPORTD_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/importd.toml";
const ENV_PREFIX: &str = "IMPORTD";
const ENV_SEPARATOR: &str = "__";
const JWT_SECRET_VAR: &str = "IMPORTD_JWT_SECRET";

/// Config file path: `IMPORTD_CONFIG` or the default location
pub fn default_path() -> PathBuf {
    env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// `.env` first, then the file and `IMPORTD__*` variables, then secrets
///
/// Variables already present in the process environment win over `.env`.
pub fn load(config_path: Option<PathBuf>) -> Result<Config, ConfigError> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            tracing::warn!(error = %e, "Ignoring unreadable .env file");
        }
    }

    let mut config = load_from_sources(config_path.unwrap_or_else(default_path))?;
    apply_secrets(&mut config);
    Ok(config)
}

/// The JWT secret only ever comes from the environment
fn apply_secrets(config: &mut Config) {
    config.auth.jwt_secret = env::var(JWT_SECRET_VAR)
        .ok()
        .filter(|secret| !secret.is_empty())
        .or(config.auth.jwt_secret.take());
}

/// Struct defaults, overlaid by the TOML file at `config_path` when present,
/// overlaid by `IMPORTD__SECTION__KEY` variables
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    if config_path.is_file() {
        tracing::info!(path = %config_path.display(), "Reading configuration file");
    } else {
        tracing::warn!(
            path = %config_path.display(),
            "No configuration file, falling back to defaults and environment"
        );
    }

    config::Config::builder()
        .add_source(File::from(config_path).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator(ENV_SEPARATOR)
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_defaults_only() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.toml");

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.queue.max_attempts, 3);
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[server]
bind_addr = "127.0.0.1:9000"
max_upload_bytes = "10MB"
inline_payload_bytes = "64KB"

[queue]
workers = 2
backoff_multiplier = 3

[auth]
provider = "remote"
verify_url = "http://auth.local/verify"

[auth.users]
ext-1 = "u1"

[storage]
provider = "local"
root = "data/uploads"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "127.0.0.1:9000");
        assert_eq!(config.server.max_upload_bytes.as_u64(), 10 * 1024 * 1024);
        assert_eq!(config.server.inline_payload_bytes.as_u64(), 64 * 1024);
        assert_eq!(config.queue.workers, 2);
        assert_eq!(config.queue.backoff_multiplier, 3);
        assert_eq!(config.queue.channel_size, 100);
        assert_eq!(config.auth.users.get("ext-1").map(String::as_str), Some("u1"));
        assert_eq!(config.storage.root, Some(PathBuf::from("data/uploads")));
    }

    #[test]
    fn test_malformed_file_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("bad.toml");
        fs::write(&config_path, "[queue]\nworkers = \"many\"\n").unwrap();

        assert!(load_from_sources(config_path).is_err());
    }
}
