use super::models::{AuthProvider, Config, StorageProvider};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Value must be positive: {field}")]
    NotPositive { field: &'static str },

    #[error("backoff_multiplier must be at least 1, got {0}")]
    InvalidBackoffMultiplier(u32),

    #[error("Progress channel name must not be empty")]
    EmptyChannel,

    #[error("Gateway path must start with '/': {0}")]
    InvalidGatewayPath(String),

    #[error("JWT provider requires IMPORTD_JWT_SECRET")]
    MissingJwtSecret,

    #[error("Remote provider requires auth.verify_url")]
    MissingVerifyUrl,

    #[error("Local storage requires storage.root")]
    MissingStorageRoot,

    #[error("inline_payload_bytes ({inline}) exceeds max_upload_bytes ({max})")]
    InlineLimitExceedsUpload { inline: u64, max: u64 },
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_server(config)?;
    validate_queue(config)?;
    validate_status(config)?;
    validate_gateway(config)?;
    validate_auth(config)?;
    validate_storage(config)?;
    Ok(())
}

fn positive(value: u64, field: &'static str) -> Result<(), ValidationError> {
    if value == 0 {
        return Err(ValidationError::NotPositive { field });
    }
    Ok(())
}

fn validate_server(config: &Config) -> Result<(), ValidationError> {
    let max = config.server.max_upload_bytes.as_u64();
    let inline = config.server.inline_payload_bytes.as_u64();

    positive(max, "server.max_upload_bytes")?;
    if inline > max {
        return Err(ValidationError::InlineLimitExceedsUpload { inline, max });
    }
    Ok(())
}

fn validate_queue(config: &Config) -> Result<(), ValidationError> {
    positive(config.queue.workers as u64, "queue.workers")?;
    positive(config.queue.channel_size as u64, "queue.channel_size")?;
    positive(config.queue.max_attempts as u64, "queue.max_attempts")?;

    if config.queue.backoff_multiplier < 1 {
        return Err(ValidationError::InvalidBackoffMultiplier(config.queue.backoff_multiplier));
    }
    Ok(())
}

fn validate_status(config: &Config) -> Result<(), ValidationError> {
    positive(config.status.ttl_secs, "status.ttl_secs")?;
    positive(config.status.progress_every, "status.progress_every")?;
    Ok(())
}

fn validate_gateway(config: &Config) -> Result<(), ValidationError> {
    if config.progress.channel.trim().is_empty() {
        return Err(ValidationError::EmptyChannel);
    }
    positive(config.progress.capacity as u64, "progress.capacity")?;

    if !config.gateway.path.starts_with('/') {
        return Err(ValidationError::InvalidGatewayPath(config.gateway.path.clone()));
    }
    positive(config.gateway.auth_timeout_ms, "gateway.auth_timeout_ms")?;
    Ok(())
}

fn validate_auth(config: &Config) -> Result<(), ValidationError> {
    match config.auth.provider {
        AuthProvider::Jwt if config.auth.jwt_secret.is_none() => Err(ValidationError::MissingJwtSecret),
        AuthProvider::Remote if config.auth.verify_url.is_none() => Err(ValidationError::MissingVerifyUrl),
        _ => Ok(()),
    }
}

fn validate_storage(config: &Config) -> Result<(), ValidationError> {
    if config.storage.provider == StorageProvider::Local && config.storage.root.is_none() {
        return Err(ValidationError::MissingStorageRoot);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::humanize::ByteSize;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.auth.jwt_secret = Some("secret".to_string());
        config
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_rejects_zero_workers_and_attempts() {
        let mut config = valid_config();
        config.queue.workers = 0;
        assert_eq!(
            validate(&config),
            Err(ValidationError::NotPositive { field: "queue.workers" })
        );

        let mut config = valid_config();
        config.queue.max_attempts = 0;
        assert_eq!(
            validate(&config),
            Err(ValidationError::NotPositive { field: "queue.max_attempts" })
        );
    }

    #[test]
    fn test_rejects_bad_backoff_and_ttl() {
        let mut config = valid_config();
        config.queue.backoff_multiplier = 0;
        assert_eq!(validate(&config), Err(ValidationError::InvalidBackoffMultiplier(0)));

        let mut config = valid_config();
        config.status.ttl_secs = 0;
        assert!(matches!(validate(&config), Err(ValidationError::NotPositive { .. })));

        let mut config = valid_config();
        config.status.progress_every = 0;
        assert!(matches!(validate(&config), Err(ValidationError::NotPositive { .. })));
    }

    #[test]
    fn test_rejects_bad_channel_and_path() {
        let mut config = valid_config();
        config.progress.channel = " ".to_string();
        assert_eq!(validate(&config), Err(ValidationError::EmptyChannel));

        let mut config = valid_config();
        config.gateway.path = "ws".to_string();
        assert!(matches!(validate(&config), Err(ValidationError::InvalidGatewayPath(_))));
    }

    #[test]
    fn test_provider_requirements() {
        let config = Config::default();
        assert_eq!(validate(&config), Err(ValidationError::MissingJwtSecret));

        let mut config = valid_config();
        config.auth.provider = AuthProvider::Remote;
        assert_eq!(validate(&config), Err(ValidationError::MissingVerifyUrl));

        let mut config = valid_config();
        config.storage.provider = StorageProvider::Local;
        assert_eq!(validate(&config), Err(ValidationError::MissingStorageRoot));
    }

    #[test]
    fn test_inline_limit_within_upload_limit() {
        let mut config = valid_config();
        config.server.inline_payload_bytes = ByteSize(10 * 1024 * 1024);
        assert!(matches!(
            validate(&config),
            Err(ValidationError::InlineLimitExceedsUpload { .. })
        ));
    }
}
