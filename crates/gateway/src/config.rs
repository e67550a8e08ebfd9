//! Gateway configuration, loaded from environment variables.

use secrecy::SecretString;

/// Configuration load failure.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(&'static str),
}

/// Runtime configuration for the gateway binary.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Interface to bind, `HOST` (default `127.0.0.1`).
    pub host: String,
    /// Port to bind, `PORT`. 0 asks the OS for a free port.
    pub port: u16,
    /// Base64-encoded HMAC secret for token verification,
    /// `GATEWAY_JWT_SECRET`.
    pub jwt_secret: SecretString,
    /// Comma-separated CORS origins, `GATEWAY_ALLOWED_ORIGINS`. Empty
    /// allows any origin.
    pub allowed_origins: Vec<String>,
}

impl GatewayConfig {
    /// Load configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let port = std::env::var("PORT")
            .ok()
            .and_then(|value| {
                let trimmed = value.trim();
                match trimmed.parse::<u16>() {
                    Ok(port) => Some(port),
                    Err(error) => {
                        tracing::warn!(
                            value = trimmed,
                            ?error,
                            "invalid PORT value, falling back to auto-assign"
                        );
                        None
                    }
                }
            })
            .unwrap_or(0);

        let jwt_secret = std::env::var("GATEWAY_JWT_SECRET")
            .map(SecretString::from)
            .map_err(|_| ConfigError::MissingVar("GATEWAY_JWT_SECRET"))?;

        let allowed_origins = std::env::var("GATEWAY_ALLOWED_ORIGINS")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(|origin| origin.trim().to_string())
                    .filter(|origin| !origin.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            host,
            port,
            jwt_secret,
            allowed_origins,
        })
    }
}
