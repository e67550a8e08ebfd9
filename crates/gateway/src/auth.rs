//! Connection authentication for the realtime gateway.
//!
//! Clients present an opaque bearer credential in the first socket frame.
//! Token issuance lives in the external identity provider; the gateway only
//! verifies. The default verifier validates HS256 JWTs whose claims carry the
//! user and organization ids.

use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, errors::ErrorKind};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing credential")]
    MissingCredential,
    #[error("invalid credential")]
    InvalidCredential,
    #[error("credential expired")]
    Expired,
}

/// Identity attached to an authenticated connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub organization_id: Uuid,
}

/// Verifies the bearer credential presented during the socket handshake.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<AuthContext, AuthError>;
}

/// Claims embedded in a gateway token.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GatewayClaims {
    /// User ID
    sub: Uuid,
    /// Organization ID
    org: Uuid,
    /// Expiration timestamp
    exp: i64,
}

/// Default verifier for HS256 JWTs issued by the identity provider.
#[derive(Clone)]
pub struct JwtVerifier {
    secret: Arc<SecretString>,
}

impl JwtVerifier {
    pub fn new(secret: SecretString) -> Self {
        Self {
            secret: Arc::new(secret),
        }
    }
}

#[async_trait]
impl CredentialVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<AuthContext, AuthError> {
        if token.trim().is_empty() {
            return Err(AuthError::MissingCredential);
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.validate_nbf = false;
        validation.required_spec_claims =
            HashSet::from(["sub".to_string(), "exp".to_string()]);
        validation.leeway = 30; // 30 seconds leeway for clock skew

        let decoding_key = DecodingKey::from_base64_secret(self.secret.expose_secret())
            .map_err(|_| AuthError::InvalidCredential)?;
        let data =
            decode::<GatewayClaims>(token, &decoding_key, &validation).map_err(|error| {
                match error.kind() {
                    ErrorKind::ExpiredSignature => AuthError::Expired,
                    _ => AuthError::InvalidCredential,
                }
            })?;

        Ok(AuthContext {
            user_id: data.claims.sub,
            organization_id: data.claims.org,
        })
    }
}
