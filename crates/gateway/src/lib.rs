pub mod auth;
pub mod config;
pub mod dispatch;
pub mod registry;
pub mod session;
pub mod state;

pub use auth::{AuthContext, AuthError, CredentialVerifier, JwtVerifier};
pub use config::GatewayConfig;
pub use registry::{ConnectionRegistry, SendError};
pub use state::{AppState, router};
