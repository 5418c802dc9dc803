use std::net::SocketAddr;

use secrecy::SecretString;
use serde::Deserialize;

use crate::{cors::CorsConfig, health::HealthConfig};

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub listen_address: Option<SocketAddr>,
    /// Bearer token required on `/v1/*`; empty disables the check
    #[serde(default)]
    pub access_token: Option<SecretString>,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub cors: Option<CorsConfig>,
}
