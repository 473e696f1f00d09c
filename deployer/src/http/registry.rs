//! Private registry API

use openapi_server::models::RegistryTokenResponse;
use secrecy::SecretString;

use crate::errors::DeployerError;
use crate::http::client::HttpClient;

/// Internal endpoint that mints a registry bearer token
pub const REGISTRY_TOKEN_PATH: &str = "/api/internal/registry-token";

impl HttpClient {
    /// Fetch a bearer token for module/provider downloads
    pub async fn fetch_registry_token(&self) -> Result<SecretString, DeployerError> {
        let response: RegistryTokenResponse = self.get(REGISTRY_TOKEN_PATH).await?;
        if response.token.is_empty() {
            return Err(DeployerError::RegistryError(
                "registry returned an empty token".to_string(),
            ));
        }
        Ok(SecretString::from(response.token))
    }
}
