//! Per-deployment CLI configuration for the private registry

use secrecy::ExposeSecret;
use tracing::{info, warn};

use crate::deploy::logstream::LogDistributor;
use crate::errors::DeployerError;
use crate::filesys::dir::Dir;
use crate::http::client::HttpClient;

/// Environment variable the tools read their CLI config path from
pub const CLI_CONFIG_ENV: &str = "TF_CLI_CONFIG_FILE";

/// File name of the generated config inside the working directory
pub const CLI_CONFIG_FILE: &str = "terraform.rc";

/// Writes a CLI config that points module/provider discovery at the registry
pub struct RegistryConfigurator {
    client: HttpClient,
    hostname: String,
}

impl RegistryConfigurator {
    /// `registry_host` is the registry base URL, e.g. `https://registry.internal`
    pub fn new(registry_host: &str) -> Result<Self, DeployerError> {
        let hostname = registry_hostname(registry_host)?;
        let client = HttpClient::new(registry_host)?;
        Ok(Self { client, hostname })
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Write the config into `workspace` and return the env to inject.
    ///
    /// A failed token fetch is logged and the config is written without
    /// credentials.
    pub async fn configure(
        &self,
        workspace: &Dir,
        logs: &LogDistributor,
    ) -> Result<Vec<(String, String)>, DeployerError> {
        let token = match self.client.fetch_registry_token().await {
            Ok(token) => Some(token),
            Err(e) => {
                warn!("Registry token fetch from {} failed: {}", self.hostname, e);
                logs.push(format!(
                    "warning: could not obtain a token for registry {}; continuing unauthenticated",
                    self.hostname
                ));
                None
            }
        };

        let contents = render_cli_config(
            &self.hostname,
            self.client.base_url(),
            token.as_ref().map(|t| t.expose_secret()),
        );
        let file = workspace.file(CLI_CONFIG_FILE);
        file.write_secret(&contents).await?;
        info!("Wrote registry CLI config to {}", file.path().display());

        Ok(vec![(
            CLI_CONFIG_ENV.to_string(),
            file.path().to_string_lossy().into_owned(),
        )])
    }
}

/// Hostname (with any non-default port) as the tools expect it in config blocks
pub fn registry_hostname(registry_host: &str) -> Result<String, DeployerError> {
    let url = url::Url::parse(registry_host).map_err(|e| {
        DeployerError::ConfigError(format!("invalid registry host {}: {}", registry_host, e))
    })?;
    let host = url.host_str().ok_or_else(|| {
        DeployerError::ConfigError(format!("registry host {} has no hostname", registry_host))
    })?;
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Render the CLI config file
pub fn render_cli_config(hostname: &str, base_url: &str, token: Option<&str>) -> String {
    let base_url = base_url.trim_end_matches('/');
    let mut config = String::new();
    if let Some(token) = token {
        config.push_str(&format!(
            "credentials \"{}\" {{\n  token = \"{}\"\n}}\n\n",
            hostname,
            token.replace('\\', "\\\\").replace('"', "\\\"")
        ));
    }
    config.push_str(&format!(
        "host \"{hostname}\" {{\n  services = {{\n    \"modules.v1\"   = \"{base_url}/v1/modules/\",\n    \"providers.v1\" = \"{base_url}/v1/providers/\",\n  }}\n}}\n"
    ));
    config
}
