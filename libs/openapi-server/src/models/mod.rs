//! Deployer API models

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// HTTPS credentials used to clone a private repository
#[derive(Clone, Serialize, Deserialize)]
pub struct GitAuth {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for GitAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitAuth")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Deployment creation request (`POST /deploy`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployRequest {
    /// `terraform` or `tofu`
    #[serde(default)]
    pub tool: String,

    #[serde(default)]
    pub git_url: String,

    #[serde(default)]
    pub git_ref: String,

    /// Module path relative to the repository root
    #[serde(default)]
    pub path: Option<String>,

    #[serde(default)]
    pub env_vars: HashMap<String, String>,

    #[serde(default)]
    pub tfvars_files: Vec<String>,

    #[serde(default)]
    pub init_flags: Option<String>,

    #[serde(default)]
    pub plan_flags: Option<String>,

    /// Tool timeout in minutes
    #[serde(default)]
    pub timeout: Option<i64>,

    #[serde(default)]
    pub git_auth: Option<GitAuth>,

    #[serde(default)]
    pub auto_approve: bool,
}

/// Deployment creation response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployResponse {
    pub deployment_id: String,
    pub status: String,
    pub message: String,
}

/// Point-in-time deployment status (`GET /deploy/:id/status`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentStatusResponse {
    pub deployment_id: String,
    pub status: String,
    pub phase: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub init_log: String,
    pub plan_log: String,
    pub plan_output: String,
    pub apply_log: String,
    pub apply_output: String,
}

/// Approve/reject/cancel response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentActionResponse {
    pub deployment_id: String,
    pub message: String,
}

/// Error body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Registry token response (`GET <registry>/api/internal/registry-token`)
#[derive(Clone, Serialize, Deserialize)]
pub struct RegistryTokenResponse {
    pub token: String,
}
