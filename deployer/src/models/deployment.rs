//! Deployment models

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use openapi_server::models::{DeployRequest, DeploymentStatusResponse};
use secrecy::SecretString;

use crate::deploy::fsm::DeploymentFsm;
use crate::errors::DeployerError;

/// Supported infrastructure-as-code tools
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Terraform,
    OpenTofu,
}

impl Tool {
    /// Resolve a request's tool selector; anything unrecognized is Terraform
    pub fn from_selector(selector: &str) -> Tool {
        match selector.trim().to_lowercase().as_str() {
            "tofu" | "opentofu" => Tool::OpenTofu,
            _ => Tool::Terraform,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tool::Terraform => "terraform",
            Tool::OpenTofu => "tofu",
        }
    }
}

/// HTTPS credentials for the clone
#[derive(Debug)]
pub struct GitCredentials {
    pub username: String,
    pub password: SecretString,
}

/// A validated deployment request with defaults applied
#[derive(Debug)]
pub struct DeploymentRequest {
    pub tool: Tool,
    pub git_url: String,
    pub git_ref: String,
    /// Module directory relative to the repository root
    pub path: PathBuf,
    pub env_vars: BTreeMap<String, String>,
    pub tfvars_files: Vec<String>,
    pub init_flags: Option<String>,
    pub plan_flags: Option<String>,
    pub timeout: Duration,
    pub git_auth: Option<GitCredentials>,
    pub auto_approve: bool,
}

impl DeploymentRequest {
    /// Validate a wire request and apply defaults.
    ///
    /// A missing or non-positive timeout becomes `default_timeout`.
    pub fn from_wire(req: DeployRequest, default_timeout: Duration) -> Result<Self, DeployerError> {
        let mut missing = Vec::new();
        if req.tool.trim().is_empty() {
            missing.push("tool");
        }
        if req.git_url.trim().is_empty() {
            missing.push("git_url");
        }
        if req.git_ref.trim().is_empty() {
            missing.push("git_ref");
        }
        if !missing.is_empty() {
            return Err(DeployerError::ValidationError(format!(
                "missing required fields: {}",
                missing.join(", ")
            )));
        }

        let path = match req.path.as_deref().map(str::trim) {
            None | Some("") => PathBuf::from("."),
            Some(path) => {
                ensure_relative("path", path)?;
                PathBuf::from(path)
            }
        };

        for file in &req.tfvars_files {
            ensure_relative("tfvars_files", file)?;
        }

        if req.git_auth.is_some() {
            let url = url::Url::parse(&req.git_url).map_err(|e| {
                DeployerError::ValidationError(format!("git_url is not a valid URL: {}", e))
            })?;
            if !matches!(url.scheme(), "https" | "http") {
                return Err(DeployerError::ValidationError(
                    "git_auth requires an https:// git_url".to_string(),
                ));
            }
        }

        let timeout = match req.timeout {
            Some(minutes) if minutes > 0 => u64::try_from(minutes)
                .ok()
                .and_then(|m| m.checked_mul(60))
                .map(Duration::from_secs)
                .ok_or_else(|| {
                    DeployerError::ValidationError(format!(
                        "timeout of {} minutes is out of range",
                        minutes
                    ))
                })?,
            _ => default_timeout,
        };

        Ok(Self {
            tool: Tool::from_selector(&req.tool),
            git_url: req.git_url.trim().to_string(),
            git_ref: req.git_ref.trim().to_string(),
            path,
            env_vars: req.env_vars.into_iter().collect(),
            tfvars_files: req.tfvars_files,
            init_flags: req.init_flags,
            plan_flags: req.plan_flags,
            timeout,
            git_auth: req.git_auth.map(|auth| GitCredentials {
                username: auth.username,
                password: SecretString::from(auth.password),
            }),
            auto_approve: req.auto_approve,
        })
    }
}

fn ensure_relative(field: &str, value: &str) -> Result<(), DeployerError> {
    let path = Path::new(value);
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(DeployerError::ValidationError(format!(
            "{} must be a relative path without '..': {}",
            field, value
        )));
    }
    Ok(())
}

/// Mutable state of one deployment. Written only by its worker.
#[derive(Debug, Clone)]
pub struct DeploymentRecord {
    pub id: String,
    pub fsm: DeploymentFsm,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub init_log: String,
    pub plan_log: String,
    pub plan_output: String,
    pub apply_log: String,
    pub apply_output: String,
    pub work_dir: Option<PathBuf>,
}

impl DeploymentRecord {
    pub fn new(id: String) -> Self {
        Self {
            id,
            fsm: DeploymentFsm::new(),
            started_at: Utc::now(),
            ended_at: None,
            init_log: String::new(),
            plan_log: String::new(),
            plan_output: String::new(),
            apply_log: String::new(),
            apply_output: String::new(),
            work_dir: None,
        }
    }

    /// Snapshot for `GET /deploy/:id/status`
    pub fn to_status_response(&self) -> DeploymentStatusResponse {
        DeploymentStatusResponse {
            deployment_id: self.id.clone(),
            status: self.fsm.status().to_string(),
            phase: self.fsm.phase().to_string(),
            started_at: self.started_at,
            ended_at: self.ended_at,
            error: self.fsm.error().map(str::to_string),
            init_log: self.init_log.clone(),
            plan_log: self.plan_log.clone(),
            plan_output: self.plan_output.clone(),
            apply_log: self.apply_log.clone(),
            apply_output: self.apply_output.clone(),
        }
    }
}
