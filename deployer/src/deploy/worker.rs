//! Per-deployment execution: clone, init, plan, approval gate, apply

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::deploy::args::split_optional_flags;
use crate::deploy::fsm::DeploymentPhase;
use crate::deploy::git::{CloneRequest, SourceFetcher};
use crate::deploy::handle::{ControlSignal, DeploymentHandle};
use crate::deploy::registry_config::RegistryConfigurator;
use crate::deploy::tool::ToolRunner;
use crate::filesys::dir::Dir;
use crate::models::deployment::DeploymentRecord;
use crate::storage::layout::StorageLayout;

/// Saved plan file name inside the module directory
pub const PLAN_FILE: &str = "tfplan";

/// Checkout directory name inside the deployment working directory
pub const SOURCE_DIR: &str = "repo";

/// Deployment worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// How long a plan may wait for a decision before it is cancelled
    pub approval_timeout: Duration,

    /// How long a working directory is kept after the worker starts
    pub workdir_retention: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            approval_timeout: Duration::from_secs(24 * 60 * 60),
            workdir_retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Why a run stopped early
#[derive(Debug)]
enum Halt {
    Failed(String),
    Cancelled(String),
}

/// Everything a deployment run needs besides its handle
pub struct DeploymentWorker {
    options: Options,
    layout: StorageLayout,
    fetcher: Arc<dyn SourceFetcher>,
    tools: ToolRunner,
    registry: Option<RegistryConfigurator>,
}

impl DeploymentWorker {
    pub fn new(
        options: Options,
        layout: StorageLayout,
        fetcher: Arc<dyn SourceFetcher>,
        tools: ToolRunner,
        registry: Option<RegistryConfigurator>,
    ) -> Self {
        Self {
            options,
            layout,
            fetcher,
            tools,
            registry,
        }
    }

    /// Drive `handle` to a terminal status
    pub async fn run(&self, handle: Arc<DeploymentHandle>) {
        let id = handle.id().to_string();
        info!("Deployment {} started ({})", id, handle.request().tool.as_str());

        match self.execute(&handle).await {
            Ok(()) => match handle.succeed() {
                Ok(()) => info!("Deployment {} succeeded", id),
                Err(e) => {
                    error!("Deployment {} could not be marked successful: {}", id, e);
                    handle.fail(e.to_string());
                }
            },
            Err(Halt::Failed(message)) => {
                error!("Deployment {} failed: {}", id, message);
                handle.fail(message);
            }
            Err(Halt::Cancelled(reason)) => {
                info!("Deployment {} cancelled: {}", id, reason);
                handle.cancelled(reason);
            }
        }
    }

    async fn execute(&self, handle: &DeploymentHandle) -> Result<(), Halt> {
        let request = handle.request();

        if handle.cancel_requested() {
            return Err(Halt::Cancelled("cancelled before start".to_string()));
        }
        let workspace = self.layout.deployment_dir(handle.id());
        workspace
            .create()
            .await
            .map_err(|e| Halt::Failed(format!("failed to create working directory: {}", e)))?;
        handle.update(|record| record.work_dir = Some(workspace.path().to_path_buf()));
        self.schedule_cleanup(handle.id().to_string(), workspace.clone());

        // ---------------------------------------------------------------- cloning
        self.enter(handle, DeploymentPhase::Cloning)?;
        let source = workspace.subdir(SOURCE_DIR);
        let clone = CloneRequest {
            url: &request.git_url,
            git_ref: &request.git_ref,
            auth: request.git_auth.as_ref(),
            timeout: request.timeout,
        };
        self.fetcher
            .fetch(&clone, source.path(), handle.logs())
            .await
            .map_err(|e| Halt::Failed(e.to_string()))?;

        let module_dir = source.subdir(&request.path);
        if !module_dir.exists().await {
            return Err(Halt::Failed(format!(
                "path {} not found in repository",
                request.path.display()
            )));
        }
        let cwd = module_dir.path();

        // ------------------------------------------------------------------- init
        self.enter(handle, DeploymentPhase::Init)?;
        let extra_env = match &self.registry {
            Some(registry) => registry
                .configure(&workspace, handle.logs())
                .await
                .map_err(|e| Halt::Failed(format!("registry configuration failed: {}", e)))?,
            None => Vec::new(),
        };
        let init_args = split_optional_flags(request.init_flags.as_deref());
        self.run_phase(handle, "init", init_args, cwd, &extra_env, |r, text| r.init_log = text)
            .await?;

        // ------------------------------------------------------------------- plan
        self.enter(handle, DeploymentPhase::Plan)?;
        let plan = plan_args(request.plan_flags.as_deref(), &request.tfvars_files);
        self.run_phase(handle, "plan", plan, cwd, &extra_env, |r, text| r.plan_log = text)
            .await?;
        self.capture_plan(handle, cwd, &extra_env).await;

        if !request.auto_approve {
            self.approval_gate(handle).await?;
        }

        // ------------------------------------------------------------------ apply
        self.enter(handle, DeploymentPhase::Apply)?;
        let apply = vec![PLAN_FILE.to_string()];
        self.run_phase(handle, "apply", apply, cwd, &extra_env, |r, text| r.apply_log = text)
            .await?;

        // -------------------------------------------------------------- completed
        if handle.cancel_requested() {
            return Err(Halt::Cancelled(
                "cancelled after apply finished; applied changes were not rolled back".to_string(),
            ));
        }
        self.enter(handle, DeploymentPhase::Completed)?;
        self.capture_outputs(handle, cwd, &extra_env).await;

        Ok(())
    }

    /// Phase boundary: honour a pending cancel, then advance
    fn enter(&self, handle: &DeploymentHandle, phase: DeploymentPhase) -> Result<(), Halt> {
        if handle.cancel_requested() {
            return Err(Halt::Cancelled(format!("cancelled before {} phase", phase)));
        }
        handle
            .advance(phase)
            .map_err(|e| Halt::Failed(e.to_string()))
    }

    /// Run one tool subcommand, storing its output even when it fails
    async fn run_phase(
        &self,
        handle: &DeploymentHandle,
        subcommand: &str,
        args: Vec<String>,
        cwd: &Path,
        extra_env: &[(String, String)],
        store: fn(&mut DeploymentRecord, String),
    ) -> Result<(), Halt> {
        let result = self
            .tools
            .run(handle.request(), subcommand, args, cwd, extra_env, Some(handle.logs()))
            .await;

        match result {
            Ok(output) => {
                handle.update(|record| store(record, output));
                Ok(())
            }
            Err((output, e)) => {
                handle.update(|record| store(record, output));
                Err(Halt::Failed(e.to_string()))
            }
        }
    }

    /// Human-readable rendering of the saved plan; failures only warn
    async fn capture_plan(
        &self,
        handle: &DeploymentHandle,
        cwd: &Path,
        extra_env: &[(String, String)],
    ) {
        let args = vec!["-no-color".to_string(), PLAN_FILE.to_string()];
        match self
            .tools
            .run(handle.request(), "show", args, cwd, extra_env, None)
            .await
        {
            Ok(output) => handle.update(|record| record.plan_output = output),
            Err((_, e)) => {
                warn!("Deployment {}: could not render plan: {}", handle.id(), e);
                handle.logs().push(format!("warning: could not render plan: {}", e));
            }
        }
    }

    /// Root module outputs as JSON; failures only warn
    async fn capture_outputs(
        &self,
        handle: &DeploymentHandle,
        cwd: &Path,
        extra_env: &[(String, String)],
    ) {
        let args = vec!["-json".to_string()];
        match self
            .tools
            .run(handle.request(), "output", args, cwd, extra_env, None)
            .await
        {
            Ok(output) => {
                let trimmed = output.trim();
                if trimmed.is_empty() || trimmed == "{}" {
                    debug!("Deployment {} has no outputs", handle.id());
                    handle.logs().push("no outputs");
                } else {
                    handle.update(|record| record.apply_output = trimmed.to_string());
                }
            }
            Err((_, e)) => {
                warn!("Deployment {}: could not read outputs: {}", handle.id(), e);
                handle.logs().push(format!("warning: could not read outputs: {}", e));
            }
        }
    }

    /// Suspend until approve, reject, cancel or the approval timeout
    async fn approval_gate(&self, handle: &DeploymentHandle) -> Result<(), Halt> {
        let mut control = handle.subscribe_control();
        handle
            .await_approval()
            .map_err(|e| Halt::Failed(e.to_string()))?;
        info!("Deployment {} awaiting approval", handle.id());

        let timeout = self.options.approval_timeout;
        let decided = tokio::time::timeout(
            timeout,
            control.wait_for(|signal| *signal != ControlSignal::None),
        )
        .await
        .map(|changed| changed.is_ok());

        match decided {
            Err(_) => {
                return Err(Halt::Cancelled(format!(
                    "approval not received within {:?}",
                    timeout
                )))
            }
            Ok(false) => return Err(Halt::Failed("control channel closed".to_string())),
            Ok(true) => {}
        }

        match handle
            .resolve_gate()
            .map_err(|e| Halt::Failed(e.to_string()))?
        {
            ControlSignal::Approve => {
                info!("Deployment {} approved", handle.id());
                Ok(())
            }
            ControlSignal::Reject => Err(Halt::Cancelled("plan rejected".to_string())),
            ControlSignal::Cancel => {
                Err(Halt::Cancelled("cancelled while awaiting approval".to_string()))
            }
            ControlSignal::None => Err(Halt::Failed(
                "approval gate resolved without a decision".to_string(),
            )),
        }
    }

    fn schedule_cleanup(&self, deployment_id: String, workspace: Dir) {
        let retention = self.options.workdir_retention;
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            match workspace.delete().await {
                Ok(true) => info!("Removed working directory of deployment {}", deployment_id),
                Ok(false) => debug!("Working directory of deployment {} already gone", deployment_id),
                Err(e) => warn!(
                    "Failed to remove working directory of deployment {}: {}",
                    deployment_id, e
                ),
            }
        });
    }
}

/// `plan` arguments: saved plan file, user flags, then one `-var-file` per file
pub fn plan_args(plan_flags: Option<&str>, tfvars_files: &[String]) -> Vec<String> {
    let mut args = vec![format!("-out={}", PLAN_FILE)];
    args.extend(split_optional_flags(plan_flags));
    args.extend(tfvars_files.iter().map(|f| format!("-var-file={}", f)));
    args
}
