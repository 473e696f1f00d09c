//! Runs IaC tool subcommands with streaming output and a hard timeout

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::deploy::logstream::LogDistributor;
use crate::deploy::process::{CommandSpec, ProcessExecutor};
use crate::errors::DeployerError;
use crate::models::deployment::{DeploymentRequest, Tool};

/// How long to keep collecting output after a timeout kill
const DRAIN_AFTER_KILL: Duration = Duration::from_secs(5);

/// Deadline used when the requested timeout does not fit the clock
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Binary names for each supported tool
#[derive(Debug, Clone)]
pub struct ToolBinaries {
    pub terraform: String,
    pub tofu: String,
}

impl ToolBinaries {
    pub fn resolve(&self, tool: Tool) -> &str {
        match tool {
            Tool::Terraform => &self.terraform,
            Tool::OpenTofu => &self.tofu,
        }
    }
}

impl Default for ToolBinaries {
    fn default() -> Self {
        Self {
            terraform: "terraform".to_string(),
            tofu: "tofu".to_string(),
        }
    }
}

/// Captured output, paired with the error when the command did not succeed
pub type CommandOutput = Result<String, (String, DeployerError)>;

/// Invokes the tool selected by a deployment request
pub struct ToolRunner {
    executor: Arc<dyn ProcessExecutor>,
    binaries: ToolBinaries,
}

impl ToolRunner {
    pub fn new(executor: Arc<dyn ProcessExecutor>, binaries: ToolBinaries) -> Self {
        Self { executor, binaries }
    }

    /// Run `<tool> <subcommand> <args...>` in `cwd`.
    ///
    /// Every output line is captured and, when `logs` is given, pushed to the
    /// deployment's log stream as it arrives. The process is killed once the
    /// request timeout elapses.
    pub async fn run(
        &self,
        request: &DeploymentRequest,
        subcommand: &str,
        args: Vec<String>,
        cwd: &Path,
        extra_env: &[(String, String)],
        logs: Option<&LogDistributor>,
    ) -> CommandOutput {
        let program = self.binaries.resolve(request.tool).to_string();
        let mut env: Vec<(String, String)> = request
            .env_vars
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        env.extend(extra_env.iter().cloned());

        let mut full_args = Vec::with_capacity(args.len() + 1);
        full_args.push(subcommand.to_string());
        full_args.extend(args);

        let spec = CommandSpec {
            program: program.clone(),
            args: full_args,
            cwd: cwd.to_path_buf(),
            env,
        };
        info!("Running {} {:?} in {}", program, spec.args, cwd.display());

        let mut process = match self.executor.spawn(&spec) {
            Ok(process) => process,
            Err(e) => return Err((String::new(), e)),
        };

        let timeout = request.timeout;
        let now = Instant::now();
        let deadline = now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE);
        let mut output = String::new();
        let mut capture = |line: String| {
            if let Some(logs) = logs {
                logs.push(line.clone());
            }
            output.push_str(&line);
            output.push('\n');
        };

        let mut timed_out = false;
        loop {
            tokio::select! {
                line = process.next_line() => match line {
                    Some(line) => capture(line),
                    None => break,
                },
                _ = tokio::time::sleep_until(deadline) => {
                    timed_out = true;
                    break;
                }
            }
        }

        let outcome = if timed_out {
            None
        } else {
            // Output may close before the child exits; the deadline still applies
            tokio::time::timeout_at(deadline, process.wait()).await.ok()
        };

        let error = match outcome {
            Some(Ok(exit)) if exit.success => None,
            Some(Ok(exit)) => Some(DeployerError::ToolError {
                tool: program.clone(),
                subcommand: subcommand.to_string(),
                reason: exit.describe(),
            }),
            Some(Err(e)) => Some(DeployerError::ToolError {
                tool: program.clone(),
                subcommand: subcommand.to_string(),
                reason: e.to_string(),
            }),
            None => {
                warn!("{} {} exceeded {:?}, killing", program, subcommand, timeout);
                if let Err(e) = process.kill() {
                    warn!("Kill after timeout failed: {}", e);
                }
                let _ = tokio::time::timeout(DRAIN_AFTER_KILL, async {
                    while let Some(line) = process.next_line().await {
                        capture(line);
                    }
                })
                .await;
                if let Ok(Err(e)) = tokio::time::timeout(DRAIN_AFTER_KILL, process.wait()).await {
                    debug!("Wait after kill failed: {}", e);
                }
                Some(DeployerError::ToolTimeout {
                    tool: program.clone(),
                    subcommand: subcommand.to_string(),
                    timeout,
                })
            }
        };

        match error {
            None => Ok(output),
            Some(e) => Err((output, e)),
        }
    }
}
