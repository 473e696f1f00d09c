//! Scripted collaborators shared by the worker and HTTP tests

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use iac_deployer::deploy::fsm::DeploymentStatus;
use iac_deployer::deploy::git::{CloneRequest, SourceFetcher};
use iac_deployer::deploy::handle::DeploymentHandle;
use iac_deployer::deploy::logstream::LogDistributor;
use iac_deployer::deploy::process::{CommandSpec, ExitOutcome, ProcessExecutor, RunningProcess};
use iac_deployer::deploy::registry_config::RegistryConfigurator;
use iac_deployer::deploy::tool::{ToolBinaries, ToolRunner};
use iac_deployer::deploy::worker::{self, DeploymentWorker};
use iac_deployer::errors::DeployerError;
use iac_deployer::filesys::dir::Dir;
use iac_deployer::models::deployment::{DeploymentRequest, Tool};
use iac_deployer::storage::layout::StorageLayout;

// =============================== PROCESSES ===================================== //

#[derive(Debug, Clone)]
pub enum Exit {
    Success,
    Code(i32),
    /// Never exits on its own
    Hang,
    /// Panics while being waited on
    Panic,
}

/// Canned output and exit behaviour for one subcommand
#[derive(Debug, Clone)]
pub struct Script {
    pub lines: Vec<String>,
    pub exit: Exit,
}

impl Script {
    pub fn ok(lines: &[&str]) -> Self {
        Self::new(lines, Exit::Success)
    }

    pub fn fail(lines: &[&str], code: i32) -> Self {
        Self::new(lines, Exit::Code(code))
    }

    pub fn hang(lines: &[&str]) -> Self {
        Self::new(lines, Exit::Hang)
    }

    pub fn panic() -> Self {
        Self::new(&[], Exit::Panic)
    }

    fn new(lines: &[&str], exit: Exit) -> Self {
        Self {
            lines: lines.iter().map(|l| l.to_string()).collect(),
            exit,
        }
    }
}

/// Executor that replays a [`Script`] per subcommand and records every spawn.
///
/// Subcommands without a script succeed silently.
#[derive(Default)]
pub struct ScriptedExecutor {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedExecutor {
    pub fn with(self, subcommand: &str, script: Script) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(subcommand.to_string(), script);
        self
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    pub fn subcommands(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|spec| spec.args.first().cloned())
            .collect()
    }

    pub fn call(&self, subcommand: &str) -> Option<CommandSpec> {
        self.calls()
            .into_iter()
            .find(|spec| spec.args.first().map(String::as_str) == Some(subcommand))
    }
}

impl ProcessExecutor for ScriptedExecutor {
    fn spawn(&self, spec: &CommandSpec) -> Result<Box<dyn RunningProcess>, DeployerError> {
        self.calls.lock().unwrap().push(spec.clone());
        let subcommand = spec.args.first().cloned().unwrap_or_default();
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&subcommand)
            .cloned()
            .unwrap_or_else(|| Script::ok(&[]));

        Ok(Box::new(ScriptedProcess {
            lines: script.lines.into(),
            exit: script.exit,
            killed: false,
        }))
    }
}

struct ScriptedProcess {
    lines: VecDeque<String>,
    exit: Exit,
    killed: bool,
}

#[async_trait]
impl RunningProcess for ScriptedProcess {
    async fn next_line(&mut self) -> Option<String> {
        if self.killed {
            return None;
        }
        match self.lines.pop_front() {
            Some(line) => Some(line),
            None if matches!(self.exit, Exit::Hang) => std::future::pending().await,
            None => None,
        }
    }

    async fn wait(&mut self) -> Result<ExitOutcome, DeployerError> {
        if self.killed {
            return Ok(ExitOutcome {
                success: false,
                code: None,
            });
        }
        match self.exit {
            Exit::Success => Ok(ExitOutcome {
                success: true,
                code: Some(0),
            }),
            Exit::Code(code) => Ok(ExitOutcome {
                success: false,
                code: Some(code),
            }),
            Exit::Hang => std::future::pending().await,
            Exit::Panic => panic!("scripted process blew up"),
        }
    }

    fn kill(&mut self) -> Result<(), DeployerError> {
        self.killed = true;
        Ok(())
    }
}

// ================================= SOURCES ===================================== //

/// Fetcher that fabricates a checkout instead of running git
#[derive(Default)]
pub struct StubFetcher {
    /// Directories created inside the checkout
    pub module_dirs: Vec<String>,
    /// Clone error text; the fetch fails when set
    pub failure: Option<String>,
    /// Fetch blocks until notified when set
    pub hold: Option<Arc<Notify>>,
}

#[async_trait]
impl SourceFetcher for StubFetcher {
    async fn fetch(
        &self,
        request: &CloneRequest<'_>,
        target: &Path,
        logs: &LogDistributor,
    ) -> Result<(), DeployerError> {
        logs.push(format!("Cloning into '{}'...", target.display()));
        if let Some(hold) = &self.hold {
            hold.notified().await;
        }
        if let Some(failure) = &self.failure {
            logs.push(failure.clone());
            return Err(DeployerError::CloneError(failure.clone()));
        }

        tokio::fs::create_dir_all(target).await?;
        for dir in &self.module_dirs {
            tokio::fs::create_dir_all(target.join(dir)).await?;
        }
        logs.push(format!("checked out {}", request.git_ref));
        Ok(())
    }
}

// ================================= HARNESS ===================================== //

pub struct Harness {
    pub base: Dir,
    pub executor: Arc<ScriptedExecutor>,
    pub worker: Arc<DeploymentWorker>,
}

impl Harness {
    pub async fn new(executor: ScriptedExecutor, fetcher: StubFetcher) -> Self {
        Self::with_options(executor, fetcher, worker::Options::default()).await
    }

    pub async fn with_options(
        executor: ScriptedExecutor,
        fetcher: StubFetcher,
        options: worker::Options,
    ) -> Self {
        Self::build(executor, Arc::new(fetcher), options, None).await
    }

    pub async fn build(
        executor: ScriptedExecutor,
        fetcher: Arc<dyn SourceFetcher>,
        options: worker::Options,
        registry: Option<RegistryConfigurator>,
    ) -> Self {
        let base = Dir::create_temp_dir("deployer-test").await.unwrap();
        let layout = StorageLayout::new(base.path());
        layout.setup().await.unwrap();

        let executor = Arc::new(executor);
        let process_executor: Arc<dyn ProcessExecutor> = executor.clone();
        let worker = Arc::new(DeploymentWorker::new(
            options,
            layout,
            fetcher,
            ToolRunner::new(process_executor, ToolBinaries::default()),
            registry,
        ));

        Self {
            base,
            executor,
            worker,
        }
    }

    pub fn layout(&self) -> StorageLayout {
        StorageLayout::new(self.base.path())
    }

    pub async fn cleanup(self) {
        self.base.delete().await.unwrap();
    }
}

pub fn request(auto_approve: bool) -> DeploymentRequest {
    DeploymentRequest {
        tool: Tool::Terraform,
        git_url: "https://git.example.com/org/infra.git".to_string(),
        git_ref: "main".to_string(),
        path: PathBuf::from("."),
        env_vars: BTreeMap::new(),
        tfvars_files: vec![],
        init_flags: None,
        plan_flags: None,
        timeout: Duration::from_secs(30),
        git_auth: None,
        auto_approve,
    }
}

/// Run the worker for `handle` in the background
pub fn spawn_run(harness: &Harness, handle: &Arc<DeploymentHandle>) -> JoinHandle<()> {
    let worker = harness.worker.clone();
    let handle = handle.clone();
    tokio::spawn(async move { worker.run(handle).await })
}

/// Poll until the deployment reaches `status`
pub async fn wait_for_status(handle: &DeploymentHandle, status: DeploymentStatus) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while handle.status() != status {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("deployment never reached {}, is {}", status, handle.status()));
}

/// Lines pushed to the deployment log so far
pub fn log_lines(handle: &DeploymentHandle) -> Vec<String> {
    handle
        .logs()
        .snapshot()
        .iter()
        .map(|line| line.to_string())
        .collect()
}
