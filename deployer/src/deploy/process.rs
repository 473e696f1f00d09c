//! Process execution capability.
//!
//! [`PtyExecutor`] runs the child under a pseudo-terminal so the tool keeps its
//! interactive colour output. [`PipeExecutor`] uses plain pipes, merging stdout
//! and stderr, and is the deterministic choice for CI and tests.

use std::io::Read;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::errors::DeployerError;

/// What to run
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Added on top of the inherited process environment
    pub env: Vec<(String, String)>,
}

/// How a process ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitOutcome {
    pub success: bool,
    pub code: Option<i32>,
}

impl ExitOutcome {
    pub fn describe(&self) -> String {
        match self.code {
            Some(code) => format!("exit status {}", code),
            None => "terminated by signal".to_string(),
        }
    }
}

/// A spawned child whose output is consumed line by line
#[async_trait]
pub trait RunningProcess: Send {
    /// Next output line without its terminator; `None` once output is exhausted
    async fn next_line(&mut self) -> Option<String>;

    /// Wait for the child to exit
    async fn wait(&mut self) -> Result<ExitOutcome, DeployerError>;

    /// Forcefully terminate the child
    fn kill(&mut self) -> Result<(), DeployerError>;
}

/// Spawns processes
pub trait ProcessExecutor: Send + Sync {
    fn spawn(&self, spec: &CommandSpec) -> Result<Box<dyn RunningProcess>, DeployerError>;
}

/// Strip a trailing carriage return left by terminal line endings
fn trim_line(mut line: String) -> String {
    while line.ends_with('\r') || line.ends_with('\n') {
        line.pop();
    }
    line
}

// ================================== PTY ======================================= //

/// Terminal geometry given to the child
const PTY_COLS: u16 = 200;
const PTY_ROWS: u16 = 50;

/// Runs children attached to a pseudo-terminal
#[derive(Debug, Default, Clone)]
pub struct PtyExecutor;

struct PtyProcess {
    lines: mpsc::UnboundedReceiver<String>,
    child: Option<Box<dyn Child + Send + Sync>>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    /// Set once `kill` has delivered its signal
    killed: bool,
    // Closing the master before the reader drains would truncate output
    _master: Box<dyn MasterPty + Send>,
}

impl ProcessExecutor for PtyExecutor {
    fn spawn(&self, spec: &CommandSpec) -> Result<Box<dyn RunningProcess>, DeployerError> {
        let pair = native_pty_system()
            .openpty(PtySize {
                rows: PTY_ROWS,
                cols: PTY_COLS,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| DeployerError::ProcessError(format!("openpty failed: {e}")))?;

        let mut cmd = CommandBuilder::new(&spec.program);
        cmd.args(&spec.args);
        cmd.cwd(&spec.cwd);
        cmd.env("TERM", "xterm-256color");
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let child = pair.slave.spawn_command(cmd).map_err(|e| {
            DeployerError::ProcessError(format!("failed to spawn {}: {e}", spec.program))
        })?;
        // Drop our copy of the slave so the reader sees EOF when the child exits
        drop(pair.slave);

        let killer = child.clone_killer();
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| DeployerError::ProcessError(format!("clone_reader failed: {e}")))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let program = spec.program.clone();
        tokio::task::spawn_blocking(move || read_pty_lines(reader, tx, &program));

        Ok(Box::new(PtyProcess {
            lines: rx,
            child: Some(child),
            killer,
            killed: false,
            _master: pair.master,
        }))
    }
}

fn read_pty_lines(mut reader: Box<dyn Read + Send>, tx: mpsc::UnboundedSender<String>, program: &str) {
    let mut buf = [0u8; 4096];
    let mut pending: Vec<u8> = Vec::new();

    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                pending.extend_from_slice(&buf[..n]);
                while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                    let rest = pending.split_off(pos + 1);
                    let line = String::from_utf8_lossy(&pending).into_owned();
                    pending = rest;
                    if tx.send(trim_line(line)).is_err() {
                        return;
                    }
                }
            }
            // Linux reports EIO on the master once the child side is gone
            Err(e) => {
                debug!("PTY read for {} ended: {}", program, e);
                break;
            }
        }
    }

    if !pending.is_empty() {
        let _ = tx.send(trim_line(String::from_utf8_lossy(&pending).into_owned()));
    }
}

#[async_trait]
impl RunningProcess for PtyProcess {
    async fn next_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }

    async fn wait(&mut self) -> Result<ExitOutcome, DeployerError> {
        let mut child = self
            .child
            .take()
            .ok_or_else(|| DeployerError::ProcessError("process already waited".to_string()))?;
        let status = tokio::task::spawn_blocking(move || child.wait())
            .await
            .map_err(|e| DeployerError::ProcessError(e.to_string()))??;
        // portable-pty folds signal deaths into a code of 1
        let signalled = self.killed && !status.success();
        Ok(ExitOutcome {
            success: status.success(),
            code: (!signalled).then(|| status.exit_code() as i32),
        })
    }

    fn kill(&mut self) -> Result<(), DeployerError> {
        if let Err(e) = self.killer.kill() {
            warn!("Failed to kill PTY child: {}", e);
            return Err(DeployerError::ProcessError(e.to_string()));
        }
        self.killed = true;
        Ok(())
    }
}

// ================================= PIPES ====================================== //

/// Runs children with piped, merged stdout/stderr
#[derive(Debug, Default, Clone)]
pub struct PipeExecutor;

struct PipeProcess {
    lines: mpsc::UnboundedReceiver<String>,
    child: tokio::process::Child,
}

impl ProcessExecutor for PipeExecutor {
    fn spawn(&self, spec: &CommandSpec) -> Result<Box<dyn RunningProcess>, DeployerError> {
        let mut child = tokio::process::Command::new(&spec.program)
            .args(&spec.args)
            .current_dir(&spec.cwd)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                DeployerError::ProcessError(format!("failed to spawn {}: {e}", spec.program))
            })?;

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, tx));
        }

        Ok(Box::new(PipeProcess { lines: rx, child }))
    }
}

async fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = trim_line(String::from_utf8_lossy(&buf).into_owned());
                if tx.send(line).is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!("Pipe read ended: {}", e);
                break;
            }
        }
    }
}

#[async_trait]
impl RunningProcess for PipeProcess {
    async fn next_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }

    async fn wait(&mut self) -> Result<ExitOutcome, DeployerError> {
        let status = self.child.wait().await?;
        Ok(ExitOutcome {
            success: status.success(),
            code: status.code(),
        })
    }

    fn kill(&mut self) -> Result<(), DeployerError> {
        self.child.start_kill()?;
        Ok(())
    }
}
