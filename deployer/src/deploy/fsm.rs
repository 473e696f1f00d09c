//! Finite State Machine for a plan/apply deployment

use std::fmt;

use serde::{Deserialize, Serialize};

/// Overall deployment status. Only `status` decides terminality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Running,
    AwaitingApproval,
    Success,
    Failed,
    Cancelled,
}

impl DeploymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Success | DeploymentStatus::Failed | DeploymentStatus::Cancelled
        )
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeploymentStatus::Running => "running",
            DeploymentStatus::AwaitingApproval => "awaiting_approval",
            DeploymentStatus::Success => "success",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::Cancelled => "cancelled",
        })
    }
}

/// Step of the IaC lifecycle, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentPhase {
    Initializing,
    Cloning,
    Init,
    Plan,
    Apply,
    Completed,
}

impl DeploymentPhase {
    /// The phase that must follow this one
    pub fn next(&self) -> Option<DeploymentPhase> {
        match self {
            DeploymentPhase::Initializing => Some(DeploymentPhase::Cloning),
            DeploymentPhase::Cloning => Some(DeploymentPhase::Init),
            DeploymentPhase::Init => Some(DeploymentPhase::Plan),
            DeploymentPhase::Plan => Some(DeploymentPhase::Apply),
            DeploymentPhase::Apply => Some(DeploymentPhase::Completed),
            DeploymentPhase::Completed => None,
        }
    }
}

impl fmt::Display for DeploymentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeploymentPhase::Initializing => "initializing",
            DeploymentPhase::Cloning => "cloning",
            DeploymentPhase::Init => "init",
            DeploymentPhase::Plan => "plan",
            DeploymentPhase::Apply => "apply",
            DeploymentPhase::Completed => "completed",
        })
    }
}

/// Deployment event
#[derive(Debug, Clone)]
pub enum DeploymentEvent {
    /// Move to the given phase; it must be the immediate successor
    Advance(DeploymentPhase),

    /// Plan finished, suspend at the approval gate
    AwaitApproval,

    /// Human approved the plan
    Approve,

    /// Outputs collected after apply
    Succeed,

    /// A phase failed
    Fail(String),

    /// Rejected, cancelled or timed out at the gate
    Cancel(String),
}

/// Deployment FSM
#[derive(Debug, Clone)]
pub struct DeploymentFsm {
    status: DeploymentStatus,
    phase: DeploymentPhase,
    error: Option<String>,
}

impl DeploymentFsm {
    /// Create a new FSM: running, initializing
    pub fn new() -> Self {
        Self {
            status: DeploymentStatus::Running,
            phase: DeploymentPhase::Initializing,
            error: None,
        }
    }

    pub fn status(&self) -> DeploymentStatus {
        self.status
    }

    pub fn phase(&self) -> DeploymentPhase {
        self.phase
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: DeploymentEvent) -> Result<(), String> {
        let status = match (self.status, &event) {
            (DeploymentStatus::Running, DeploymentEvent::Advance(phase))
                if self.phase.next() == Some(*phase) =>
            {
                self.phase = *phase;
                DeploymentStatus::Running
            }

            (DeploymentStatus::Running, DeploymentEvent::AwaitApproval)
                if self.phase == DeploymentPhase::Plan =>
            {
                DeploymentStatus::AwaitingApproval
            }

            (DeploymentStatus::AwaitingApproval, DeploymentEvent::Approve) => {
                DeploymentStatus::Running
            }

            (DeploymentStatus::Running, DeploymentEvent::Succeed)
                if self.phase == DeploymentPhase::Completed =>
            {
                DeploymentStatus::Success
            }

            (
                DeploymentStatus::Running | DeploymentStatus::AwaitingApproval,
                DeploymentEvent::Fail(err),
            ) => {
                self.error = Some(err.clone());
                DeploymentStatus::Failed
            }

            (
                DeploymentStatus::Running | DeploymentStatus::AwaitingApproval,
                DeploymentEvent::Cancel(reason),
            ) => {
                self.error = Some(reason.clone());
                DeploymentStatus::Cancelled
            }

            (status, event) => {
                return Err(format!(
                    "Invalid transition: {} ({}) -> {:?}",
                    status, self.phase, event
                ));
            }
        };

        self.status = status;
        Ok(())
    }
}

impl Default for DeploymentFsm {
    fn default() -> Self {
        Self::new()
    }
}
