//! Shared handle to one deployment: record, logs and control signals

use std::sync::{Arc, RwLock};

use chrono::Utc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::deploy::fsm::{DeploymentEvent, DeploymentPhase, DeploymentStatus};
use crate::deploy::logstream::LogDistributor;
use crate::errors::DeployerError;
use crate::models::deployment::{DeploymentRecord, DeploymentRequest};

/// Latest external decision recorded for a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    None,
    Approve,
    Reject,
    Cancel,
}

/// Handle shared between a deployment's worker (sole writer) and HTTP readers
#[derive(Debug)]
pub struct DeploymentHandle {
    id: String,
    request: DeploymentRequest,
    record: RwLock<DeploymentRecord>,
    logs: LogDistributor,
    control: watch::Sender<ControlSignal>,
}

impl DeploymentHandle {
    pub fn new(id: String, request: DeploymentRequest, live_capacity: usize) -> Arc<Self> {
        let (control, _) = watch::channel(ControlSignal::None);
        Arc::new(Self {
            record: RwLock::new(DeploymentRecord::new(id.clone())),
            id,
            request,
            logs: LogDistributor::new(live_capacity),
            control,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn request(&self) -> &DeploymentRequest {
        &self.request
    }

    pub fn logs(&self) -> &LogDistributor {
        &self.logs
    }

    /// Point-in-time copy of the record
    pub fn snapshot(&self) -> DeploymentRecord {
        self.record.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn status(&self) -> DeploymentStatus {
        self.record
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .fsm
            .status()
    }

    pub fn control_signal(&self) -> ControlSignal {
        *self.control.borrow()
    }

    pub fn subscribe_control(&self) -> watch::Receiver<ControlSignal> {
        self.control.subscribe()
    }

    // ============================ EXTERNAL SIGNALS ============================== //

    /// Record an approve (`true`) or reject (`false`) decision.
    ///
    /// Valid only while awaiting approval and before any other decision or a
    /// cancel has been recorded.
    pub fn decide(&self, approve: bool) -> Result<(), DeployerError> {
        let record = self.record.read().unwrap_or_else(|e| e.into_inner());
        let status = record.fsm.status();
        if status != DeploymentStatus::AwaitingApproval {
            return Err(DeployerError::Conflict(format!(
                "deployment {} is {}, not awaiting_approval",
                self.id, status
            )));
        }

        let signal = if approve {
            ControlSignal::Approve
        } else {
            ControlSignal::Reject
        };
        let accepted = self.control.send_if_modified(|current| {
            if *current == ControlSignal::None {
                *current = signal;
                true
            } else {
                false
            }
        });
        if !accepted {
            return Err(DeployerError::Conflict(format!(
                "deployment {} already has a pending {:?} decision",
                self.id,
                self.control_signal()
            )));
        }

        info!("Deployment {} received {:?}", self.id, signal);
        Ok(())
    }

    /// Request cancellation. Overrides a pending approve/reject.
    pub fn cancel(&self) -> Result<(), DeployerError> {
        let record = self.record.read().unwrap_or_else(|e| e.into_inner());
        let status = record.fsm.status();
        if status.is_terminal() {
            return Err(DeployerError::Conflict(format!(
                "deployment {} already finished with status {}",
                self.id, status
            )));
        }

        self.control.send_if_modified(|current| {
            if *current == ControlSignal::Cancel {
                false
            } else {
                *current = ControlSignal::Cancel;
                true
            }
        });

        info!("Deployment {} cancellation requested", self.id);
        Ok(())
    }

    pub fn cancel_requested(&self) -> bool {
        self.control_signal() == ControlSignal::Cancel
    }

    // ============================== WORKER SIDE ================================= //

    fn apply(&self, record: &mut DeploymentRecord, event: DeploymentEvent) -> Result<(), DeployerError> {
        record
            .fsm
            .process(event)
            .map_err(|e| DeployerError::Internal(format!("deployment {}: {}", self.id, e)))?;
        if record.fsm.is_terminal() && record.ended_at.is_none() {
            record.ended_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Move to the next phase
    pub fn advance(&self, phase: DeploymentPhase) -> Result<(), DeployerError> {
        {
            let mut record = self.record.write().unwrap_or_else(|e| e.into_inner());
            self.apply(&mut record, DeploymentEvent::Advance(phase))?;
        }
        self.logs.push(format!("==> {}", phase));
        Ok(())
    }

    /// Write non-state fields such as captured output or the working directory
    pub fn update(&self, f: impl FnOnce(&mut DeploymentRecord)) {
        let mut record = self.record.write().unwrap_or_else(|e| e.into_inner());
        f(&mut record);
    }

    /// Suspend at the approval gate
    pub fn await_approval(&self) -> Result<(), DeployerError> {
        {
            let mut record = self.record.write().unwrap_or_else(|e| e.into_inner());
            self.apply(&mut record, DeploymentEvent::AwaitApproval)?;
        }
        self.logs.push("==> awaiting approval");
        Ok(())
    }

    /// Read the recorded decision at the gate; an approval resumes the run.
    ///
    /// Cancel takes precedence over any other signal. Reject and cancel leave
    /// the status untouched for the worker to finish.
    pub fn resolve_gate(&self) -> Result<ControlSignal, DeployerError> {
        let mut record = self.record.write().unwrap_or_else(|e| e.into_inner());
        let signal = self.control_signal();
        if signal == ControlSignal::Approve {
            self.apply(&mut record, DeploymentEvent::Approve)?;
        }
        Ok(signal)
    }

    /// Terminal success
    pub fn succeed(&self) -> Result<(), DeployerError> {
        {
            let mut record = self.record.write().unwrap_or_else(|e| e.into_inner());
            self.apply(&mut record, DeploymentEvent::Succeed)?;
        }
        self.finish_logs();
        Ok(())
    }

    /// Terminal failure with the causing message
    pub fn fail(&self, message: String) {
        self.terminate(DeploymentEvent::Fail(message));
    }

    /// Terminal cancellation with an explanation
    pub fn cancelled(&self, reason: String) {
        self.terminate(DeploymentEvent::Cancel(reason));
    }

    fn terminate(&self, event: DeploymentEvent) {
        {
            let mut record = self.record.write().unwrap_or_else(|e| e.into_inner());
            if let Err(e) = self.apply(&mut record, event) {
                warn!("{}", e);
                return;
            }
        }
        self.finish_logs();
    }

    fn finish_logs(&self) {
        let record = self.snapshot();
        match record.fsm.error() {
            Some(err) => self.logs.push(format!("==> {}: {}", record.fsm.status(), err)),
            None => self.logs.push(format!("==> {}", record.fsm.status())),
        }
        self.logs.close();
    }
}
