//! Transfer state machine: idle → transferring → finished | failed.
//!
//! Terminal states are sticky. The navigation blocker reads the machine to decide
//! whether leaving (closing the session) needs confirmation.

use std::fmt;

/// Transfer lifecycle state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TransferState {
    #[default]
    Idle,
    Transferring,
    Finished,
    Failed(String),
}

impl TransferState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferState::Finished | TransferState::Failed(_))
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferState::Idle => f.write_str("idle"),
            TransferState::Transferring => f.write_str("transferring"),
            TransferState::Finished => f.write_str("finished"),
            TransferState::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Terminal result of one transfer attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Finished,
    Failed(String),
}

#[derive(Debug, Default)]
pub struct TransferStateMachine {
    state: TransferState,
}

impl TransferStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &TransferState {
        &self.state
    }

    /// Channel and key are both available and a send/receive was started.
    /// Returns false (and changes nothing) unless the machine is idle.
    pub fn begin(&mut self) -> bool {
        if self.state != TransferState::Idle {
            tracing::debug!(state = %self.state, "begin ignored");
            return false;
        }
        self.state = TransferState::Transferring;
        true
    }

    /// Only a running transfer can finish. Returns false from any other state.
    pub fn finish(&mut self) -> bool {
        if self.state != TransferState::Transferring {
            tracing::debug!(state = %self.state, "finish ignored");
            return false;
        }
        self.state = TransferState::Finished;
        true
    }

    /// Returns false if already terminal. Failing straight from idle is allowed
    /// (e.g. the transfer could not start).
    pub fn fail(&mut self, reason: impl Into<String>) -> bool {
        self.settle(TransferState::Failed(reason.into()))
    }

    fn settle(&mut self, next: TransferState) -> bool {
        if self.state.is_terminal() {
            tracing::debug!(state = %self.state, attempted = %next, "terminal state is sticky");
            return false;
        }
        self.state = next;
        true
    }

    /// Settle from an engine result and return the resulting outcome.
    /// If the machine was already terminal, the existing outcome is returned.
    pub fn record<T, E: fmt::Display>(&mut self, result: &Result<T, E>) -> TransferOutcome {
        match result {
            Ok(_) if self.state == TransferState::Idle => {
                self.fail("transfer never started")
            }
            Ok(_) => self.finish(),
            Err(e) => self.fail(e.to_string()),
        };
        self.outcome()
            .unwrap_or_else(|| TransferOutcome::Failed("transfer did not settle".to_string()))
    }

    pub fn outcome(&self) -> Option<TransferOutcome> {
        match &self.state {
            TransferState::Finished => Some(TransferOutcome::Finished),
            TransferState::Failed(reason) => Some(TransferOutcome::Failed(reason.clone())),
            _ => None,
        }
    }

    /// Leaving now would interrupt a live transfer.
    pub fn blocks_navigation(&self) -> bool {
        self.state == TransferState::Transferring
    }
}

/// Navigation blocker state, as seen by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockerState {
    /// No leave request pending.
    Unblocked,
    /// Leave requested during a transfer; waiting for stay/leave.
    Blocked,
    /// Leave confirmed (or nothing to protect); host should tear down.
    Proceeding,
}

/// Confirmation gate in front of "leave the current transfer".
#[derive(Debug)]
pub struct NavigationBlocker {
    state: BlockerState,
}

impl Default for NavigationBlocker {
    fn default() -> Self {
        Self::new()
    }
}

impl NavigationBlocker {
    pub fn new() -> Self {
        Self {
            state: BlockerState::Unblocked,
        }
    }

    pub fn state(&self) -> BlockerState {
        self.state
    }

    /// User asked to leave. Blocks only while the machine is transferring;
    /// a second request while already blocked is treated as confirmation.
    pub fn request_leave(&mut self, machine: &TransferStateMachine) -> BlockerState {
        self.state = match self.state {
            _ if !machine.blocks_navigation() => BlockerState::Proceeding,
            BlockerState::Blocked => BlockerState::Proceeding,
            _ => BlockerState::Blocked,
        };
        self.state
    }

    /// Stay on the transfer.
    pub fn stay(&mut self) {
        if self.state == BlockerState::Blocked {
            self.state = BlockerState::Unblocked;
        }
    }

    /// Confirm leaving. Returns true if the host should now tear down.
    pub fn leave(&mut self) -> bool {
        if self.state == BlockerState::Blocked {
            self.state = BlockerState::Proceeding;
        }
        self.state == BlockerState::Proceeding
    }
}
