//! Plugin lifecycle state machine.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use thiserror::Error;

/// Lifecycle state of a plugin instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    /// Constructed, `configure` not called yet.
    Unconfigured = 0,
    /// Configured, not started.
    Configured = 1,
    /// Serving exports.
    Started = 2,
    /// Stopped. Terminal for this instance run.
    Stopped = 3,
}

impl LifecycleState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Unconfigured,
            1 => Self::Configured,
            2 => Self::Started,
            _ => Self::Stopped,
        }
    }

    /// Lowercase state name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unconfigured => "unconfigured",
            Self::Configured => "configured",
            Self::Started => "started",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot {action} plugin in state '{state}'")]
pub struct LifecycleError {
    /// Attempted operation.
    pub action: &'static str,
    /// State at the time of the attempt.
    pub state: LifecycleState,
}

/// Lock-free lifecycle tracker.
///
/// Exports read the state on every call, transitions are rare, so a single
/// atomic is enough.
#[derive(Debug)]
pub struct Lifecycle {
    state: AtomicU8,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    /// New tracker in [`LifecycleState::Unconfigured`].
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(LifecycleState::Unconfigured as u8),
        }
    }

    /// Current state.
    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// `Unconfigured | Configured → Configured`.
    pub fn configure(&self) -> Result<(), LifecycleError> {
        self.transition(
            "configure",
            &[LifecycleState::Unconfigured, LifecycleState::Configured],
            LifecycleState::Configured,
        )
        .map(|_| ())
    }

    /// `Configured → Started`.
    pub fn start(&self) -> Result<(), LifecycleError> {
        self.transition("start", &[LifecycleState::Configured], LifecycleState::Started)
            .map(|_| ())
    }

    /// `Started → Stopped`.
    ///
    /// Returns `Ok(false)` when already stopped so callers can skip cleanup.
    pub fn stop(&self) -> Result<bool, LifecycleError> {
        if self.state() == LifecycleState::Stopped {
            return Ok(false);
        }
        match self.transition("stop", &[LifecycleState::Started], LifecycleState::Stopped) {
            Ok(_) => Ok(true),
            // Lost a race with another stop.
            Err(e) if e.state == LifecycleState::Stopped => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Fail unless the instance is serving exports.
    pub fn ensure_started(&self) -> Result<(), LifecycleError> {
        match self.state() {
            LifecycleState::Started => Ok(()),
            state => Err(LifecycleError {
                action: "export from",
                state,
            }),
        }
    }

    fn transition(
        &self,
        action: &'static str,
        from: &[LifecycleState],
        to: LifecycleState,
    ) -> Result<LifecycleState, LifecycleError> {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let state = LifecycleState::from_u8(current);
            if !from.contains(&state) {
                return Err(LifecycleError { action, state });
            }
            match self.state.compare_exchange(
                current,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(state),
                Err(actual) => current = actual,
            }
        }
    }
}
