//! Per-call execution context.
//!
//! The host owns the context and lends it to a plugin for the duration of a
//! single export call. It carries a deadline and a cancellation signal that
//! handlers honor through [`ExportContext::run`].

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

/// Why a call was cut short.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Interrupted {
    /// The deadline elapsed.
    #[error("timeout elapsed")]
    TimedOut,

    /// The host cancelled the call.
    #[error("call cancelled")]
    Cancelled,
}

/// Handle used by the host to cancel one or more in-flight calls.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Signal cancellation to every context created from this handle.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Whether cancellation was signalled.
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Execution context of one export call.
#[derive(Debug, Clone)]
pub struct ExportContext {
    deadline: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
}

impl ExportContext {
    /// Context that expires `timeout` from now.
    pub fn new(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            cancel: None,
        }
    }

    /// Context with neither deadline nor cancellation.
    pub fn background() -> Self {
        Self {
            deadline: None,
            cancel: None,
        }
    }

    /// Context expiring after `timeout` that can also be cancelled.
    pub fn cancellable(timeout: Duration) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let ctx = Self {
            deadline: Some(Instant::now() + timeout),
            cancel: Some(rx),
        };
        (ctx, CancelHandle { tx })
    }

    /// Derived context whose deadline is at most `timeout` from now.
    ///
    /// An earlier deadline is kept; cancellation is shared with `self`.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let limit = Instant::now() + timeout;
        Self {
            deadline: Some(self.deadline.map_or(limit, |d| d.min(limit))),
            cancel: self.cancel.clone(),
        }
    }

    /// Absolute deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline. `None` means unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Whether the call should stop now.
    pub fn check(&self) -> Result<(), Interrupted> {
        if self.cancel.as_ref().is_some_and(|rx| *rx.borrow()) {
            return Err(Interrupted::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(Interrupted::TimedOut);
        }
        Ok(())
    }

    /// Drive `fut` until it completes, the deadline elapses or the call is
    /// cancelled, whichever comes first.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, Interrupted>
    where
        F: Future<Output = T>,
    {
        self.check()?;

        let deadline = async {
            match self.deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        let cancelled = async {
            let Some(mut rx) = self.cancel.clone() else {
                return std::future::pending::<()>().await;
            };
            loop {
                if *rx.borrow_and_update() {
                    return;
                }
                // Sender dropped without cancelling: never fires.
                if rx.changed().await.is_err() {
                    return std::future::pending::<()>().await;
                }
            }
        };

        tokio::select! {
            out = fut => Ok(out),
            _ = deadline => Err(Interrupted::TimedOut),
            _ = cancelled => Err(Interrupted::Cancelled),
        }
    }
}
