use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::handoff::{Handoff, HandoffPolicy};
use super::{lock_or_recover, StageKind};
use crate::error::PipelineError;

/// Why a run ended. The first request wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// SIGINT/SIGTERM or an explicit shutdown.
    Signal,
    /// The input ran out and every stage drained.
    EndOfStream,
    Failure { stage: StageKind, message: String },
}

impl StopReason {
    pub fn failure(stage: StageKind, error: &PipelineError) -> Self {
        StopReason::Failure {
            stage,
            message: error.to_string(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, StopReason::Failure { .. })
    }
}

/// State shared by every worker of one pipeline run.
///
/// Holds the stop flag (false -> true, once) and every handoff edge, so a
/// stop request can wake any worker parked on an edge.
pub struct PipelineContext {
    stopping: AtomicBool,
    reason: Mutex<Option<StopReason>>,
    stop_signal: Condvar,
    edges: Mutex<Vec<Arc<Handoff>>>,
}

impl PipelineContext {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            stopping: AtomicBool::new(false),
            reason: Mutex::new(None),
            stop_signal: Condvar::new(),
            edges: Mutex::new(Vec::new()),
        })
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    /// Creates a handoff edge whose waiters are woken on stop.
    pub fn handoff(
        &self,
        from: StageKind,
        to: StageKind,
        capacity: usize,
        policy: HandoffPolicy,
    ) -> Arc<Handoff> {
        let edge = Arc::new(Handoff::new(from, to, capacity, policy));
        lock_or_recover(&self.edges).push(Arc::clone(&edge));
        edge
    }

    /// Sets the stop flag and wakes every blocked worker.
    ///
    /// Returns `true` if this call recorded the stop reason.
    pub fn request_stop(&self, reason: StopReason) -> bool {
        let first = {
            let mut slot = lock_or_recover(&self.reason);
            let first = slot.is_none();
            if first {
                match &reason {
                    StopReason::Failure { stage, message } => {
                        info!(%stage, %message, "stopping after failure")
                    }
                    other => info!(reason = ?other, "stopping"),
                }
                *slot = Some(reason);
            } else {
                debug!(?reason, "stop already requested");
            }
            self.stopping.store(true, Ordering::Release);
            first
        };
        self.stop_signal.notify_all();

        let edges = lock_or_recover(&self.edges).clone();
        for edge in edges {
            edge.wake_all();
        }
        first
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        lock_or_recover(&self.reason).clone()
    }

    /// Blocks until a stop is requested.
    pub fn wait_for_stop(&self) -> StopReason {
        let guard = lock_or_recover(&self.reason);
        let guard = self
            .stop_signal
            .wait_while(guard, |reason| reason.is_none())
            .unwrap_or_else(|e| e.into_inner());
        guard.clone().unwrap_or(StopReason::Signal)
    }

    /// Like `wait_for_stop`, giving up after `timeout`.
    pub fn wait_for_stop_timeout(&self, timeout: Duration) -> Option<StopReason> {
        let guard = lock_or_recover(&self.reason);
        let (guard, _) = self
            .stop_signal
            .wait_timeout_while(guard, timeout, |reason| reason.is_none())
            .unwrap_or_else(|e| e.into_inner());
        guard.clone()
    }

    /// Sleeps for `duration` unless a stop arrives first.
    ///
    /// Returns `false` if the pipeline is stopping.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut guard = lock_or_recover(&self.reason);
        while guard.is_none() {
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            guard = self
                .stop_signal
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
        false
    }
}
