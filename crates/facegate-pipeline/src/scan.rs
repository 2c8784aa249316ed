//! Scan verification as a cancellable background task.
//!
//! A scan polls [`FacePipeline::scan_once`] on a fixed interval until a face
//! is recognized, the deadline passes, or it is cancelled. At most one scan
//! runs per scheduler: starting another cancels the one before it.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use facegate_core::SessionGrant;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::Config;
use crate::error::PipelineError;
use crate::pipeline::{FacePipeline, ScanTick};

#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    Granted(SessionGrant),
    /// Deadline passed without a match.
    NotRecognized,
    Cancelled,
}

pub struct ScanHandle {
    cancel: Arc<Notify>,
    task: JoinHandle<Result<ScanOutcome, PipelineError>>,
}

impl ScanHandle {
    pub fn cancel(&self) {
        self.cancel.notify_one();
    }

    /// Wait for the scan to finish.
    pub async fn outcome(self) -> Result<ScanOutcome, PipelineError> {
        match self.task.await {
            Ok(result) => result,
            Err(join) if join.is_panic() => std::panic::resume_unwind(join.into_panic()),
            Err(_) => Ok(ScanOutcome::Cancelled),
        }
    }
}

pub struct ScanScheduler {
    pipeline: Arc<FacePipeline>,
    interval: Duration,
    timeout: Duration,
    current: Arc<Mutex<Option<Arc<Notify>>>>,
}

fn lock_slot(slot: &Mutex<Option<Arc<Notify>>>) -> MutexGuard<'_, Option<Arc<Notify>>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScanScheduler {
    pub fn new(pipeline: Arc<FacePipeline>, interval: Duration, timeout: Duration) -> Self {
        Self {
            pipeline,
            interval,
            timeout,
            current: Arc::new(Mutex::new(None)),
        }
    }

    pub fn from_config(pipeline: Arc<FacePipeline>, config: &Config) -> Self {
        Self::new(pipeline, config.scan_interval(), config.scan_timeout())
    }

    /// Begin a new scan, cancelling any scan still running.
    pub fn start(&self) -> ScanHandle {
        let cancel = Arc::new(Notify::new());
        let previous = lock_slot(&self.current).replace(cancel.clone());
        if let Some(previous) = previous {
            previous.notify_one();
        }

        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            timeout_secs = self.timeout.as_secs(),
            "scan started"
        );
        let pipeline = self.pipeline.clone();
        let (interval, timeout) = (self.interval, self.timeout);
        let slot = self.current.clone();
        let own = cancel.clone();
        let task = tokio::spawn(async move {
            let outcome = run_scan(pipeline, interval, timeout, own.clone()).await;
            // Vacate the slot unless a newer scan already took it.
            let mut current = lock_slot(&slot);
            if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, &own)) {
                *current = None;
            }
            outcome
        });
        ScanHandle { cancel, task }
    }

    /// Cancel the running scan, if any. Returns whether there was one to cancel.
    pub fn cancel_current(&self) -> bool {
        let current = lock_slot(&self.current).take();
        match current {
            Some(cancel) => {
                cancel.notify_one();
                true
            }
            None => false,
        }
    }
}

async fn run_scan(
    pipeline: Arc<FacePipeline>,
    interval: Duration,
    timeout: Duration,
    cancel: Arc<Notify>,
) -> Result<ScanOutcome, PipelineError> {
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut ticks = 0u32;

    loop {
        let tick = tokio::select! {
            biased;
            _ = cancel.notified() => {
                tracing::info!(ticks, "scan cancelled");
                return Ok(ScanOutcome::Cancelled);
            }
            _ = &mut deadline => {
                tracing::info!(ticks, "scan timed out, face not recognized");
                return Ok(ScanOutcome::NotRecognized);
            }
            tick = async {
                ticker.tick().await;
                pipeline.scan_once().await
            } => tick,
        };
        ticks += 1;

        match tick {
            Ok(ScanTick::Granted(grant)) => {
                tracing::info!(ticks, key = %grant.key, "scan recognized face");
                return Ok(ScanOutcome::Granted(grant));
            }
            Ok(ScanTick::NoMatch | ScanTick::Skipped) => {}
            Err(e) if e.is_transient() => tracing::debug!(error = %e, "scan tick without usable face"),
            Err(e) => {
                tracing::warn!(error = %e, "scan aborted");
                return Err(e);
            }
        }
    }
}
