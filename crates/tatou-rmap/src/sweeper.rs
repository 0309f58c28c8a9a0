// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Background task that expires abandoned handshakes on a fixed interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::protocol::RmapEngine;

/// Shortest pause between sweep passes.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// Handle to a running sweeper. Dropping it without calling
/// [`SweeperHandle::stop`] leaves the task running until the runtime ends.
pub struct SweeperHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// False once the task has ended, normally or not.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Ask the task to finish and wait for it.
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            warn!(error = %e, "session sweeper ended abnormally");
        }
    }
}

/// Run [`RmapEngine::sweep_now`] every `interval` on the current runtime.
/// Intervals shorter than [`MIN_SWEEP_INTERVAL`] are raised to it.
pub fn spawn_session_sweeper(engine: Arc<RmapEngine>, interval: Duration) -> SweeperHandle {
    if interval < MIN_SWEEP_INTERVAL {
        warn!(requested_ms = interval.as_millis() as u64, "sweep interval too short, clamping");
    }
    let interval = interval.max(MIN_SWEEP_INTERVAL);
    let (shutdown, mut shutdown_rx) = oneshot::channel();

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match engine.sweep_now() {
                        Ok(report) if report.expired + report.dropped > 0 => {
                            debug!(expired = report.expired, dropped = report.dropped, "sweep pass");
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "session sweep failed"),
                    }
                }
                _ = &mut shutdown_rx => {
                    debug!("session sweeper shutting down");
                    break;
                }
            }
        }
    });

    info!(interval_ms = interval.as_millis() as u64, "session sweeper started");
    SweeperHandle { shutdown, task }
}
