//! Scheduled timestamping and archiving.
//!
//! Two tokio tasks tick on their own intervals. A round that makes full
//! progress (a full batch confirmed, an archive built) is followed by
//! another round right away, so a backlog drains without waiting for the
//! next tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use messagelog_archive::{ArchiveError, ArchiveOutcome};
use messagelog_timestamp::{BatchOutcome, TimestampError};

use crate::error::MessageLogError;
use crate::log::MessageLog;

/// How often each job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobIntervals {
    pub timestamp: Duration,
    pub archive: Duration,
}

impl Default for JobIntervals {
    fn default() -> Self {
        Self {
            timestamp: Duration::from_secs(60),
            archive: Duration::from_secs(300),
        }
    }
}

/// Handles to the running jobs.
pub struct JobHandles {
    shutdown: watch::Sender<bool>,
    timestamper: JoinHandle<()>,
    archiver: JoinHandle<()>,
}

impl JobHandles {
    /// Stop both jobs and wait for the rounds in flight to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.timestamper.await {
            error!(error = %e, "timestamp job panicked");
        }
        if let Err(e) = self.archiver.await {
            error!(error = %e, "archive job panicked");
        }
        info!("message log jobs stopped");
    }
}

/// Start the timestamping and archiving jobs.
pub fn spawn_jobs(log: Arc<MessageLog>, intervals: JobIntervals) -> JobHandles {
    let (shutdown, rx) = watch::channel(false);

    let timestamper = tokio::spawn(timestamp_loop(log.clone(), intervals.timestamp, rx.clone()));
    let archiver = tokio::spawn(archive_loop(log, intervals.archive, rx));

    info!(
        timestamp_secs = intervals.timestamp.as_secs(),
        archive_secs = intervals.archive.as_secs(),
        "message log jobs started"
    );
    JobHandles {
        shutdown,
        timestamper,
        archiver,
    }
}

/// Wait for the next tick; `false` once shutdown was requested.
async fn next_tick(ticker: &mut tokio::time::Interval, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return false;
    }
    let changed = tokio::select! {
        _ = ticker.tick() => return true,
        changed = shutdown.changed() => changed,
    };
    // A dropped sender also means stop.
    changed.is_ok() && !*shutdown.borrow()
}

async fn timestamp_loop(log: Arc<MessageLog>, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let batch_size = log.timestamp_config().batch_size.max(1);

    while next_tick(&mut ticker, &mut shutdown).await {
        loop {
            match log.run_timestamper_once().await {
                Ok(BatchOutcome::Confirmed { records, .. }) if records >= batch_size => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                Ok(BatchOutcome::Deferred(remaining)) => {
                    debug!(remaining_ms = remaining.as_millis() as u64, "timestamping deferred");
                    break;
                }
                Ok(_) => break,
                Err(MessageLogError::Timestamp(TimestampError::AlreadyRunning)) => {
                    debug!("timestamping round skipped, previous round still running");
                    break;
                }
                Err(MessageLogError::Timestamp(e)) if e.is_retryable() => {
                    warn!(error = %e, "timestamping failed, records stay pending");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "timestamping round failed");
                    break;
                }
            }
        }
    }
}

async fn archive_loop(log: Arc<MessageLog>, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while next_tick(&mut ticker, &mut shutdown).await {
        loop {
            match log.run_archiver_once().await {
                Ok(ArchiveOutcome::Built(_)) => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                Ok(ArchiveOutcome::NotEnoughRecords { available }) => {
                    debug!(available, "nothing to archive");
                    break;
                }
                Err(MessageLogError::Archive(ArchiveError::AlreadyRunning)) => {
                    debug!("archive round skipped, previous round still running");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "archive round failed, chain state unchanged");
                    break;
                }
            }
        }
    }
}
