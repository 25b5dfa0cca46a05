//! Progress reporting for long-running extraction and validation passes

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Upper bound on a single sink call
const SINK_TIMEOUT: Duration = Duration::from_secs(2);

/// A progress snapshot
#[derive(Debug, Clone, PartialEq)]
pub enum Progress {
    Extraction {
        candidates: usize,
        sources_done: usize,
        sources_total: usize,
        /// candidates per second since the pass started
        rate: f64,
    },
    Validation {
        checked: usize,
        total: usize,
        working: usize,
        /// candidates per second since the pass started
        rate: f64,
    },
}

impl Progress {
    /// Completion ratio in [0, 1]
    pub fn ratio(&self) -> f64 {
        let (done, total) = match self {
            Progress::Extraction {
                sources_done,
                sources_total,
                ..
            } => (*sources_done, *sources_total),
            Progress::Validation { checked, total, .. } => (*checked, *total),
        };
        if total == 0 {
            1.0
        } else {
            (done as f64 / total as f64).min(1.0)
        }
    }
}

/// Items per second over `elapsed`
pub(crate) fn rate(count: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}

/// Receiver of progress snapshots
///
/// Implementations may be slow or fail; callers never let either affect the
/// pass being reported on.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, progress: Progress) -> anyhow::Result<()>;
}

/// Deliver a snapshot, swallowing sink failures and stalls
pub(crate) async fn notify(sink: &dyn ProgressSink, progress: Progress) {
    match tokio::time::timeout(SINK_TIMEOUT, sink.report(progress)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "progress sink failed"),
        Err(_) => debug!("progress sink timed out"),
    }
}

/// Discards every snapshot
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

#[async_trait]
impl ProgressSink for NoProgress {
    async fn report(&self, _progress: Progress) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Writes snapshots to the tracing log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgress;

#[async_trait]
impl ProgressSink for LogProgress {
    async fn report(&self, progress: Progress) -> anyhow::Result<()> {
        match progress {
            Progress::Extraction {
                candidates,
                sources_done,
                sources_total,
                rate,
            } => info!(
                candidates,
                sources_done, sources_total, "scraping... {:.1} proxies/s", rate
            ),
            Progress::Validation {
                checked,
                total,
                working,
                rate,
            } => info!(checked, total, working, "checking... {:.1} proxies/s", rate),
        }
        Ok(())
    }
}

#[async_trait]
impl ProgressSink for mpsc::Sender<Progress> {
    async fn report(&self, progress: Progress) -> anyhow::Result<()> {
        self.send(progress).await?;
        Ok(())
    }
}

#[async_trait]
impl ProgressSink for mpsc::UnboundedSender<Progress> {
    async fn report(&self, progress: Progress) -> anyhow::Result<()> {
        self.send(progress)?;
        Ok(())
    }
}
