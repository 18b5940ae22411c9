use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::sample::ResourceSample;

const TARGET: &str = "resource_monitor";

/// Receives every sample produced by [`ResourceMonitor::run_periodic`](super::ResourceMonitor::run_periodic).
///
/// `accept` is called on the monitor task and must not block.
pub trait SampleSink {
    fn accept(&mut self, sample: ResourceSample);
}

/// Writes each sample as one JSON log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl SampleSink for LogSink {
    fn accept(&mut self, sample: ResourceSample) {
        match serde_json::to_string(&sample) {
            Ok(json) => log::info!(target: TARGET, "{json}"),
            Err(err) => log::warn!(target: TARGET, "Failed to encode sample {sample:?}: {err}"),
        }
    }
}

/// Queues samples for another task. A full queue drops the sample.
impl SampleSink for mpsc::Sender<ResourceSample> {
    fn accept(&mut self, sample: ResourceSample) {
        match self.try_send(sample) {
            Ok(()) => {}
            Err(TrySendError::Full(sample)) => {
                log::warn!(
                    target: TARGET,
                    "Sample queue is full, dropping sample from {}",
                    sample.timestamp
                );
            }
            Err(TrySendError::Closed(_)) => {
                log::debug!(target: TARGET, "Sample queue is closed");
            }
        }
    }
}

/// Adapts a closure into a [`SampleSink`].
pub struct FnSink<F>(pub F);

impl<F> SampleSink for FnSink<F>
where
    F: FnMut(ResourceSample),
{
    fn accept(&mut self, sample: ResourceSample) {
        (self.0)(sample)
    }
}
