use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::collector::HostCollector;
use super::error::{Error, Result};
use super::gpu::GpuProbe;
use super::sample::{ResourceSample, UsageStat};
use super::sink::SampleSink;
use super::stats::CpuTimes;

const TARGET: &str = "resource_monitor";

/// Window between the two `/proc/stat` reads of a CPU sample.
pub const DEFAULT_CPU_WINDOW: Duration = Duration::from_secs(1);

struct Readings {
    cpu: Result<CpuTimes>,
    memory: Result<UsageStat>,
    disk: Result<UsageStat>,
    gpu: Result<Vec<f64>>,
}

/// Samples host CPU, memory, disk and GPU usage.
#[derive(Debug)]
pub struct ResourceMonitor {
    collector: Arc<Mutex<HostCollector>>,
    gpu: Arc<GpuProbe>,
    cpu_window: Duration,
}

fn lock(collector: &Mutex<HostCollector>) -> MutexGuard<'_, HostCollector> {
    collector.lock().unwrap_or_else(PoisonError::into_inner)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

fn record<T>(result: Result<T>, errors: &mut Vec<Error>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            errors.push(err);
            None
        }
    }
}

impl ResourceMonitor {
    pub fn new(collector: HostCollector, gpu: GpuProbe) -> Self {
        Self {
            collector: Arc::new(Mutex::new(collector)),
            gpu: Arc::new(gpu),
            cpu_window: DEFAULT_CPU_WINDOW,
        }
    }

    pub fn with_cpu_window(mut self, window: Duration) -> Self {
        self.cpu_window = window;
        self
    }

    /// Takes one sample and returns it together with the errors of the metrics that failed.
    pub async fn try_sample(&self) -> (ResourceSample, Vec<Error>) {
        let timestamp = unix_now();

        let collector = Arc::clone(&self.collector);
        let before = tokio::task::spawn_blocking(move || lock(&collector).read_cpu_times())
            .await
            .unwrap_or_else(|err| Err(Error::Join(err)));

        tokio::time::sleep(self.cpu_window).await;

        let collector = Arc::clone(&self.collector);
        let gpu = Arc::clone(&self.gpu);
        let readings = tokio::task::spawn_blocking(move || {
            let mut collector = lock(&collector);
            Readings {
                cpu: collector.read_cpu_times(),
                memory: collector.read_memory(),
                disk: collector.read_disk(),
                gpu: gpu.utilization(),
            }
        })
        .await;

        let mut errors = Vec::new();
        let readings = match readings {
            Ok(readings) => readings,
            Err(err) => {
                errors.push(Error::Join(err));
                return (ResourceSample::empty(timestamp), errors);
            }
        };

        let cpu_percent = match (before, readings.cpu) {
            (Ok(before), Ok(after)) => Some(after.busy_percent_since(&before)),
            (Err(err), _) | (_, Err(err)) => {
                errors.push(err);
                None
            }
        };
        let sample = ResourceSample {
            timestamp,
            cpu_percent,
            memory: record(readings.memory, &mut errors),
            disk: record(readings.disk, &mut errors),
            gpu_percent: record(readings.gpu, &mut errors).unwrap_or_default(),
        };

        (sample, errors)
    }

    /// Takes one sample, logging every metric that failed.
    pub async fn sample_once(&self) -> ResourceSample {
        let (sample, errors) = self.try_sample().await;
        for err in errors {
            match err.metric() {
                Some(metric) => {
                    log::warn!(target: TARGET, "Failed to sample {metric}: {err}")
                }
                None => log::warn!(target: TARGET, "Failed to sample: {err}"),
            }
        }
        sample
    }

    /// Hands a sample to `sink` every `interval` until `token` is cancelled.
    ///
    /// The first sample is taken one interval after the call. Cancellation abandons a sample in
    /// progress.
    pub async fn run_periodic<S>(&self, interval: Duration, token: CancellationToken, sink: &mut S)
    where
        S: SampleSink + ?Sized,
    {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        log::info!(target: TARGET, "Sampling host resources every {interval:?}");

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                sample = self.sample_once() => sink.accept(sample),
            }
        }

        log::info!(target: TARGET, "Resource monitoring stopped");
    }
}

/// A [`ResourceMonitor::run_periodic`] loop running on its own task.
#[derive(Debug)]
pub struct MonitorTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl MonitorTask {
    pub fn spawn<S>(monitor: Arc<ResourceMonitor>, interval: Duration, mut sink: S) -> Self
    where
        S: SampleSink + Send + 'static,
    {
        let token = CancellationToken::new();
        let handle = {
            let token = token.clone();
            tokio::spawn(async move { monitor.run_periodic(interval, token, &mut sink).await })
        };
        Self { token, handle }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Cancels the loop and waits for it to exit.
    pub async fn shutdown(self) -> std::result::Result<(), JoinError> {
        self.token.cancel();
        self.handle.await
    }
}
