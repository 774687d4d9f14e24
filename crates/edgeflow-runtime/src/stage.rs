//! Bounded-queue worker-pool stage
//!
//! A stage runs `worker_count` workers competing on one bounded input queue.
//! Each worker takes a record, applies the stage's plugin, and pushes any
//! forwarded result to the bounded output queue. A full output queue blocks
//! only the pushing worker; that blocking is the sole flow-control mechanism
//! between stages.
//!
//! Every blocking wait (queue take, queue put) is joined with the stage's
//! cancellation token, so `stop` completes in bounded time even when no
//! upstream producer exists.

use crate::metrics::Metrics;
use crate::plugin::{PluginError, PluginKind, PluginRegistry, PluginUnit};
use crate::plugin::PluginConfig;
use edgeflow_core::Record;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Queue depth used when a config asks for capacity 0 ("unbounded").
/// Bounded channels cannot have zero capacity; this depth is unbounded for
/// memory-resident buffering purposes while keeping every wait cancellable.
pub(crate) const UNBOUNDED_DEPTH: usize = 1 << 20;

/// How long `stop` waits for a worker before aborting it.
const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) fn queue_depth(capacity: usize) -> usize {
    if capacity == 0 {
        UNBOUNDED_DEPTH
    } else {
        capacity
    }
}

/// What workers do with queued records when the stop signal is raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownPolicy {
    /// Keep consuming queued records until the input queue is empty.
    #[default]
    Drain,
    /// Exit as soon as the in-flight record, if any, completes.
    Abandon,
}

/// Configuration for one stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Stage name, used in logs and metrics labels.
    pub name: String,
    /// Plugin capability this stage runs.
    pub kind: PluginKind,
    /// Registered plugin name.
    pub plugin: String,
    /// Number of competing workers. Must be positive.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Input queue capacity; 0 means effectively unbounded.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Stop policy for queued records.
    #[serde(default)]
    pub shutdown: ShutdownPolicy,
    /// Configuration handed to the plugin factory.
    #[serde(default)]
    pub plugin_config: PluginConfig,
}

fn default_worker_count() -> usize {
    1
}

fn default_queue_capacity() -> usize {
    64
}

impl StageConfig {
    pub fn new(name: &str, kind: PluginKind, plugin: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            plugin: plugin.to_string(),
            worker_count: default_worker_count(),
            queue_capacity: default_queue_capacity(),
            shutdown: ShutdownPolicy::default(),
            plugin_config: PluginConfig::default(),
        }
    }

    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_shutdown(mut self, policy: ShutdownPolicy) -> Self {
        self.shutdown = policy;
        self
    }

    pub fn with_plugin_config(mut self, config: PluginConfig) -> Self {
        self.plugin_config = config;
        self
    }
}

/// Stage lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("stage '{0}' is already started")]
    AlreadyStarted(String),

    #[error("stage '{0}' is not started")]
    NotStarted(String),

    #[error("stage '{name}' worker_count must be positive")]
    InvalidWorkerCount { name: String },

    #[error(transparent)]
    Plugin(#[from] PluginError),
}

/// The input queue receiver shared by a stage's workers.
///
/// `tokio::sync::mpsc` is single-consumer, so workers take turns on the
/// receiver behind an async mutex. The lock is held only across the dequeue,
/// never while a record is being processed or pushed downstream.
pub(crate) type SharedReceiver = Arc<Mutex<mpsc::Receiver<Record>>>;

/// A worker-pool stage wired between an input and an output queue.
pub struct Stage {
    name: Arc<str>,
    plugin: PluginUnit,
    worker_count: usize,
    policy: ShutdownPolicy,
    input: SharedReceiver,
    output: mpsc::Sender<Record>,
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
    started: bool,
    metrics: Option<Arc<Metrics>>,
}

impl Stage {
    /// Resolves and constructs the stage's plugin and wires the queues.
    ///
    /// All plugin and configuration errors surface here, before any worker
    /// task exists.
    pub fn new(
        config: &StageConfig,
        registry: &PluginRegistry,
        input: mpsc::Receiver<Record>,
        output: mpsc::Sender<Record>,
    ) -> Result<Self, StageError> {
        if config.worker_count == 0 {
            return Err(StageError::InvalidWorkerCount {
                name: config.name.clone(),
            });
        }
        let plugin = registry.load(config.kind, &config.plugin, &config.plugin_config)?;
        Ok(Self {
            name: Arc::from(config.name.as_str()),
            plugin,
            worker_count: config.worker_count,
            policy: config.shutdown,
            input: Arc::new(Mutex::new(input)),
            output,
            cancel: CancellationToken::new(),
            workers: Vec::new(),
            started: false,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawns the worker pool. Calling `start` twice is a lifecycle error.
    pub fn start(&mut self) -> Result<(), StageError> {
        if self.started {
            return Err(StageError::AlreadyStarted(self.name.to_string()));
        }
        self.started = true;

        for worker_id in 0..self.worker_count {
            self.workers.push(tokio::spawn(worker_loop(
                worker_id,
                Arc::clone(&self.name),
                self.plugin.clone(),
                Arc::clone(&self.input),
                self.output.clone(),
                self.cancel.clone(),
                self.policy,
                self.metrics.clone(),
            )));
        }

        info!(stage = %self.name, workers = self.worker_count, "stage started");
        Ok(())
    }

    /// Raises the stop signal and waits for every worker to exit.
    ///
    /// Workers blocked on an empty input queue or a full output queue
    /// observe the signal immediately; a worker that still fails to exit
    /// within the join timeout is aborted.
    pub async fn stop(&mut self) -> Result<(), StageError> {
        if !self.started {
            return Err(StageError::NotStarted(self.name.to_string()));
        }
        self.cancel.cancel();

        for mut handle in self.workers.drain(..) {
            match tokio::time::timeout(WORKER_JOIN_TIMEOUT, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!(stage = %self.name, error = %join_err, "worker task failed");
                }
                Err(_) => {
                    warn!(stage = %self.name, "worker did not stop in time, aborting");
                    handle.abort();
                }
            }
        }

        info!(stage = %self.name, "stage stopped");
        Ok(())
    }

    /// Number of workers that have not yet exited.
    pub fn live_workers(&self) -> usize {
        self.workers.iter().filter(|h| !h.is_finished()).count()
    }
}

#[allow(clippy::too_many_arguments)]
async fn worker_loop(
    worker_id: usize,
    stage: Arc<str>,
    plugin: PluginUnit,
    input: SharedReceiver,
    output: mpsc::Sender<Record>,
    cancel: CancellationToken,
    policy: ShutdownPolicy,
    metrics: Option<Arc<Metrics>>,
) {
    debug!(stage = %stage, worker_id, "worker started");

    loop {
        if policy == ShutdownPolicy::Abandon && cancel.is_cancelled() {
            break;
        }

        // Take one record, or observe the stop signal. Once the signal is
        // raised, Abandon exits immediately while Drain keeps taking queued
        // records non-blockingly until the queue is empty.
        let record = {
            let mut rx = input.lock().await;
            let taken = tokio::select! {
                biased;
                _ = cancel.cancelled() => match policy {
                    ShutdownPolicy::Abandon => break,
                    ShutdownPolicy::Drain => match rx.try_recv() {
                        Ok(record) => record,
                        Err(_) => break,
                    },
                },
                received = rx.recv() => match received {
                    Some(record) => record,
                    // All producers dropped: nothing more will ever arrive.
                    None => break,
                },
            };
            if let Some(m) = &metrics {
                m.set_queue_depth(&stage, rx.len());
            }
            taken
        };

        let topic = Arc::clone(&record.topic);
        let timestamp = record.timestamp;
        let started_at = Instant::now();

        match plugin.apply(record) {
            Ok(Some(out)) => {
                if let Some(m) = &metrics {
                    m.record_processed(&stage, started_at.elapsed().as_secs_f64());
                }
                // Backpressure: block on the output queue until space frees,
                // but stay responsive to the stop signal.
                tokio::select! {
                    biased;
                    permit = output.reserve() => match permit {
                        Ok(permit) => permit.send(out),
                        Err(_) => {
                            debug!(stage = %stage, worker_id, "output queue closed, worker exiting");
                            break;
                        }
                    },
                    _ = cancel.cancelled() => {
                        if output.try_send(out).is_err() {
                            if let Some(m) = &metrics {
                                m.record_drop(&stage, "shutdown");
                            }
                            debug!(stage = %stage, worker_id, topic = %topic, "record dropped during shutdown");
                        }
                        if policy == ShutdownPolicy::Abandon {
                            break;
                        }
                    }
                }
            }
            Ok(None) => {
                if let Some(m) = &metrics {
                    m.record_processed(&stage, started_at.elapsed().as_secs_f64());
                    m.record_drop(&stage, "filtered");
                }
            }
            Err(error) => {
                // One bad record never kills the worker or the pipeline.
                warn!(
                    stage = %stage,
                    worker_id,
                    topic = %topic,
                    timestamp = %timestamp,
                    error = %error,
                    "record processing failed, dropping record"
                );
                if let Some(m) = &metrics {
                    m.record_drop(&stage, "error");
                }
            }
        }
    }

    debug!(stage = %stage, worker_id, "worker stopped");
}
