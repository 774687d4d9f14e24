//! Ordered stage chains
//!
//! A pipeline wires stages output-queue-to-input-queue in declaration order
//! and owns their lifecycle. Every stage's plugin is resolved and
//! constructed during `build`, so configuration errors abort before any
//! worker task exists and no partial pipeline is ever left running.

use crate::metrics::Metrics;
use crate::plugin::PluginRegistry;
use crate::stage::{queue_depth, Stage, StageConfig, StageError};
use edgeflow_core::Record;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Pipeline construction and lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("pipeline has no stages")]
    Empty,

    #[error(transparent)]
    Stage(#[from] StageError),
}

/// Builder assembling a stage chain in declaration order.
pub struct PipelineBuilder {
    stages: Vec<StageConfig>,
    sink_capacity: Option<usize>,
    metrics: Option<Arc<Metrics>>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            sink_capacity: None,
            metrics: None,
        }
    }

    /// Appends a stage; records flow through stages in the order added.
    pub fn stage(mut self, config: StageConfig) -> Self {
        self.stages.push(config);
        self
    }

    /// Capacity of the final output queue. Defaults to the last stage's
    /// input capacity.
    pub fn sink_capacity(mut self, capacity: usize) -> Self {
        self.sink_capacity = Some(capacity);
        self
    }

    pub fn metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Resolves every plugin and wires the queues.
    ///
    /// Returns the pipeline plus the source sender (feed records in here)
    /// and the sink receiver (processed records come out here).
    pub fn build(
        self,
        registry: &PluginRegistry,
    ) -> Result<(Pipeline, mpsc::Sender<Record>, mpsc::Receiver<Record>), PipelineError> {
        let Some(first) = self.stages.first() else {
            return Err(PipelineError::Empty);
        };

        let (source_tx, mut upstream_rx) = mpsc::channel(queue_depth(first.queue_capacity));
        let mut stages = Vec::with_capacity(self.stages.len());

        for (i, config) in self.stages.iter().enumerate() {
            let downstream_capacity = match self.stages.get(i + 1) {
                Some(next) => queue_depth(next.queue_capacity),
                None => queue_depth(self.sink_capacity.unwrap_or(config.queue_capacity)),
            };
            let (out_tx, out_rx) = mpsc::channel(downstream_capacity);

            let mut stage = Stage::new(config, registry, upstream_rx, out_tx)?;
            if let Some(m) = &self.metrics {
                stage = stage.with_metrics(Arc::clone(m));
            }
            stages.push(stage);
            upstream_rx = out_rx;
        }

        Ok((
            Pipeline {
                stages,
                started: false,
            },
            source_tx,
            upstream_rx,
        ))
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// An ordered chain of stages owning their lifecycle.
pub struct Pipeline {
    stages: Vec<Stage>,
    started: bool,
}

impl Pipeline {
    /// Starts all stages leaf-to-sink. Workers tolerate an empty upstream,
    /// so no ordering hazard exists at start.
    pub fn start(&mut self) -> Result<(), PipelineError> {
        if self.started {
            return Err(StageError::AlreadyStarted("pipeline".to_string()).into());
        }
        for stage in &mut self.stages {
            stage.start()?;
        }
        self.started = true;
        info!(stages = self.stages.len(), "pipeline started");
        Ok(())
    }

    /// Stops stages sink-to-leaf, so each downstream stage finishes draining
    /// before its upstream producer is cut off and no worker is left
    /// blocking on a queue that will never be read again.
    pub async fn stop(&mut self) {
        for stage in self.stages.iter_mut().rev() {
            if let Err(e) = stage.stop().await {
                // A stage that never started has nothing to stop.
                debug!(stage = stage.name(), error = %e, "skipping stage stop");
            }
        }
        self.started = false;
        info!("pipeline stopped");
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Total workers across all stages that have not exited yet.
    pub fn live_workers(&self) -> usize {
        self.stages.iter().map(Stage::live_workers).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{PluginError, PluginKind};
    use edgeflow_core::Value;

    #[test]
    fn empty_pipeline_is_rejected() {
        let registry = PluginRegistry::with_builtins();
        assert!(matches!(
            PipelineBuilder::new().build(&registry),
            Err(PipelineError::Empty)
        ));
    }

    #[test]
    fn unknown_plugin_aborts_the_whole_build() {
        let registry = PluginRegistry::with_builtins();
        let result = PipelineBuilder::new()
            .stage(StageConfig::new("ok", PluginKind::Filter, "no_op"))
            .stage(StageConfig::new("bad", PluginKind::Filter, "missing"))
            .build(&registry);
        assert!(matches!(
            result,
            Err(PipelineError::Stage(StageError::Plugin(PluginError::NotFound(_))))
        ));
    }

    #[test]
    fn missing_required_key_fails_before_any_worker_spawns() {
        let registry = PluginRegistry::with_builtins();
        // key_frame requires max_workers; the config omits it.
        let result = PipelineBuilder::new()
            .stage(StageConfig::new("filter", PluginKind::Filter, "key_frame"))
            .build(&registry);
        match result {
            Err(PipelineError::Stage(StageError::Plugin(PluginError::MissingConfigKey {
                key,
                ..
            }))) => assert_eq!(key, "max_workers"),
            other => panic!("expected missing-key error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn records_flow_through_chained_stages() {
        let registry = PluginRegistry::with_builtins();
        let key_frame_config: crate::plugin::PluginConfig =
            [("max_workers".to_string(), Value::Int(2))].into_iter().collect();

        let (mut pipeline, source, mut sink) = PipelineBuilder::new()
            .stage(
                StageConfig::new("filter", PluginKind::Filter, "key_frame")
                    .with_plugin_config(key_frame_config),
            )
            .stage(StageConfig::new("classify", PluginKind::Classifier, "detection_count")
                .with_plugin_config(
                    [("max_workers".to_string(), Value::Int(2))].into_iter().collect(),
                ))
            .build(&registry)
            .unwrap();
        pipeline.start().unwrap();

        source
            .send(
                Record::new("camera1")
                    .with_field("key_frame", true)
                    .with_field("defects", vec![Value::from("scratch")]),
            )
            .await
            .unwrap();
        source
            .send(Record::new("camera1").with_field("key_frame", false))
            .await
            .unwrap();

        let out = sink.recv().await.unwrap();
        assert_eq!(out.get_int("detection_count"), Some(1));

        pipeline.stop().await;
        assert_eq!(pipeline.live_workers(), 0);
        // The filtered record never reached the sink.
        assert!(sink.try_recv().is_err());
    }
}
