//! Edgeflow Runtime - pipeline-and-fan-out core
//!
//! This crate provides the streaming core of Edgeflow:
//!
//! - [`plugin`]: explicit name-to-factory registry of filter/classifier
//!   units with required-config-key validation
//! - [`stage`]: bounded-queue worker pools applying one plugin's per-record
//!   logic, with backpressure and cancellable shutdown
//! - [`pipeline`]: ordered stage chains wired queue-to-queue
//! - [`publish`]: topic-partitioned fan-out over per-topic sockets
//! - [`dispatch`]: stream-name subscription dispatcher for inbound records
//! - [`linefmt`]: line-protocol decoding for the push ingestion path
//! - [`metrics`]: Prometheus instrumentation shared by all components
//!
//! Data flow: source → stage₁ → … → stageₙ → publisher → topic sockets.
//! Independently: external push → dispatcher → registered callbacks.

pub mod dispatch;
pub mod linefmt;
pub mod metrics;
pub mod pipeline;
pub mod plugin;
pub mod publish;
pub mod stage;

pub use dispatch::{Callback, Subscription, SubscriptionDispatcher};
pub use metrics::{Metrics, MetricsServer};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineError};
pub use plugin::{
    Classifier, Filter, PluginConfig, PluginError, PluginKind, PluginRegistry, PluginUnit,
};
pub use publish::{PublishError, Publisher, TopicConfig, Transport};
pub use stage::{ShutdownPolicy, Stage, StageConfig, StageError};
