//! Topic-partitioned publish fan-out
//!
//! The publisher consumes a single upstream record queue and fans records
//! out by topic. A demux task drains the upstream queue in FIFO order and
//! forwards each record into the bounded queue of the topic it is tagged
//! with, so a record tagged `camera1` can only ever reach `camera1`'s
//! socket. One dedicated task per topic creates and binds its own socket,
//! accepts subscriber connections, and writes each record as a three-part
//! frame to every live subscriber.
//!
//! Publishing is best-effort, at-most-once: a failed write drops that
//! subscriber and the loop continues. Sockets never cross a task boundary;
//! each listener is created, used and closed inside its owning task.

pub mod config;
pub mod frame;

pub use config::{topics_from_env, topics_from_lookup, TopicConfig, Transport, PUB_TOPICS_ENV};
pub use frame::{Frame, FrameError};

use crate::metrics::Metrics;
use crate::stage::queue_depth;
use edgeflow_core::Record;
use rustc_hash::FxHashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Publisher configuration and transport errors.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("invalid topic config for '{topic}': {reason}")]
    InvalidTopicConfig { topic: String, reason: String },

    #[error("no publish topics configured")]
    NoTopics,

    #[error("duplicate publish topic '{0}'")]
    DuplicateTopic(String),

    #[error("failed to bind {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("publisher is already started")]
    AlreadyStarted,
}

/// How long `stop` waits for a topic task before aborting it.
const TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Default per-topic queue depth between the demux task and a topic task.
const DEFAULT_TOPIC_QUEUE: usize = 64;

/// Fans a single upstream record stream out over per-topic sockets.
pub struct Publisher {
    topics: Vec<TopicConfig>,
    input: Option<mpsc::Receiver<Record>>,
    topic_queue_capacity: usize,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    started: bool,
    metrics: Option<Arc<Metrics>>,
}

impl Publisher {
    pub fn new(topics: Vec<TopicConfig>, input: mpsc::Receiver<Record>) -> Self {
        Self {
            topics,
            input: Some(input),
            topic_queue_capacity: DEFAULT_TOPIC_QUEUE,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
            started: false,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_topic_queue_capacity(mut self, capacity: usize) -> Self {
        self.topic_queue_capacity = capacity;
        self
    }

    /// Spawns one socket-owning task per topic plus the demux task.
    ///
    /// Waits for every topic task to report its bind result; any bind
    /// failure tears the publisher down again and is returned as fatal.
    pub async fn start(&mut self) -> Result<(), PublishError> {
        if self.started || self.input.is_none() {
            return Err(PublishError::AlreadyStarted);
        }
        if self.topics.is_empty() {
            return Err(PublishError::NoTopics);
        }

        for (i, topic_config) in self.topics.iter().enumerate() {
            if self.topics[..i].iter().any(|t| t.topic == topic_config.topic) {
                return Err(PublishError::DuplicateTopic(topic_config.topic.clone()));
            }
        }

        let mut senders: FxHashMap<String, mpsc::Sender<Record>> = FxHashMap::default();
        let mut pending_binds = Vec::with_capacity(self.topics.len());

        for topic_config in &self.topics {
            let (tx, rx) = mpsc::channel(queue_depth(self.topic_queue_capacity));
            let (bind_tx, bind_rx) = oneshot::channel();
            self.tasks.push(tokio::spawn(topic_task(
                topic_config.clone(),
                rx,
                self.cancel.child_token(),
                bind_tx,
                self.metrics.clone(),
            )));
            senders.insert(topic_config.topic.clone(), tx);
            pending_binds.push((topic_config.endpoint(), bind_rx));
        }

        for (endpoint, bind_rx) in pending_binds {
            let result = bind_rx
                .await
                .unwrap_or_else(|_| Err(io::Error::other("publisher task exited during bind")));
            if let Err(source) = result {
                self.shutdown_tasks().await;
                return Err(PublishError::Bind { endpoint, source });
            }
        }

        let input = self.input.take().ok_or(PublishError::AlreadyStarted)?;
        self.tasks.push(tokio::spawn(demux_task(
            input,
            senders,
            self.cancel.child_token(),
            self.metrics.clone(),
        )));

        self.started = true;
        info!(topics = self.topics.len(), "publisher started");
        Ok(())
    }

    /// Signals all tasks to stop and waits for them to exit. Each socket is
    /// closed inside its owning task, after that task's loop has ended.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        self.shutdown_tasks().await;
        self.started = false;
        info!("publisher stopped");
    }

    async fn shutdown_tasks(&mut self) {
        self.cancel.cancel();
        for mut task in self.tasks.drain(..) {
            match tokio::time::timeout(TASK_JOIN_TIMEOUT, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => warn!(error = %join_err, "publisher task failed"),
                Err(_) => {
                    warn!("publisher task did not stop in time, aborting");
                    task.abort();
                }
            }
        }
        // The cancelled token must not leak into tasks of a later start.
        self.cancel = CancellationToken::new();
    }
}

/// Listener bound by a topic task, never shared across tasks.
enum TopicListener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

impl TopicListener {
    async fn bind(config: &TopicConfig) -> io::Result<Self> {
        match config.transport {
            Transport::Tcp => Ok(TopicListener::Tcp(TcpListener::bind(&config.address).await?)),
            #[cfg(unix)]
            Transport::Ipc => {
                // A stale socket file from a previous run blocks the bind.
                let _ = std::fs::remove_file(&config.address);
                Ok(TopicListener::Unix(UnixListener::bind(&config.address)?))
            }
            #[cfg(not(unix))]
            Transport::Ipc => Err(io::Error::other("ipc transport requires a unix platform")),
        }
    }

    async fn accept(&self) -> io::Result<SubscriberConn> {
        match self {
            TopicListener::Tcp(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok(SubscriberConn::Tcp(stream))
            }
            #[cfg(unix)]
            TopicListener::Unix(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok(SubscriberConn::Unix(stream))
            }
        }
    }
}

enum SubscriberConn {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl SubscriberConn {
    async fn write_frame(&mut self, head: &[u8], payload: &[u8]) -> io::Result<()> {
        match self {
            SubscriberConn::Tcp(stream) => {
                stream.write_all(head).await?;
                stream.write_all(payload).await
            }
            #[cfg(unix)]
            SubscriberConn::Unix(stream) => {
                stream.write_all(head).await?;
                stream.write_all(payload).await
            }
        }
    }
}

/// Routes upstream records into per-topic queues by exact topic match.
async fn demux_task(
    mut input: mpsc::Receiver<Record>,
    senders: FxHashMap<String, mpsc::Sender<Record>>,
    cancel: CancellationToken,
    metrics: Option<Arc<Metrics>>,
) {
    debug!("publisher demux started");
    loop {
        let record = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            received = input.recv() => match received {
                Some(record) => record,
                None => break,
            },
        };

        let Some(tx) = senders.get(record.topic.as_ref()) else {
            debug!(topic = %record.topic, "no publish topic for record, dropping");
            if let Some(m) = &metrics {
                m.record_publish_error(record.topic.as_ref(), "unmatched");
            }
            continue;
        };

        // Backpressure into the topic queue, still responsive to stop.
        tokio::select! {
            biased;
            sent = tx.send(record) => {
                if sent.is_err() {
                    break;
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
    debug!("publisher demux stopped");
}

/// One task per topic: binds its own socket, accepts subscribers, publishes
/// matching records best-effort.
async fn topic_task(
    config: TopicConfig,
    mut records: mpsc::Receiver<Record>,
    cancel: CancellationToken,
    bind_result: oneshot::Sender<io::Result<()>>,
    metrics: Option<Arc<Metrics>>,
) {
    let listener = match TopicListener::bind(&config).await {
        Ok(listener) => {
            let _ = bind_result.send(Ok(()));
            listener
        }
        Err(e) => {
            error!(topic = %config.topic, endpoint = %config.endpoint(), error = %e, "failed to bind publish socket");
            let _ = bind_result.send(Err(e));
            return;
        }
    };
    info!(topic = %config.topic, endpoint = %config.endpoint(), "publishing");

    let mut subscribers: Vec<SubscriberConn> = Vec::new();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(conn) => {
                    debug!(topic = %config.topic, "subscriber connected");
                    subscribers.push(conn);
                }
                Err(e) => warn!(topic = %config.topic, error = %e, "accept failed"),
            },
            received = records.recv() => match received {
                Some(record) => {
                    publish_record(&config.topic, &record, &mut subscribers, &metrics).await;
                }
                None => break,
            },
        }
    }

    info!(topic = %config.topic, subscribers = subscribers.len(), "publish socket closing");
    // The listener and all subscriber connections drop here, inside the
    // task that created them.
}

async fn publish_record(
    topic: &str,
    record: &Record,
    subscribers: &mut Vec<SubscriberConn>,
    metrics: &Option<Arc<Metrics>>,
) {
    let (head, payload) = match frame::encode_parts(record) {
        Ok(parts) => parts,
        Err(e) => {
            warn!(topic, error = %e, "failed to encode record, dropping");
            if let Some(m) = metrics {
                m.record_publish_error(topic, "encode");
            }
            return;
        }
    };

    let mut alive = Vec::with_capacity(subscribers.len());
    for mut conn in subscribers.drain(..) {
        match conn.write_frame(&head, &payload).await {
            Ok(()) => alive.push(conn),
            Err(e) => {
                warn!(topic, error = %e, "subscriber write failed, dropping subscriber");
                if let Some(m) = metrics {
                    m.record_publish_error(topic, "send");
                }
            }
        }
    }
    *subscribers = alive;

    if let Some(m) = metrics {
        m.record_published(topic);
    }
}
