//! Topic and transport configuration
//!
//! Topics are configured through the environment: `PUB_TOPICS` holds a
//! comma-separated list of topic names, and each topic has a
//! `<TOPIC>_CFG=transport,address` entry, e.g. `CAMERA1_CFG=tcp,127.0.0.1:5564`
//! or `CAMERA1_CFG=ipc,/tmp/camera1.sock`.

use super::PublishError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Environment variable naming the published topics.
pub const PUB_TOPICS_ENV: &str = "PUB_TOPICS";

/// Socket transport for one topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Tcp,
    Ipc,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tcp => write!(f, "tcp"),
            Transport::Ipc => write!(f, "ipc"),
        }
    }
}

impl FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(Transport::Tcp),
            "ipc" => Ok(Transport::Ipc),
            other => Err(format!("unknown transport '{other}'")),
        }
    }
}

/// One publish topic bound to its own transport address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicConfig {
    pub topic: String,
    pub transport: Transport,
    /// `host:port` for tcp, a filesystem path for ipc.
    pub address: String,
}

impl TopicConfig {
    pub fn new(topic: &str, transport: Transport, address: &str) -> Self {
        Self {
            topic: topic.to_string(),
            transport,
            address: address.to_string(),
        }
    }

    /// Parses the `transport,address` form used by the per-topic
    /// environment entries.
    pub fn parse(topic: &str, entry: &str) -> Result<Self, PublishError> {
        let (transport, address) = entry.split_once(',').ok_or_else(|| {
            PublishError::InvalidTopicConfig {
                topic: topic.to_string(),
                reason: format!("expected 'transport,address', got '{entry}'"),
            }
        })?;
        let transport =
            Transport::from_str(transport).map_err(|reason| PublishError::InvalidTopicConfig {
                topic: topic.to_string(),
                reason,
            })?;
        let address = address.trim();
        if address.is_empty() {
            return Err(PublishError::InvalidTopicConfig {
                topic: topic.to_string(),
                reason: "empty address".to_string(),
            });
        }
        Ok(Self::new(topic, transport, address))
    }

    /// Display form, e.g. `tcp://127.0.0.1:5564`.
    pub fn endpoint(&self) -> String {
        format!("{}://{}", self.transport, self.address)
    }
}

/// Reads the topic list from the process environment.
pub fn topics_from_env() -> Result<Vec<TopicConfig>, PublishError> {
    topics_from_lookup(|key| std::env::var(key).ok())
}

/// Reads the topic list through an arbitrary key lookup.
pub fn topics_from_lookup(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Vec<TopicConfig>, PublishError> {
    let topics = lookup(PUB_TOPICS_ENV).ok_or(PublishError::NoTopics)?;
    let mut configs = Vec::new();
    for topic in topics.split(',') {
        let topic = topic.trim();
        if topic.is_empty() {
            continue;
        }
        let key = format!("{}_CFG", topic.to_ascii_uppercase());
        let entry = lookup(&key).ok_or_else(|| PublishError::InvalidTopicConfig {
            topic: topic.to_string(),
            reason: format!("missing environment entry '{key}'"),
        })?;
        configs.push(TopicConfig::parse(topic, &entry)?);
    }
    if configs.is_empty() {
        return Err(PublishError::NoTopics);
    }
    Ok(configs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn parses_tcp_and_ipc_specs() {
        let tcp = TopicConfig::parse("camera1", "tcp,127.0.0.1:5564").unwrap();
        assert_eq!(tcp.transport, Transport::Tcp);
        assert_eq!(tcp.address, "127.0.0.1:5564");
        assert_eq!(tcp.endpoint(), "tcp://127.0.0.1:5564");

        let ipc = TopicConfig::parse("camera2", "ipc,/tmp/camera2.sock").unwrap();
        assert_eq!(ipc.transport, Transport::Ipc);
        assert_eq!(ipc.address, "/tmp/camera2.sock");
    }

    #[test]
    fn rejects_malformed_specs() {
        assert!(TopicConfig::parse("t", "tcp").is_err());
        assert!(TopicConfig::parse("t", "udp,127.0.0.1:1").is_err());
        assert!(TopicConfig::parse("t", "tcp,").is_err());
    }

    #[test]
    fn reads_topics_through_lookup() {
        let env: HashMap<&str, &str> = [
            ("PUB_TOPICS", "camera1, camera2"),
            ("CAMERA1_CFG", "tcp,127.0.0.1:5564"),
            ("CAMERA2_CFG", "ipc,/tmp/camera2.sock"),
        ]
        .into_iter()
        .collect();

        let configs = topics_from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[0].topic, "camera1");
        assert_eq!(configs[1].transport, Transport::Ipc);
    }

    #[test]
    fn missing_per_topic_entry_is_fatal() {
        let env: HashMap<&str, &str> = [("PUB_TOPICS", "camera1")].into_iter().collect();
        let err = topics_from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap_err();
        assert!(matches!(err, PublishError::InvalidTopicConfig { .. }));
    }
}
