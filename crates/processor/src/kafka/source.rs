//! Kafka-backed [`LogClient`]
//!
//! Consumes one topic through a consumer group with auto-commit disabled.
//! Offsets are committed only when the ingestor hands over a persisted
//! checkpoint; Kafka stores the next offset to read, so commits are shifted
//! by one.

use async_trait::async_trait;
use futures::FutureExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::message::BorrowedMessage;
use rdkafka::{ClientContext, Message, Offset, TopicPartitionList};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::{ProcessorError, Result};
use crate::ingest::{LogClient, LogRecord};
use crate::window::millis_to_datetime;

/// Connection settings for the playback event topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KafkaLogConfig {
    /// Comma-separated bootstrap servers
    pub brokers: String,
    pub group_id: String,
    pub topic: String,
    /// Where to start without a committed offset (`earliest` or `latest`)
    pub auto_offset_reset: String,
    pub session_timeout_ms: u64,
    /// Passed straight to librdkafka
    pub extra_config: HashMap<String, String>,
}

impl Default for KafkaLogConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            group_id: "playback-analytics".to_string(),
            topic: "playback-events".to_string(),
            auto_offset_reset: "earliest".to_string(),
            session_timeout_ms: 30_000,
            extra_config: HashMap::new(),
        }
    }
}

impl KafkaLogConfig {
    pub fn validate(&self) -> Result<()> {
        let missing = if self.brokers.trim().is_empty() {
            Some("brokers")
        } else if self.group_id.trim().is_empty() {
            Some("group_id")
        } else if self.topic.trim().is_empty() {
            Some("topic")
        } else {
            None
        };
        match missing {
            Some(field) => Err(ProcessorError::Configuration {
                source: format!("kafka.{field} must not be empty").into(),
            }),
            None => Ok(()),
        }
    }

    fn client_config(&self) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &self.group_id)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("session.timeout.ms", self.session_timeout_ms.to_string());
        for (key, value) in &self.extra_config {
            client_config.set(key, value);
        }
        client_config
    }
}

/// Logs partition assignment changes
pub struct PlaybackConsumerContext;

impl ClientContext for PlaybackConsumerContext {}

impl ConsumerContext for PlaybackConsumerContext {
    fn pre_rebalance(&self, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Revoke(tpl) => info!(partitions = tpl.count(), "Partitions being revoked"),
            Rebalance::Assign(tpl) => info!(partitions = tpl.count(), "Partitions being assigned"),
            Rebalance::Error(err) => error!(error = %err, "Rebalance error"),
        }
    }

    fn post_rebalance(&self, rebalance: &Rebalance) {
        if let Rebalance::Assign(tpl) = rebalance {
            let partitions: Vec<i32> = tpl.elements().iter().map(|elem| elem.partition()).collect();
            info!(partitions = ?partitions, "Partitions assigned");
        }
    }

    fn commit_callback(&self, result: KafkaResult<()>, offsets: &TopicPartitionList) {
        match result {
            Ok(()) => debug!(partitions = offsets.count(), "Offsets committed"),
            Err(err) => warn!(error = %err, "Offset commit callback reported failure"),
        }
    }
}

/// Reads playback records from Kafka
pub struct KafkaLogClient {
    consumer: StreamConsumer<PlaybackConsumerContext>,
    topic: String,
}

impl KafkaLogClient {
    pub fn new(config: &KafkaLogConfig) -> Result<Self> {
        config.validate()?;
        let consumer: StreamConsumer<PlaybackConsumerContext> = config
            .client_config()
            .create_with_context(PlaybackConsumerContext)
            .map_err(|e| ProcessorError::Configuration { source: Box::new(e) })?;
        consumer
            .subscribe(&[config.topic.as_str()])
            .map_err(|e| ProcessorError::Configuration { source: Box::new(e) })?;
        info!(topic = %config.topic, group_id = %config.group_id, "Subscribed to playback topic");

        Ok(Self {
            consumer,
            topic: config.topic.clone(),
        })
    }

    fn to_record(msg: &BorrowedMessage<'_>) -> Option<LogRecord> {
        let (Ok(partition), Ok(offset)) = (u32::try_from(msg.partition()), u64::try_from(msg.offset())) else {
            warn!(
                partition = msg.partition(),
                offset = msg.offset(),
                "Skipping message with invalid position"
            );
            return None;
        };
        let record = LogRecord::new(partition, offset, msg.payload().map(<[u8]>::to_vec).unwrap_or_default());
        Some(match msg.timestamp().to_millis() {
            Some(ms) => record.with_timestamp(millis_to_datetime(ms)),
            None => record,
        })
    }
}

#[async_trait]
impl LogClient for KafkaLogClient {
    async fn poll_batch(&mut self, max_records: usize, timeout: Duration) -> Result<Vec<LogRecord>> {
        let mut batch = Vec::new();

        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_elapsed) => return Ok(batch),
            Ok(Err(KafkaError::PartitionEOF(_))) => return Ok(batch),
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok(msg)) => batch.extend(Self::to_record(&msg)),
        }

        // drain whatever is already buffered without waiting
        while batch.len() < max_records {
            match self.consumer.recv().now_or_never() {
                Some(Ok(msg)) => batch.extend(Self::to_record(&msg)),
                Some(Err(KafkaError::PartitionEOF(_))) | None => break,
                Some(Err(e)) => return Err(e.into()),
            }
        }
        Ok(batch)
    }

    async fn commit(&mut self, offsets: &BTreeMap<u32, u64>) -> Result<()> {
        let mut tpl = TopicPartitionList::new();
        for (partition, offset) in offsets {
            let next = i64::try_from(*offset)
                .map_err(|_| ProcessorError::Unexpected(format!("offset {offset} out of range")))?
                + 1;
            tpl.add_partition_offset(&self.topic, *partition as i32, Offset::Offset(next))?;
        }
        self.consumer.commit(&tpl, CommitMode::Async)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = KafkaLogConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.auto_offset_reset, "earliest");
    }

    #[test]
    fn test_rejects_empty_topic() {
        let config = KafkaLogConfig {
            topic: " ".into(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ProcessorError::Configuration { .. })
        ));
    }

    #[test]
    fn test_client_config_disables_auto_commit() {
        let mut config = KafkaLogConfig::default();
        config.extra_config.insert("fetch.min.bytes".into(), "1024".into());
        let client_config = config.client_config();
        assert_eq!(client_config.get("enable.auto.commit"), Some("false"));
        assert_eq!(client_config.get("fetch.min.bytes"), Some("1024"));
    }
}
