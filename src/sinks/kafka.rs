//! Kafka failure/info sink: a shared `FutureProducer` publishing to a
//! configured topic (spec 6 "Broker-specific settings": "topic names
//! (main / info / failure)").

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};

use crate::errors::SinkError;
use crate::sinks::Sink;

pub struct KafkaSink {
    producer: FutureProducer,
    topic: String,
}

impl KafkaSink {
    pub fn new(bootstrap_servers: &str, topic: impl Into<String>) -> Result<Self, SinkError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap_servers)
            .set("message.timeout.ms", "30000")
            .create()
            .map_err(|e| SinkError::Unavailable(format!("failed to create kafka producer: {e}")))?;
        Ok(KafkaSink {
            producer,
            topic: topic.into(),
        })
    }
}

#[async_trait]
impl Sink for KafkaSink {
    async fn publish(&self, payload: &str) -> Result<(), SinkError> {
        let record: FutureRecord<'_, (), str> = FutureRecord::to(&self.topic).payload(payload);
        self.producer
            .send(record, Duration::from_secs(10))
            .await
            .map(|_delivery| ())
            .map_err(|(e, _owned_message)| SinkError::Unavailable(format!("kafka publish to {} failed: {e}", self.topic)))
    }
}
