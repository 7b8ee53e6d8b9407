//! RabbitMQ failure/info sink: publishes onto a channel already bound
//! to the target queue (spec 4.3.2), retrying up to the configured
//! count with the configured delay before surfacing
//! `RetriesExhausted` (spec 8: "On the Nth consecutive RabbitMQ
//! publish failure... the process exits 1").

use std::time::Duration;

use async_trait::async_trait;
use lapin::options::BasicPublishOptions;
use lapin::{BasicProperties, Channel};

use crate::errors::SinkError;
use crate::sinks::{retry_publish, Sink};

pub struct RabbitmqSink {
    channel: Channel,
    exchange: String,
    routing_key: String,
    retry_count: u32,
    retry_delay: Duration,
}

impl RabbitmqSink {
    pub fn new(channel: Channel, exchange: impl Into<String>, routing_key: impl Into<String>, retry_count: u32, retry_delay: Duration) -> Self {
        RabbitmqSink {
            channel,
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            retry_count,
            retry_delay,
        }
    }
}

#[async_trait]
impl Sink for RabbitmqSink {
    async fn publish(&self, payload: &str) -> Result<(), SinkError> {
        retry_publish(self.retry_count, self.retry_delay, "rabbitmq", || async {
            self.channel
                .basic_publish(
                    &self.exchange,
                    &self.routing_key,
                    BasicPublishOptions::default(),
                    payload.as_bytes(),
                    BasicProperties::default(),
                )
                .await
                .map_err(|e| SinkError::Unavailable(format!("rabbitmq publish failed: {e}")))?
                .await
                .map_err(|e| SinkError::Unavailable(format!("rabbitmq publisher confirm failed: {e}")))?;
            Ok(())
        })
        .await
    }
}
