//! SQS failure/info sink. The info queue carries an optional send
//! delay (spec 6: "info-queue delay") so a burst of info messages
//! doesn't immediately re-trigger downstream processing.

use async_trait::async_trait;
use aws_sdk_sqs::Client;

use crate::errors::SinkError;
use crate::sinks::Sink;

pub struct SqsSink {
    client: Client,
    queue_url: String,
    delay_seconds: i32,
}

impl SqsSink {
    pub fn new(client: Client, queue_url: impl Into<String>, delay_seconds: i32) -> Self {
        SqsSink {
            client,
            queue_url: queue_url.into(),
            delay_seconds,
        }
    }
}

#[async_trait]
impl Sink for SqsSink {
    async fn publish(&self, payload: &str) -> Result<(), SinkError> {
        let mut request = self.client.send_message().queue_url(&self.queue_url).message_body(payload);
        if self.delay_seconds > 0 {
            request = request.delay_seconds(self.delay_seconds);
        }
        request
            .send()
            .await
            .map(|_output| ())
            .map_err(|e| SinkError::Unavailable(format!("sqs publish to {} failed: {e}", self.queue_url)))
    }
}

/// Used when the source SQS queue has a redrive (dead-letter) policy
/// and no explicit failure queue was configured (spec 4.3.3): always
/// reports failure, which propagates up through `process_envelope` as
/// "not terminally handled", so the consumer leaves the message
/// undeleted and lets the broker's own visibility-timeout redelivery
/// escalate it to the DLQ instead of this process deleting it.
#[derive(Debug, Default)]
pub struct RedriveDeferSink;

#[async_trait]
impl Sink for RedriveDeferSink {
    async fn publish(&self, _payload: &str) -> Result<(), SinkError> {
        Err(SinkError::Unavailable(
            "deferring to the source queue's redrive policy instead of an explicit failure queue".to_string(),
        ))
    }
}
