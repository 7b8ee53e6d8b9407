//! Sink adapters (spec 4.1 component table, 4.3 "Sink adapters"):
//! publish a single JSON payload to a failure or info destination,
//! encapsulating backend-specific retry.

pub mod azure;
pub mod kafka;
pub mod null;
pub mod rabbitmq;
pub mod sqs;

use async_trait::async_trait;

use crate::errors::SinkError;

#[async_trait]
pub trait Sink: Send + Sync {
    async fn publish(&self, payload: &str) -> Result<(), SinkError>;
}

pub use null::NullSink;

/// Bounded retry with a fixed backoff, shared by every sink whose
/// publish path has a configured retry count (spec 4.3.2 RabbitMQ,
/// 7.2 "bounded retries for publish paths"). `attempt` performs one
/// try; on the Nth consecutive failure, returns `RetriesExhausted`
/// (spec 8 "On the Nth consecutive RabbitMQ publish failure... the
/// process exits 1" -- the caller turns that into the fatal exit).
pub async fn retry_publish<F, Fut>(
    max_attempts: u32,
    delay: std::time::Duration,
    backend: &str,
    mut attempt: F,
) -> Result<(), SinkError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<(), SinkError>>,
{
    let mut last_error = None;
    for attempt_number in 1..=max_attempts.max(1) {
        match attempt().await {
            Ok(()) => return Ok(()),
            Err(e) => {
                log::warn!(
                    "{}",
                    crate::logmsg::warning(
                        crate::logmsg::codes::SENT_TO_FAILURE_SINK,
                        format!("{backend} publish attempt {attempt_number}/{max_attempts} failed: {e}")
                    )
                );
                last_error = Some(e);
                if attempt_number < max_attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
    Err(SinkError::RetriesExhausted {
        attempts: max_attempts,
        cause: last_error.map(|e| e.to_string()).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn retry_publish_stops_on_first_success() {
        let calls = AtomicU32::new(0);
        let result = retry_publish(3, Duration::from_millis(1), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_publish_exhausts_after_n_attempts() {
        let calls = AtomicU32::new(0);
        let result = retry_publish(3, Duration::from_millis(1), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(SinkError::Unavailable("down".to_string())) }
        })
        .await;
        assert!(matches!(result, Err(SinkError::RetriesExhausted { attempts: 3, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
