//! Streaming ingestion bridge: moves records from a message broker
//! (Kafka, RabbitMQ, SQS, Azure Service Bus, or a URL/stdin feed) into
//! an embedded entity-resolution engine, one configurable worker pool
//! per process.

pub mod config;
pub mod consumers;
pub mod dispatcher;
pub mod errors;
pub mod logmsg;
pub mod metrics;
#[cfg(feature = "metrics-http")]
pub mod metrics_http;
pub mod monitor;
pub mod plugins;
pub mod record;
pub mod resolver;
pub mod sinks;
pub mod worker_pool;
