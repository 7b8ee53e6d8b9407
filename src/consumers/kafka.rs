//! Kafka consumer (spec 4.3.1): `enable.auto.commit=false`,
//! `auto.offset.reset=earliest`, a configurable group id and extra
//! librdkafka configuration merged on top; polls with a short timeout
//! to remain cancelable; commits the offset after each successfully
//! processed message.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;

use crate::config::KafkaArgs;
use crate::consumers::process_envelope;
use crate::dispatcher::DispatchContext;
use crate::logmsg;
use crate::record::DefaultAction;
use crate::worker_pool::AliveFlag;

fn build_consumer(args: &KafkaArgs) -> Result<StreamConsumer, KafkaError> {
    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", &args.bootstrap_servers)
        .set("group.id", &args.group_id)
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "earliest");
    for (key, value) in args.extra_configuration_map() {
        config.set(&key, &value);
    }
    config.create()
}

/// Runs on its own worker thread, driven by a single-threaded tokio
/// runtime (SPEC_FULL A) -- `rdkafka`'s async `StreamConsumer` needs
/// some runtime to poll, and since nothing else shares this thread,
/// blocking resolver calls inside `process_envelope` don't starve
/// anything.
pub fn run(
    worker_index: usize,
    args: Arc<KafkaArgs>,
    ctx: Arc<DispatchContext>,
    default_action: DefaultAction,
    alive: AliveFlag,
    quit: Arc<AtomicBool>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            log::error!("{}", logmsg::error(0, format!("worker {worker_index}: failed to build runtime: {e}")));
            alive.store(false, Ordering::SeqCst);
            return;
        }
    };
    runtime.block_on(run_async(worker_index, args, ctx, default_action, quit));
}

async fn run_async(worker_index: usize, args: Arc<KafkaArgs>, ctx: Arc<DispatchContext>, default_action: DefaultAction, quit: Arc<AtomicBool>) {
    log::info!("{}", logmsg::info(logmsg::codes::WORKER_STARTED, format!("kafka worker {worker_index} starting")));

    let consumer = loop {
        match build_consumer(&args) {
            Ok(consumer) => break consumer,
            Err(e) => {
                log::error!("{}", logmsg::error(0, format!("kafka worker {worker_index}: connect failed: {e}, retrying")));
                tokio::time::sleep(Duration::from_secs(5)).await;
                if quit.load(Ordering::SeqCst) {
                    return;
                }
            }
        }
    };
    if let Err(e) = consumer.subscribe(&[&args.topic]) {
        log::error!("{}", logmsg::error(0, format!("kafka worker {worker_index}: subscribe failed: {e}")));
        return;
    }

    let poll_timeout = Duration::from_millis(args.poll_timeout_ms);
    while !quit.load(Ordering::SeqCst) {
        match tokio::time::timeout(poll_timeout, consumer.recv()).await {
            Err(_elapsed) => continue,
            Ok(Err(KafkaError::PartitionEOF(_))) => continue,
            Ok(Err(e)) => {
                log::warn!("{}", logmsg::warning(0, format!("kafka worker {worker_index}: poll error: {e}")));
                continue;
            }
            Ok(Ok(message)) => {
                // Lossy conversion rather than discarding the bytes on
                // a utf8 error, so a non-utf8 payload still reaches
                // the failure sink with its content intact instead of
                // as an empty string (spec 4.3 "the raw body is
                // forwarded to the failure sink").
                let payload = String::from_utf8_lossy(message.payload().unwrap_or_default()).into_owned();
                match process_envelope(&ctx, &payload, default_action).await {
                    Ok(()) => {
                        if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                            log::error!("{}", logmsg::error(0, format!("kafka worker {worker_index}: commit failed: {e}")));
                        }
                    }
                    Err(e) => {
                        log::error!(
                            "{}",
                            logmsg::error(0, format!("kafka worker {worker_index}: failure-sink write failed, not committing: {e}"))
                        );
                    }
                }
            }
        }
    }
    log::info!("{}", logmsg::info(logmsg::codes::WORKER_STOPPED, format!("kafka worker {worker_index} stopping")));
}
