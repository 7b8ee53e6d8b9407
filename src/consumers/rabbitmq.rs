//! RabbitMQ consumer (spec 4.3.2): declares the target queue passively
//! or actively depending on config, sets a configurable prefetch
//! count, and decouples the network callback from record processing
//! with an internal queue so long resolver calls don't starve
//! heartbeats. Reconnects with a configured backoff on channel/
//! connection loss.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties, ExchangeKind};

use crate::config::RabbitmqArgs;
use crate::consumers::process_envelope;
use crate::dispatcher::DispatchContext;
use crate::errors::{BridgeError, SinkError};
use crate::logmsg;
use crate::record::DefaultAction;
use crate::worker_pool::AliveFlag;

async fn connect(args: &RabbitmqArgs) -> Result<Channel, lapin::Error> {
    let uri = format!(
        "amqp://{}:{}@{}:{}{}",
        args.username, args.password, args.host, args.port, args.virtual_host
    );
    let connection_properties = ConnectionProperties::default()
        .with_executor(tokio_executor_trait::Tokio::current())
        .with_reactor(tokio_reactor_trait::Tokio);
    let connection = Connection::connect(&uri, connection_properties).await?;
    let channel = connection.create_channel().await?;
    channel.basic_qos(args.prefetch, BasicQosOptions::default()).await?;

    if args.passive_declare {
        channel
            .queue_declare(&args.queue, QueueDeclareOptions { passive: true, ..Default::default() }, FieldTable::default())
            .await?;
    } else {
        channel
            .exchange_declare(
                &args.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions::default(),
                FieldTable::default(),
            )
            .await?;
        channel
            .queue_declare(&args.queue, QueueDeclareOptions::default(), FieldTable::default())
            .await?;
        channel
            .queue_bind(&args.queue, &args.exchange, &args.routing_key, QueueBindOptions::default(), FieldTable::default())
            .await?;
    }
    Ok(channel)
}

pub fn run(worker_index: usize, args: Arc<RabbitmqArgs>, ctx: Arc<DispatchContext>, default_action: DefaultAction, alive: AliveFlag, quit: Arc<AtomicBool>) {
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

async fn run_async(worker_index: usize, args: Arc<RabbitmqArgs>, ctx: Arc<DispatchContext>, default_action: DefaultAction, quit: Arc<AtomicBool>) {
    log::info!("{}", logmsg::info(logmsg::codes::WORKER_STARTED, format!("rabbitmq worker {worker_index} starting")));

    while !quit.load(Ordering::SeqCst) {
        let channel = match connect(&args).await {
            Ok(channel) => channel,
            Err(e) => {
                log::error!(
                    "{}",
                    logmsg::error(0, format!("rabbitmq worker {worker_index}: connect failed: {e}, retrying in {}s", args.retry_delay_seconds))
                );
                tokio::time::sleep(Duration::from_secs(args.retry_delay_seconds)).await;
                continue;
            }
        };

        let mut consumer = match channel
            .basic_consume(&args.queue, &format!("senzing-worker-{worker_index}"), BasicConsumeOptions::default(), FieldTable::default())
            .await
        {
            Ok(consumer) => consumer,
            Err(e) => {
                log::error!("{}", logmsg::error(0, format!("rabbitmq worker {worker_index}: basic_consume failed: {e}")));
                tokio::time::sleep(Duration::from_secs(args.retry_delay_seconds)).await;
                continue;
            }
        };

        // Internal single-producer-single-consumer queue (spec
        // 4.3.2): the `next()` loop here is the network callback side;
        // `process_envelope` plus ack is the worker side. Decoupling
        // them as two cooperative tasks on this worker's own runtime
        // means a slow resolver call never delays consuming the next
        // delivery into the channel, which is what keeps heartbeats
        // flowing.
        let (tx, mut rx) = tokio::sync::mpsc::channel::<lapin::message::Delivery>(args.prefetch.max(1) as usize);
        let quit_for_reader = quit.clone();
        let reader = tokio::spawn(async move {
            while !quit_for_reader.load(Ordering::SeqCst) {
                match tokio::time::timeout(Duration::from_secs(1), consumer.next()).await {
                    Err(_elapsed) => continue,
                    Ok(None) => break,
                    Ok(Some(Err(_connection_lost))) => break,
                    Ok(Some(Ok(delivery))) => {
                        if tx.send(delivery).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let mut connection_lost = false;
        while let Some(delivery) = rx.recv().await {
            let raw = String::from_utf8_lossy(&delivery.data).into_owned();
            match process_envelope(&ctx, &raw, default_action).await {
                Ok(()) => {
                    if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                        log::error!("{}", logmsg::error(0, format!("rabbitmq worker {worker_index}: ack failed: {e}")));
                        connection_lost = true;
                        break;
                    }
                }
                Err(BridgeError::Sink(SinkError::RetriesExhausted { attempts, cause })) => {
                    // Spec 8: "On the Nth consecutive RabbitMQ publish
                    // failure, the process exits 1" -- the failure sink
                    // itself is down, so there is nowhere left to route
                    // undeliverable records.
                    log::error!(
                        "{}",
                        logmsg::error(
                            logmsg::codes::PROGRAM_TERMINATED_WITH_ERROR,
                            format!("rabbitmq worker {worker_index}: failure sink exhausted {attempts} retries: {cause}")
                        )
                    );
                    std::process::exit(1);
                }
                Err(e) => {
                    log::error!(
                        "{}",
                        logmsg::error(0, format!("rabbitmq worker {worker_index}: failure-sink write failed, not acking: {e}"))
                    );
                }
            }
            if quit.load(Ordering::SeqCst) {
                break;
            }
        }
        let _ = reader.await;

        if quit.load(Ordering::SeqCst) {
            break;
        }
        if connection_lost {
            log::warn!(
                "{}",
                logmsg::warning(0, format!("rabbitmq worker {worker_index}: connection lost, reconnecting in {}s", args.retry_delay_seconds))
            );
            tokio::time::sleep(Duration::from_secs(args.retry_delay_seconds)).await;
        }
    }
    log::info!("{}", logmsg::info(logmsg::codes::WORKER_STOPPED, format!("rabbitmq worker {worker_index} stopping")));
}
