//! SQS consumer (spec 4.3.3): long-polls with a configurable wait
//! time and a fixed 30-second visibility timeout, `MaxNumberOfMessages
//! = 1`. Whether a failed record's message gets deleted or left for
//! the source queue's redrive policy is decided once at startup by
//! which failure sink the caller wires up (`RedriveDeferSink` vs.
//! `SqsSink`, see `sinks::sqs`) -- this loop just obeys the generic
//! ack discipline: delete on success, leave it alone on failure.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aws_sdk_sqs::Client;
use rand::Rng;

use crate::config::SqsArgs;
use crate::consumers::process_envelope;
use crate::dispatcher::DispatchContext;
use crate::logmsg;
use crate::record::DefaultAction;
use crate::worker_pool::AliveFlag;

const VISIBILITY_TIMEOUT_SECONDS: i32 = 30;

pub fn run(worker_index: usize, args: Arc<SqsArgs>, ctx: Arc<DispatchContext>, default_action: DefaultAction, alive: AliveFlag, quit: Arc<AtomicBool>) {
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

async fn run_async(worker_index: usize, args: Arc<SqsArgs>, ctx: Arc<DispatchContext>, default_action: DefaultAction, quit: Arc<AtomicBool>) {
    log::info!("{}", logmsg::info(logmsg::codes::WORKER_STARTED, format!("sqs worker {worker_index} starting")));

    let aws_config = aws_config::load_from_env().await;
    let client = Client::new(&aws_config);

    while !quit.load(Ordering::SeqCst) {
        let response = client
            .receive_message()
            .queue_url(&args.queue_url)
            .max_number_of_messages(1)
            .wait_time_seconds(args.wait_time_seconds)
            .visibility_timeout(VISIBILITY_TIMEOUT_SECONDS)
            .send()
            .await;

        let messages = match response {
            Ok(output) => output.messages.unwrap_or_default(),
            Err(e) => {
                log::warn!("{}", logmsg::warning(0, format!("sqs worker {worker_index}: receive failed: {e}")));
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
        };

        if messages.is_empty() {
            if args.exit_on_empty_queue {
                log::info!("{}", logmsg::info(logmsg::codes::QUEUE_EMPTY_EXITING, format!("sqs worker {worker_index}: queue empty, exiting")));
                break;
            }
            if args.poll_sleep_seconds > 0 {
                let sleep_for = if args.poll_sleep_jitter {
                    let jitter = rand::thread_rng().gen_range(0..=args.poll_sleep_seconds);
                    Duration::from_secs(jitter)
                } else {
                    Duration::from_secs(args.poll_sleep_seconds)
                };
                log::debug!("{}", logmsg::debug(logmsg::codes::QUEUE_EMPTY_SLEEPING, format!("sqs worker {worker_index}: queue empty, sleeping")));
                tokio::time::sleep(sleep_for).await;
            }
            continue;
        }

        for message in messages {
            let Some(body) = message.body.as_deref() else { continue };
            let Some(receipt_handle) = message.receipt_handle.as_deref() else { continue };

            match process_envelope(&ctx, body, default_action).await {
                Ok(()) => {
                    if let Err(e) = client.delete_message().queue_url(&args.queue_url).receipt_handle(receipt_handle).send().await {
                        log::error!("{}", logmsg::error(0, format!("sqs worker {worker_index}: delete_message failed: {e}")));
                    }
                }
                Err(e) => {
                    log::warn!(
                        "{}",
                        logmsg::warning(0, format!("sqs worker {worker_index}: record not terminally handled, leaving message undeleted: {e}"))
                    );
                }
            }
        }
    }
    log::info!("{}", logmsg::info(logmsg::codes::WORKER_STOPPED, format!("sqs worker {worker_index} stopping")));
}

/// Queried once at startup (spec 4.3.3: "Detects the presence of a
/// redrive... policy on the source queue"), not per-worker, since the
/// result decides which failure sink the shared `DispatchContext` is
/// built with.
pub async fn has_redrive_policy(client: &Client, queue_url: &str) -> bool {
    use aws_sdk_sqs::types::QueueAttributeName;
    client
        .get_queue_attributes()
        .queue_url(queue_url)
        .attribute_names(QueueAttributeName::RedrivePolicy)
        .send()
        .await
        .ok()
        .and_then(|output| output.attributes.map(|attrs| attrs.contains_key(&QueueAttributeName::RedrivePolicy)))
        .unwrap_or(false)
}
