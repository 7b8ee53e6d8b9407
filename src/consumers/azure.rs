//! Azure Service Bus consumer (spec 4.3.4): iterates received
//! messages with the same normalize -> dispatch -> complete sequence
//! every other backend uses, via peek-lock receive so a failed
//! dispatch can leave the message for redelivery instead of
//! completing it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use azure_messaging_servicebus::service_bus::QueueClient;

use crate::config::AzureArgs;
use crate::consumers::process_envelope;
use crate::dispatcher::DispatchContext;
use crate::logmsg;
use crate::record::DefaultAction;
use crate::worker_pool::AliveFlag;

pub fn run(worker_index: usize, args: Arc<AzureArgs>, ctx: Arc<DispatchContext>, default_action: DefaultAction, alive: AliveFlag, quit: Arc<AtomicBool>) {
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

async fn run_async(worker_index: usize, args: Arc<AzureArgs>, ctx: Arc<DispatchContext>, default_action: DefaultAction, quit: Arc<AtomicBool>) {
    log::info!("{}", logmsg::info(logmsg::codes::WORKER_STARTED, format!("azure worker {worker_index} starting")));

    let client = loop {
        match QueueClient::new(args.connection_string.clone(), args.queue_name.clone()) {
            Ok(client) => break client,
            Err(e) => {
                log::error!("{}", logmsg::error(0, format!("azure worker {worker_index}: connect failed: {e}, retrying")));
                tokio::time::sleep(Duration::from_secs(5)).await;
                if quit.load(Ordering::SeqCst) {
                    return;
                }
            }
        }
    };

    while !quit.load(Ordering::SeqCst) {
        match tokio::time::timeout(Duration::from_secs(1), client.peek_lock_message2(Some(Duration::from_secs(30)))).await {
            Err(_elapsed) => continue,
            Ok(Err(e)) => {
                log::warn!("{}", logmsg::warning(0, format!("azure worker {worker_index}: receive failed: {e}")));
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            Ok(Ok(None)) => continue,
            Ok(Ok(Some(message))) => {
                let body = String::from_utf8_lossy(message.body()).into_owned();
                match process_envelope(&ctx, &body, default_action).await {
                    Ok(()) => {
                        if let Err(e) = client.complete_message(&message).await {
                            log::error!("{}", logmsg::error(0, format!("azure worker {worker_index}: complete failed: {e}")));
                        }
                    }
                    Err(e) => {
                        log::error!(
                            "{}",
                            logmsg::error(0, format!("azure worker {worker_index}: failure-sink write failed, not completing: {e}"))
                        );
                    }
                }
            }
        }
    }
    log::info!("{}", logmsg::info(logmsg::codes::WORKER_STOPPED, format!("azure worker {worker_index} stopping")));
}
