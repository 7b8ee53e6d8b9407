//! Drives `WorkerPool` end to end with the in-memory resolver, the
//! way `siem_unified_pipeline`'s integration tests drive a real router
//! instead of calling a handler function directly. No broker is
//! involved: each worker consumes from a plain channel to keep the
//! backend-agnostic pool/monitor/dispatch wiring under test.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use siem_stream_bridge::dispatcher::DispatchContext;
use siem_stream_bridge::metrics::Counters;
use siem_stream_bridge::monitor::MonitorConfig;
use siem_stream_bridge::plugins::{IdentityInfoFilter, NoopGovernor};
use siem_stream_bridge::record::DefaultAction;
use siem_stream_bridge::resolver::mock::MockResolver;
use siem_stream_bridge::resolver::ResolverEngine;
use siem_stream_bridge::sinks::{NullSink, Sink};
use siem_stream_bridge::worker_pool::WorkerPool;

fn obj(v: Value) -> Map<String, Value> {
    match v {
        Value::Object(m) => m,
        _ => panic!("not an object"),
    }
}

#[tokio::test]
async fn pool_processes_every_queued_record_then_shuts_down_cleanly() {
    let resolver = Arc::new(MockResolver::new());
    let counters = Arc::new(Counters::new());
    let ctx = Arc::new(DispatchContext::new(
        resolver.clone() as Arc<dyn ResolverEngine>,
        Arc::new(NullSink) as Arc<dyn Sink>,
        None,
        Arc::new(IdentityInfoFilter),
        Arc::new(NoopGovernor),
        "senzingStreamLoader",
        "TEST",
        "GENERIC",
        Duration::from_secs(300),
        counters.clone(),
    ));

    let (sender, receiver) = std::sync::mpsc::channel::<Map<String, Value>>();
    for i in 0..5 {
        sender
            .send(obj(json!({"DATA_SOURCE": "A", "RECORD_ID": i.to_string()})))
            .unwrap();
    }
    drop(sender);
    let receiver = Arc::new(std::sync::Mutex::new(receiver));

    let monitor_config = MonitorConfig {
        period: Duration::from_millis(20),
        license_reprint_period: Duration::from_secs(3600),
        minimum_alive_worker_fraction: 0.5,
    };

    let pool = WorkerPool::spawn(
        2,
        Duration::from_millis(0),
        monitor_config,
        resolver.clone() as Arc<dyn ResolverEngine>,
        Arc::new(NoopGovernor),
        counters.clone(),
        {
            let ctx = ctx.clone();
            move |_worker_index, _alive, quit: Arc<AtomicBool>| {
                let ctx = ctx.clone();
                let receiver = receiver.clone();
                let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
                runtime.block_on(async move {
                    loop {
                        if quit.load(Ordering::SeqCst) {
                            break;
                        }
                        let record = { receiver.lock().unwrap().recv_timeout(Duration::from_millis(50)) };
                        match record {
                            Ok(record) => {
                                ctx.counters.record_queued(1);
                                ctx.dispatch_record(record, DefaultAction::Add).await.unwrap();
                            }
                            // channel drained and sender dropped: this worker's share is done
                            Err(_) => break,
                        }
                    }
                });
            }
        },
    );

    // Give both worker threads a moment to drain the channel before
    // asking them to stop.
    tokio::time::sleep(Duration::from_millis(200)).await;
    pool.request_shutdown();
    pool.join();

    assert_eq!(counters.processed(), 5);
    assert_eq!(resolver.calls().len(), 5);
}
