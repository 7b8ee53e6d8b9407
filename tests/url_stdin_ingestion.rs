//! End-to-end through the url/stdin backend (spec 4.3.5): a real
//! temp file on disk, read by the reader thread, drained by a writer
//! thread, dispatched against the in-memory resolver.

use std::io::Write;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use siem_stream_bridge::config::{CommonArgs, UrlArgs};
use siem_stream_bridge::consumers::url_stdin::{run_writer, spawn_reader};
use siem_stream_bridge::dispatcher::DispatchContext;
use siem_stream_bridge::metrics::Counters;
use siem_stream_bridge::plugins::{IdentityInfoFilter, NoopGovernor};
use siem_stream_bridge::record::DefaultAction;
use siem_stream_bridge::resolver::mock::MockResolver;
use siem_stream_bridge::resolver::ResolverEngine;
use siem_stream_bridge::sinks::{NullSink, Sink};

fn common_args() -> CommonArgs {
    CommonArgs {
        database_url: "sqlite3://na:na@/tmp/g2.db".to_string(),
        engine_configuration_json: None,
        engine_module_name: "test".to_string(),
        resolver_library_path: None,
        debug: false,
        directive_key: "senzingStreamLoader".to_string(),
        default_data_source: "TEST".to_string(),
        default_entity_type: "GENERIC".to_string(),
        configuration_check_frequency_seconds: 300,
        monitoring_period_seconds: 60,
        license_reprint_period_seconds: 3600,
        sleep_before_admin_threads_seconds: 0,
        minimum_alive_worker_fraction: 0.5,
        metrics_http_bind: "127.0.0.1:0".to_string(),
    }
}

#[tokio::test]
async fn reads_a_file_and_dispatches_every_line() {
    let mut path = std::env::temp_dir();
    path.push(format!("siem-stream-bridge-test-{}.jsonl", std::process::id()));
    {
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, r#"{{"DATA_SOURCE":"A","RECORD_ID":"1"}}"#).unwrap();
        writeln!(file).unwrap(); // blank lines are skipped
        writeln!(file, r#"{{"DATA_SOURCE":"A","RECORD_ID":"2"}}"#).unwrap();
    }

    let args = Arc::new(UrlArgs {
        common: common_args(),
        input_url: Some(format!("file://{}", path.display())),
        queue_max_size: 16,
        num_workers: 1,
    });

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

    let reader_quit = Arc::new(AtomicBool::new(false));
    let (sender, receiver) = std::sync::mpsc::sync_channel(args.queue_max_size);
    let receiver = Arc::new(Mutex::new(receiver));
    let reader_handle = spawn_reader(args.clone(), sender, reader_quit.clone());

    let writer_quit = Arc::new(AtomicBool::new(false));
    let alive = Arc::new(AtomicBool::new(true));
    let writer_ctx = ctx.clone();
    let writer_receiver = receiver.clone();
    let writer_quit_for_thread = writer_quit.clone();
    let writer_handle = std::thread::spawn(move || {
        run_writer(0, writer_receiver, writer_ctx, DefaultAction::Add, alive, writer_quit_for_thread);
    });

    reader_handle.join().unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    writer_quit.store(true, std::sync::atomic::Ordering::SeqCst);
    writer_handle.join().unwrap();

    std::fs::remove_file(&path).ok();

    assert_eq!(resolver.calls().len(), 2);
    assert_eq!(counters.processed(), 2);
}
