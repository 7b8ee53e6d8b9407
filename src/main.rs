//! Entry point: loads configuration, wires the resolver/sinks/governor
//! for the chosen subcommand, spawns the worker pool, and waits for a
//! shutdown signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use clap::{CommandFactory, Parser};

use siem_stream_bridge::config::{
    self, AzureArgs, Cli, Command, CommonArgs, KafkaArgs, RabbitmqArgs, SqsArgs, UrlArgs,
};
use siem_stream_bridge::consumers;
use siem_stream_bridge::dispatcher::DispatchContext;
use siem_stream_bridge::logmsg;
use siem_stream_bridge::metrics::Counters;
use siem_stream_bridge::monitor::MonitorConfig;
use siem_stream_bridge::plugins::{self, Governor, IdentityInfoFilter, NoopGovernor};
use siem_stream_bridge::record::DefaultAction;
use siem_stream_bridge::resolver::ffi::FfiResolver;
use siem_stream_bridge::resolver::mock::MockResolver;
use siem_stream_bridge::resolver::ResolverEngine;
use siem_stream_bridge::sinks::azure::AzureSink;
use siem_stream_bridge::sinks::kafka::KafkaSink;
use siem_stream_bridge::sinks::rabbitmq::RabbitmqSink;
use siem_stream_bridge::sinks::sqs::{RedriveDeferSink, SqsSink};
use siem_stream_bridge::sinks::{NullSink, Sink};
use siem_stream_bridge::worker_pool::WorkerPool;

fn main() {
    dotenvy::dotenv().ok();
    env_logger::init();

    let runtime = tokio::runtime::Runtime::new().expect("failed to build main runtime");
    let start = Utc::now();
    let exit_code = match runtime.block_on(async_main()) {
        Ok(()) => {
            let stop = Utc::now();
            log::info!(
                "{}",
                logmsg::info(
                    logmsg::codes::EXIT_SUMMARY,
                    format!(
                        "exit summary: start={} stop={} elapsed_seconds={:.3}",
                        start.to_rfc3339(),
                        stop.to_rfc3339(),
                        (stop - start).num_milliseconds() as f64 / 1000.0
                    )
                )
            );
            0
        }
        Err(e) => {
            log::error!("{}", logmsg::error(logmsg::codes::PROGRAM_TERMINATED_WITH_ERROR, format!("{e:#}")));
            1
        }
    };
    std::process::exit(exit_code);
}

async fn async_main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let command = match cli.command {
        Some(command) => command,
        None if config::docker_launched() => Command::Sleep,
        None => {
            Cli::command().print_help().ok();
            println!();
            return Ok(());
        }
    };

    match command {
        Command::Sleep => run_sleep().await,
        Command::Version => run_version(),
        Command::DockerAcceptanceTest => run_docker_acceptance_test().await,
        Command::Kafka(args) => run_kafka(args, DefaultAction::Add).await,
        Command::KafkaWithinfo(args) => run_kafka(args, DefaultAction::AddWithInfo).await,
        Command::Rabbitmq(args) => run_rabbitmq(args, DefaultAction::Add).await,
        Command::RabbitmqWithinfo(args) => run_rabbitmq(args, DefaultAction::AddWithInfo).await,
        Command::Sqs(args) => run_sqs(args, DefaultAction::Add).await,
        Command::SqsWithinfo(args) => run_sqs(args, DefaultAction::AddWithInfo).await,
        Command::AzureQueue(args) => run_azure(args, DefaultAction::Add).await,
        Command::AzureQueueWithinfo(args) => run_azure(args, DefaultAction::AddWithInfo).await,
        Command::Url(args) => run_url(args, DefaultAction::Add).await,
    }
}

/// Parks the process until a shutdown signal arrives (spec 6: "sleep
/// parks the process so a container under orchestration can be probed
/// without doing ingestion work").
async fn run_sleep() -> anyhow::Result<()> {
    log::info!("{}", logmsg::info(0, "sleeping, waiting for shutdown signal"));
    wait_for_shutdown_signal().await;
    Ok(())
}

fn run_version() -> anyhow::Result<()> {
    println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    Ok(())
}

/// Fast self-check of config loading and resolver `primeEngine` against
/// the in-memory stand-in (spec.md 6, SPEC_FULL B.1): no vendor library
/// or broker connectivity required.
async fn run_docker_acceptance_test() -> anyhow::Result<()> {
    let resolver = MockResolver::new();
    resolver.init("docker-acceptance-test", "{}", false)?;
    resolver.prime_engine()?;
    resolver.destroy()?;
    log::info!("{}", logmsg::info(0, "docker acceptance test passed"));
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn log_redacted_config<T: serde::Serialize>(label: &str, config: &T) {
    if let Ok(value) = serde_json::to_value(config) {
        let redacted = redact_value(value);
        log::info!("{}", logmsg::info(0, format!("{label} config: {redacted}")));
    }
}

fn redact_value(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.into_iter()
                .map(|(k, v)| {
                    let redacted = match &v {
                        serde_json::Value::String(s) => serde_json::Value::String(config::redact(&k, s)),
                        other => redact_value(other.clone()),
                    };
                    (k, redacted)
                })
                .collect(),
        ),
        other => other,
    }
}

fn build_engine_configuration_json(common: &CommonArgs) -> anyhow::Result<String> {
    if let Some(json) = &common.engine_configuration_json {
        return Ok(json.clone());
    }
    let components = config::check_database_url_roundtrip(&common.database_url)?;
    Ok(serde_json::json!({ "SQL": { "CONNECTION": components.to_url_string() } }).to_string())
}

/// Loads the resolver shared object, initializes and primes it, and
/// enforces the Governor/Postgres rule (spec 4.1, 4.2, 4.7).
fn build_engine(common: &CommonArgs) -> anyhow::Result<Arc<dyn ResolverEngine>> {
    common.validate()?;
    plugins::validate_governor_requirement(&common.database_url, false)?;

    let library_path = common
        .resolver_library_path
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("--resolver-library-path (SENZING_RESOLVER_LIBRARY_PATH) is required"))?;
    let engine: Arc<dyn ResolverEngine> = Arc::new(unsafe { FfiResolver::load(library_path)? });

    let config_json = build_engine_configuration_json(common)?;
    engine.init(&common.engine_module_name, &config_json, common.debug)?;
    engine.prime_engine()?;
    Ok(engine)
}

/// Spawned as a background task for every ingestion subcommand; a
/// no-op unless built with `--features metrics-http` (SPEC_FULL A).
#[cfg(feature = "metrics-http")]
fn spawn_metrics_http(common: &CommonArgs, counters: Arc<Counters>, engine: Arc<dyn ResolverEngine>) {
    let bind_addr = common.metrics_http_bind.clone();
    tokio::spawn(async move {
        if let Err(e) = siem_stream_bridge::metrics_http::serve(&bind_addr, counters, engine).await {
            log::error!("{}", logmsg::error(0, format!("metrics HTTP server failed: {e}")));
        }
    });
}

#[cfg(not(feature = "metrics-http"))]
fn spawn_metrics_http(_common: &CommonArgs, _counters: Arc<Counters>, _engine: Arc<dyn ResolverEngine>) {}

fn monitor_config_for(common: &CommonArgs) -> MonitorConfig {
    MonitorConfig {
        period: Duration::from_secs(common.monitoring_period_seconds),
        license_reprint_period: Duration::from_secs(common.license_reprint_period_seconds),
        minimum_alive_worker_fraction: common.minimum_alive_worker_fraction,
    }
}

async fn run_kafka(args: KafkaArgs, default_action: DefaultAction) -> anyhow::Result<()> {
    log_redacted_config("kafka", &args);
    let engine = build_engine(&args.common)?;
    let governor: Arc<dyn Governor> = Arc::new(NoopGovernor);

    let failure_sink: Arc<dyn Sink> = match &args.failure_topic {
        Some(topic) => Arc::new(KafkaSink::new(&args.bootstrap_servers, topic.clone())?),
        None => Arc::new(NullSink),
    };
    let info_sink: Option<Arc<dyn Sink>> = match &args.info_topic {
        Some(topic) => Some(Arc::new(KafkaSink::new(&args.bootstrap_servers, topic.clone())?)),
        None => None,
    };

    let counters = Arc::new(Counters::new());
    spawn_metrics_http(&args.common, counters.clone(), engine.clone());
    let ctx = Arc::new(DispatchContext::new(
        engine.clone(),
        failure_sink,
        info_sink,
        Arc::new(IdentityInfoFilter),
        governor.clone(),
        args.common.directive_key.clone(),
        args.common.default_data_source.clone(),
        args.common.default_entity_type.clone(),
        Duration::from_secs(args.common.configuration_check_frequency_seconds),
        counters.clone(),
    ));

    let args = Arc::new(args);
    let num_workers = args.num_workers;
    let sleep_before_admin = Duration::from_secs(args.common.sleep_before_admin_threads_seconds);
    let monitor_config = monitor_config_for(&args.common);

    let pool = WorkerPool::spawn(num_workers, sleep_before_admin, monitor_config, engine.clone(), governor, counters, {
        let args = args.clone();
        let ctx = ctx.clone();
        move |idx, alive, quit| {
            consumers::kafka::run(idx, args.clone(), ctx.clone(), default_action, alive, quit);
        }
    });

    wait_for_shutdown_signal().await;
    pool.request_shutdown();
    pool.join();
    engine.destroy()?;
    Ok(())
}

async fn open_rabbitmq_failure_channel(args: &RabbitmqArgs) -> anyhow::Result<lapin::Channel> {
    let uri = format!(
        "amqp://{}:{}@{}:{}{}",
        args.username, args.password, args.host, args.port, args.virtual_host
    );
    let connection_properties = lapin::ConnectionProperties::default()
        .with_executor(tokio_executor_trait::Tokio::current())
        .with_reactor(tokio_reactor_trait::Tokio);
    let connection = lapin::Connection::connect(&uri, connection_properties).await?;
    let channel = connection.create_channel().await?;
    Ok(channel)
}

async fn run_rabbitmq(args: RabbitmqArgs, default_action: DefaultAction) -> anyhow::Result<()> {
    log_redacted_config("rabbitmq", &args);
    let engine = build_engine(&args.common)?;
    let governor: Arc<dyn Governor> = Arc::new(NoopGovernor);

    // Publishes to the default exchange ("") with the target queue name
    // as routing key, which AMQP brokers route directly to the
    // identically-named queue -- no separate exchange/binding needed
    // for the failure/info sinks.
    let failure_sink: Arc<dyn Sink> = match &args.failure_queue {
        Some(queue) => {
            let channel = open_rabbitmq_failure_channel(&args).await?;
            Arc::new(RabbitmqSink::new(channel, "", queue.clone(), args.retry_count, Duration::from_secs(args.retry_delay_seconds)))
        }
        None => Arc::new(NullSink),
    };
    let info_sink: Option<Arc<dyn Sink>> = match &args.info_queue {
        Some(queue) => {
            let channel = open_rabbitmq_failure_channel(&args).await?;
            Some(Arc::new(RabbitmqSink::new(channel, "", queue.clone(), args.retry_count, Duration::from_secs(args.retry_delay_seconds))))
        }
        None => None,
    };

    let counters = Arc::new(Counters::new());
    spawn_metrics_http(&args.common, counters.clone(), engine.clone());
    let ctx = Arc::new(DispatchContext::new(
        engine.clone(),
        failure_sink,
        info_sink,
        Arc::new(IdentityInfoFilter),
        governor.clone(),
        args.common.directive_key.clone(),
        args.common.default_data_source.clone(),
        args.common.default_entity_type.clone(),
        Duration::from_secs(args.common.configuration_check_frequency_seconds),
        counters.clone(),
    ));

    let args = Arc::new(args);
    let num_workers = args.num_workers;
    let sleep_before_admin = Duration::from_secs(args.common.sleep_before_admin_threads_seconds);
    let monitor_config = monitor_config_for(&args.common);

    let pool = WorkerPool::spawn(num_workers, sleep_before_admin, monitor_config, engine.clone(), governor, counters, {
        let args = args.clone();
        let ctx = ctx.clone();
        move |idx, alive, quit| {
            consumers::rabbitmq::run(idx, args.clone(), ctx.clone(), default_action, alive, quit);
        }
    });

    wait_for_shutdown_signal().await;
    pool.request_shutdown();
    pool.join();
    engine.destroy()?;
    Ok(())
}

async fn run_sqs(args: SqsArgs, default_action: DefaultAction) -> anyhow::Result<()> {
    log_redacted_config("sqs", &args);
    let engine = build_engine(&args.common)?;
    let governor: Arc<dyn Governor> = Arc::new(NoopGovernor);

    let aws_config = aws_config::load_from_env().await;
    let client = aws_sdk_sqs::Client::new(&aws_config);

    let failure_sink: Arc<dyn Sink> = match &args.failure_queue_url {
        Some(url) => Arc::new(SqsSink::new(client.clone(), url.clone(), 0)),
        None if consumers::sqs::has_redrive_policy(&client, &args.queue_url).await => Arc::new(RedriveDeferSink),
        None => Arc::new(NullSink),
    };
    let info_sink: Option<Arc<dyn Sink>> = args
        .info_queue_url
        .as_ref()
        .map(|url| Arc::new(SqsSink::new(client.clone(), url.clone(), args.info_queue_delay_seconds)) as Arc<dyn Sink>);

    let counters = Arc::new(Counters::new());
    spawn_metrics_http(&args.common, counters.clone(), engine.clone());
    let ctx = Arc::new(DispatchContext::new(
        engine.clone(),
        failure_sink,
        info_sink,
        Arc::new(IdentityInfoFilter),
        governor.clone(),
        args.common.directive_key.clone(),
        args.common.default_data_source.clone(),
        args.common.default_entity_type.clone(),
        Duration::from_secs(args.common.configuration_check_frequency_seconds),
        counters.clone(),
    ));

    let args = Arc::new(args);
    let num_workers = args.num_workers;
    let sleep_before_admin = Duration::from_secs(args.common.sleep_before_admin_threads_seconds);
    let monitor_config = monitor_config_for(&args.common);

    let pool = WorkerPool::spawn(num_workers, sleep_before_admin, monitor_config, engine.clone(), governor, counters, {
        let args = args.clone();
        let ctx = ctx.clone();
        move |idx, alive, quit| {
            consumers::sqs::run(idx, args.clone(), ctx.clone(), default_action, alive, quit);
        }
    });

    wait_for_shutdown_signal().await;
    pool.request_shutdown();
    pool.join();
    engine.destroy()?;
    Ok(())
}

async fn run_azure(args: AzureArgs, default_action: DefaultAction) -> anyhow::Result<()> {
    log_redacted_config("azure", &args);
    let engine = build_engine(&args.common)?;
    let governor: Arc<dyn Governor> = Arc::new(NoopGovernor);

    let failure_sink: Arc<dyn Sink> = match &args.failure_queue_name {
        Some(name) => Arc::new(AzureSink::connect(&args.connection_string, name).await?),
        None => Arc::new(NullSink),
    };
    let info_sink: Option<Arc<dyn Sink>> = match &args.info_queue_name {
        Some(name) => Some(Arc::new(AzureSink::connect(&args.connection_string, name).await?)),
        None => None,
    };

    let counters = Arc::new(Counters::new());
    spawn_metrics_http(&args.common, counters.clone(), engine.clone());
    let ctx = Arc::new(DispatchContext::new(
        engine.clone(),
        failure_sink,
        info_sink,
        Arc::new(IdentityInfoFilter),
        governor.clone(),
        args.common.directive_key.clone(),
        args.common.default_data_source.clone(),
        args.common.default_entity_type.clone(),
        Duration::from_secs(args.common.configuration_check_frequency_seconds),
        counters.clone(),
    ));

    let args = Arc::new(args);
    let num_workers = args.num_workers;
    let sleep_before_admin = Duration::from_secs(args.common.sleep_before_admin_threads_seconds);
    let monitor_config = monitor_config_for(&args.common);

    let pool = WorkerPool::spawn(num_workers, sleep_before_admin, monitor_config, engine.clone(), governor, counters, {
        let args = args.clone();
        let ctx = ctx.clone();
        move |idx, alive, quit| {
            consumers::azure::run(idx, args.clone(), ctx.clone(), default_action, alive, quit);
        }
    });

    wait_for_shutdown_signal().await;
    pool.request_shutdown();
    pool.join();
    engine.destroy()?;
    Ok(())
}

async fn run_url(args: UrlArgs, default_action: DefaultAction) -> anyhow::Result<()> {
    log_redacted_config("url", &args);
    let engine = build_engine(&args.common)?;
    let governor: Arc<dyn Governor> = Arc::new(NoopGovernor);

    let counters = Arc::new(Counters::new());
    spawn_metrics_http(&args.common, counters.clone(), engine.clone());
    let ctx = Arc::new(DispatchContext::new(
        engine.clone(),
        Arc::new(NullSink),
        None,
        Arc::new(IdentityInfoFilter),
        governor.clone(),
        args.common.directive_key.clone(),
        args.common.default_data_source.clone(),
        args.common.default_entity_type.clone(),
        Duration::from_secs(args.common.configuration_check_frequency_seconds),
        counters.clone(),
    ));

    let args = Arc::new(args);
    let num_workers = args.num_workers;
    let sleep_before_admin = Duration::from_secs(args.common.sleep_before_admin_threads_seconds);
    let monitor_config = monitor_config_for(&args.common);

    let reader_quit = Arc::new(AtomicBool::new(false));
    let (sender, receiver) = std::sync::mpsc::sync_channel(args.queue_max_size);
    let receiver = Arc::new(Mutex::new(receiver));
    let reader_handle = consumers::url_stdin::spawn_reader(args.clone(), sender, reader_quit.clone());

    let pool = WorkerPool::spawn(num_workers, sleep_before_admin, monitor_config, engine.clone(), governor, counters, {
        let ctx = ctx.clone();
        let receiver = receiver.clone();
        move |idx, alive, quit| {
            consumers::url_stdin::run_writer(idx, receiver.clone(), ctx.clone(), default_action, alive, quit);
        }
    });

    wait_for_shutdown_signal().await;
    reader_quit.store(true, Ordering::SeqCst);
    pool.request_shutdown();
    pool.join();
    let _ = reader_handle.join();
    engine.destroy()?;
    Ok(())
}
