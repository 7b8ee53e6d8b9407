//! CLI/env layering for the subcommands operators actually run (spec
//! 4.1). `clap`'s `env` feature means these only need checking from
//! the outside, the way `siem_unified_pipeline`'s integration tests
//! exercise its router rather than its handler internals directly.

use clap::Parser;
use siem_stream_bridge::config::{Cli, Command};

#[test]
fn kafka_subcommand_parses_required_and_default_fields() {
    let cli = Cli::parse_from([
        "siem-stream-bridge",
        "kafka",
        "--database-url",
        "sqlite3://na:na@/tmp/g2.db",
        "--bootstrap-servers",
        "localhost:9092",
        "--topic",
        "senzing-records",
    ]);
    match cli.command {
        Some(Command::Kafka(args)) => {
            assert_eq!(args.bootstrap_servers, "localhost:9092");
            assert_eq!(args.topic, "senzing-records");
            assert_eq!(args.common.database_url, "sqlite3://na:na@/tmp/g2.db");
            // spec 4.1 defaults
            assert_eq!(args.common.directive_key, "senzingStreamLoader");
            assert_eq!(args.common.default_data_source, "TEST");
            assert_eq!(args.num_workers, 4);
        }
        other => panic!("expected Command::Kafka, got {other:?}"),
    }
}

#[test]
fn env_vars_are_read_when_flag_is_absent() {
    std::env::set_var("SENZING_ENGINE_CONFIGURATION_DATABASE_URL", "sqlite3://na:na@/tmp/from-env.db");
    std::env::set_var("SENZING_RABBITMQ_QUEUE", "from-env-queue");
    let cli = Cli::parse_from(["siem-stream-bridge", "rabbitmq"]);
    std::env::remove_var("SENZING_ENGINE_CONFIGURATION_DATABASE_URL");
    std::env::remove_var("SENZING_RABBITMQ_QUEUE");
    match cli.command {
        Some(Command::Rabbitmq(args)) => {
            assert_eq!(args.common.database_url, "sqlite3://na:na@/tmp/from-env.db");
            assert_eq!(args.queue, "from-env-queue");
            // spec 4.1: flag precedence over env when both are given
            assert_eq!(args.host, "localhost");
        }
        other => panic!("expected Command::Rabbitmq, got {other:?}"),
    }
}

#[test]
fn missing_database_url_is_a_parse_error_not_a_panic() {
    let result = Cli::try_parse_from(["siem-stream-bridge", "kafka", "--bootstrap-servers", "localhost:9092", "--topic", "t"]);
    assert!(result.is_err());
}

#[test]
fn sleep_version_and_docker_acceptance_test_need_no_database_url() {
    for args in [
        vec!["siem-stream-bridge", "sleep"],
        vec!["siem-stream-bridge", "version"],
        vec!["siem-stream-bridge", "docker-acceptance-test"],
    ] {
        let result = Cli::try_parse_from(args);
        assert!(result.is_ok());
    }
}

#[test]
fn extra_kafka_configuration_is_a_comma_delimited_kv_list() {
    let cli = Cli::parse_from([
        "siem-stream-bridge",
        "kafka-withinfo",
        "--database-url",
        "sqlite3://na:na@/tmp/g2.db",
        "--bootstrap-servers",
        "localhost:9092",
        "--topic",
        "t",
        "--extra-configuration",
        "security.protocol=SSL,socket.timeout.ms=5000",
    ]);
    match cli.command {
        Some(Command::KafkaWithinfo(args)) => {
            let map = args.extra_configuration_map();
            assert_eq!(map.get("security.protocol").map(String::as_str), Some("SSL"));
            assert_eq!(map.get("socket.timeout.ms").map(String::as_str), Some("5000"));
        }
        other => panic!("expected Command::KafkaWithinfo, got {other:?}"),
    }
}
