//! Monitor subsystem (spec 4.6): runs at a fixed period, counts live
//! workers, computes throughput rates, logs resolver stats and
//! license, and terminates once every worker has died.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::logmsg;
use crate::metrics::Counters;
use crate::plugins::Governor;
use crate::resolver::ResolverEngine;
use crate::worker_pool::AliveFlag;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub period: Duration,
    pub license_reprint_period: Duration,
    /// Spec 4.6a: "warns if under 50% alive" -- the fraction is
    /// configurable (`SENZING_MONITORING_CHECK_PROCESS`) rather than
    /// hardcoded, so operators can tune sensitivity per deployment.
    pub minimum_alive_worker_fraction: f64,
}

pub struct Monitor {
    config: MonitorConfig,
    alive_flags: Vec<AliveFlag>,
    engine: Arc<dyn ResolverEngine>,
    governor: Arc<dyn Governor>,
    counters: Arc<Counters>,
}

impl Monitor {
    pub fn new(
        config: MonitorConfig,
        alive_flags: Vec<AliveFlag>,
        engine: Arc<dyn ResolverEngine>,
        governor: Arc<dyn Governor>,
        counters: Arc<Counters>,
    ) -> Self {
        Monitor {
            config,
            alive_flags,
            engine,
            governor,
            counters,
        }
    }

    /// Blocks until every worker has died or `quit` is observed,
    /// matching spec 4.6 "Terminates when all workers are dead" and
    /// spec 5 "the monitor observes [quit intent] on its next period."
    pub fn run(&self, quit: Arc<AtomicBool>) {
        let mut last_snapshot = self.counters.snapshot();
        let mut last_license_reprint = Instant::now()
            .checked_sub(self.config.license_reprint_period)
            .unwrap_or_else(Instant::now);
        log_license(self.engine.as_ref());

        loop {
            std::thread::sleep(self.config.period);

            let live = self.alive_flags.iter().filter(|flag| flag.load(Ordering::SeqCst)).count();
            let total = self.alive_flags.len();
            if total > 0 && (live as f64) < (total as f64) * self.config.minimum_alive_worker_fraction {
                log::warn!(
                    "{}",
                    logmsg::warning(logmsg::codes::FEW_WORKERS_ALIVE, format!("only {live}/{total} workers alive"))
                );
            }

            let snapshot = self.counters.snapshot();
            let (queued_rate, processed_rate) = snapshot.rates_since(&last_snapshot);
            log::info!(
                "{}",
                logmsg::info(
                    0,
                    format!(
                        "queued={} processed={} queued_rate={queued_rate:.2}/s processed_rate={processed_rate:.2}/s",
                        snapshot.queued, snapshot.processed
                    )
                )
            );
            last_snapshot = snapshot;

            match self.engine.stats() {
                Ok(stats_json) => log::info!("{}", logmsg::info(0, format!("engine stats: {}", sort_json_keys(&stats_json)))),
                Err(e) => log::warn!("{}", logmsg::warning(0, format!("failed to fetch engine stats: {e}"))),
            }

            if last_license_reprint.elapsed() >= self.config.license_reprint_period {
                log_license(self.engine.as_ref());
                last_license_reprint = Instant::now();
            }

            if quit.load(Ordering::SeqCst) {
                break;
            }
            if total > 0 && live == 0 {
                log::info!("{}", logmsg::info(logmsg::codes::WORKER_STOPPED, "all workers dead, monitor exiting"));
                break;
            }
        }
        self.governor.close();
    }
}

fn log_license(engine: &dyn ResolverEngine) {
    match engine.license() {
        Ok(license_json) => log::info!("{}", logmsg::info(0, format!("license: {}", sort_json_keys(&license_json)))),
        Err(e) => log::warn!("{}", logmsg::warning(0, format!("failed to fetch license: {e}"))),
    }
}

/// Re-serializes a JSON blob with sorted keys for stable log output
/// (spec 4.6c: "fetches resolver engine stats JSON and logs it
/// sorted"). Falls back to the raw string if it isn't valid JSON.
fn sort_json_keys(raw: &str) -> String {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => serde_json::to_string(&sorted(value)).unwrap_or_else(|_| raw.to_string()),
        Err(_) => raw.to_string(),
    }
}

fn sorted(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted_map: serde_json::Map<String, Value> = map.into_iter().map(|(k, v)| (k, sorted(v))).collect();
            Value::Object(sorted_map)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sorted).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::NoopGovernor;
    use crate::resolver::mock::MockResolver;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn exits_once_all_workers_are_dead() {
        let alive = vec![Arc::new(AtomicBool::new(false))];
        let monitor = Monitor::new(
            MonitorConfig {
                period: Duration::from_millis(5),
                license_reprint_period: Duration::from_secs(3600),
                minimum_alive_worker_fraction: 0.5,
            },
            alive,
            Arc::new(MockResolver::new()),
            Arc::new(NoopGovernor),
            Arc::new(Counters::new()),
        );
        let quit = Arc::new(AtomicBool::new(false));
        // Should return promptly because the single worker is already dead.
        monitor.run(quit);
    }

    #[test]
    fn sort_json_keys_orders_object_fields() {
        let sorted = sort_json_keys(r#"{"z":1,"a":2}"#);
        assert_eq!(sorted, r#"{"a":2,"z":1}"#);
    }
}
