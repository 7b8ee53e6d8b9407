//! Per-record dispatch pipeline (spec 4.4): pure, backend-agnostic
//! logic shared by every source consumer. Owns the configuration-drift
//! state machine (spec 4.4 "State machine -- configuration check").

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::{Map, Value};

use crate::errors::{BridgeError, Result};
use crate::logmsg;
use crate::metrics::Counters;
use crate::plugins::{Governor, InfoFilter};
use crate::record::{self, Action, DefaultAction, DirectiveOutcome};
use crate::resolver::{self, DispatchOutcome, ResolverEngine};
use crate::sinks::Sink;

pub struct DispatchContext {
    pub engine: Arc<dyn ResolverEngine>,
    pub failure_sink: Arc<dyn Sink>,
    pub info_sink: Option<Arc<dyn Sink>>,
    pub info_filter: Arc<dyn InfoFilter>,
    pub governor: Arc<dyn Governor>,
    pub directive_key: String,
    pub default_data_source: String,
    pub default_entity_type: String,
    configuration_check_frequency: Duration,
    last_configuration_check: Mutex<Instant>,
    /// Set once a drift reinit has failed; consulted by
    /// `maybe_check_drift` to force a recheck on the very next
    /// dispatch instead of waiting out the rest of the window (spec
    /// 4.4 state diagram: `REINITIALIZING -> IDLE (surface on next
    /// dispatch)`).
    drift_reinit_failed: AtomicBool,
    pub counters: Arc<Counters>,
}

impl DispatchContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        engine: Arc<dyn ResolverEngine>,
        failure_sink: Arc<dyn Sink>,
        info_sink: Option<Arc<dyn Sink>>,
        info_filter: Arc<dyn InfoFilter>,
        governor: Arc<dyn Governor>,
        directive_key: impl Into<String>,
        default_data_source: impl Into<String>,
        default_entity_type: impl Into<String>,
        configuration_check_frequency: Duration,
        counters: Arc<Counters>,
    ) -> Self {
        DispatchContext {
            engine,
            failure_sink,
            info_sink,
            info_filter,
            governor,
            directive_key: directive_key.into(),
            default_data_source: default_data_source.into(),
            default_entity_type: default_entity_type.into(),
            configuration_check_frequency,
            last_configuration_check: Mutex::new(Instant::now()),
            drift_reinit_failed: AtomicBool::new(false),
            counters,
        }
    }

    /// IDLE -> CHECKING transition: only actually queries the
    /// resolver once per `configuration_check_frequency` window,
    /// serialized across workers by the mutex guarding the deadline
    /// (spec 4.4 step 1). A prior reinit failure forces this check
    /// early regardless of the deadline, which is where
    /// `REINITIALIZING -> IDLE (surface on next dispatch)` actually
    /// surfaces.
    async fn maybe_check_drift(&self) {
        let forced_recheck = self.drift_reinit_failed.load(Ordering::SeqCst);
        let mut last_check = self.last_configuration_check.lock().expect("config-check mutex poisoned");
        if !forced_recheck && last_check.elapsed() < self.configuration_check_frequency {
            return;
        }
        *last_check = Instant::now();
        drop(last_check);
        if let Err(e) = self.check_and_reinit_if_drifted() {
            self.drift_reinit_failed.store(true, Ordering::SeqCst);
            log::error!("{}", logmsg::error(0, format!("configuration drift check failed: {e}")));
        }
    }

    /// CHECKING -> (IDLE | REINITIALIZING -> IDLE). Returns whether a
    /// reinit was actually performed, so callers retrying after a
    /// resolver error know whether a retry is worth attempting.
    fn check_and_reinit_if_drifted(&self) -> Result<bool> {
        let active = self.engine.get_active_config_id()?;
        let default = self.engine.get_default_config_id()?;
        if active == default {
            self.drift_reinit_failed.store(false, Ordering::SeqCst);
            return Ok(false);
        }
        log::warn!(
            "{}",
            logmsg::warning(
                logmsg::codes::CONFIGURATION_DRIFT_DETECTED,
                format!("configuration drift detected: active={active} default={default}")
            )
        );
        self.engine.reinit(&default)?;
        self.drift_reinit_failed.store(false, Ordering::SeqCst);
        Ok(true)
    }

    /// Dispatch one record (spec 4.4 steps 2-5). Returns `Ok(())` once
    /// the record has reached a terminal state -- resolved by the
    /// engine, or durably routed to the failure sink. `Err` means the
    /// failure-sink write itself failed, so per spec 7.5 the caller
    /// must not ack the enclosing delivery.
    pub async fn dispatch_record(&self, mut record_obj: Map<String, Value>, default_action: DefaultAction) -> Result<()> {
        self.maybe_check_drift().await;

        if let Err(e) = self.governor.govern() {
            log::warn!("{}", logmsg::warning(0, format!("governor denied dispatch: {e}")));
        }

        let directive = record::extract_directive(&mut record_obj, &self.directive_key);
        let action = match directive {
            DirectiveOutcome::None => default_action.as_action(),
            DirectiveOutcome::Known(action) => action,
            DirectiveOutcome::Unknown(raw_action) => {
                let data_source = record::data_source_of(&record_obj, &self.default_data_source);
                let record_id = record::record_id_of(&record_obj).unwrap_or_default();
                log::warn!(
                    "{}",
                    logmsg::warning(
                        logmsg::codes::POISON_MESSAGE,
                        format!("unknown directive action {raw_action:?} data_source={data_source} record_id={record_id}, routing to failure sink")
                    )
                );
                self.route_to_failure_sink(&record_obj).await?;
                self.counters.record_processed(1);
                return Ok(());
            }
        };

        record::apply_defaults(&mut record_obj, &self.default_data_source, &self.default_entity_type);
        let data_source = record::data_source_of(&record_obj, &self.default_data_source);
        let record_id = record::record_id_of(&record_obj).unwrap_or_default();
        let record_json = record::to_canonical_json(&record_obj);

        match resolver::invoke(self.engine.as_ref(), action, &data_source, &record_id, &record_json) {
            Ok(outcome) => {
                self.publish_info_if_any(outcome).await?;
                self.counters.record_processed(1);
                Ok(())
            }
            Err(resolver_err) => {
                if resolver_err.is_fatal() {
                    return Err(BridgeError::Resolver(resolver_err));
                }
                self.handle_resolver_error(resolver_err, action, &data_source, &record_id, &record_json, &record_obj)
                    .await
            }
        }
    }

    /// Spec 4.4 step 4: "On resolver exception: re-check configuration
    /// drift; if drift is detected, reinitialize and retry the call
    /// exactly once. If it still fails, route the record to the
    /// failure sink."
    async fn handle_resolver_error(
        &self,
        first_error: crate::errors::ResolverError,
        action: Action,
        data_source: &str,
        record_id: &str,
        record_json: &str,
        record_obj: &Map<String, Value>,
    ) -> Result<()> {
        let drifted = self.check_and_reinit_if_drifted().unwrap_or(false);
        if drifted {
            match resolver::invoke(self.engine.as_ref(), action, data_source, record_id, record_json) {
                Ok(outcome) => {
                    self.publish_info_if_any(outcome).await?;
                    self.counters.record_processed(1);
                    return Ok(());
                }
                Err(retry_error) => {
                    log::warn!(
                        "{}",
                        logmsg::warning(
                            logmsg::codes::SENT_TO_FAILURE_SINK,
                            format!("retry after drift reinit still failed for data_source={data_source} record_id={record_id}: {retry_error}")
                        )
                    );
                }
            }
        } else {
            log::warn!(
                "{}",
                logmsg::warning(
                    logmsg::codes::SENT_TO_FAILURE_SINK,
                    format!("resolver error for data_source={data_source} record_id={record_id}: {first_error}")
                )
            );
        }
        self.route_to_failure_sink(record_obj).await?;
        self.counters.record_processed(1);
        Ok(())
    }

    async fn publish_info_if_any(&self, outcome: DispatchOutcome) -> Result<()> {
        let DispatchOutcome::WithInfo(blob) = outcome else {
            return Ok(());
        };
        let Some(filtered) = self.info_filter.filter(&blob) else {
            return Ok(());
        };
        let Some(sink) = &self.info_sink else {
            return Ok(());
        };
        sink.publish(&filtered).await.map_err(BridgeError::Sink)?;
        log::debug!("{}", logmsg::debug(logmsg::codes::SENT_TO_INFO_SINK, "info blob published"));
        Ok(())
    }

    async fn route_to_failure_sink(&self, record_obj: &Map<String, Value>) -> Result<()> {
        let payload = record::to_canonical_json(record_obj);
        self.failure_sink.publish(&payload).await.map_err(BridgeError::Sink)
    }

    /// Spec 4.3 "Parse contract": "If decode fails, the raw body is
    /// forwarded to the failure sink and the delivery is acked." Data
    /// source/record id are reported as the literal `"unparsable"`
    /// (spec 4.4 tie-breaks) by the caller's log line.
    pub async fn route_poison_to_failure_sink(&self, raw: &str) -> Result<()> {
        self.failure_sink.publish(raw).await.map_err(BridgeError::Sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::mock::MockResolver;
    use crate::sinks::NullSink;
    use serde_json::json;

    struct Harness {
        ctx: DispatchContext,
        resolver: Arc<MockResolver>,
    }

    fn harness() -> Harness {
        let resolver = Arc::new(MockResolver::new());
        let ctx = DispatchContext::new(
            resolver.clone() as Arc<dyn ResolverEngine>,
            Arc::new(NullSink) as Arc<dyn Sink>,
            None,
            Arc::new(crate::plugins::IdentityInfoFilter),
            Arc::new(crate::plugins::NoopGovernor),
            "senzingStreamLoader",
            "TEST",
            "GENERIC",
            Duration::from_secs(300),
            Arc::new(Counters::new()),
        );
        Harness { ctx, resolver }
    }

    fn obj(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    #[tokio::test]
    async fn happy_path_calls_add_record() {
        let h = harness();
        let record = obj(json!({"DATA_SOURCE":"A","RECORD_ID":"1","NAME":"x"}));
        h.ctx.dispatch_record(record, DefaultAction::Add).await.unwrap();
        let calls = h.resolver.calls();
        assert_eq!(calls.len(), 1);
        assert!(matches!(&calls[0], crate::resolver::mock::RecordedCall::AddRecord { data_source, record_id, .. } if data_source == "A" && record_id == "1"));
        assert_eq!(h.ctx.counters.processed(), 1);
    }

    #[tokio::test]
    async fn directive_delete_strips_key_and_calls_delete() {
        let h = harness();
        let record = obj(json!({
            "DATA_SOURCE": "A",
            "RECORD_ID": "1",
            "senzingStreamLoader": {"action": "deleteRecord"}
        }));
        h.ctx.dispatch_record(record, DefaultAction::Add).await.unwrap();
        let calls = h.resolver.calls();
        assert!(matches!(&calls[0], crate::resolver::mock::RecordedCall::DeleteRecord { .. }));
    }

    #[tokio::test]
    async fn unknown_directive_routes_to_failure_sink_not_resolver() {
        let h = harness();
        let record = obj(json!({"RECORD_ID":"1","senzingStreamLoader":{"action":"bogus"}}));
        h.ctx.dispatch_record(record, DefaultAction::Add).await.unwrap();
        assert!(h.resolver.calls().is_empty());
        assert_eq!(h.ctx.counters.processed(), 1);
    }

    #[tokio::test]
    async fn with_info_default_action_publishes_to_info_sink() {
        let resolver = Arc::new(MockResolver::with_info_blob(r#"{"AFFECTED_ENTITIES":[1]}"#));
        let captured = Arc::new(std::sync::Mutex::new(Vec::new()));

        struct CapturingSink(Arc<std::sync::Mutex<Vec<String>>>);
        #[async_trait::async_trait]
        impl Sink for CapturingSink {
            async fn publish(&self, payload: &str) -> Result<(), crate::errors::SinkError> {
                self.0.lock().unwrap().push(payload.to_string());
                Ok(())
            }
        }

        let ctx = DispatchContext::new(
            resolver.clone() as Arc<dyn ResolverEngine>,
            Arc::new(NullSink) as Arc<dyn Sink>,
            Some(Arc::new(CapturingSink(captured.clone())) as Arc<dyn Sink>),
            Arc::new(crate::plugins::IdentityInfoFilter),
            Arc::new(crate::plugins::NoopGovernor),
            "senzingStreamLoader",
            "TEST",
            "GENERIC",
            Duration::from_secs(300),
            Arc::new(Counters::new()),
        );

        let record = obj(json!({"DATA_SOURCE":"A","RECORD_ID":"1"}));
        ctx.dispatch_record(record, DefaultAction::AddWithInfo).await.unwrap();
        assert_eq!(captured.lock().unwrap().len(), 1);
        assert_eq!(captured.lock().unwrap()[0], r#"{"AFFECTED_ENTITIES":[1]}"#);
    }

    #[tokio::test]
    async fn resolver_error_without_drift_routes_to_failure_sink() {
        let h = harness();
        h.resolver.fail_next(1);
        let record = obj(json!({"DATA_SOURCE":"A","RECORD_ID":"1"}));
        h.ctx.dispatch_record(record, DefaultAction::Add).await.unwrap();
        assert_eq!(h.ctx.counters.processed(), 1);
        // no successful AddRecord call got recorded (the failing call never appends to `calls`)
        assert!(h.resolver.calls().is_empty());
    }

    #[tokio::test]
    async fn resolver_error_with_drift_retries_once_and_succeeds() {
        let h = harness();
        h.resolver.drift_to("config-2");
        h.resolver.fail_next(1);
        let record = obj(json!({"DATA_SOURCE":"A","RECORD_ID":"1"}));
        h.ctx.dispatch_record(record, DefaultAction::Add).await.unwrap();
        let calls = h.resolver.calls();
        assert!(calls.iter().any(|c| matches!(c, crate::resolver::mock::RecordedCall::Reinit { config_id } if config_id == "config-2")));
        assert!(calls.iter().any(|c| matches!(c, crate::resolver::mock::RecordedCall::AddRecord { .. })));
    }
}
