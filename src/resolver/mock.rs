//! In-memory resolver stand-in used by `docker-acceptance-test` (no
//! vendor library required for a liveness check) and by every test in
//! this crate that exercises the dispatcher end to end.

use std::sync::Mutex;

use crate::errors::ResolverError;
use crate::resolver::{ResolverEngine, ResolverResult};

#[derive(Debug, Clone)]
pub enum RecordedCall {
    AddRecord { data_source: String, record_id: String, record_json: String },
    AddRecordWithInfo { data_source: String, record_id: String, record_json: String },
    DeleteRecord { data_source: String, record_id: String },
    DeleteRecordWithInfo { data_source: String, record_id: String },
    ReevaluateRecord { data_source: String, record_id: String },
    ReevaluateRecordWithInfo { data_source: String, record_id: String },
    Reinit { config_id: String },
}

struct State {
    calls: Vec<RecordedCall>,
    active_config_id: String,
    default_config_id: String,
    initialized: bool,
    /// When set, the next matching call fails once then succeeds,
    /// letting tests exercise the dispatcher's drift-triggered retry
    /// (spec 4.4 step 4).
    fail_next_n_calls: u32,
}

/// A resolver double with a fixed info blob and a knob to simulate
/// configuration drift and transient failures.
pub struct MockResolver {
    state: Mutex<State>,
    info_blob: String,
}

impl MockResolver {
    pub fn new() -> Self {
        MockResolver {
            state: Mutex::new(State {
                calls: Vec::new(),
                active_config_id: "config-1".to_string(),
                default_config_id: "config-1".to_string(),
                initialized: true,
                fail_next_n_calls: 0,
            }),
            info_blob: r#"{"AFFECTED_ENTITIES":[]}"#.to_string(),
        }
    }

    pub fn with_info_blob(info_blob: impl Into<String>) -> Self {
        let mut resolver = Self::new();
        resolver.info_blob = info_blob.into();
        resolver
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().expect("mock lock poisoned").calls.clone()
    }

    /// Simulates the configuration store advancing to a new default
    /// ID while the engine handle is still pinned to the old one.
    pub fn drift_to(&self, new_default_config_id: impl Into<String>) {
        self.state.lock().expect("mock lock poisoned").default_config_id = new_default_config_id.into();
    }

    pub fn fail_next(&self, n: u32) {
        self.state.lock().expect("mock lock poisoned").fail_next_n_calls = n;
    }

    fn maybe_fail(state: &mut State) -> ResolverResult<()> {
        if state.fail_next_n_calls > 0 {
            state.fail_next_n_calls -= 1;
            return Err(ResolverError::Generic("simulated transient failure".to_string()));
        }
        Ok(())
    }
}

impl Default for MockResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolverEngine for MockResolver {
    fn init(&self, _module_name: &str, _config_json: &str, _debug: bool) -> ResolverResult<()> {
        self.state.lock().expect("mock lock poisoned").initialized = true;
        Ok(())
    }

    fn add_record(&self, data_source: &str, record_id: &str, record_json: &str) -> ResolverResult<()> {
        let mut state = self.state.lock().expect("mock lock poisoned");
        if !state.initialized {
            return Err(ResolverError::NotInitialized);
        }
        Self::maybe_fail(&mut state)?;
        state.calls.push(RecordedCall::AddRecord {
            data_source: data_source.to_string(),
            record_id: record_id.to_string(),
            record_json: record_json.to_string(),
        });
        Ok(())
    }

    fn add_record_with_info(&self, data_source: &str, record_id: &str, record_json: &str) -> ResolverResult<String> {
        let mut state = self.state.lock().expect("mock lock poisoned");
        if !state.initialized {
            return Err(ResolverError::NotInitialized);
        }
        Self::maybe_fail(&mut state)?;
        state.calls.push(RecordedCall::AddRecordWithInfo {
            data_source: data_source.to_string(),
            record_id: record_id.to_string(),
            record_json: record_json.to_string(),
        });
        Ok(self.info_blob.clone())
    }

    fn delete_record(&self, data_source: &str, record_id: &str) -> ResolverResult<()> {
        let mut state = self.state.lock().expect("mock lock poisoned");
        if !state.initialized {
            return Err(ResolverError::NotInitialized);
        }
        Self::maybe_fail(&mut state)?;
        state.calls.push(RecordedCall::DeleteRecord {
            data_source: data_source.to_string(),
            record_id: record_id.to_string(),
        });
        Ok(())
    }

    fn delete_record_with_info(&self, data_source: &str, record_id: &str) -> ResolverResult<String> {
        let mut state = self.state.lock().expect("mock lock poisoned");
        if !state.initialized {
            return Err(ResolverError::NotInitialized);
        }
        Self::maybe_fail(&mut state)?;
        state.calls.push(RecordedCall::DeleteRecordWithInfo {
            data_source: data_source.to_string(),
            record_id: record_id.to_string(),
        });
        Ok(self.info_blob.clone())
    }

    fn reevaluate_record(&self, data_source: &str, record_id: &str) -> ResolverResult<()> {
        let mut state = self.state.lock().expect("mock lock poisoned");
        if !state.initialized {
            return Err(ResolverError::NotInitialized);
        }
        Self::maybe_fail(&mut state)?;
        state.calls.push(RecordedCall::ReevaluateRecord {
            data_source: data_source.to_string(),
            record_id: record_id.to_string(),
        });
        Ok(())
    }

    fn reevaluate_record_with_info(&self, data_source: &str, record_id: &str) -> ResolverResult<String> {
        let mut state = self.state.lock().expect("mock lock poisoned");
        if !state.initialized {
            return Err(ResolverError::NotInitialized);
        }
        Self::maybe_fail(&mut state)?;
        state.calls.push(RecordedCall::ReevaluateRecordWithInfo {
            data_source: data_source.to_string(),
            record_id: record_id.to_string(),
        });
        Ok(self.info_blob.clone())
    }

    fn get_active_config_id(&self) -> ResolverResult<String> {
        Ok(self.state.lock().expect("mock lock poisoned").active_config_id.clone())
    }

    fn get_default_config_id(&self) -> ResolverResult<String> {
        Ok(self.state.lock().expect("mock lock poisoned").default_config_id.clone())
    }

    fn reinit(&self, config_id: &str) -> ResolverResult<()> {
        let mut state = self.state.lock().expect("mock lock poisoned");
        state.active_config_id = config_id.to_string();
        state.calls.push(RecordedCall::Reinit {
            config_id: config_id.to_string(),
        });
        Ok(())
    }

    fn stats(&self) -> ResolverResult<String> {
        Ok(r#"{"workload":{"loadedRecords":0}}"#.to_string())
    }

    fn license(&self) -> ResolverResult<String> {
        Ok(r#"{"licenseType":"EVAL","recordLimit":50000}"#.to_string())
    }

    fn version(&self) -> ResolverResult<String> {
        Ok(r#"{"VERSION":"0.0.0-mock"}"#.to_string())
    }

    fn prime_engine(&self) -> ResolverResult<()> {
        Ok(())
    }

    fn destroy(&self) -> ResolverResult<()> {
        self.state.lock().expect("mock lock poisoned").initialized = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_add_record_calls() {
        let resolver = MockResolver::new();
        resolver.add_record("A", "1", "{}").unwrap();
        let calls = resolver.calls();
        assert_eq!(calls.len(), 1);
    }

    #[test]
    fn destroy_then_call_is_not_initialized() {
        let resolver = MockResolver::new();
        resolver.destroy().unwrap();
        match resolver.add_record("A", "1", "{}") {
            Err(ResolverError::NotInitialized) => {}
            other => panic!("expected NotInitialized, got {other:?}"),
        }
    }

    #[test]
    fn fail_next_fails_exactly_that_many_times() {
        let resolver = MockResolver::new();
        resolver.fail_next(1);
        assert!(resolver.add_record("A", "1", "{}").is_err());
        assert!(resolver.add_record("A", "1", "{}").is_ok());
    }

    #[test]
    fn drift_changes_default_config_id_only() {
        let resolver = MockResolver::new();
        assert_eq!(resolver.get_active_config_id().unwrap(), "config-1");
        assert_eq!(resolver.get_default_config_id().unwrap(), "config-1");
        resolver.drift_to("config-2");
        assert_eq!(resolver.get_active_config_id().unwrap(), "config-1");
        assert_eq!(resolver.get_default_config_id().unwrap(), "config-2");
    }

    #[test]
    fn reinit_updates_active_config_id() {
        let resolver = MockResolver::new();
        resolver.drift_to("config-2");
        resolver.reinit("config-2").unwrap();
        assert_eq!(resolver.get_active_config_id().unwrap(), "config-2");
    }
}
