//! The resolver facade (spec 4.2): a narrow typed wrapper around the
//! opaque entity-resolution engine library. Hides whichever concrete
//! binding is in use (FFI or, in tests, an in-memory stand-in) behind
//! one trait so the dispatcher never sees the difference.

pub mod ffi;
pub mod mock;

use crate::errors::ResolverError;

pub type ResolverResult<T> = std::result::Result<T, ResolverError>;

/// Everything the dispatcher needs from the engine. `*_with_info`
/// variants return the info blob as a JSON string (spec 4.2: "All
/// `*WithInfo` calls return a JSON string").
pub trait ResolverEngine: Send + Sync {
    fn init(&self, module_name: &str, config_json: &str, debug: bool) -> ResolverResult<()>;

    fn add_record(&self, data_source: &str, record_id: &str, record_json: &str) -> ResolverResult<()>;

    fn add_record_with_info(&self, data_source: &str, record_id: &str, record_json: &str) -> ResolverResult<String>;

    fn delete_record(&self, data_source: &str, record_id: &str) -> ResolverResult<()>;

    fn delete_record_with_info(&self, data_source: &str, record_id: &str) -> ResolverResult<String>;

    fn reevaluate_record(&self, data_source: &str, record_id: &str) -> ResolverResult<()>;

    fn reevaluate_record_with_info(&self, data_source: &str, record_id: &str) -> ResolverResult<String>;

    /// The configuration ID the engine handle currently has loaded.
    fn get_active_config_id(&self) -> ResolverResult<String>;

    /// The configuration store's current default ID. Compared against
    /// `get_active_config_id` by the dispatcher's drift check (spec
    /// 4.4 step 1, spec 3 "Active resolver configuration").
    fn get_default_config_id(&self) -> ResolverResult<String>;

    /// Reinitialize the engine against a (possibly new) config ID.
    fn reinit(&self, config_id: &str) -> ResolverResult<()>;

    /// Sorted-key JSON stats blob, logged by the monitor (spec 4.6c).
    fn stats(&self) -> ResolverResult<String>;

    /// License details, re-logged by the monitor on a configurable
    /// period (spec 4.6d, SPEC_FULL B.3 "License re-logging").
    fn license(&self) -> ResolverResult<String>;

    /// Engine/library version string (spec 1: "the resolver itself...
    /// exposing... license, version, diagnostics").
    fn version(&self) -> ResolverResult<String>;

    /// Warms internal caches ahead of the first dispatch; also used
    /// standalone by `docker-acceptance-test` (SPEC_FULL B.1).
    fn prime_engine(&self) -> ResolverResult<()>;

    fn destroy(&self) -> ResolverResult<()>;
}

/// Dispatches a resolver call by action, used by the dispatcher so it
/// never matches on `Action` directly against the trait's many
/// differently-shaped methods (spec 9: "closed enumeration of actions
/// mapped to handler functions").
pub enum DispatchOutcome {
    Handled,
    WithInfo(String),
}

pub fn invoke(
    engine: &dyn ResolverEngine,
    action: crate::record::Action,
    data_source: &str,
    record_id: &str,
    record_json: &str,
) -> ResolverResult<DispatchOutcome> {
    use crate::record::Action;
    match action {
        Action::AddRecord => {
            engine.add_record(data_source, record_id, record_json)?;
            Ok(DispatchOutcome::Handled)
        }
        Action::AddRecordWithInfo => {
            let info = engine.add_record_with_info(data_source, record_id, record_json)?;
            Ok(DispatchOutcome::WithInfo(info))
        }
        Action::DeleteRecord => {
            engine.delete_record(data_source, record_id)?;
            Ok(DispatchOutcome::Handled)
        }
        Action::DeleteRecordWithInfo => {
            let info = engine.delete_record_with_info(data_source, record_id)?;
            Ok(DispatchOutcome::WithInfo(info))
        }
        Action::ReevaluateRecord => {
            engine.reevaluate_record(data_source, record_id)?;
            Ok(DispatchOutcome::Handled)
        }
        Action::ReevaluateRecordWithInfo => {
            let info = engine.reevaluate_record_with_info(data_source, record_id)?;
            Ok(DispatchOutcome::WithInfo(info))
        }
    }
}
