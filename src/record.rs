//! Record and directive types, and the parse/normalize contracts every
//! source consumer shares (spec section 4.3).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The resolver operation a directive selects. A closed enumeration,
/// per REDESIGN FLAGS: unknown action strings route to the failure
/// sink instead of falling through a dynamic attribute lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    AddRecord,
    AddRecordWithInfo,
    DeleteRecord,
    DeleteRecordWithInfo,
    ReevaluateRecord,
    ReevaluateRecordWithInfo,
}

impl Action {
    pub fn from_str_loose(s: &str) -> Option<Action> {
        match s {
            "addRecord" => Some(Action::AddRecord),
            "addRecordWithInfo" => Some(Action::AddRecordWithInfo),
            "deleteRecord" => Some(Action::DeleteRecord),
            "deleteRecordWithInfo" => Some(Action::DeleteRecordWithInfo),
            "reevaluateRecord" => Some(Action::ReevaluateRecord),
            "reevaluateRecordWithInfo" => Some(Action::ReevaluateRecordWithInfo),
            _ => None,
        }
    }

    pub fn returns_info(&self) -> bool {
        matches!(
            self,
            Action::AddRecordWithInfo | Action::DeleteRecordWithInfo | Action::ReevaluateRecordWithInfo
        )
    }
}

/// The default action taken when no directive is present, which
/// differs between plain and "withinfo" consumer flavors (spec 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultAction {
    Add,
    AddWithInfo,
}

impl DefaultAction {
    pub fn as_action(self) -> Action {
        match self {
            DefaultAction::Add => Action::AddRecord,
            DefaultAction::AddWithInfo => Action::AddRecordWithInfo,
        }
    }
}

/// Outcome of extracting the top-level directive key from a record
/// object. `Unknown` carries the raw string so the caller can log it
/// before routing to the failure sink.
pub enum DirectiveOutcome {
    None,
    Known(Action),
    Unknown(String),
}

/// Strip the directive key (if present) and return what action it
/// names. The directive key itself is always removed from `record`,
/// matching spec 3: "The directive is stripped from the record before
/// dispatch."
pub fn extract_directive(record: &mut Map<String, Value>, directive_key: &str) -> DirectiveOutcome {
    let Some(directive_value) = record.remove(directive_key) else {
        return DirectiveOutcome::None;
    };
    let action_str = directive_value
        .get("action")
        .and_then(Value::as_str)
        .unwrap_or("");
    match Action::from_str_loose(action_str) {
        Some(action) => DirectiveOutcome::Known(action),
        None => DirectiveOutcome::Unknown(action_str.to_string()),
    }
}

/// Insert the configured `DATA_SOURCE` / `ENTITY_TYPE` defaults when a
/// record doesn't carry its own, per spec 4.3 "Normalize contract".
pub fn apply_defaults(record: &mut Map<String, Value>, default_data_source: &str, default_entity_type: &str) {
    if !record.contains_key("DATA_SOURCE") {
        record.insert("DATA_SOURCE".to_string(), Value::String(default_data_source.to_string()));
    }
    if !record.contains_key("ENTITY_TYPE") {
        record.insert("ENTITY_TYPE".to_string(), Value::String(default_entity_type.to_string()));
    }
}

/// Re-serialize a record object with keys sorted, matching the
/// original's `json.dumps(..., sort_keys=True)` so downstream
/// consumers (failure/info sinks, the resolver) see canonical JSON.
pub fn to_canonical_json(record: &Map<String, Value>) -> String {
    // serde_json::Map is a BTreeMap by default (the "preserve_order"
    // feature is not enabled here), so iteration is already key-sorted.
    serde_json::to_string(&Value::Object(record.clone())).expect("object serializes")
}

/// The outcome of decoding one message body, per spec 4.3 "Parse
/// contract": a message is either a single record object, a sequence
/// of record objects (processed in order, acked atomically), or
/// something else entirely (routed whole to the failure sink).
pub enum ParsedBody {
    Single(Map<String, Value>),
    Sequence(Vec<Map<String, Value>>),
    Poison,
}

pub fn parse_message_body(raw: &str) -> ParsedBody {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(obj)) => ParsedBody::Single(obj),
        Ok(Value::Array(items)) => {
            let mut records = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::Object(obj) => records.push(obj),
                    _ => return ParsedBody::Poison,
                }
            }
            ParsedBody::Sequence(records)
        }
        _ => ParsedBody::Poison,
    }
}

/// Compound-key extraction that tolerates non-string `RECORD_ID`
/// values by coercing to string (spec 4.4 "Tie-breaks and edge
/// cases"). A missing `RECORD_ID` is valid -- the resolver accepts a
/// null key -- and is represented as `None`.
pub fn record_id_of(record: &Map<String, Value>) -> Option<String> {
    match record.get("RECORD_ID") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    }
}

pub fn data_source_of(record: &Map<String, Value>, default_data_source: &str) -> String {
    match record.get("DATA_SOURCE") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => default_data_source.to_string(),
    }
}

/// Literal placeholders logged in place of data-source/record-id for
/// a record that failed to parse at all (spec 4.4).
pub const UNPARSABLE: &str = "unparsable";

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn parse_single_object() {
        match parse_message_body(r#"{"DATA_SOURCE":"A","RECORD_ID":"1"}"#) {
            ParsedBody::Single(_) => {}
            _ => panic!("expected single record"),
        }
    }

    #[test]
    fn parse_array_expands_in_order() {
        match parse_message_body(r#"[{"RECORD_ID":"1"},{"RECORD_ID":"2"}]"#) {
            ParsedBody::Sequence(records) => {
                assert_eq!(records.len(), 2);
                assert_eq!(record_id_of(&records[0]), Some("1".to_string()));
                assert_eq!(record_id_of(&records[1]), Some("2".to_string()));
            }
            _ => panic!("expected sequence"),
        }
    }

    #[test]
    fn non_object_non_array_is_poison() {
        match parse_message_body("42") {
            ParsedBody::Poison => {}
            _ => panic!("expected poison"),
        }
        match parse_message_body("not json") {
            ParsedBody::Poison => {}
            _ => panic!("expected poison"),
        }
    }

    #[test]
    fn array_with_non_object_element_is_poison() {
        match parse_message_body(r#"[{"RECORD_ID":"1"}, 7]"#) {
            ParsedBody::Poison => {}
            _ => panic!("expected poison"),
        }
    }

    #[test]
    fn defaults_only_applied_when_absent() {
        let mut record = obj(json!({"RECORD_ID": "1"}));
        apply_defaults(&mut record, "TEST_DS", "GENERIC");
        assert_eq!(record.get("DATA_SOURCE").unwrap(), "TEST_DS");
        assert_eq!(record.get("ENTITY_TYPE").unwrap(), "GENERIC");

        let mut explicit = obj(json!({"DATA_SOURCE": "OTHER", "ENTITY_TYPE": "PERSON"}));
        apply_defaults(&mut explicit, "TEST_DS", "GENERIC");
        assert_eq!(explicit.get("DATA_SOURCE").unwrap(), "OTHER");
        assert_eq!(explicit.get("ENTITY_TYPE").unwrap(), "PERSON");
    }

    #[test]
    fn directive_is_stripped_and_classified() {
        let mut record = obj(json!({
            "RECORD_ID": "1",
            "senzingStreamLoader": {"action": "deleteRecord"}
        }));
        match extract_directive(&mut record, "senzingStreamLoader") {
            DirectiveOutcome::Known(Action::DeleteRecord) => {}
            _ => panic!("expected deleteRecord"),
        }
        assert!(!record.contains_key("senzingStreamLoader"));
    }

    #[test]
    fn unknown_directive_action_is_reported() {
        let mut record = obj(json!({"senzingStreamLoader": {"action": "bogus"}}));
        match extract_directive(&mut record, "senzingStreamLoader") {
            DirectiveOutcome::Unknown(action) => assert_eq!(action, "bogus"),
            _ => panic!("expected unknown"),
        }
    }

    #[test]
    fn record_id_coerces_non_string_values() {
        let record = obj(json!({"RECORD_ID": 42}));
        assert_eq!(record_id_of(&record), Some("42".to_string()));
    }

    #[test]
    fn canonical_json_has_sorted_keys() {
        let record = obj(json!({"Z": 1, "A": 2, "M": 3}));
        let s = to_canonical_json(&record);
        assert_eq!(s, r#"{"A":2,"M":3,"Z":1}"#);
    }
}
