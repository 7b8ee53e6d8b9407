//! Source consumers (spec 4.3): each backend implements the same
//! lifecycle -- *connect -> loop { fetch -> parse -> per-record
//! dispatch -> ack } -> on fault { classify -> reconnect or exit }* --
//! around the shared `process_envelope` parse/normalize/dispatch path.

pub mod azure;
pub mod kafka;
pub mod rabbitmq;
pub mod sqs;
pub mod url_stdin;

use crate::dispatcher::DispatchContext;
use crate::errors::Result;
use crate::logmsg;
use crate::record::{self, DefaultAction, ParsedBody};

/// Parse one message body and dispatch every record it contains, in
/// order (spec 4.3 "Parse contract" / "Normalize contract"). Returns
/// `Ok(())` once every record in the envelope has reached a terminal
/// state and the delivery is safe to ack; `Err` means a failure-sink
/// write failed partway through, so spec 4.3's ack discipline ("the
/// delivery is not acked, so the broker's native retry... re-delivers
/// it") applies and the caller must not ack.
pub async fn process_envelope(ctx: &DispatchContext, raw: &str, default_action: DefaultAction) -> Result<()> {
    match record::parse_message_body(raw) {
        ParsedBody::Poison => {
            log::warn!(
                "{}",
                logmsg::warning(
                    logmsg::codes::POISON_MESSAGE,
                    format!(
                        "undecodable message body, data_source={ds} record_id={id}",
                        ds = record::UNPARSABLE,
                        id = record::UNPARSABLE
                    )
                )
            );
            ctx.route_poison_to_failure_sink(raw).await?;
            Ok(())
        }
        ParsedBody::Single(obj) => {
            ctx.counters.record_queued(1);
            ctx.dispatch_record(obj, default_action).await
        }
        ParsedBody::Sequence(records) => {
            ctx.counters.record_queued(records.len() as u64);
            for record_obj in records {
                ctx.dispatch_record(record_obj, default_action).await?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::DispatchContext;
    use crate::metrics::Counters;
    use crate::plugins::{IdentityInfoFilter, NoopGovernor};
    use crate::resolver::mock::MockResolver;
    use crate::resolver::ResolverEngine;
    use crate::sinks::{NullSink, Sink};
    use std::sync::Arc;
    use std::time::Duration;

    fn ctx_with(resolver: Arc<MockResolver>, failure_sink: Arc<dyn Sink>) -> DispatchContext {
        DispatchContext::new(
            resolver as Arc<dyn ResolverEngine>,
            failure_sink,
            None,
            Arc::new(IdentityInfoFilter),
            Arc::new(NoopGovernor),
            "senzingStreamLoader",
            "TEST",
            "GENERIC",
            Duration::from_secs(300),
            Arc::new(Counters::new()),
        )
    }

    #[tokio::test]
    async fn array_message_dispatches_each_record_in_order() {
        let resolver = Arc::new(MockResolver::new());
        let ctx = ctx_with(resolver.clone(), Arc::new(NullSink));
        process_envelope(&ctx, r#"[{"DATA_SOURCE":"A","RECORD_ID":"1"},{"DATA_SOURCE":"A","RECORD_ID":"2"}]"#, DefaultAction::Add)
            .await
            .unwrap();
        let calls = resolver.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(ctx.counters.queued(), 2);
        assert_eq!(ctx.counters.processed(), 2);
    }

    #[tokio::test]
    async fn poison_body_routes_whole_payload_to_failure_sink() {
        struct CapturingSink(std::sync::Mutex<Vec<String>>);
        #[async_trait::async_trait]
        impl Sink for CapturingSink {
            async fn publish(&self, payload: &str) -> Result<(), crate::errors::SinkError> {
                self.0.lock().unwrap().push(payload.to_string());
                Ok(())
            }
        }
        let failure_sink = Arc::new(CapturingSink(std::sync::Mutex::new(Vec::new())));
        let resolver = Arc::new(MockResolver::new());
        let ctx = ctx_with(resolver.clone(), failure_sink.clone());
        process_envelope(&ctx, "not json", DefaultAction::Add).await.unwrap();
        assert!(resolver.calls().is_empty());
        assert_eq!(ctx.counters.queued(), 0);
        assert_eq!(ctx.counters.processed(), 0);
        assert_eq!(failure_sink.0.lock().unwrap().as_slice(), ["not json"]);
    }
}
