//! Tests for the process-wide registry. Kept in their own binary since
//! `reset` clears every registration.

use std::sync::Arc;

use sapling::event::{new_event_source, BasicEventSource, EventSource};
use sapling::registry::{self, ContentParser, EventSourceFactory};
use sapling::resource;
use sapling::{Context, ContextConfig, Pattern, RuntimeError, Value};

#[test]
fn test_reset_clears_registrations() {
    let factory: EventSourceFactory =
        Arc::new(|_, _| Ok(Arc::new(BasicEventSource::new()) as Arc<dyn EventSource>));
    registry::register_event_source_factory("file", factory.clone());
    let parser: ContentParser = Arc::new(|content| Ok(Value::Int(content.len() as i64)));
    registry::register_content_parser("application/x-size", parser.clone());
    let constraint = registry::register_constraint(Pattern::int());

    let ctx = Context::new(ContextConfig::new()).unwrap();
    assert!(new_event_source(&ctx, &Value::path("/x")).is_ok());
    assert_eq!(
        resource::parse_content("application/x-size", b"abc").unwrap(),
        Value::Int(3)
    );

    registry::reset();

    assert!(matches!(
        new_event_source(&ctx, &Value::path("/x")),
        Err(RuntimeError::NoEventSourceFactory(_))
    ));
    assert!(matches!(
        resource::parse_content("application/x-size", b"abc"),
        Err(RuntimeError::ContentTypeParserNotFound(_))
    ));
    assert!(registry::constraint(constraint).is_none());

    registry::try_register_event_source_factory("file", factory).unwrap();
    registry::try_register_content_parser("application/x-size", parser).unwrap();
    assert!(registry::register_constraint(Pattern::int()) > constraint);
}
