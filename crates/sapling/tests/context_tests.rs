//! Tests for contexts: permissions, registrations and limits

use std::sync::Arc;

use sapling::event::{BasicEventSource, EventSource};
use sapling::registry::{self, EventSourceFactory};
use sapling::{Context, ContextConfig, Limit, Pattern, Permission, RuntimeError};

fn ctx_with(permissions: Vec<Permission>) -> Context {
    Context::new(ContextConfig::new().with_permissions(permissions)).unwrap()
}

#[test]
fn test_permission_denial() {
    let ctx = ctx_with(vec![Permission::fs_read("/a/*")]);
    match ctx.check_has_permission(&Permission::fs_write("/a/b")) {
        Err(RuntimeError::NotAllowed(denied)) => assert_eq!(denied, Permission::fs_write("/a/b")),
        other => panic!("expected NotAllowed, got {:?}", other),
    }

    let child = ctx.child_without(&[Permission::fs_write("/a/*")]).unwrap();
    assert!(matches!(
        child.check_has_permission(&Permission::fs_write("/a/b")),
        Err(RuntimeError::NotAllowed(_))
    ));
}

#[test]
fn test_child_without_write_keeps_read() {
    let ctx = ctx_with(vec![Permission::fs_read("/a/*"), Permission::fs_write("/a/*")]);
    ctx.check_has_permission(&Permission::fs_write("/a/file")).unwrap();

    let child = ctx.child_without(&[Permission::fs_write("/a/*")]).unwrap();
    assert!(child
        .check_has_permission(&Permission::fs_write("/a/file"))
        .is_err());
    child
        .check_has_permission(&Permission::fs_read("/a/file"))
        .unwrap();
}

#[test]
fn test_named_pattern_registered_once() {
    let ctx = ctx_with(vec![]);
    ctx.add_named_pattern("user-id", Pattern::int()).unwrap();
    assert!(matches!(
        ctx.add_named_pattern("user-id", Pattern::str()),
        Err(RuntimeError::NonUniqueRegistration { .. })
    ));
    assert_eq!(ctx.resolve_named_pattern("user-id"), Some(Pattern::int()));
}

#[test]
fn test_host_alias_registered_once() {
    let ctx = ctx_with(vec![]);
    let host = sapling::value::Host::new("https://example.com");
    ctx.add_host_alias("ex", host.clone()).unwrap();
    assert!(ctx.add_host_alias("ex", host.clone()).is_err());
    assert_eq!(ctx.resolve_host_alias("ex"), Some(host));
}

#[test]
fn test_event_source_factory_registered_once() {
    let factory: EventSourceFactory =
        Arc::new(|_, _| Ok(Arc::new(BasicEventSource::new()) as Arc<dyn EventSource>));
    registry::try_register_event_source_factory("ctxtest", factory.clone()).unwrap();
    assert!(matches!(
        registry::try_register_event_source_factory("ctxtest", factory),
        Err(RuntimeError::NonUniqueRegistration { .. })
    ));
}

#[test]
fn test_total_limit() {
    let ctx = Context::new(ContextConfig::new().with_limits(vec![Limit::total("fs/new-file", 3)]))
        .unwrap();
    ctx.try_take("fs/new-file", 3).unwrap();
    assert!(matches!(
        ctx.try_take("fs/new-file", 1),
        Err(RuntimeError::LimitReached(_))
    ));
    ctx.give_back("fs/new-file", 1);
    ctx.try_take("fs/new-file", 1).unwrap();
}

#[test]
#[should_panic]
fn test_take_on_exhausted_total_limit_panics() {
    let ctx = Context::new(ContextConfig::new().with_limits(vec![Limit::total("http/request", 1)]))
        .unwrap();
    ctx.take("http/request", 1).unwrap();
    let _ = ctx.take("http/request", 1);
}

#[test]
fn test_cancellation() {
    let ctx = ctx_with(vec![]);
    let child = ctx.bound_child().unwrap();
    assert!(!child.is_done());
    ctx.cancel();
    assert!(ctx.is_done());
    assert!(child.is_done());
    assert!(ctx.done().recv().is_err());
    assert!(matches!(ctx.bound_child(), Err(RuntimeError::DoneContext)));
}
