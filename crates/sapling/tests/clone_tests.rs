//! Tests for structural cloning and equality

use std::sync::Arc;

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use sapling::value::{ByteSlice, List, ListData, Object, Path, RuneSlice, Tuple};
use sapling::{Context, ContextConfig, RuntimeError, Value};

fn atomic_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Nil),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        any::<u8>().prop_map(Value::Byte),
        any::<char>().prop_map(Value::Rune),
        (-1.0e12f64..1.0e12).prop_map(Value::Float),
        "[a-z]{0,12}".prop_map(Value::string),
        "(/[a-z]{1,5}){1,4}".prop_map(|s| Value::Path(Path::new(s))),
    ]
}

proptest! {
    #[test]
    fn prop_clone_of_atomic_value_is_equal(v in atomic_value()) {
        let copy = v.deep_clone().unwrap();
        prop_assert_eq!(copy, v);
    }

    #[test]
    fn prop_clone_of_int_list_is_equal_and_distinct(ints in proptest::collection::vec(any::<i64>(), 0..16)) {
        let v = Value::int_list(ints);
        let copy = v.deep_clone().unwrap();
        prop_assert_ne!(copy.transient_id(), v.transient_id());
        prop_assert_eq!(copy, v);
    }
}

#[test]
fn test_self_referencing_object() {
    let ctx = Context::new(ContextConfig::new()).unwrap();
    let obj = Object::from_pairs([("name", Value::string("loop"))]);
    obj.set_prop(&ctx, "me", Value::Object(obj.clone())).unwrap();

    let Value::Object(copy) = Value::Object(obj.clone()).deep_clone().unwrap() else {
        panic!("expected an object");
    };
    let Some(Value::Object(me)) = copy.prop("me") else {
        panic!("expected an object property");
    };
    assert!(Arc::ptr_eq(&me, &copy));
    assert!(!Arc::ptr_eq(&me, &obj));
    assert_eq!(copy.prop("name"), Some(Value::string("loop")));
}

#[test]
fn test_constrained_values_refuse_cloning() {
    let constrained = vec![
        Value::List(List::with_constraint(ListData::Ints(vec![1, 2]), 7)),
        Value::Tuple(Arc::new(Tuple::with_constraint(vec![Value::Int(1)], 7).unwrap())),
        Value::RuneSlice(RuneSlice::with_constraint(vec!['a', 'b'], 7)),
        Value::ByteSlice(ByteSlice::with_constraint(vec![0x61], 7)),
    ];
    for v in constrained {
        assert!(matches!(v.deep_clone(), Err(RuntimeError::NotClonable)));
    }
}

#[test]
fn test_nested_composites_are_copied() {
    let ctx = Context::new(ContextConfig::new()).unwrap();
    let inner = Value::list(vec![Value::Int(1)]);
    let outer = Value::object(vec![("inner", inner.clone())]);
    let copy = outer.deep_clone().unwrap();
    assert_eq!(copy, outer);

    let Value::List(list) = inner else {
        panic!("expected a list");
    };
    list.append(&ctx, Value::Int(2)).unwrap();
    assert_ne!(copy, outer);
}
