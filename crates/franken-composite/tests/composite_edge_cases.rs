//! Edge cases for composites: reentrant overrides, identity-based removal,
//! accessor and symbol keys, audit events, snapshots and options loading.

use std::cell::RefCell;
use std::rc::Rc;

use frankenengine_composite::error::{REFUSED_NOT_EXTENSIBLE, REFUSED_PRIMARY_REMOVAL};
use frankenengine_composite::events::{
    COMPONENT_BUILDER, COMPONENT_DISPATCHER, COMPONENT_MODIFIER, OUTCOME_DEFAULT,
    OUTCOME_OVERRIDE, OUTCOME_REFUSED,
};
use frankenengine_composite::{
    Composite, CompositeBuilder, CompositeError, CompositeEvent, CompositeModifier,
    CompositeOptions, CompositeSnapshot, NativeFunction, PropertyDescriptor, PropertyKey,
    Reflect, SymbolId, Target, TrapKind, TrapTable, Value,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn compose(options: CompositeOptions, initial: Vec<Target>) -> (Composite, CompositeModifier) {
    CompositeBuilder::new(options)
        .initial_targets(initial)
        .build()
        .expect("build composite")
}

fn plain() -> (Composite, CompositeModifier) {
    compose(CompositeOptions::default(), Vec::new())
}

fn dispatcher_events(composite: &Composite) -> Vec<CompositeEvent> {
    composite
        .drain_events()
        .into_iter()
        .filter(|e| e.component == COMPONENT_DISPATCHER)
        .collect()
}

// ===========================================================================
// 1. Construction
// ===========================================================================

#[test]
fn neither_initial_form_builds_empty_composite() {
    let (c, m) = plain();
    assert!(c.own_keys().is_empty());
    assert_eq!(m.get_all_targets().len(), 1);
    assert!(c.is_extensible());
}

#[test]
fn conflicting_initial_forms_are_rejected() {
    let err = CompositeBuilder::new(CompositeOptions::default())
        .initial_target(Target::new())
        .initial_targets(Vec::new())
        .build()
        .expect_err("both forms");
    assert_eq!(err, CompositeError::ConflictingInitialTargets);
    assert_eq!(err.error_code(), "FE-COMPOSITE-0001");
}

#[test]
fn options_load_from_json() {
    let options = CompositeOptions::from_json(
        r#"{"is_callable": true, "is_not_extensible": true, "trace_id": "trace-json"}"#,
    )
    .expect("options");
    let (c, _) = compose(options, Vec::new());
    assert!(c.is_callable());
    assert!(!c.is_extensible());
    assert_eq!(c.trace_id(), "trace-json");
}

#[test]
fn options_reject_non_object_json() {
    let err = CompositeOptions::from_json("[1, 2]").expect_err("not an object");
    assert!(matches!(err, CompositeError::InvalidOptions { .. }));
}

// ===========================================================================
// 2. Identity and removal
// ===========================================================================

#[test]
fn structurally_equal_targets_are_distinct() {
    let (c, m) = plain();
    let a = Target::from_entries([("k", 1)]);
    let twin = Target::from_entries([("k", 1)]);
    m.add_fallback_target(a.clone());
    assert!(!m.remove_target(&twin));
    assert!(m.remove_target(&a));
    assert!(!c.has("k"));
}

#[test]
fn same_handle_added_twice_is_removed_one_at_a_time() {
    let (c, m) = plain();
    let t = Target::from_entries([("k", 1)]);
    m.add_fallback_target(t.clone());
    m.add_override_target(t.clone());
    assert!(m.remove_target(&t));
    assert!(c.has("k"));
    assert!(m.remove_target(&t));
    assert!(!c.has("k"));
    assert!(!m.remove_target(&t));
}

#[test]
fn primary_removal_is_refused() {
    let (c, m) = plain();
    c.set("k", 1);
    assert!(!m.remove_target(&c.primary_target()));
    assert_eq!(c.get("k"), Value::Int(1));
    let refused = c
        .drain_events()
        .into_iter()
        .find(|e| e.outcome == OUTCOME_REFUSED)
        .expect("refusal event");
    assert_eq!(refused.component, COMPONENT_MODIFIER);
    assert_eq!(refused.error_code.as_deref(), Some(REFUSED_PRIMARY_REMOVAL));
}

#[test]
fn modifier_hands_back_the_same_composite() {
    let (c, m) = plain();
    m.composite().set("k", "via modifier handle");
    assert_eq!(c.get("k"), Value::from("via modifier handle"));
}

// ===========================================================================
// 3. Reentrancy
// ===========================================================================

#[test]
fn get_override_reads_other_keys_through_composite() {
    let (c, m) = compose(
        CompositeOptions::default(),
        vec![Target::from_entries([("first", "Ada"), ("last", "Lovelace")])],
    );
    m.add_proxy_handler_override(TrapTable::new().on_get(|composite, key| {
        if key.to_string() == "full" {
            let first = Reflect::get(composite, &PropertyKey::from("first"));
            let last = Reflect::get(composite, &PropertyKey::from("last"));
            return Value::from(format!("{first} {last}"));
        }
        Reflect::get(composite, key)
    }));
    assert_eq!(c.get("full"), Value::from("Ada Lovelace"));
    assert_eq!(c.get("first"), Value::from("Ada"));
}

#[test]
fn override_may_dispatch_through_the_composite_itself() {
    let (c, m) = plain();
    m.add_proxy_handler_override(TrapTable::new().on_has(|composite, key| {
        !composite.get(key).is_undefined()
    }));
    c.set("present", 1);
    assert!(c.has("present"));
    assert!(!c.has("absent"));
}

#[test]
fn getter_may_read_the_composite() {
    let (c, _) = plain();
    let handle = Rc::new(RefCell::new(None::<Composite>));
    let inner = Rc::clone(&handle);
    let getter = NativeFunction::new("double", move |_| {
        let composite = inner.borrow().clone();
        match composite.map(|c| c.get("base")) {
            Some(Value::Int(n)) => Value::Int(n * 2),
            _ => Value::Undefined,
        }
    });
    *handle.borrow_mut() = Some(c.clone());
    c.set("base", 21);
    assert!(c.define_property("double", PropertyDescriptor::getter(getter)));
    assert_eq!(c.get("double"), Value::Int(42));
    // The getter keeps the composite alive through the handle.
    handle.borrow_mut().take();
}

#[test]
fn override_may_restructure_the_composite() {
    let (c, m) = plain();
    let modifier = m.clone();
    m.add_proxy_handler_override(TrapTable::new().on_define_property(move |_, key, desc| {
        let layer = Target::new();
        layer.define_own_property(key, desc.clone());
        modifier.add_override_target(layer);
        true
    }));
    assert!(c.define_property("k", PropertyDescriptor::data(1)));
    assert_eq!(c.get("k"), Value::Int(1));
    assert!(c.primary_target().is_empty());
    assert_eq!(m.get_all_targets().len(), 2);
}

// ===========================================================================
// 4. Keys and descriptors
// ===========================================================================

#[test]
fn symbol_keys_merge_and_sort_last() {
    let sym = PropertyKey::from(SymbolId(9));
    let layer = Target::new();
    layer.define_own_property(sym.clone(), PropertyDescriptor::data("symbolic"));
    layer.set("name", 1);
    layer.set(1u32, 1);
    let (c, _) = compose(CompositeOptions::default(), vec![layer]);
    assert_eq!(c.get(sym.clone()), Value::from("symbolic"));
    assert_eq!(
        c.own_keys(),
        vec![PropertyKey::from("1"), PropertyKey::from("name"), sym]
    );
}

#[test]
fn descriptor_comes_from_winning_layer() {
    let frozen = Target::new();
    frozen.define_own_property("k", PropertyDescriptor::data_frozen("frozen"));
    let (c, m) = compose(CompositeOptions::default(), vec![frozen]);
    m.add_fallback_target(Target::from_entries([("k", "loose")]));
    let desc = c.get_own_property_descriptor("k").expect("descriptor");
    assert!(!desc.is_writable());
    assert_eq!(desc.value(), Some(&Value::from("frozen")));
}

#[test]
fn non_writable_layer_value_can_still_be_shadowed_by_set() {
    let frozen = Target::new();
    frozen.define_own_property("k", PropertyDescriptor::data_frozen(1));
    let (c, _) = compose(CompositeOptions::default(), vec![frozen.clone()]);
    assert!(c.set("k", 2));
    assert_eq!(c.get("k"), Value::Int(2));
    assert_eq!(frozen.get("k"), Some(Value::Int(1)));
}

#[test]
fn accessor_without_getter_reads_undefined() {
    let (c, _) = plain();
    let desc = PropertyDescriptor::Accessor {
        get: None,
        set: None,
        enumerable: true,
        configurable: true,
    };
    assert!(c.define_property("write_only", desc));
    assert!(c.has("write_only"));
    assert_eq!(c.get("write_only"), Value::Undefined);
    assert!(!c.set("write_only", 1));
}

#[test]
fn reads_walk_multi_level_prototype_chain() {
    let base = Target::from_entries([("deep", "base")]);
    let mid = Target::with_prototype(Some(base));
    let (c, _) = plain();
    c.set_prototype_of(Some(mid));
    assert_eq!(c.get("deep"), Value::from("base"));
    assert!(c.has("deep"));
    assert_eq!(c.get("missing"), Value::Undefined);
    assert!(!c.has("missing"));
}

// ===========================================================================
// 5. Audit events
// ===========================================================================

#[test]
fn each_trap_call_emits_one_dispatcher_event() {
    let (c, m) = plain();
    c.drain_events();
    c.get("a");
    c.has("a");
    c.own_keys();
    m.add_proxy_handler_override(TrapTable::new().on_get(|_, _| Value::Null));
    c.get("a");

    let events = dispatcher_events(&c);
    let traps: Vec<Option<String>> = events.iter().map(|e| e.trap.clone()).collect();
    assert_eq!(
        traps,
        vec![
            Some(TrapKind::Get.to_string()),
            Some(TrapKind::Has.to_string()),
            Some(TrapKind::OwnKeys.to_string()),
            Some(TrapKind::Get.to_string()),
        ]
    );
    let outcomes: Vec<&str> = events.iter().map(|e| e.outcome.as_str()).collect();
    assert_eq!(
        outcomes,
        vec![OUTCOME_DEFAULT, OUTCOME_DEFAULT, OUTCOME_DEFAULT, OUTCOME_OVERRIDE]
    );
    assert_eq!(events[2].key, None);
}

#[test]
fn sealed_mutations_emit_refusals_but_reads_do_not() {
    let options = CompositeOptions {
        is_not_extensible: true,
        ..CompositeOptions::default()
    };
    let (c, _) = compose(options, Vec::new());
    c.drain_events();
    c.set("a", 1);
    c.get("a");
    c.set_prototype_of(None);
    let events = dispatcher_events(&c);
    let refusals: Vec<Option<String>> = events
        .iter()
        .filter(|e| e.outcome == OUTCOME_REFUSED)
        .map(|e| e.trap.clone())
        .collect();
    assert_eq!(refusals, vec![Some("set".to_string()), Some("setPrototypeOf".to_string())]);
    assert!(
        events
            .iter()
            .filter(|e| e.outcome == OUTCOME_REFUSED)
            .all(|e| e.error_code.as_deref() == Some(REFUSED_NOT_EXTENSIBLE))
    );
}

#[test]
fn events_carry_trace_id_and_counts_persist() {
    let options = CompositeOptions::default().with_trace_id("trace-edge");
    let (c, m) = compose(options, Vec::new());
    m.add_fallback_target(Target::new());
    c.get("x");
    let events = c.drain_events();
    assert!(events.iter().all(|e| e.trace_id == "trace-edge"));
    assert_eq!(events[0].component, COMPONENT_BUILDER);
    assert!(c.drain_events().is_empty());
    let counts = c.event_counts();
    assert_eq!(counts.get("build"), Some(&1));
    assert_eq!(counts.get("add_fallback"), Some(&1));
    assert_eq!(counts.get("trap_default"), Some(&1));
}

#[test]
fn event_json_shape_is_stable() {
    let (c, _) = plain();
    c.drain_events();
    c.delete_property("gone");
    let event = c.drain_events().pop().expect("event");
    let json = serde_json::to_value(&event).expect("serialize");
    assert_eq!(json["component"], "composite_dispatcher");
    assert_eq!(json["trap"], "deleteProperty");
    assert_eq!(json["key"], "gone");
    assert_eq!(json["outcome"], "default");
    assert!(json["error_code"].is_null());
}

// ===========================================================================
// 6. Snapshots
// ===========================================================================

#[test]
fn snapshot_reflects_composition() {
    let (c, m) = compose(
        CompositeOptions::callable(),
        vec![Target::from_entries([("a", 1), ("b", 2)])],
    );
    m.add_proxy_handler_override(
        TrapTable::new()
            .on_get(|_, _| Value::Null)
            .on_apply(|_, _| Value::Null),
    );
    c.delete_property("b");
    c.set_prototype_of(Some(Target::new()));

    let snapshot = c.snapshot();
    assert_eq!(snapshot.trace_id, "composite");
    assert_eq!(snapshot.target_count, 2);
    assert_eq!(snapshot.trap_table_count, 1);
    assert_eq!(snapshot.visible_keys, vec!["a"]);
    assert_eq!(snapshot.deleted_keys, vec!["b"]);
    assert_eq!(snapshot.overridden_traps, vec!["get", "apply"]);
    assert!(snapshot.callable);
    assert!(snapshot.has_prototype);
    assert!(snapshot.extensible);
    assert!(snapshot.verify_hash());
}

#[test]
fn snapshot_ignores_target_identity() {
    let build = || {
        let (c, m) = plain();
        m.add_fallback_target(Target::from_entries([("k", 1)]));
        c
    };
    assert_eq!(build().snapshot().view_hash, build().snapshot().view_hash);
}

#[test]
fn snapshot_serde_roundtrip() {
    let (c, _) = plain();
    c.set("k", 1);
    let snapshot = c.snapshot();
    let json = serde_json::to_string(&snapshot).expect("serialize");
    let restored: CompositeSnapshot = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(restored, snapshot);
}
