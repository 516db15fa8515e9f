#![allow(missing_docs)]

mod common;

use common::{as_object, get, registry, set};
use parking_lot::Mutex;
use std::sync::Arc;
use varexport::graph::GraphPreparer;
use varexport::types::{ClassDef, FieldDecl};
use varexport::value::Handle;
use varexport::{
    FieldKey, Restorer, TypeCatalog, TypeRegistry, Value, VarExportError, VarExporter,
};

fn round_trip(registry: &TypeRegistry, root: &Value) -> varexport::Result<Value> {
    let program = GraphPreparer::new(registry).prepare(root)?;
    Restorer::new(registry).restore(&program)
}

fn list_items(value: &Value) -> Vec<Value> {
    value
        .as_array()
        .map(|a| a.values().cloned().collect())
        .unwrap_or_default()
}

#[test]
fn test_identity_survives_restore() -> varexport::Result<()> {
    let registry = registry();
    let p = registry.instantiate("Point")?;
    set(&registry, &p, "x", Value::Int(4))?;

    let restored = round_trip(&registry, &Value::list([Value::from(p.clone()), Value::from(p.clone())]))?;
    let items = list_items(&restored);
    let first = as_object(&items[0])?;
    let second = as_object(&items[1])?;

    assert!(Arc::ptr_eq(&first, &second));
    assert!(!Arc::ptr_eq(&first, &p));
    assert_eq!(get(&registry, &first, "x").and_then(|v| v.as_int()), Some(4));
    Ok(())
}

#[test]
fn test_cycles_survive_restore() -> varexport::Result<()> {
    let registry = registry();
    let a = registry.instantiate("Node")?;
    let b = registry.instantiate("Node")?;
    set(&registry, &a, "next", Value::from(b.clone()))?;
    set(&registry, &b, "next", Value::from(a.clone()))?;

    let restored = as_object(&round_trip(&registry, &Value::from(a))?)?;
    let next = as_object(&get(&registry, &restored, "next").unwrap_or_default())?;
    let back = as_object(&get(&registry, &next, "next").unwrap_or_default())?;

    assert!(Arc::ptr_eq(&back, &restored));
    assert!(!Arc::ptr_eq(&next, &restored));
    Ok(())
}

#[test]
fn test_private_fields_restore_independently() -> varexport::Result<()> {
    let registry = registry();
    let c = registry.instantiate("Child")?;
    c.write_slot(FieldKey::new("Base", "secret"), Value::str("b"));
    c.write_slot(FieldKey::new("Child", "secret"), Value::str("c"));
    set(&registry, &c, "level", Value::Int(9))?;

    let restored = as_object(&round_trip(&registry, &Value::from(c))?)?;

    let secret = |owner: &str| {
        restored
            .read_slot(&FieldKey::new(owner, "secret"))
            .and_then(|v| v.as_str().map(str::to_owned))
    };
    assert_eq!(secret("Base").as_deref(), Some("b"));
    assert_eq!(secret("Child").as_deref(), Some("c"));
    assert_eq!(
        restored
            .read_slot(&FieldKey::new("Base", "level"))
            .and_then(|v| v.as_int()),
        Some(9)
    );
    Ok(())
}

#[test]
fn test_elided_entity_restores_to_prototype() -> varexport::Result<()> {
    let registry = registry();
    let p = registry.instantiate("Point")?;

    let program = GraphPreparer::new(&registry).prepare(&Value::from(p))?;
    assert_eq!(program.entities[0].field_count(), 0);

    let restored = as_object(&Restorer::new(&registry).restore(&program)?)?;
    let prototype = registry.prototype("Point")?;
    assert_eq!(restored.slots().len(), prototype.slots().len());
    for (key, value) in prototype.slots() {
        assert!(restored.read_slot(key).is_some_and(|v| v.identical(value)));
    }
    Ok(())
}

#[test]
fn test_shared_cells_stay_shared() -> varexport::Result<()> {
    let registry = registry();
    let cell = Value::cell(Value::str("before"));
    let restored = round_trip(&registry, &Value::list([cell.clone(), cell]))?;

    let items = list_items(&restored);
    let (Some(a), Some(b)) = (items[0].as_cell(), items[1].as_cell()) else {
        panic!("expected two cells, got {items:?}");
    };
    assert!(a.same(b));
    a.set(Value::str("after"));
    assert_eq!(b.get().as_str(), Some("after"));
    Ok(())
}

#[test]
fn test_restore_hook_receives_custom_state() -> varexport::Result<()> {
    let registry = registry();
    let s = registry.instantiate("Session")?;
    set(&registry, &s, "user", Value::str("ada"))?;
    set(&registry, &s, "token", Value::str("live-token"))?;

    let restored = as_object(&round_trip(&registry, &Value::from(s))?)?;
    assert_eq!(
        get(&registry, &restored, "user").and_then(|v| v.as_str().map(str::to_owned)),
        Some("ada".to_owned())
    );
    assert_eq!(
        get(&registry, &restored, "token").and_then(|v| v.as_str().map(str::to_owned)),
        Some("restored".to_owned())
    );
    Ok(())
}

#[test]
fn test_wakeup_runs_after_hydration() -> varexport::Result<()> {
    let registry = registry();
    let legacy = registry.instantiate("Legacy")?;
    set(&registry, &legacy, "b", Value::Int(2))?;
    set(&registry, &legacy, "cache", Value::str("stale"))?;

    let restored = as_object(&round_trip(&registry, &Value::from(legacy))?)?;
    assert_eq!(get(&registry, &restored, "b").and_then(|v| v.as_int()), Some(2));
    assert_eq!(
        get(&registry, &restored, "cache").and_then(|v| v.as_str().map(str::to_owned)),
        Some("warm".to_owned())
    );
    Ok(())
}

#[test]
fn test_restore_only_type_round_trips_through_raw_state() -> varexport::Result<()> {
    let registry = registry();
    assert!(!registry.can_allocate_bare("Sealed")?);
    let sealed = registry.instantiate("Sealed")?;
    set(&registry, &sealed, "state", Value::str("armed"))?;

    let restored = as_object(&round_trip(&registry, &Value::from(sealed))?)?;
    assert_eq!(
        get(&registry, &restored, "state").and_then(|v| v.as_str().map(str::to_owned)),
        Some("armed".to_owned())
    );
    Ok(())
}

#[test]
fn test_opaque_blob_round_trips() -> varexport::Result<()> {
    let registry = registry();
    let blob = registry.instantiate("Blob")?;
    set(&registry, &blob, "data", Value::str("AAAA"))?;

    let restored = as_object(&round_trip(&registry, &Value::from(blob))?)?;
    assert_eq!(
        get(&registry, &restored, "data").and_then(|v| v.as_str().map(str::to_owned)),
        Some("AAAA".to_owned())
    );
    Ok(())
}

#[test]
fn test_hooks_see_fully_wired_siblings() -> varexport::Result<()> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let peer = ClassDef::builder("Peer")
        .field(FieldDecl::new("name"))
        .field(FieldDecl::new("peer"))
        .on_wakeup(move |obj| {
            let other = obj
                .read_slot(&FieldKey::new("Peer", "peer"))
                .and_then(|v| v.as_object().cloned())
                .and_then(|o| o.read_slot(&FieldKey::new("Peer", "name")))
                .and_then(|v| v.as_str().map(str::to_owned))
                .unwrap_or_else(|| "<unset>".to_owned());
            log.lock().push(other);
            Ok(())
        })
        .build();
    let registry = TypeRegistry::new(TypeCatalog::new().with(&peer));
    let a = registry.instantiate("Peer")?;
    let b = registry.instantiate("Peer")?;
    set(&registry, &a, "name", Value::str("a"))?;
    set(&registry, &b, "name", Value::str("b"))?;
    set(&registry, &a, "peer", Value::from(b.clone()))?;
    set(&registry, &b, "peer", Value::from(a.clone()))?;

    round_trip(&registry, &Value::from(a))?;

    // b completes first, and already sees a's name.
    assert_eq!(*seen.lock(), vec!["a".to_owned(), "b".to_owned()]);
    Ok(())
}

#[test]
fn test_handles_reopen_from_their_locator() -> varexport::Result<()> {
    let registry = registry();
    let restored = round_trip(
        &registry,
        &Value::Handle(Handle::new("stream", Some("file:///var/log/app".into()))),
    )?;
    let Value::Handle(handle) = restored else {
        panic!("expected a handle, got {restored:?}");
    };
    assert_eq!(handle.kind(), "stream");
    assert_eq!(handle.locator(), Some("file:///var/log/app"));
    Ok(())
}

#[test]
fn test_vanished_type_is_reported() -> varexport::Result<()> {
    let registry = registry();
    let p = registry.instantiate("Point")?;
    let program = GraphPreparer::new(&registry).prepare(&Value::from(p))?;

    let empty = TypeRegistry::new(TypeCatalog::new());
    match Restorer::new(&empty).restore(&program) {
        Err(VarExportError::UnknownType(name)) => assert_eq!(name, "Point"),
        other => panic!("unexpected: {other:?}"),
    }
    Ok(())
}

#[test]
fn test_drifted_field_is_reported() -> varexport::Result<()> {
    let registry = registry();
    let p = registry.instantiate("Point")?;
    set(&registry, &p, "x", Value::Int(5))?;
    let program = GraphPreparer::new(&registry).prepare(&Value::from(p))?;

    let drifted = ClassDef::builder("Point")
        .field(FieldDecl::new("y").default_value(0i64))
        .build();
    let later = TypeRegistry::new(TypeCatalog::new().with(&drifted));
    match Restorer::new(&later).restore(&program) {
        Err(VarExportError::HydrationFieldMismatch { owner, field, .. }) => {
            assert_eq!(owner, "Point");
            assert_eq!(field, "x");
        }
        other => panic!("unexpected: {other:?}"),
    }
    Ok(())
}

#[test]
fn test_dangling_token_is_a_format_error() -> varexport::Result<()> {
    let registry = registry();
    let p = registry.instantiate("Point")?;
    let mut program = GraphPreparer::new(&registry).prepare(&Value::list([Value::from(p)]))?;
    program.entities.clear();

    assert!(matches!(
        Restorer::new(&registry).restore(&program),
        Err(VarExportError::Format(_))
    ));
    Ok(())
}

#[test]
fn test_deep_clone_copies_without_sharing() -> varexport::Result<()> {
    let registry = registry();
    let exporter = VarExporter::new(registry.clone());
    let a = registry.instantiate("Node")?;
    set(&registry, &a, "label", Value::str("head"))?;
    set(&registry, &a, "next", Value::from(a.clone()))?;

    let copy = as_object(&exporter.deep_clone(&Value::from(a.clone()))?)?;
    set(&registry, &copy, "label", Value::str("changed"))?;

    assert_eq!(
        get(&registry, &a, "label").and_then(|v| v.as_str().map(str::to_owned)),
        Some("head".to_owned())
    );
    let next = as_object(&get(&registry, &copy, "next").unwrap_or_default())?;
    assert!(Arc::ptr_eq(&next, &copy));
    Ok(())
}

#[test]
fn test_unset_fields_stay_unset() -> varexport::Result<()> {
    let registry = registry();
    let x = FieldKey::new("Point", "x");
    let p = registry.instantiate("Point")?;
    set(&registry, &p, "y", Value::Int(4))?;
    p.clear_slot(&x);

    let program = GraphPreparer::new(&registry).prepare(&Value::from(p.clone()))?;
    assert_eq!(program.entities[0].unset, vec![x.clone()]);

    let restored = as_object(&Restorer::new(&registry).restore(&program)?)?;
    assert!(!restored.has_slot(&x));
    assert_eq!(get(&registry, &restored, "y").and_then(|v| v.as_int()), Some(4));

    let exporter = VarExporter::new(registry.clone());
    let imported = as_object(&exporter.import(&exporter.export(&Value::from(p))?)?)?;
    assert!(!imported.has_slot(&x));
    assert!(imported.has_slot(&FieldKey::new("Point", "y")));
    Ok(())
}
