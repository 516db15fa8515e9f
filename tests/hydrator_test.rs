#![allow(missing_docs)]

mod common;

use common::{get, registry};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::Arc;
use varexport::hydrator::{FieldsByOwner, HydrationEntry, PostRestoreCall};
use varexport::types::{ClassDef, FieldDecl, PUBLIC_SCOPE};
use varexport::value::Array;
use varexport::{FieldHydrator, FieldKey, Key, TypeCatalog, TypeRegistry, Value, VarExportError};

fn fields<const N: usize>(entries: [(&str, &str, Value); N]) -> FieldsByOwner {
    let mut out = FieldsByOwner::new();
    for (owner, name, value) in entries {
        out.entry(owner.to_owned())
            .or_insert_with(IndexMap::new)
            .insert(name.to_owned(), value);
    }
    out
}

fn read_str(obj: &varexport::ObjectRef, owner: &str, name: &str) -> Option<String> {
    obj.read_slot(&FieldKey::new(owner, name))
        .and_then(|v| v.as_str().map(str::to_owned))
}

#[test]
fn test_writes_land_in_the_owning_slot() -> varexport::Result<()> {
    let registry = registry();
    let child = registry.instantiate("Child")?;

    FieldHydrator::new(&registry).hydrate(
        &child,
        &fields([
            ("Base", "secret", Value::str("from-base")),
            ("Child", "secret", Value::str("from-child")),
        ]),
    )?;

    assert_eq!(read_str(&child, "Base", "secret").as_deref(), Some("from-base"));
    assert_eq!(read_str(&child, "Child", "secret").as_deref(), Some("from-child"));
    Ok(())
}

#[test]
fn test_public_scope_resolves_from_the_concrete_type() -> varexport::Result<()> {
    let registry = registry();
    let child = registry.instantiate("Child")?;

    FieldHydrator::new(&registry).hydrate(
        &child,
        &fields([
            (PUBLIC_SCOPE, "secret", Value::str("own")),
            (PUBLIC_SCOPE, "name", Value::str("shared")),
        ]),
    )?;

    // The concrete type's own private wins; the ancestor's stays at its default.
    assert_eq!(read_str(&child, "Child", "secret").as_deref(), Some("own"));
    assert_eq!(read_str(&child, "Base", "secret").as_deref(), Some("base"));
    assert_eq!(read_str(&child, "Base", "name").as_deref(), Some("shared"));
    Ok(())
}

#[test]
fn test_subtype_owner_reaches_an_inherited_shared_slot() -> varexport::Result<()> {
    let registry = registry();
    let child = registry.instantiate("Child")?;

    FieldHydrator::new(&registry).hydrate(
        &child,
        &fields([("Child", "name", Value::str("n")), ("Child", "level", Value::Int(3))]),
    )?;

    assert_eq!(read_str(&child, "Base", "name").as_deref(), Some("n"));
    assert_eq!(
        child
            .read_slot(&FieldKey::new("Base", "level"))
            .and_then(|v| v.as_int()),
        Some(3)
    );
    assert!(!child.has_slot(&FieldKey::new("Child", "name")));
    Ok(())
}

#[test]
fn test_ancestor_cannot_write_a_subtype_field() -> varexport::Result<()> {
    let registry = registry();
    let child = registry.instantiate("Child")?;

    let err = FieldHydrator::new(&registry)
        .hydrate(&child, &fields([("Base", "extra", Value::Int(1))]))
        .err();
    match err {
        Some(VarExportError::HydrationFieldMismatch { type_name, owner, field }) => {
            assert_eq!(type_name, "Child");
            assert_eq!(owner, "Base");
            assert_eq!(field, "extra");
        }
        other => panic!("unexpected: {other:?}"),
    }
    Ok(())
}

#[test]
fn test_undeclared_field_is_a_mismatch() -> varexport::Result<()> {
    let registry = registry();
    let point = registry.instantiate("Point")?;
    let result =
        FieldHydrator::new(&registry).hydrate(&point, &fields([("Point", "z", Value::Int(1))]));
    assert!(matches!(
        result,
        Err(VarExportError::HydrationFieldMismatch { .. })
    ));
    Ok(())
}

#[test]
fn test_clear_fields_unsets_declared_slots() -> varexport::Result<()> {
    let registry = registry();
    let point = registry.instantiate("Point")?;
    let hydrator = FieldHydrator::new(&registry);
    assert!(point.has_slot(&FieldKey::new("Point", "x")));

    hydrator.clear_fields(&point, &[FieldKey::new("Point", "x")])?;
    assert!(!point.has_slot(&FieldKey::new("Point", "x")));
    assert!(point.has_slot(&FieldKey::new("Point", "y")));

    let result = hydrator.clear_fields(&point, &[FieldKey::new("Point", "z")]);
    assert!(matches!(
        result,
        Err(VarExportError::HydrationFieldMismatch { .. })
    ));
    Ok(())
}

#[test]
fn test_batch_clears_unset_slots_after_writes() -> varexport::Result<()> {
    let registry = registry();
    let point = registry.instantiate("Point")?;
    let mut entry = HydrationEntry::new(point.clone(), fields([("Point", "y", Value::Int(9))]));
    entry.unset = vec![FieldKey::new("Point", "x")];

    FieldHydrator::new(&registry).hydrate_batch(vec![entry])?;
    assert!(!point.has_slot(&FieldKey::new("Point", "x")));
    assert_eq!(get(&registry, &point, "y").and_then(|v| v.as_int()), Some(9));
    Ok(())
}

#[test]
fn test_dynamic_types_accept_undeclared_fields() -> varexport::Result<()> {
    let registry = registry();
    let bag = registry.instantiate("Bag")?;
    FieldHydrator::new(&registry)
        .hydrate(&bag, &fields([("Bag", "colour", Value::str("red"))]))?;
    assert_eq!(read_str(&bag, "Bag", "colour").as_deref(), Some("red"));
    assert_eq!(read_str(&bag, "Bag", "kind").as_deref(), Some("bag"));
    Ok(())
}

#[test]
fn test_owner_outside_the_hierarchy_is_rejected() -> varexport::Result<()> {
    let registry = registry();
    let child = registry.instantiate("Child")?;
    let hydrator = FieldHydrator::new(&registry);

    let unknown = hydrator.hydrate(&child, &fields([("Ghost", "x", Value::Int(1))]));
    assert!(matches!(unknown, Err(VarExportError::UnknownType(name)) if name == "Ghost"));

    let unrelated = hydrator.hydrate(&child, &fields([("Point", "x", Value::Int(1))]));
    assert!(matches!(
        unrelated,
        Err(VarExportError::HydrationFieldMismatch { .. })
    ));
    Ok(())
}

#[test]
fn test_readonly_fields_are_written_anyway() -> varexport::Result<()> {
    let frozen = ClassDef::builder("Frozen")
        .field(FieldDecl::new("id").readonly())
        .build();
    let registry = TypeRegistry::new(TypeCatalog::new().with(&frozen));
    let obj = registry.instantiate("Frozen")?;
    let hydrator = FieldHydrator::new(&registry);

    hydrator.hydrate(&obj, &fields([("Frozen", "id", Value::Int(1))]))?;
    hydrator.hydrate(&obj, &fields([("Frozen", "id", Value::Int(2))]))?;

    assert_eq!(
        obj.read_slot(&FieldKey::new("Frozen", "id")).and_then(|v| v.as_int()),
        Some(2)
    );
    Ok(())
}

#[test]
fn test_hydrate_runs_wakeup_once() -> varexport::Result<()> {
    let registry = registry();
    let legacy = registry.instantiate("Legacy")?;

    FieldHydrator::new(&registry).hydrate(&legacy, &fields([("Legacy", "b", Value::Int(7))]))?;

    assert_eq!(get(&registry, &legacy, "b").and_then(|v| v.as_int()), Some(7));
    assert_eq!(read_str(&legacy, "Legacy", "cache").as_deref(), Some("warm"));
    Ok(())
}

#[test]
fn test_batch_writes_everything_before_running_hooks() -> varexport::Result<()> {
    let log = Arc::new(Mutex::new(Vec::<String>::new()));

    let wake_log = log.clone();
    let watcher = ClassDef::builder("Watcher")
        .field(FieldDecl::new("label"))
        .field(FieldDecl::new("peer"))
        .on_wakeup(move |obj| {
            let peer_label = obj
                .read_slot(&FieldKey::new("Watcher", "peer"))
                .and_then(|v| v.as_object().cloned())
                .and_then(|p| p.read_slot(&FieldKey::new("Watcher", "label")))
                .and_then(|v| v.as_str().map(str::to_owned))
                .unwrap_or_default();
            wake_log.lock().push(format!("wakeup sees {peer_label}"));
            Ok(())
        })
        .build();

    let restore_log = log.clone();
    let keeper = ClassDef::builder("Keeper")
        .field(FieldDecl::new("label"))
        .on_restore(move |obj, state: Array| {
            let label = state.get(&Key::from("label")).cloned().unwrap_or_default();
            restore_log
                .lock()
                .push(format!("restore {}", label.as_str().unwrap_or("?")));
            obj.write_slot(FieldKey::new("Keeper", "label"), label);
            Ok(())
        })
        .build();

    let registry = TypeRegistry::new(TypeCatalog::new().with(&watcher).with(&keeper));
    let a = registry.instantiate("Watcher")?;
    let b = registry.instantiate("Watcher")?;
    let k = registry.instantiate("Keeper")?;

    let mut state = Array::new();
    state.insert(Key::from("label"), Value::str("kept"));

    let entries = vec![
        HydrationEntry {
            instance: a.clone(),
            fields: fields([
                ("Watcher", "label", Value::str("a")),
                ("Watcher", "peer", Value::from(b.clone())),
            ]),
            unset: Vec::new(),
            post: PostRestoreCall::Wakeup,
            order: 2,
        },
        HydrationEntry {
            instance: b.clone(),
            fields: fields([
                ("Watcher", "label", Value::str("b")),
                ("Watcher", "peer", Value::from(a.clone())),
            ]),
            unset: Vec::new(),
            post: PostRestoreCall::Wakeup,
            order: 0,
        },
        HydrationEntry {
            instance: k.clone(),
            fields: FieldsByOwner::new(),
            unset: Vec::new(),
            post: PostRestoreCall::Restore(state),
            order: 1,
        },
        HydrationEntry::new(registry.instantiate("Watcher")?, FieldsByOwner::new()),
    ];
    FieldHydrator::new(&registry).hydrate_batch(entries)?;

    assert_eq!(
        *log.lock(),
        vec![
            "wakeup sees a".to_owned(),
            "restore kept".to_owned(),
            "wakeup sees b".to_owned(),
        ]
    );
    assert_eq!(read_str(&k, "Keeper", "label").as_deref(), Some("kept"));
    Ok(())
}

#[test]
fn test_failing_write_aborts_before_any_hook() -> varexport::Result<()> {
    let registry = registry();
    let legacy = registry.instantiate("Legacy")?;
    let point = registry.instantiate("Point")?;

    let entries = vec![
        HydrationEntry {
            instance: legacy.clone(),
            fields: FieldsByOwner::new(),
            unset: Vec::new(),
            post: PostRestoreCall::Wakeup,
            order: 0,
        },
        HydrationEntry::new(point, fields([("Point", "nope", Value::Int(1))])),
    ];
    assert!(FieldHydrator::new(&registry).hydrate_batch(entries).is_err());
    assert!(!legacy.has_slot(&FieldKey::new("Legacy", "cache")));
    Ok(())
}

#[test]
fn test_instantiate_with_hydrates_a_fresh_instance() -> varexport::Result<()> {
    let registry = registry();
    let p = registry.instantiate_with("Point", &fields([("Point", "x", Value::Int(3))]))?;

    assert_eq!(get(&registry, &p, "x").and_then(|v| v.as_int()), Some(3));
    assert_eq!(get(&registry, &p, "y").and_then(|v| v.as_int()), Some(0));

    let missing = registry.instantiate_with("Nowhere", &FieldsByOwner::new());
    assert!(matches!(missing, Err(VarExportError::UnknownType(_))));
    Ok(())
}
