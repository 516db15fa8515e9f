#![allow(dead_code)]

use std::sync::Arc;
use varexport::types::{ClassDef, Construction, FieldDecl};
use varexport::value::Array;
use varexport::{
    FieldKey, Key, ObjectRef, TypeCatalog, TypeDescriptor, TypeRegistry, Value, VarExportError,
};

pub type Types = Vec<Arc<dyn TypeDescriptor>>;

/// Point { x = 0, y = 0 }
pub fn point() -> Arc<dyn TypeDescriptor> {
    ClassDef::builder("Point")
        .field(FieldDecl::new("x").default_value(0i64))
        .field(FieldDecl::new("y").default_value(0i64))
        .build()
}

/// Node { label, next }
pub fn node() -> Arc<dyn TypeDescriptor> {
    ClassDef::builder("Node")
        .field(FieldDecl::new("label"))
        .field(FieldDecl::new("next"))
        .build()
}

/// Base { private secret = "base", public name, protected level = 1 }
pub fn base() -> Arc<dyn TypeDescriptor> {
    ClassDef::builder("Base")
        .field(FieldDecl::new("secret").private().default_value("base"))
        .field(FieldDecl::new("name"))
        .field(FieldDecl::new("level").protected().default_value(1i64))
        .build()
}

/// Child extends Base { private secret = "child", public extra }
pub fn child(base: &Arc<dyn TypeDescriptor>) -> Arc<dyn TypeDescriptor> {
    ClassDef::builder("Child")
        .extends(base)
        .field(FieldDecl::new("secret").private().default_value("child"))
        .field(FieldDecl::new("extra"))
        .build()
}

/// Session { user, token }: captures the user only and rebuilds the token on restore.
pub fn session() -> Arc<dyn TypeDescriptor> {
    ClassDef::builder("Session")
        .field(FieldDecl::new("user"))
        .field(FieldDecl::new("token"))
        .on_snapshot(|obj| {
            let user = obj
                .read_slot(&FieldKey::new("Session", "user"))
                .unwrap_or_default();
            Ok(Value::map([("user", user)]))
        })
        .on_restore(|obj, state: Array| {
            if let Some(user) = state.get(&Key::from("user")) {
                obj.write_slot(FieldKey::new("Session", "user"), user.clone());
            }
            obj.write_slot(FieldKey::new("Session", "token"), Value::str("restored"));
            Ok(())
        })
        .build()
}

/// Legacy { a, b, cache }: sleeps to `a` and `b`, rebuilds `cache` on wakeup.
pub fn legacy() -> Arc<dyn TypeDescriptor> {
    ClassDef::builder("Legacy")
        .field(FieldDecl::new("a").default_value(1i64))
        .field(FieldDecl::new("b"))
        .field(FieldDecl::new("cache"))
        .on_sleep(|_| Ok(vec!["a".to_owned(), "b".to_owned()]))
        .on_wakeup(|obj| {
            obj.write_slot(FieldKey::new("Legacy", "cache"), Value::str("warm"));
            Ok(())
        })
        .build()
}

/// Blob { data }: exported as an opaque string.
pub fn blob() -> Arc<dyn TypeDescriptor> {
    ClassDef::builder("Blob")
        .field(FieldDecl::new("data"))
        .opaque(
            |obj| {
                Ok(obj
                    .read_slot(&FieldKey::new("Blob", "data"))
                    .and_then(|v| v.as_str().map(str::to_owned))
                    .unwrap_or_default())
            },
            |obj, encoded| {
                obj.write_slot(FieldKey::new("Blob", "data"), Value::str(encoded));
                Ok(())
            },
        )
        .build()
}

/// Shape is abstract.
pub fn shape() -> Arc<dyn TypeDescriptor> {
    ClassDef::builder("Shape")
        .field(FieldDecl::new("area"))
        .abstract_type()
        .build()
}

/// Drawable is an interface.
pub fn drawable() -> Arc<dyn TypeDescriptor> {
    ClassDef::builder("Drawable").interface().build()
}

/// Sealed refuses bare allocation and is built through its restore hook.
pub fn sealed() -> Arc<dyn TypeDescriptor> {
    ClassDef::builder("Sealed")
        .field(FieldDecl::new("state"))
        .construction(Construction::ViaRestoreHook)
        .on_restore(|obj, state: Array| {
            let value = state
                .get(&Key::from("state"))
                .cloned()
                .unwrap_or(Value::str("empty"));
            obj.write_slot(FieldKey::new("Sealed", "state"), value);
            Ok(())
        })
        .build()
}

/// Closure cannot be allocated at all.
pub fn closure() -> Arc<dyn TypeDescriptor> {
    ClassDef::builder("Closure")
        .construction(Construction::Impossible)
        .build()
}

/// Bag allows dynamic fields.
pub fn bag() -> Arc<dyn TypeDescriptor> {
    ClassDef::builder("Bag")
        .field(FieldDecl::new("kind").default_value("bag"))
        .dynamic_fields()
        .build()
}

/// Every fixture type, registered in one catalog.
pub fn registry() -> Arc<TypeRegistry> {
    let base = base();
    let types: Types = vec![
        point(),
        node(),
        child(&base),
        base,
        session(),
        legacy(),
        blob(),
        shape(),
        drawable(),
        sealed(),
        closure(),
        bag(),
    ];
    let catalog = TypeCatalog::new();
    for ty in &types {
        catalog.register(ty);
    }
    Arc::new(TypeRegistry::new(catalog))
}

/// Writes `name` as seen from the type itself.
pub fn set(
    registry: &TypeRegistry,
    obj: &ObjectRef,
    name: &str,
    value: Value,
) -> Result<(), VarExportError> {
    let key = registry.field_key(obj.type_name(), name)?;
    obj.write_slot(key, value);
    Ok(())
}

/// Reads `name` as seen from the type itself.
pub fn get(registry: &TypeRegistry, obj: &ObjectRef, name: &str) -> Option<Value> {
    let key = registry.field_key(obj.type_name(), name).ok()?;
    obj.read_slot(&key)
}

pub fn as_object(value: &Value) -> Result<ObjectRef, VarExportError> {
    value.as_object().cloned().ok_or_else(|| {
        VarExportError::Internal(format!("expected an object, got {}", value.type_label()))
    })
}
