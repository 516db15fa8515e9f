//! The dynamic value model walked by the preparer.
//!
//! A [`Value`] is either a scalar, an [`Array`] (copied by value), a [`CellRef`] (a shared,
//! mutable storage location), an [`ObjectRef`] (an identity-bearing entity) or a
//! [`HandleRef`] (an external resource).

use crate::object::ObjectRef;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// An array key. Arrays keep insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Key {
    /// Positional or integer key.
    Int(i64),
    /// String key.
    Str(Arc<str>),
}

impl Key {
    /// Returns the key as a string slice, if it is a string key.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            Self::Int(_) => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Str(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<i64> for Key {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self::Str(Arc::from(s))
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Self::Str(Arc::from(s))
    }
}

/// Ordered key/value container.
pub type Array = IndexMap<Key, Value>;

/// A shared storage location.
///
/// Two `CellRef`s created from the same [`CellRef::new`] call are the same location:
/// writing through one is visible through the other. The preparer turns cells that are
/// reached more than once into reference cells.
#[derive(Clone)]
pub struct CellRef(Arc<RwLock<Value>>);

impl CellRef {
    /// Creates a new location holding `value`.
    pub fn new(value: Value) -> Self {
        Self(Arc::new(RwLock::new(value)))
    }

    /// Returns a copy of the stored value.
    pub fn get(&self) -> Value {
        self.0.read().clone()
    }

    /// Replaces the stored value.
    pub fn set(&self, value: Value) {
        *self.0.write() = value;
    }

    /// True if both handles designate the same location.
    pub fn same(&self, other: &CellRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Identity of the location, stable while the cell is alive.
    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

impl fmt::Debug for CellRef {
    // Cells may be cyclic; never print the contents.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cell({:#x})", self.addr())
    }
}

/// An external resource, such as an open stream.
///
/// A handle with a `locator` can be re-opened from it and is exported as a leaf. A handle
/// without one cannot be snapshotted.
#[derive(Debug, PartialEq, Eq)]
pub struct Handle {
    kind: String,
    locator: Option<String>,
}

/// Shared pointer to a [`Handle`]. Identity is pointer identity.
pub type HandleRef = Arc<Handle>;

impl Handle {
    /// Creates a handle of the given kind.
    pub fn new(kind: impl Into<String>, locator: Option<String>) -> HandleRef {
        Arc::new(Self {
            kind: kind.into(),
            locator,
        })
    }

    /// The resource kind, e.g. `"stream"`.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Where the resource can be re-opened from, if anywhere.
    pub fn locator(&self) -> Option<&str> {
        self.locator.as_deref()
    }
}

/// A node of a value graph.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Absence of a value.
    #[default]
    Null,
    /// Boolean scalar.
    Bool(bool),
    /// Integer scalar.
    Int(i64),
    /// Floating point scalar.
    Float(f64),
    /// String scalar.
    Str(Arc<str>),
    /// Ordered container, copied by value.
    Array(Array),
    /// Shared storage location.
    Cell(CellRef),
    /// Identity-bearing entity.
    Object(ObjectRef),
    /// External resource.
    Handle(HandleRef),
}

impl Value {
    /// Builds a string value.
    pub fn str(s: impl AsRef<str>) -> Self {
        Self::Str(Arc::from(s.as_ref()))
    }

    /// Builds a list (integer keys starting at zero).
    pub fn list<I: IntoIterator<Item = Value>>(items: I) -> Self {
        Self::Array(
            items
                .into_iter()
                .enumerate()
                .map(|(i, v)| (Key::Int(i as i64), v))
                .collect(),
        )
    }

    /// Builds an array from key/value pairs.
    pub fn map<K: Into<Key>, I: IntoIterator<Item = (K, Value)>>(items: I) -> Self {
        Self::Array(items.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Wraps `value` in a fresh shared location.
    pub fn cell(value: Value) -> Self {
        Self::Cell(CellRef::new(value))
    }

    /// Strict identity comparison.
    ///
    /// Scalars compare by value (an integer is never identical to a float), arrays
    /// element-wise in order, and cells, objects and handles by identity.
    pub fn identical(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|((ka, va), (kb, vb))| ka == kb && va.identical(vb))
            }
            (Self::Cell(a), Self::Cell(b)) => a.same(b),
            (Self::Object(a), Self::Object(b)) => Arc::ptr_eq(a, b),
            (Self::Handle(a), Self::Handle(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Short label for diagnostics.
    pub fn type_label(&self) -> String {
        match self {
            Self::Null => "null".into(),
            Self::Bool(_) => "bool".into(),
            Self::Int(_) => "int".into(),
            Self::Float(_) => "float".into(),
            Self::Str(_) => "string".into(),
            Self::Array(_) => "array".into(),
            Self::Cell(_) => "cell".into(),
            Self::Object(o) => format!("object({})", o.type_name()),
            Self::Handle(h) => format!("handle({})", h.kind()),
        }
    }

    /// True for `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the integer, if this is an `Int`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the string, if this is a `Str`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the array, if this is an `Array`.
    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Returns the object, if this is an `Object`.
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Returns the cell, if this is a `Cell`.
    pub fn as_cell(&self) -> Option<&CellRef> {
        match self {
            Self::Cell(c) => Some(c),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::str(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(Arc::from(s))
    }
}

impl From<ObjectRef> for Value {
    fn from(o: ObjectRef) -> Self {
        Self::Object(o)
    }
}

impl From<CellRef> for Value {
    fn from(c: CellRef) -> Self {
        Self::Cell(c)
    }
}
