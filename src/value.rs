// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Property values and their specified/default state.
use crate::graph::ObjectId;
use std::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
};

/// A property value held by a complex object.
///
/// Complex- and list-typed properties hold an [`Value::Object`] reference to another object in
/// the same [`Graph`](crate::Graph). Doubles are compared using [`f64::total_cmp`], which makes
/// `Value` totally ordered and usable as an element key.
#[derive(Clone, Default)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    I64(i64),
    U64(u64),
    Double(f64),
    String(String),
    Bytes(#[cfg_attr(feature = "serde", serde(with = "serde_bytes"))] Vec<u8>),
    #[cfg(feature = "ulid")]
    Ulid(ulid::Ulid),
    Object(ObjectId),
}

/// Whether a property holds its schema default implicitly or was explicitly assigned.
///
/// Tracked independently from the value: a property explicitly set to a value equal to its
/// default is still [`PropertyState::Specified`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub enum PropertyState {
    #[default]
    Default,
    Specified,
}

/// The scalar kinds a property can be declared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub enum ValueKind {
    Bool,
    I64,
    U64,
    Double,
    String,
    Bytes,
    #[cfg(feature = "ulid")]
    Ulid,
    /// Accepts any non-object value as is.
    Any,
}

impl Value {
    /// When ordering values of different kinds, we order them according to this order.
    const fn comparison_order(&self) -> usize {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::I64(_) => 2,
            Value::U64(_) => 3,
            Value::Double(_) => 4,
            Value::String(_) => 5,
            Value::Bytes(_) => 6,
            #[cfg(feature = "ulid")]
            Value::Ulid(_) => 7,
            Value::Object(_) => 8,
        }
    }

    /// Returns `true` for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the referenced object, if this value is an object reference.
    pub fn as_object(&self) -> Option<ObjectId> {
        match self {
            Value::Object(id) => Some(*id),
            _ => None,
        }
    }

    /// Returns the string slice, if this value is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the scalar kind of this value, or `None` for `Null` and object references.
    pub fn kind(&self) -> Option<ValueKind> {
        Some(match self {
            Value::Null | Value::Object(_) => return None,
            Value::Bool(_) => ValueKind::Bool,
            Value::I64(_) => ValueKind::I64,
            Value::U64(_) => ValueKind::U64,
            Value::Double(_) => ValueKind::Double,
            Value::String(_) => ValueKind::String,
            Value::Bytes(_) => ValueKind::Bytes,
            #[cfg(feature = "ulid")]
            Value::Ulid(_) => ValueKind::Ulid,
        })
    }

    /// Coerces `self` into `kind`, widening integers where no information is lost.
    ///
    /// `Null` is accepted by every kind.
    pub fn coerce(self, kind: ValueKind) -> Option<Value> {
        match (kind, self) {
            (_, Value::Null) => Some(Value::Null),
            (_, Value::Object(_)) => None,
            (ValueKind::Any, v) => Some(v),
            (ValueKind::I64, Value::U64(v)) => i64::try_from(v).ok().map(Value::I64),
            (ValueKind::U64, Value::I64(v)) => u64::try_from(v).ok().map(Value::U64),
            // NOTE: integers beyond 2^53 lose precision here, which matches what a JSON
            // round-trip of the same number would do.
            (ValueKind::Double, Value::I64(v)) => Some(Value::Double(v as f64)),
            (ValueKind::Double, Value::U64(v)) => Some(Value::Double(v as f64)),
            (kind, v) if v.kind() == Some(kind) => Some(v),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::I64(a), Value::I64(b)) => a.cmp(b),
            (Value::U64(a), Value::U64(b)) => a.cmp(b),
            (Value::Double(a), Value::Double(b)) => a.total_cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            #[cfg(feature = "ulid")]
            (Value::Ulid(a), Value::Ulid(b)) => a.cmp(b),
            (Value::Object(a), Value::Object(b)) => a.cmp(b),
            _ => self.comparison_order().cmp(&other.comparison_order()),
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.comparison_order().hash(state);
        match self {
            Value::Null => {}
            Value::Bool(v) => v.hash(state),
            Value::I64(v) => v.hash(state),
            Value::U64(v) => v.hash(state),
            // consistent with `total_cmp`: equal values have equal bit patterns
            Value::Double(v) => v.to_bits().hash(state),
            Value::String(v) => v.hash(state),
            Value::Bytes(v) => v.hash(state),
            #[cfg(feature = "ulid")]
            Value::Ulid(v) => v.hash(state),
            Value::Object(v) => v.hash(state),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::I64(v) => write!(f, "{v}"),
            Value::U64(v) => write!(f, "{v}u"),
            Value::Double(v) => write!(f, "{v:?}"),
            Value::String(v) => write!(f, "{v:?}"),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            #[cfg(feature = "ulid")]
            Value::Ulid(v) => write!(f, "{v}"),
            Value::Object(v) => write!(f, "{v}"),
        }
    }
}

macro_rules! impl_from {
(
    $(
        $source:ty => $target:ident $(with $conv:ident)?
    ),* $(,)?
    ) => {
        $(
            impl From<$source> for Value {
                fn from(value: $source) -> Self {
                    Self::$target(impl_from!(value$(, $conv)?))
                }
            }
        )*
    };

    ($value:ident, $conv:ident) => {
        $value.$conv()
    };

    ($value:ident) => {
        $value
    };
}

impl_from!(
    bool => Bool,
    i64 => I64,
    i32 => I64 with into,
    u64 => U64,
    u32 => U64 with into,
    f64 => Double,
    String => String,
    &str => String with to_string,
    Vec<u8> => Bytes,
    &[u8] => Bytes with to_vec,
    ObjectId => Object,
);

#[cfg(feature = "ulid")]
impl From<ulid::Ulid> for Value {
    fn from(value: ulid::Ulid) -> Self {
        Self::Ulid(value)
    }
}

#[cfg(feature = "arbitrary")]
impl quickcheck::Arbitrary for Value {
    fn arbitrary(g: &mut quickcheck::Gen) -> Self {
        match u8::arbitrary(g) % 7 {
            0 => Value::Null,
            1 => Value::Bool(bool::arbitrary(g)),
            2 => Value::I64(i64::arbitrary(g)),
            3 => Value::U64(u64::arbitrary(g)),
            4 => Value::Double(f64::arbitrary(g)),
            5 => Value::String(String::arbitrary(g)),
            _ => Value::Bytes(Vec::arbitrary(g)),
        }
    }
}
