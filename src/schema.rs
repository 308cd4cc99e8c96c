// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Type metadata for complex objects and list containers.
//!
//! A [`Schema`] is the set of [`ComplexType`]s a [`Graph`](crate::Graph) can instantiate. Each
//! type declares its properties through [`PropertyDecl`]s, which carry everything the changeset
//! machinery needs from the type system: the property name, whether it is read-only, its default
//! value, and the cast and equality functions used when a new value is requested.
//!
//! ```rust
//! use txgraph::{PropertyDecl, SchemaBuilder, ValueKind};
//!
//! let mut builder = SchemaBuilder::new();
//! builder
//!     .complex("Order")
//!     .property(PropertyDecl::scalar("status", ValueKind::String).with_default("new"))
//!     .property(PropertyDecl::list("lines", "Line"));
//! builder
//!     .complex("Line")
//!     .key("sku")
//!     .property(PropertyDecl::scalar("sku", ValueKind::String))
//!     .property(PropertyDecl::scalar("qty", ValueKind::I64).with_default(0));
//! let schema = builder.build().unwrap();
//!
//! let order = schema.complex_by_name("Order").unwrap();
//! assert!(order.property_id("status").is_ok());
//! assert!(order.property_id("nope").is_err());
//! ```
use crate::{
    create_map_with_capacity,
    error::{Error, Result},
    value::{Value, ValueKind},
    GraphRandomState,
};
use std::{collections::HashMap, fmt};

/// Identifies a complex type within its [`Schema`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub struct TypeId(pub(crate) u32);

/// A validated property of one complex type.
///
/// Obtained through [`ComplexType::property_id`]; only meaningful together with the type it was
/// resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub struct PropertyId(pub(crate) u16);

impl PropertyId {
    /// Position of the property in its type's declaration order.
    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

/// Converts raw input into a property's typed value.
pub type CastFn = fn(Value) -> Result<Value>;

/// Equality used to detect no-op assignments.
pub type EqFn = fn(&Value, &Value) -> bool;

fn value_eq(a: &Value, b: &Value) -> bool {
    a == b
}

/// What a property holds, with type references resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Scalar(ValueKind),
    /// A reference to a complex object of the given type (or `Null`).
    Complex(TypeId),
    /// An owned list container of complex objects of the given type.
    List(ListKind),
}

/// Declared shape of a list container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListKind {
    pub element: TypeId,
    /// Read-only containers reject every add, remove, move, sort, and clear.
    pub read_only: bool,
}

#[derive(Debug, Clone)]
enum DeclKind {
    Scalar(ValueKind),
    Complex(String),
    List { element: String, read_only: bool },
}

/// Declaration of a single property, as handed to [`ComplexTypeBuilder::property`].
#[derive(Clone)]
pub struct PropertyDecl {
    name: String,
    kind: DeclKind,
    default: Value,
    read_only: bool,
    cast: Option<CastFn>,
    eq: EqFn,
}

impl PropertyDecl {
    fn new(name: impl Into<String>, kind: DeclKind) -> Self {
        Self {
            name: name.into(),
            kind,
            default: Value::Null,
            read_only: false,
            cast: None,
            eq: value_eq,
        }
    }

    /// A property holding a scalar value of `kind`.
    pub fn scalar(name: impl Into<String>, kind: ValueKind) -> Self {
        Self::new(name, DeclKind::Scalar(kind))
    }

    /// A property referencing a complex object of type `type_name`.
    pub fn complex(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self::new(name, DeclKind::Complex(type_name.into()))
    }

    /// A property owning a list of `element_type` objects.
    ///
    /// List properties are always read-only as properties; their contents change through
    /// [`ListEdit`](crate::transaction::ListEdit).
    pub fn list(name: impl Into<String>, element_type: impl Into<String>) -> Self {
        let mut decl = Self::new(
            name,
            DeclKind::List {
                element: element_type.into(),
                read_only: false,
            },
        );
        decl.read_only = true;
        decl
    }

    /// Sets the value the property has while in [`PropertyState::Default`](crate::PropertyState).
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = default.into();
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        // a read-only list property also freezes the container
        if let DeclKind::List { read_only, .. } = &mut self.kind {
            *read_only = true;
        }
        self
    }

    /// Runs `cast` on every requested value after the kind check.
    pub fn with_cast(mut self, cast: CastFn) -> Self {
        self.cast = Some(cast);
        self
    }

    /// Replaces the default `==` used to detect no-op assignments.
    pub fn with_eq(mut self, eq: EqFn) -> Self {
        self.eq = eq;
        self
    }
}

impl fmt::Debug for PropertyDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyDecl")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("default", &self.default)
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}

/// A resolved property of a [`ComplexType`].
#[derive(Clone)]
pub struct Property {
    id: PropertyId,
    name: String,
    kind: PropertyKind,
    default: Value,
    read_only: bool,
    cast: Option<CastFn>,
    eq: EqFn,
}

impl Property {
    pub fn id(&self) -> PropertyId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> PropertyKind {
        self.kind
    }

    pub fn default_value(&self) -> &Value {
        &self.default
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Compares two values with the property's equality semantics.
    pub fn values_equal(&self, a: &Value, b: &Value) -> bool {
        (self.eq)(a, b)
    }

    /// Coerces raw input into this property's value.
    ///
    /// Object references are not resolved here; the caller checks them against the graph.
    pub fn cast(&self, value: Value) -> Result<Value> {
        let value = match self.kind {
            PropertyKind::Scalar(kind) => {
                let shown = value.to_string();
                value.coerce(kind).ok_or_else(|| {
                    Error::invalid_argument(format!(
                        "property `{}` expects {kind:?}, got {shown}",
                        self.name
                    ))
                })?
            }
            PropertyKind::Complex(_) | PropertyKind::List(_) => {
                if !(value.is_null() || value.as_object().is_some()) {
                    return Err(Error::invalid_argument(format!(
                        "property `{}` expects an object reference, got {value}",
                        self.name
                    )));
                }
                value
            }
        };
        match self.cast {
            Some(cast) => cast(value),
            None => Ok(value),
        }
    }
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("default", &self.default)
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}

/// A complex (property-bag) type.
#[derive(Debug, Clone)]
pub struct ComplexType {
    id: TypeId,
    name: String,
    properties: Vec<Property>,
    by_name: HashMap<String, PropertyId, GraphRandomState>,
    key: Option<PropertyId>,
}

impl ComplexType {
    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The property whose value identifies an element inside a list, if declared.
    pub fn key(&self) -> Option<PropertyId> {
        self.key
    }

    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    /// Resolves a property name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ArgumentInvalid`] if the type declares no such property.
    pub fn property_id(&self, name: &str) -> Result<PropertyId> {
        self.by_name.get(name).copied().ok_or_else(|| {
            Error::invalid_argument(format!("no property `{name}` on `{}`", self.name))
        })
    }

    /// Looks up a property by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ArgumentInvalid`] if the id was resolved against another type.
    pub fn property(&self, id: PropertyId) -> Result<&Property> {
        self.properties.get(id.index()).ok_or_else(|| {
            Error::invalid_argument(format!("no property {} on `{}`", id.0, self.name))
        })
    }
}

/// Anything that names a property of a [`ComplexType`]: its name or a resolved [`PropertyId`].
pub trait AsProperty {
    fn resolve(&self, ty: &ComplexType) -> Result<PropertyId>;
}

impl AsProperty for PropertyId {
    fn resolve(&self, ty: &ComplexType) -> Result<PropertyId> {
        ty.property(*self).map(Property::id)
    }
}

impl AsProperty for &str {
    fn resolve(&self, ty: &ComplexType) -> Result<PropertyId> {
        ty.property_id(self)
    }
}

impl AsProperty for String {
    fn resolve(&self, ty: &ComplexType) -> Result<PropertyId> {
        ty.property_id(self)
    }
}

/// The set of complex types known to a graph.
#[derive(Debug, Clone)]
pub struct Schema {
    types: Vec<ComplexType>,
    by_name: HashMap<String, TypeId, GraphRandomState>,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::new()
    }

    pub fn complex(&self, id: TypeId) -> Result<&ComplexType> {
        self.types
            .get(id.0 as usize)
            .ok_or_else(|| Error::invalid_argument(format!("unknown type id {}", id.0)))
    }

    pub fn complex_by_name(&self, name: &str) -> Result<&ComplexType> {
        let id = self
            .by_name
            .get(name)
            .ok_or_else(|| Error::invalid_argument(format!("unknown type `{name}`")))?;
        self.complex(*id)
    }

    pub fn types(&self) -> impl Iterator<Item = &ComplexType> {
        self.types.iter()
    }
}

/// Collects type declarations; see the [module documentation](self) for an example.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    types: Vec<ComplexTypeBuilder>,
}

/// Declarations of one complex type, obtained from [`SchemaBuilder::complex`].
#[derive(Debug)]
pub struct ComplexTypeBuilder {
    name: String,
    key: Option<String>,
    properties: Vec<PropertyDecl>,
}

impl ComplexTypeBuilder {
    pub fn property(&mut self, decl: PropertyDecl) -> &mut Self {
        self.properties.push(decl);
        self
    }

    /// Names the property that identifies elements of this type inside lists.
    pub fn key(&mut self, property: impl Into<String>) -> &mut Self {
        self.key = Some(property.into());
        self
    }
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts (or continues) the declaration of the type `name`.
    pub fn complex(&mut self, name: impl Into<String>) -> &mut ComplexTypeBuilder {
        let name = name.into();
        let idx = match self.types.iter().position(|t| t.name == name) {
            Some(idx) => idx,
            None => {
                self.types.push(ComplexTypeBuilder {
                    name,
                    key: None,
                    properties: Vec::new(),
                });
                self.types.len() - 1
            }
        };
        &mut self.types[idx]
    }

    /// Resolves type references and freezes the declarations.
    ///
    /// # Errors
    ///
    /// - [`Error::ArgumentRequired`] for an empty type or property name.
    /// - [`Error::ArgumentInvalid`] for references to undeclared types, duplicate property names,
    ///   a key naming an undeclared or non-scalar property, or a default of the wrong kind.
    pub fn build(self) -> Result<Schema> {
        let mut by_name = create_map_with_capacity(self.types.len());
        for (idx, ty) in self.types.iter().enumerate() {
            if ty.name.is_empty() {
                return Err(Error::ArgumentRequired("type name"));
            }
            by_name.insert(ty.name.clone(), TypeId(idx as u32));
        }
        let resolve = |name: &str| {
            by_name
                .get(name)
                .copied()
                .ok_or_else(|| Error::invalid_argument(format!("unknown type `{name}`")))
        };

        let mut types = Vec::with_capacity(self.types.len());
        for (idx, ty) in self.types.into_iter().enumerate() {
            let mut properties = Vec::with_capacity(ty.properties.len());
            let mut prop_names = create_map_with_capacity(ty.properties.len());
            for (pidx, decl) in ty.properties.into_iter().enumerate() {
                if decl.name.is_empty() {
                    return Err(Error::ArgumentRequired("property name"));
                }
                let id = PropertyId(u16::try_from(pidx).map_err(|_| {
                    Error::invalid_argument(format!("too many properties on `{}`", ty.name))
                })?);
                if prop_names.insert(decl.name.clone(), id).is_some() {
                    return Err(Error::invalid_argument(format!(
                        "duplicate property `{}` on `{}`",
                        decl.name, ty.name
                    )));
                }
                let kind = match &decl.kind {
                    DeclKind::Scalar(kind) => PropertyKind::Scalar(*kind),
                    DeclKind::Complex(target) => PropertyKind::Complex(resolve(target)?),
                    DeclKind::List { element, read_only } => PropertyKind::List(ListKind {
                        element: resolve(element)?,
                        read_only: *read_only,
                    }),
                };
                let property = Property {
                    id,
                    name: decl.name,
                    kind,
                    default: Value::Null,
                    read_only: decl.read_only,
                    cast: decl.cast,
                    eq: decl.eq,
                };
                let default = match kind {
                    PropertyKind::Scalar(_) => property.cast(decl.default)?,
                    // object defaults are always null; lists are allocated per object
                    PropertyKind::Complex(_) | PropertyKind::List(_) => Value::Null,
                };
                properties.push(Property { default, ..property });
            }
            let key = match ty.key {
                Some(key) => {
                    let id = prop_names.get(&key).copied().ok_or_else(|| {
                        Error::invalid_argument(format!(
                            "key `{key}` is not a property of `{}`",
                            ty.name
                        ))
                    })?;
                    if !matches!(properties[id.index()].kind, PropertyKind::Scalar(_)) {
                        return Err(Error::invalid_argument(format!(
                            "key `{key}` of `{}` must be a scalar property",
                            ty.name
                        )));
                    }
                    Some(id)
                }
                None => None,
            };
            types.push(ComplexType {
                id: TypeId(idx as u32),
                name: ty.name,
                properties,
                by_name: prop_names,
                key,
            });
        }
        Ok(Schema { types, by_name })
    }
}
