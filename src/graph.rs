// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! The object graph that transactions edit.
//!
//! A [`Graph`] is an arena of objects addressed by [`ObjectId`]. There are two kinds of objects:
//!
//! - **complex** objects, instances of a [`ComplexType`](crate::schema::ComplexType), holding one
//!   `(Value, PropertyState)` slot per declared property;
//! - **list** containers, holding an ordered sequence of complex elements together with the key
//!   each element had when it entered the container.
//!
//! List-typed properties own a list container that is allocated together with the complex object.
//! Complex-typed properties hold a plain reference ([`Value::Object`]) that may be shared: the same
//! element can be referenced from several properties and containers at once. Each object records
//! its committed parent links, so the number of references is always known.
//!
//! The graph itself is never mutated directly by callers. All edits go through a
//! [`Transaction`](crate::Transaction) obtained from [`Graph::transact`].
use crate::{
    error::{Error, Result},
    schema::{AsProperty, ListKind, PropertyId, PropertyKind, Schema, TypeId},
    transaction::Transaction,
    value::{PropertyState, Value},
};
use smallvec::SmallVec;
use std::{cmp::Ordering, fmt, sync::Arc};

/// Stable identifier of an object in a [`Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub struct ObjectId(pub(crate) u32);

impl ObjectId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity of an element inside a list container.
///
/// If the element's type declares a key property (and the element has a non-null value for it),
/// elements are identified by that value. Otherwise the element is identified by its
/// [`ObjectId`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub enum ElementKey {
    Identity(ObjectId),
    Value(Value),
}

impl fmt::Display for ElementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementKey::Identity(id) => write!(f, "{id}"),
            ElementKey::Value(v) => write!(f, "{v}"),
        }
    }
}

/// Contents of a list container: elements and their keys, index-aligned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListState {
    pub(crate) elements: Vec<ObjectId>,
    pub(crate) keys: Vec<ElementKey>,
}

impl ListState {
    pub fn elements(&self) -> &[ObjectId] {
        &self.elements
    }

    pub fn keys(&self) -> &[ElementKey] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn position(&self, element: ObjectId) -> Option<usize> {
        self.elements.iter().position(|e| *e == element)
    }

    pub fn position_of_key(&self, key: &ElementKey) -> Option<usize> {
        self.keys.iter().position(|k| k == key)
    }
}

/// Where a parent holds a reference to a child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Slot {
    Property(PropertyId),
    Element,
}

/// One reference to an object: the container holding it and the slot it occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Parent {
    pub container: ObjectId,
    pub slot: Slot,
}

impl Parent {
    pub fn property(container: ObjectId, property: PropertyId) -> Self {
        Self {
            container,
            slot: Slot::Property(property),
        }
    }

    pub fn element(container: ObjectId) -> Self {
        Self {
            container,
            slot: Slot::Element,
        }
    }
}

/// What kind of object an [`ObjectId`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Complex(TypeId),
    List(ListKind),
}

#[derive(Debug, Clone)]
pub(crate) enum ObjectData {
    Complex {
        ty: TypeId,
        slots: Vec<(Value, PropertyState)>,
    },
    List {
        kind: ListKind,
        state: ListState,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct Object {
    /// Version of the last commit that touched this object.
    pub(crate) version: u64,
    pub(crate) parents: SmallVec<[Parent; 2]>,
    pub(crate) data: ObjectData,
}

impl Object {
    pub(crate) fn kind(&self) -> ObjectKind {
        match &self.data {
            ObjectData::Complex { ty, .. } => ObjectKind::Complex(*ty),
            ObjectData::List { kind, .. } => ObjectKind::List(*kind),
        }
    }
}

/// Read access to object contents.
///
/// Implemented by [`Graph`] (the committed view) and by [`Transaction`] (the pending view, in
/// which recorded changes shadow the committed contents).
pub trait Lookup {
    fn schema(&self) -> &Schema;

    /// # Errors
    ///
    /// [`Error::ArgumentInvalid`] if `id` does not belong to this graph.
    fn object_kind(&self, id: ObjectId) -> Result<ObjectKind>;

    fn value(&self, id: ObjectId, property: PropertyId) -> Result<Value>;

    fn state(&self, id: ObjectId, property: PropertyId) -> Result<PropertyState>;

    /// Elements of the list container `list`, in order.
    fn elements(&self, list: ObjectId) -> Result<Vec<ObjectId>>;
}

impl dyn Lookup + '_ {
    /// Resolves the complex type of `id`.
    pub fn complex_type(&self, id: ObjectId) -> Result<TypeId> {
        match self.object_kind(id)? {
            ObjectKind::Complex(ty) => Ok(ty),
            ObjectKind::List(_) => Err(Error::invalid_argument(format!(
                "{id} is a list, not a complex object"
            ))),
        }
    }

    /// Reads a property by name or id.
    pub fn get(&self, id: ObjectId, property: impl AsProperty) -> Result<Value> {
        let ty = self.complex_type(id)?;
        let property = property.resolve(self.schema().complex(ty)?)?;
        self.value(id, property)
    }
}

/// Computes the key under which `element` is tracked inside a list.
pub(crate) fn element_key(lookup: &dyn Lookup, element: ObjectId) -> Result<ElementKey> {
    let ty = lookup.complex_type(element)?;
    if let Some(key) = lookup.schema().complex(ty)?.key() {
        let value = lookup.value(element, key)?;
        if !value.is_null() {
            return Ok(ElementKey::Value(value));
        }
    }
    Ok(ElementKey::Identity(element))
}

type CompareFn = dyn Fn(&dyn Lookup, ObjectId, ObjectId) -> Ordering + Send + Sync;

/// Orders list elements for [`ListEdit::sort`](crate::transaction::ListEdit::sort).
///
/// The comparison runs once, against the pending contents of the transaction that records the
/// sort. Commit applies the order it produced.
#[derive(Clone)]
pub struct Comparer(Arc<CompareFn>);

impl Comparer {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&dyn Lookup, ObjectId, ObjectId) -> Ordering + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Orders elements by the value of the property `name` (unreadable values compare as null).
    pub fn by_property(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(move |lookup, a, b| {
            let a = lookup.get(a, name.as_str()).unwrap_or_default();
            let b = lookup.get(b, name.as_str()).unwrap_or_default();
            a.cmp(&b)
        })
    }

    pub fn reversed(self) -> Self {
        Self::new(move |lookup, a, b| (self.0)(lookup, b, a))
    }

    pub(crate) fn compare(&self, lookup: &dyn Lookup, a: ObjectId, b: ObjectId) -> Ordering {
        (self.0)(lookup, a, b)
    }
}

impl PartialEq for Comparer {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Comparer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Comparer(..)")
    }
}

/// An arena of complex objects and list containers sharing one [`Schema`].
#[derive(Debug, Clone)]
pub struct Graph {
    schema: Arc<Schema>,
    pub(crate) objects: Vec<Object>,
    pub(crate) version: u64,
}

impl Graph {
    pub fn new(schema: Schema) -> Self {
        Self::with_schema(Arc::new(schema))
    }

    pub fn with_schema(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            objects: Vec::new(),
            version: 0,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub(crate) fn shared_schema(&self) -> Arc<Schema> {
        Arc::clone(&self.schema)
    }

    /// Version of the last commit.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Allocates a new, unreferenced complex object with every property in its default state.
    ///
    /// List-typed properties are populated with fresh, empty list containers owned by the new
    /// object.
    ///
    /// # Errors
    ///
    /// [`Error::ArgumentRequired`] for an empty name, [`Error::ArgumentInvalid`] for an unknown
    /// type.
    pub fn create(&mut self, type_name: &str) -> Result<ObjectId> {
        if type_name.is_empty() {
            return Err(Error::ArgumentRequired("type name"));
        }
        let ty = self.schema.complex_by_name(type_name)?.id();
        self.create_typed(ty)
    }

    pub(crate) fn create_typed(&mut self, ty: TypeId) -> Result<ObjectId> {
        let schema = Arc::clone(&self.schema);
        let complex = schema.complex(ty)?;
        let id = self.allocate(ObjectData::Complex {
            ty,
            slots: Vec::new(),
        })?;
        let mut slots = Vec::with_capacity(complex.properties().len());
        for property in complex.properties() {
            let value = match property.kind() {
                PropertyKind::List(kind) => {
                    let list = self.allocate(ObjectData::List {
                        kind,
                        state: ListState::default(),
                    })?;
                    self.objects[list.index()]
                        .parents
                        .push(Parent::property(id, property.id()));
                    Value::Object(list)
                }
                PropertyKind::Scalar(_) | PropertyKind::Complex(_) => {
                    property.default_value().clone()
                }
            };
            slots.push((value, PropertyState::Default));
        }
        if let ObjectData::Complex { slots: s, .. } = &mut self.objects[id.index()].data {
            *s = slots;
        }
        tracing::trace!(%id, ty = complex.name(), "created object");
        Ok(id)
    }

    fn allocate(&mut self, data: ObjectData) -> Result<ObjectId> {
        let id = u32::try_from(self.objects.len())
            .map(ObjectId)
            .map_err(|_| Error::invalid_operation("object arena is full"))?;
        self.objects.push(Object {
            version: self.version,
            parents: SmallVec::new(),
            data,
        });
        Ok(id)
    }

    pub(crate) fn object(&self, id: ObjectId) -> Result<&Object> {
        self.objects
            .get(id.index())
            .ok_or_else(|| Error::invalid_argument(format!("unknown object {id}")))
    }

    pub(crate) fn object_mut(&mut self, id: ObjectId) -> Result<&mut Object> {
        self.objects
            .get_mut(id.index())
            .ok_or_else(|| Error::invalid_argument(format!("unknown object {id}")))
    }

    pub(crate) fn slot(
        &self,
        id: ObjectId,
        property: PropertyId,
    ) -> Result<&(Value, PropertyState)> {
        match &self.object(id)?.data {
            ObjectData::Complex { slots, .. } => slots.get(property.index()).ok_or_else(|| {
                Error::invalid_argument(format!("{id} has no property {}", property.index()))
            }),
            ObjectData::List { .. } => Err(Error::invalid_argument(format!(
                "{id} is a list, not a complex object"
            ))),
        }
    }

    pub(crate) fn list_state(&self, id: ObjectId) -> Result<&ListState> {
        match &self.object(id)?.data {
            ObjectData::List { state, .. } => Ok(state),
            ObjectData::Complex { .. } => Err(Error::invalid_argument(format!(
                "{id} is a complex object, not a list"
            ))),
        }
    }

    /// Reads the committed value of a property.
    pub fn get(&self, id: ObjectId, property: impl AsProperty) -> Result<Value> {
        (self as &dyn Lookup).get(id, property)
    }

    /// Reads the committed state of a property.
    pub fn get_state(&self, id: ObjectId, property: impl AsProperty) -> Result<PropertyState> {
        let ty = (self as &dyn Lookup).complex_type(id)?;
        let property = property.resolve(self.schema.complex(ty)?)?;
        Ok(self.slot(id, property)?.1)
    }

    /// The list container owned by the list-typed property `property` of `id`.
    pub fn list_of(&self, id: ObjectId, property: impl AsProperty) -> Result<ObjectId> {
        self.get(id, property)?
            .as_object()
            .ok_or_else(|| Error::invalid_argument(format!("property of {id} is not a list")))
    }

    /// Committed elements of a list container.
    pub fn elements(&self, list: ObjectId) -> Result<&[ObjectId]> {
        Ok(&self.list_state(list)?.elements)
    }

    /// Committed parent links of `id`.
    pub fn parents(&self, id: ObjectId) -> Result<&[Parent]> {
        Ok(&self.object(id)?.parents)
    }

    /// Number of committed references to `id`.
    pub fn ref_count(&self, id: ObjectId) -> Result<usize> {
        Ok(self.object(id)?.parents.len())
    }

    /// Version of the last commit that touched `id`.
    pub fn object_version(&self, id: ObjectId) -> Result<u64> {
        Ok(self.object(id)?.version)
    }

    /// A JSON snapshot of the committed contents of `id` and everything below it.
    #[cfg(feature = "json")]
    pub fn to_json(&self, id: ObjectId) -> Result<serde_json::Value> {
        crate::json::to_json(self, id)
    }

    /// Opens a transaction over this graph.
    ///
    /// The transaction borrows the graph exclusively until it is committed, rejected, or dropped.
    /// Dropping it without committing discards every change.
    pub fn transact(&mut self) -> Transaction<'_> {
        Transaction::new(self)
    }
}

impl Lookup for Graph {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn object_kind(&self, id: ObjectId) -> Result<ObjectKind> {
        Ok(self.object(id)?.kind())
    }

    fn value(&self, id: ObjectId, property: PropertyId) -> Result<Value> {
        Ok(self.slot(id, property)?.0.clone())
    }

    fn state(&self, id: ObjectId, property: PropertyId) -> Result<PropertyState> {
        Ok(self.slot(id, property)?.1)
    }

    fn elements(&self, list: ObjectId) -> Result<Vec<ObjectId>> {
        Ok(self.list_state(list)?.elements.clone())
    }
}
