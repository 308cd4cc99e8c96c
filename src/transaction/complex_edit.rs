// (c) Copyright 2025 Helsing GmbH. All rights reserved.
use super::{ListEdit, Transaction};
use crate::{
    changeset::ChangesetRef,
    error::Result,
    graph::{Lookup, ObjectId},
    schema::{AsProperty, PropertyId, TypeId},
    value::{PropertyState, Value},
};

/// Edit handle for one complex object inside a [`Transaction`].
///
/// Reads see the pending contents of the transaction. Every setter validates its input before
/// recording anything and reports whether a change was recorded; setting the value a property
/// already has within the transaction is a no-op.
///
/// # Example
///
/// ```
/// # use txgraph::{Graph, PropertyDecl, PropertyState, SchemaBuilder, ValueKind};
/// # let mut builder = SchemaBuilder::new();
/// # builder
/// #     .complex("Line")
/// #     .property(PropertyDecl::scalar("qty", ValueKind::I64).with_default(1));
/// # let mut graph = Graph::new(builder.build().unwrap());
/// # let line = graph.create("Line").unwrap();
/// let mut tx = graph.transact();
/// let mut edit = tx.object(line).unwrap();
/// assert!(edit.set("qty", 4).unwrap());
/// assert!(!edit.set("qty", 4).unwrap());
/// assert_eq!(edit.get("qty").unwrap(), 4.into());
/// assert_eq!(edit.get_old("qty").unwrap(), 1.into());
///
/// // back to the committed contents, so nothing is left to record
/// assert!(edit.reset("qty").unwrap());
/// assert_eq!(edit.state("qty").unwrap(), PropertyState::Default);
/// assert!(!edit.changeset().unwrap().has_changes());
/// ```
pub struct ComplexEdit<'t, 'g> {
    tx: &'t mut Transaction<'g>,
    id: ObjectId,
    ty: TypeId,
}

impl<'t, 'g> ComplexEdit<'t, 'g> {
    pub(crate) fn new(tx: &'t mut Transaction<'g>, id: ObjectId) -> Result<Self> {
        let ty = (&*tx as &dyn Lookup).complex_type(id)?;
        Ok(Self { tx, id, ty })
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    fn resolve(&self, property: impl AsProperty) -> Result<PropertyId> {
        property.resolve(self.tx.schema().complex(self.ty)?)
    }

    /// Sets `property` to `value`, marking it [`PropertyState::Specified`].
    ///
    /// # Errors
    ///
    /// - [`Error::ArgumentInvalid`](crate::Error::ArgumentInvalid) for unknown properties and
    ///   values that do not cast to the property's kind.
    /// - [`Error::ReadOnlyViolation`](crate::Error::ReadOnlyViolation) if the property is
    ///   read-only and the value differs.
    pub fn set(&mut self, property: impl AsProperty, value: impl Into<Value>) -> Result<bool> {
        let property = self.resolve(property)?;
        self.tx
            .set_property(self.id, property, Some(value.into()), false)
    }

    /// Like [`ComplexEdit::set`], with `None` requesting the default and `force_replace`
    /// recording a replace even if the value stays the same.
    pub fn set_with(
        &mut self,
        property: impl AsProperty,
        value: Option<Value>,
        force_replace: bool,
    ) -> Result<bool> {
        let property = self.resolve(property)?;
        self.tx.set_property(self.id, property, value, force_replace)
    }

    /// Returns `property` to its default value and [`PropertyState::Default`].
    pub fn reset(&mut self, property: impl AsProperty) -> Result<bool> {
        let property = self.resolve(property)?;
        self.tx.set_property(self.id, property, None, false)
    }

    /// The pending value of `property`.
    pub fn get(&self, property: impl AsProperty) -> Result<Value> {
        let property = self.resolve(property)?;
        Lookup::value(&*self.tx, self.id, property)
    }

    /// The pending state of `property`.
    pub fn state(&self, property: impl AsProperty) -> Result<PropertyState> {
        let property = self.resolve(property)?;
        Lookup::state(&*self.tx, self.id, property)
    }

    /// The committed value of `property`.
    pub fn get_old(&self, property: impl AsProperty) -> Result<Value> {
        let property = self.resolve(property)?;
        Lookup::value(&*self.tx.graph, self.id, property)
    }

    /// An edit handle for the list container owned by the list-typed `property`.
    pub fn list(&mut self, property: impl AsProperty) -> Result<ListEdit<'_, 'g>> {
        let property = self.resolve(property)?;
        let list = self.tx.graph.list_of(self.id, property)?;
        ListEdit::new(self.tx, list)
    }

    /// The changeset recorded for this object, if any.
    pub fn changeset(&self) -> Option<ChangesetRef<'_>> {
        self.tx.changeset(self.id)
    }
}
