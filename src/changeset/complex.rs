// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Property-level change recording for complex objects.
use super::{ChangeLog, ChangesetId, primitive::Primitive, Replace};
use crate::{
    error::{Error, Result},
    graph::{Lookup, ObjectId, ObjectKind},
    schema::{Property, PropertyId, PropertyKind},
    transaction::Transaction,
    value::{PropertyState, Value},
};
use std::collections::BTreeMap;

/// What a complex changeset records for one property.
///
/// A `Replace` shadows any nested changeset of the value it replaced; the two never coexist for
/// the same property.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEntry {
    Replace(Replace),
    Nested(ChangesetId),
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ComplexBody {
    pub(crate) changes: BTreeMap<PropertyId, ChangeEntry>,
}

impl ComplexBody {
    pub(crate) fn replaces(&self) -> impl Iterator<Item = &Replace> {
        self.changes.values().filter_map(|entry| match entry {
            ChangeEntry::Replace(r) => Some(r),
            ChangeEntry::Nested(_) => None,
        })
    }

    pub(crate) fn replace(&self, property: PropertyId) -> Option<&Replace> {
        match self.changes.get(&property) {
            Some(ChangeEntry::Replace(r)) => Some(r),
            _ => None,
        }
    }
}

impl ChangeLog {
    pub(crate) fn complex_body(&self, id: ChangesetId) -> Result<&ComplexBody> {
        match &self.get(id).body {
            super::Body::Complex(body) => Ok(body),
            super::Body::List(_) => Err(Error::invalid_argument("not a complex changeset")),
        }
    }

    /// The pending `Replace` of `target.property`, if one is recorded.
    pub(crate) fn pending_replace(
        &self,
        target: ObjectId,
        property: PropertyId,
    ) -> Option<&Replace> {
        let id = self.by_target.get(&target)?;
        self.complex_body(*id).ok()?.replace(property)
    }
}

impl Transaction<'_> {
    /// Casts and validates `spec` for `property`, returning the requested value and state.
    ///
    /// An absent spec requests the property's default.
    pub(crate) fn requested_value(
        &self,
        property: &Property,
        spec: Option<Value>,
    ) -> Result<(Value, PropertyState)> {
        let Some(spec) = spec else {
            return Ok((property.default_value().clone(), PropertyState::Default));
        };
        let value = property.cast(spec)?;
        if let (PropertyKind::Complex(ty), Some(object)) = (property.kind(), value.as_object()) {
            if self.graph.object(object)?.kind() != ObjectKind::Complex(ty) {
                return Err(Error::invalid_argument(format!(
                    "property `{}` expects a `{}`, {object} is not one",
                    property.name(),
                    self.graph.schema().complex(ty)?.name()
                )));
            }
        }
        Ok((value, PropertyState::Specified))
    }

    /// Records a change of `target.property` to `spec` (the default if `None`).
    ///
    /// Returns whether anything was recorded. Setting the ambient value and state again is a
    /// no-op, and setting the committed value and state removes a pending `Replace` instead of
    /// stacking a second one. `force_replace` skips the value comparison, so a `Replace` is
    /// recorded even when the value does not change.
    pub(crate) fn set_property(
        &mut self,
        target: ObjectId,
        property: PropertyId,
        spec: Option<Value>,
        force_replace: bool,
    ) -> Result<bool> {
        self.ensure_open()?;
        let schema = self.graph.shared_schema();
        let ty = (&*self.graph as &dyn Lookup).complex_type(target)?;
        let decl = schema.complex(ty)?.property(property)?;

        let (initial_value, initial_state) = self.graph.slot(target, property)?.clone();
        let existing = self.log.pending_replace(target, property).cloned();
        let (ambient_value, ambient_state) = match &existing {
            Some(r) => (r.value_new.clone(), r.state_new),
            None => (initial_value.clone(), initial_state),
        };
        let (new_value, new_state) = self.requested_value(decl, spec)?;

        let same_value = decl.values_equal(&new_value, &ambient_value);
        if new_state == ambient_state && !force_replace && same_value {
            return Ok(false);
        }
        if decl.is_read_only() {
            return Err(Error::read_only(format!(
                "property `{}.{}` is read-only",
                schema.complex(ty)?.name(),
                decl.name()
            )));
        }

        let cs = self.ensure_changeset(target)?;
        let version = self.take_next_version();
        let reverts = !force_replace
            && new_state == initial_state
            && decl.values_equal(&new_value, &initial_value);

        let resulting_value = match existing {
            Some(old) if reverts => {
                old.cancel(target, &mut self.refs);
                self.log.complex_body_mut(cs)?.changes.remove(&property);
                tracing::trace!(%target, property = decl.name(), "reverted property");
                initial_value.clone()
            }
            Some(old) => {
                old.cancel(target, &mut self.refs);
                let replace = Replace {
                    property,
                    value_old: initial_value.clone(),
                    // an update of the state alone keeps the ambient value instance
                    value_new: if same_value { ambient_value.clone() } else { new_value },
                    state_old: initial_state,
                    state_new: new_state,
                };
                replace.prepare(target, &mut self.refs);
                let value = replace.value_new.clone();
                self.log
                    .complex_body_mut(cs)?
                    .changes
                    .insert(property, ChangeEntry::Replace(replace));
                value
            }
            None => {
                let replace = Replace {
                    property,
                    value_old: initial_value.clone(),
                    value_new: new_value,
                    state_old: initial_state,
                    state_new: new_state,
                };
                replace.prepare(target, &mut self.refs);
                let value = replace.value_new.clone();
                let shadowed = self
                    .log
                    .complex_body_mut(cs)?
                    .changes
                    .insert(property, ChangeEntry::Replace(replace));
                if let Some(ChangeEntry::Nested(child)) = shadowed {
                    self.log.reset_net_order(child);
                }
                value
            }
        };
        self.log.get_mut(cs).transaction_version = version;

        if ambient_value.as_object() != resulting_value.as_object() {
            if let Some(old) = ambient_value.as_object() {
                self.remove_complex_element(cs, old);
            }
            if let Some(new) = resulting_value.as_object() {
                self.add_complex_element(cs, new);
            }
        }
        if reverts {
            // the committed value is visible again, and so are its pending changes
            if let Some(child) = initial_value
                .as_object()
                .and_then(|o| self.log.by_target.get(&o).copied())
            {
                self.attach_nested_property(cs, property, child);
            }
        }
        Ok(true)
    }

    /// Records `child` as the nested changeset of `parent.property` unless a `Replace` shadows it.
    pub(crate) fn attach_nested_property(
        &mut self,
        parent: ChangesetId,
        property: PropertyId,
        child: ChangesetId,
    ) {
        if let Ok(body) = self.log.complex_body_mut(parent) {
            match body.changes.get(&property) {
                Some(ChangeEntry::Replace(_)) => {}
                _ => {
                    body.changes.insert(property, ChangeEntry::Nested(child));
                }
            }
        }
        self.log.attach(parent, child);
    }

    /// Pushes the changes of the complex changeset `cs` into the graph.
    ///
    /// Properties whose value has nested changes become [`PropertyState::Specified`].
    pub(crate) fn apply_complex(&mut self, cs: ChangesetId) -> Result<()> {
        let body = self.log.complex_body(cs)?;
        let target = self.log.get(cs).target;
        let mut specified = Vec::new();
        for (property, entry) in &body.changes {
            if let ChangeEntry::Nested(child) = entry {
                if self.log.has_changes(*child) {
                    specified.push(*property);
                }
            }
        }
        let object = self.graph.object_mut(target)?;
        let crate::graph::ObjectData::Complex { slots, .. } = &mut object.data else {
            return Err(Error::invalid_operation(format!("{target} is not a complex object")));
        };
        for replace in body.replaces() {
            replace.apply(slots)?;
        }
        for property in specified {
            if let Some(slot) = slots.get_mut(property.index()) {
                slot.1 = PropertyState::Specified;
            }
        }
        Ok(())
    }
}
