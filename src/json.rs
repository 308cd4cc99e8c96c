// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! JSON representation
//!
//! A complex object becomes a JSON object with one field per property, a list container a JSON
//! array of its elements. Object references are followed, so the result is a snapshot of the
//! whole subtree below the starting object. A reference back to an object that is already being
//! serialized further up is written as `{"$ref": "#n"}` instead.
//!
//! # Example
//!
//! ```json
//! {
//!   "status": "open",
//!   "lines": [
//!     { "sku": "A-1", "qty": 3 },
//!     { "sku": "B-7", "qty": 1 }
//!   ]
//! }
//! ```
//!
//! Bytes are base64 encoded, non-finite doubles become `null`.
use crate::{
    error::Result,
    graph::{Lookup, ObjectId, ObjectKind},
    value::Value,
};
use std::collections::HashSet;

/// Converts a [`Value`] to a [`serde_json::Value`], writing object references as `"#n"`.
impl From<Value> for serde_json::Value {
    fn from(val: Value) -> Self {
        match val {
            Value::Null => serde_json::Value::Null,
            Value::Bool(v) => v.into(),
            Value::I64(v) => v.into(),
            Value::U64(v) => v.into(),
            // `From<f64>` maps NaN and infinities to null
            Value::Double(v) => v.into(),
            Value::String(v) => v.into(),
            Value::Bytes(v) => {
                base64::Engine::encode(&base64::engine::general_purpose::STANDARD, v).into()
            }
            #[cfg(feature = "ulid")]
            Value::Ulid(v) => v.to_string().into(),
            Value::Object(id) => id.to_string().into(),
        }
    }
}

/// Serializes `id` and everything reachable from it as `lookup` sees it.
pub fn to_json(lookup: &dyn Lookup, id: ObjectId) -> Result<serde_json::Value> {
    let mut path = HashSet::new();
    object_to_json(lookup, id, &mut path)
}

fn object_to_json(
    lookup: &dyn Lookup,
    id: ObjectId,
    path: &mut HashSet<ObjectId>,
) -> Result<serde_json::Value> {
    if !path.insert(id) {
        return Ok(serde_json::json!({ "$ref": id.to_string() }));
    }
    let json = match lookup.object_kind(id)? {
        ObjectKind::Complex(ty) => {
            let ty = lookup.schema().complex(ty)?;
            let mut fields = serde_json::Map::new();
            for property in ty.properties() {
                let value = match lookup.value(id, property.id())? {
                    Value::Object(child) => object_to_json(lookup, child, path)?,
                    other => other.into(),
                };
                fields.insert(property.name().to_string(), value);
            }
            serde_json::Value::Object(fields)
        }
        ObjectKind::List(_) => serde_json::Value::Array(
            lookup
                .elements(id)?
                .into_iter()
                .map(|element| object_to_json(lookup, element, path))
                .collect::<Result<_>>()?,
        ),
    };
    path.remove(&id);
    Ok(json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Graph, PropertyDecl, SchemaBuilder, ValueKind};
    use insta::assert_snapshot;

    #[test]
    fn scalars() {
        assert_eq!(serde_json::Value::from(Value::Bytes(vec![1, 2, 3])), "AQID");
        assert_eq!(serde_json::Value::from(Value::Double(f64::NAN)), serde_json::Value::Null);
        assert_eq!(serde_json::Value::from(Value::U64(7)), 7);
    }

    #[test]
    fn pending_subtree() {
        let mut builder = SchemaBuilder::new();
        builder
            .complex("Team")
            .property(PropertyDecl::scalar("name", ValueKind::String))
            .property(PropertyDecl::complex("lead", "Person"))
            .property(PropertyDecl::list("members", "Person"));
        builder
            .complex("Person")
            .property(PropertyDecl::scalar("name", ValueKind::String))
            .property(PropertyDecl::complex("team", "Team"));
        let mut graph = Graph::new(builder.build().unwrap());
        let team = graph.create("Team").unwrap();
        let members = graph.list_of(team, "members").unwrap();

        let mut tx = graph.transact();
        let ada = tx.create("Person").unwrap();
        tx.object(ada).unwrap().set("name", "Ada").unwrap();
        tx.object(ada).unwrap().set("team", team).unwrap();
        tx.object(team).unwrap().set("name", "core").unwrap();
        tx.object(team).unwrap().set("lead", ada).unwrap();
        tx.list(members).unwrap().push(&[ada]).unwrap();

        let json = serde_json::to_string_pretty(&tx.to_json(team).unwrap()).unwrap();
        assert_snapshot!(json, @r###"
        {
          "lead": {
            "name": "Ada",
            "team": {
              "$ref": "#0"
            }
          },
          "members": [
            {
              "name": "Ada",
              "team": {
                "$ref": "#0"
              }
            }
          ],
          "name": "core"
        }
        "###);
        drop(tx);
        assert_eq!(graph.get(team, "name").unwrap(), Value::Null);
    }
}
