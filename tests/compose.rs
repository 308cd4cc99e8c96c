//! Tests for composing sequential changesets and for the change log's text form.

use insta::assert_snapshot;
use quickcheck::TestResult;
use quickcheck_macros::quickcheck;
use txgraph::{
    Change, ElementKey, Error, Graph, ListChange, ObjectId, PropertyDecl, PropertyState,
    SchemaBuilder, Transaction, Value, ValueKind,
};

fn graph() -> Graph {
    let mut builder = SchemaBuilder::new();
    builder
        .complex("Order")
        .property(PropertyDecl::scalar("status", ValueKind::String).with_default("new"))
        .property(PropertyDecl::complex("customer", "Customer"))
        .property(PropertyDecl::list("lines", "Line"));
    builder
        .complex("Customer")
        .property(PropertyDecl::scalar("name", ValueKind::String));
    builder
        .complex("Line")
        .key("sku")
        .property(PropertyDecl::scalar("sku", ValueKind::String))
        .property(PropertyDecl::scalar("qty", ValueKind::I64));
    Graph::new(builder.build().unwrap())
}

/// An order with one committed line `A-1`.
fn order_with_line(graph: &mut Graph) -> (ObjectId, ObjectId, ObjectId) {
    let order = graph.create("Order").unwrap();
    let lines = graph.list_of(order, "lines").unwrap();
    let mut tx = graph.transact();
    let line = tx.create("Line").unwrap();
    tx.object(line).unwrap().set("sku", "A-1").unwrap();
    tx.list(lines).unwrap().push(&[line]).unwrap();
    tx.commit().unwrap();
    (order, lines, line)
}

#[test]
fn replaces_combine_into_their_net_effect() {
    let mut graph = graph();
    let (order, _, line) = order_with_line(&mut graph);
    let customer = graph.create("Customer").unwrap();

    let a = {
        let mut tx = graph.transact();
        tx.object(order).unwrap().set("status", "open").unwrap();
        tx.object(line).unwrap().set("qty", 2).unwrap();
        tx.commit().unwrap()
    };
    let b = {
        let mut tx = graph.transact();
        tx.object(order).unwrap().set("status", "shipped").unwrap();
        tx.object(order).unwrap().set("customer", customer).unwrap();
        tx.object(line).unwrap().set("qty", 5).unwrap();
        tx.commit().unwrap()
    };
    let (a, b) = (a.0.changeset(order).unwrap(), b.0.changeset(order).unwrap());
    let composed = a.compose(&b).unwrap();
    let root = composed.root();
    assert!(composed.log().is_read_only());
    assert_eq!(root.target(), order);

    let Some(Change::Replace(status)) = root.get_change("status").unwrap() else {
        panic!("status should be replaced");
    };
    assert_eq!(status.value_old(), &Value::from("new"));
    assert_eq!(status.state_old(), PropertyState::Default);
    assert_eq!(status.value_new(), &Value::from("shipped"));

    // only touched by the later changeset: taken as is
    let (Some(Change::Replace(composed_customer)), Some(Change::Replace(later))) = (
        root.get_change("customer").unwrap(),
        b.get_change("customer").unwrap(),
    ) else {
        panic!("customer should be replaced");
    };
    assert_eq!(composed_customer, later);

    // nested changesets of the same element compose recursively
    let Some(Change::Nested(lines)) = root.get_change("lines").unwrap() else {
        panic!("lines should be nested");
    };
    let line_cs = lines
        .changeset_for_key(&ElementKey::Value("A-1".into()))
        .unwrap()
        .unwrap();
    let Some(Change::Replace(qty)) = line_cs.get_change("qty").unwrap() else {
        panic!("qty should be replaced");
    };
    assert_eq!(qty.value_old(), &Value::Null);
    assert_eq!(qty.value_new(), &Value::from(5));
    assert!(line_cs.net_order() > lines.net_order());
}

#[test]
fn an_empty_changeset_is_a_left_identity() {
    let mut graph = graph();
    let (order, _, _) = order_with_line(&mut graph);
    let empty = {
        let mut tx = graph.transact();
        tx.object(order).unwrap().set("status", "x").unwrap();
        tx.object(order).unwrap().reset("status").unwrap();
        tx.commit().unwrap()
    };
    let b = {
        let mut tx = graph.transact();
        tx.object(order).unwrap().set("status", "open").unwrap();
        tx.commit().unwrap()
    };
    let (empty, b) = (
        empty.0.changeset(order).unwrap(),
        b.0.changeset(order).unwrap(),
    );
    assert!(!empty.has_changes());
    let composed = empty.compose(&b).unwrap();
    let root = composed.root();
    assert_eq!(root.changes().unwrap().len(), b.changes().unwrap().len());
    let (Some(Change::Replace(x)), Some(Change::Replace(y))) = (
        root.get_change("status").unwrap(),
        b.get_change("status").unwrap(),
    ) else {
        panic!("status should be replaced");
    };
    assert_eq!(x, y);
}

#[test]
fn an_assignment_absorbs_later_edits_of_the_assigned_object() {
    let mut graph = graph();
    let order = graph.create("Order").unwrap();
    let (a, customer) = {
        let mut tx = graph.transact();
        let customer = tx.create("Customer").unwrap();
        tx.object(customer).unwrap().set("name", "Ada").unwrap();
        tx.object(order).unwrap().set("customer", customer).unwrap();
        (tx.commit().unwrap(), customer)
    };
    let b = {
        let mut tx = graph.transact();
        tx.object(customer).unwrap().set("name", "Bea").unwrap();
        tx.commit().unwrap()
    };
    let (a, b) = (a.0.changeset(order).unwrap(), b.0.changeset(order).unwrap());
    assert!(matches!(
        b.get_change("customer").unwrap(),
        Some(Change::Nested(_))
    ));

    let composed = a.compose(&b).unwrap();
    let root = composed.root();
    let Some(Change::Replace(assigned)) = root.get_change("customer").unwrap() else {
        panic!("customer should stay replaced");
    };
    assert_eq!(assigned.value_old(), &Value::Null);
    assert_eq!(assigned.value_new(), &Value::from(customer));

    let nested = composed.log().changeset(customer).unwrap();
    assert!(nested.net_order() > root.net_order());
    let Some(Change::Replace(name)) = nested.get_change("name").unwrap() else {
        panic!("name should be replaced");
    };
    assert_eq!(name.value_old(), &Value::Null);
    assert_eq!(name.value_new(), &Value::from("Bea"));
}

#[test]
fn reverted_nested_edits_keep_the_earlier_assignment() {
    let mut graph = graph();
    let order = graph.create("Order").unwrap();
    let customer = graph.create("Customer").unwrap();
    let a = {
        let mut tx = graph.transact();
        tx.object(order).unwrap().set("customer", customer).unwrap();
        tx.commit().unwrap()
    };
    let b = {
        let mut tx = graph.transact();
        tx.object(customer).unwrap().set("name", "Ada").unwrap();
        tx.object(customer).unwrap().reset("name").unwrap();
        tx.commit().unwrap()
    };
    let (a, b) = (a.0.changeset(order).unwrap(), b.0.changeset(order).unwrap());
    assert!(a.has_changes());
    assert!(!b.has_changes());

    let composed = a.compose(&b).unwrap();
    let root = composed.root();
    assert!(root.has_changes());
    let Some(Change::Replace(assigned)) = root.get_change("customer").unwrap() else {
        panic!("customer should stay replaced");
    };
    assert_eq!(assigned.value_new(), &Value::from(customer));
}

#[test]
fn list_changes_are_concatenated_until_a_clear() {
    let mut graph = graph();
    let (_, lines, line) = order_with_line(&mut graph);

    let mut commit = |f: &dyn Fn(&mut Transaction<'_>)| {
        let mut tx = graph.transact();
        f(&mut tx);
        tx.commit().unwrap()
    };
    let a = commit(&|tx: &mut Transaction<'_>| {
        let extra = tx.create("Line").unwrap();
        tx.object(extra).unwrap().set("sku", "B-2").unwrap();
        tx.list(lines).unwrap().push(&[extra]).unwrap();
    });
    let b = commit(&|tx: &mut Transaction<'_>| {
        tx.list(lines).unwrap().remove(&[line]).unwrap();
    });
    let c = commit(&|tx: &mut Transaction<'_>| {
        tx.list(lines).unwrap().clear().unwrap();
    });
    let (a, b, c) = (
        a.0.changeset(lines).unwrap(),
        b.0.changeset(lines).unwrap(),
        c.0.changeset(lines).unwrap(),
    );

    let ab = a.compose(&b).unwrap();
    let changes = ab.root().live_changes().unwrap();
    assert_eq!(changes.len(), 2);
    assert!(matches!(changes[0], ListChange::Add { index: 1, .. }));
    assert_eq!(
        changes[1],
        ListChange::Remove {
            elements: vec![line],
            index: 0
        }
    );

    let ac = a.compose(&c).unwrap();
    assert_eq!(ac.root().primitive_changes().unwrap(), c.primitive_changes().unwrap());
    assert!(matches!(
        ac.root().live_changes().unwrap(),
        [ListChange::Clear { .. }]
    ));
}

#[test]
fn composing_mismatched_changesets_fails() {
    let mut shop = graph();
    let (order, _, line) = order_with_line(&mut shop);
    let a = {
        let mut tx = shop.transact();
        tx.object(line).unwrap().set("qty", 1).unwrap();
        tx.commit().unwrap()
    };
    let b = {
        let mut tx = shop.transact();
        tx.object(line).unwrap().set("qty", 2).unwrap();
        tx.commit().unwrap()
    };
    let (a_order, a_line) = (a.0.changeset(order).unwrap(), a.0.changeset(line).unwrap());
    let b_line = b.0.changeset(line).unwrap();

    assert!(matches!(
        a_order.compose(&b_line),
        Err(Error::ArgumentInvalid(_))
    ));
    assert!(matches!(a_line.compose(&a_line), Err(Error::ArgumentInvalid(_))));
    // the later changeset has to come second
    assert!(matches!(b_line.compose(&a_line), Err(Error::ArgumentInvalid(_))));
    assert!(a_line.compose(&b_line).is_ok());

    let mut other = graph();
    let (_, _, foreign) = order_with_line(&mut other);
    let mut tx = other.transact();
    tx.object(foreign).unwrap().set("qty", 3).unwrap();
    let foreign = tx.commit().unwrap();
    assert!(matches!(
        a_line.compose(&foreign.0.changeset(line).unwrap()),
        Err(Error::ArgumentInvalid(_))
    ));
}

#[test]
fn change_log_display() {
    let mut graph = graph();
    let order = graph.create("Order").unwrap();
    let lines = graph.list_of(order, "lines").unwrap();

    let mut tx = graph.transact();
    let line = tx.create("Line").unwrap();
    tx.object(line).unwrap().set("sku", "A-1").unwrap();
    tx.object(line).unwrap().set("qty", 3).unwrap();
    let customer = tx.create("Customer").unwrap();
    tx.object(customer).unwrap().set("name", "Ada").unwrap();
    tx.object(order).unwrap().set("customer", customer).unwrap();
    tx.list(lines).unwrap().push(&[line]).unwrap();
    tx.object(order).unwrap().set("status", "open").unwrap();
    let delta = tx.commit().unwrap();

    assert_snapshot!(delta.0.to_string().trim_end(), @r###"
    #2 Line (net 2)
      sku: null -> "A-1" (default -> specified)
      qty: null -> 3 (default -> specified)
    #3 Customer (net 1)
      name: null -> "Ada" (default -> specified)
    #0 Order (net 0)
      status: "new" -> "open" (default -> specified)
      customer: null -> #3 (default -> specified)
      lines: nested #1
    #1 list of Line (net 1)
      add [#2] at 0
      ["A-1"]: nested #2
    #2 Adopted
    #3 Adopted
    "###);
}

fn rec_graph() -> (Graph, ObjectId) {
    let mut builder = SchemaBuilder::new();
    builder
        .complex("Rec")
        .property(PropertyDecl::scalar("a", ValueKind::I64))
        .property(PropertyDecl::scalar("b", ValueKind::I64))
        .property(PropertyDecl::scalar("c", ValueKind::I64));
    let mut graph = Graph::new(builder.build().unwrap());
    let rec = graph.create("Rec").unwrap();
    (graph, rec)
}

const NAMES: [&str; 3] = ["a", "b", "c"];

fn apply(tx: &mut Transaction<'_>, rec: ObjectId, ops: &[(u8, Option<i8>)]) {
    for (property, value) in ops {
        let name = NAMES[usize::from(*property) % NAMES.len()];
        tx.object(rec)
            .unwrap()
            .set_with(name, value.map(|v| Value::from(i64::from(v))), false)
            .unwrap();
    }
}

#[quickcheck]
fn only_net_differences_remain(ops: Vec<(u8, Option<i8>)>) -> TestResult {
    let (mut graph, rec) = rec_graph();
    let mut tx = graph.transact();
    apply(&mut tx, rec, &ops);
    let Some(changeset) = tx.changeset(rec) else {
        return TestResult::from_bool(ops.iter().all(|(_, v)| v.is_none()));
    };
    for name in NAMES {
        let differs = tx.get_state(rec, name).unwrap() == PropertyState::Specified;
        if changeset.has_change(name).unwrap() != differs {
            return TestResult::failed();
        }
    }
    TestResult::passed()
}

#[quickcheck]
fn compose_has_changes_of_either_side(
    a: Vec<(u8, Option<i8>)>,
    b: Vec<(u8, Option<i8>)>,
) -> TestResult {
    let (mut graph, rec) = rec_graph();
    let mut commit = |ops: &[(u8, Option<i8>)]| {
        let mut tx = graph.transact();
        apply(&mut tx, rec, ops);
        tx.commit().unwrap()
    };
    let (da, db) = (commit(&a), commit(&b));
    let (Some(ca), Some(cb)) = (da.0.changeset(rec), db.0.changeset(rec)) else {
        return TestResult::discard();
    };
    let composed = ca.compose(&cb).unwrap();
    let root = composed.root();
    if root.has_changes() != (ca.has_changes() || cb.has_changes()) {
        return TestResult::failed();
    }
    for name in NAMES {
        if ca.get_change(name).unwrap().is_some() {
            continue;
        }
        let same = match (root.get_change(name).unwrap(), cb.get_change(name).unwrap()) {
            (None, None) => true,
            (Some(Change::Replace(x)), Some(Change::Replace(y))) => x == y,
            _ => false,
        };
        if !same {
            return TestResult::failed();
        }
    }
    TestResult::passed()
}
