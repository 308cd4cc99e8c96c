//! Tests for the transaction API: recording, normalization, nesting, and commit.

use txgraph::{
    Change, Comparer, ElementKey, Error, Graph, ListChange, ObjectId, Parent, PropertyDecl,
    PropertyState, RefTransition, SchemaBuilder, SetOptions, Value, ValueKind,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn graph() -> Graph {
    init_tracing();
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
        .property(PropertyDecl::scalar("qty", ValueKind::I64).with_default(1))
        .property(PropertyDecl::scalar("rank", ValueKind::I64));
    builder
        .complex("Bin")
        .property(PropertyDecl::list("items", "Item"));
    builder
        .complex("Item")
        .property(PropertyDecl::scalar("label", ValueKind::String));
    Graph::new(builder.build().unwrap())
}

/// An order holding one committed line with sku `A-1`.
fn order_with_line(graph: &mut Graph) -> (ObjectId, ObjectId, ObjectId) {
    let order = graph.create("Order").unwrap();
    let lines = graph.list_of(order, "lines").unwrap();
    let line = graph.create("Line").unwrap();
    let mut tx = graph.transact();
    tx.object(line).unwrap().set("sku", "A-1").unwrap();
    tx.list(lines).unwrap().push(&[line]).unwrap();
    tx.commit().unwrap();
    (order, lines, line)
}

#[test]
fn set_adds_exactly_the_missing_element() {
    let mut graph = graph();
    let bin = graph.create("Bin").unwrap();
    let list = graph.list_of(bin, "items").unwrap();
    let x = graph.create("Item").unwrap();
    let y = graph.create("Item").unwrap();
    {
        let mut tx = graph.transact();
        tx.list(list).unwrap().push(&[x]).unwrap();
        tx.commit().unwrap();
    }

    let mut tx = graph.transact();
    let mut edit = tx.list(list).unwrap();
    assert!(edit.set(&[x, y], SetOptions::default()).unwrap());
    assert_eq!(
        edit.changeset().unwrap().primitive_changes().unwrap(),
        &[ListChange::Add {
            elements: vec![y],
            keys: vec![ElementKey::Identity(y)],
            index: 1,
        }]
    );
    let delta = tx.commit().unwrap();

    assert_eq!(graph.elements(list).unwrap(), &[x, y]);
    assert_eq!(graph.parents(x).unwrap(), &[Parent::element(list)]);
    assert_eq!(graph.parents(y).unwrap(), &[Parent::element(list)]);
    assert_eq!(delta.0.transition(y), RefTransition::Adopted);
    assert_eq!(delta.0.transition(x), RefTransition::Unchanged);
}

#[test]
fn setting_the_ambient_value_twice_records_one_change() {
    let mut graph = graph();
    let (order, _, _) = order_with_line(&mut graph);
    let mut tx = graph.transact();
    let mut edit = tx.object(order).unwrap();
    assert!(edit.set("status", "open").unwrap());
    assert!(!edit.set("status", "open").unwrap());
    let changes = edit.changeset().unwrap().changes().unwrap();
    assert_eq!(changes.len(), 1);
    let Change::Replace(replace) = &changes[0].1 else {
        panic!("expected a replace, got {:?}", changes[0].1);
    };
    assert_eq!(replace.value_old(), &Value::from("new"));
    assert_eq!(replace.value_new(), &Value::from("open"));
    assert_eq!(replace.state_old(), PropertyState::Default);
    assert_eq!(replace.state_new(), PropertyState::Specified);
}

#[test]
fn setting_back_removes_the_change() {
    let mut graph = graph();
    let (order, _, _) = order_with_line(&mut graph);
    let mut tx = graph.transact();
    let mut edit = tx.object(order).unwrap();
    edit.set("status", "open").unwrap();
    edit.set("status", "shipped").unwrap();
    assert!(edit.changeset().unwrap().has_change("status").unwrap());
    edit.reset("status").unwrap();
    assert!(!edit.changeset().unwrap().has_change("status").unwrap());
    assert!(!edit.changeset().unwrap().has_changes());

    // same value but specified is a change of its own
    edit.set("status", "new").unwrap();
    assert!(edit.changeset().unwrap().has_change("status").unwrap());
}

#[test]
fn unknown_properties_are_invalid_arguments() {
    let mut graph = graph();
    let (order, _, _) = order_with_line(&mut graph);
    let mut tx = graph.transact();
    tx.object(order).unwrap().set("status", "open").unwrap();
    let changeset = tx.changeset(order).unwrap();
    assert!(matches!(
        changeset.get_change("nonexistentProp"),
        Err(Error::ArgumentInvalid(_))
    ));
    assert!(changeset.get_change("customer").unwrap().is_none());
}

#[test]
fn nested_edits_are_visible_from_the_root() {
    let mut graph = graph();
    let (order, lines, line) = order_with_line(&mut graph);

    let mut tx = graph.transact();
    tx.object(line).unwrap().set("qty", 7).unwrap();

    let root = tx.changeset(order).unwrap();
    assert!(root.has_changes());
    assert!(root.has_change("lines").unwrap());
    assert!(!root.has_change("status").unwrap());
    let Some(Change::Nested(list_cs)) = root.get_change("lines").unwrap() else {
        panic!("expected the nested list changeset");
    };
    assert_eq!(list_cs.target(), lines);
    assert!(list_cs.primitive_changes().unwrap().is_empty());
    let line_cs = list_cs
        .changeset_for_key(&ElementKey::Value("A-1".into()))
        .unwrap()
        .unwrap();
    assert_eq!(line_cs.target(), line);
    assert!(line_cs.net_order() > list_cs.net_order());
    assert!(list_cs.net_order() > root.net_order());

    assert_eq!(tx.get(line, "qty").unwrap(), Value::from(7));
    assert_eq!(tx.get_old(line, "qty").unwrap(), Value::from(1));
    tx.commit().unwrap();
    assert_eq!(graph.get(line, "qty").unwrap(), Value::from(7));
    assert_eq!(graph.object_version(line).unwrap(), graph.version());
}

#[test]
fn replace_shadows_the_nested_changeset() {
    let mut graph = graph();
    let order = graph.create("Order").unwrap();
    let first = graph.create("Customer").unwrap();
    let second = graph.create("Customer").unwrap();
    {
        let mut tx = graph.transact();
        tx.object(order).unwrap().set("customer", first).unwrap();
        tx.commit().unwrap();
    }

    let mut tx = graph.transact();
    tx.object(first).unwrap().set("name", "Ada").unwrap();
    assert!(matches!(
        tx.changeset(order).unwrap().get_change("customer").unwrap(),
        Some(Change::Nested(_))
    ));

    tx.object(order).unwrap().set("customer", second).unwrap();
    assert!(matches!(
        tx.changeset(order).unwrap().get_change("customer").unwrap(),
        Some(Change::Replace(_))
    ));
    assert_eq!(tx.changeset(first).unwrap().net_order(), 0);
    assert_eq!(tx.change_ref(first).unwrap().delta(), -1);
    assert_eq!(tx.change_ref(second).unwrap().delta(), 1);

    // going back revives the nested changeset
    tx.object(order).unwrap().set("customer", first).unwrap();
    assert!(matches!(
        tx.changeset(order).unwrap().get_change("customer").unwrap(),
        Some(Change::Nested(_))
    ));
    assert!(tx.changeset(order).unwrap().has_change("customer").unwrap());
    assert!(tx.change_ref(first).unwrap().is_empty());
    assert!(tx.change_ref(second).unwrap().is_empty());
}

#[test]
fn recursive_clear_discards_the_subtree() {
    let mut graph = graph();
    let (order, lines, line) = order_with_line(&mut graph);
    let extra = graph.create("Line").unwrap();

    let mut tx = graph.transact();
    tx.object(order).unwrap().set("status", "open").unwrap();
    tx.object(line).unwrap().set("qty", 4).unwrap();
    tx.object(extra).unwrap().set("sku", "B-2").unwrap();
    tx.list(lines).unwrap().push(&[extra]).unwrap();

    tx.clear_changes(order, true).unwrap();
    assert!(!tx.changeset(order).unwrap().has_changes());
    assert!(!tx.changeset(line).unwrap().has_changes());
    assert_eq!(tx.get(order, "status").unwrap(), Value::from("new"));
    assert_eq!(tx.get(line, "qty").unwrap(), Value::from(1));
    assert_eq!(tx.elements(lines).unwrap(), vec![line]);
    assert!(tx.change_ref(extra).unwrap().is_empty());

    // the changesets stay usable
    tx.object(line).unwrap().set("qty", 2).unwrap();
    assert!(tx.changeset(order).unwrap().has_change("lines").unwrap());
}

#[test]
fn shallow_clear_keeps_nested_changes() {
    let mut graph = graph();
    let (order, _, line) = order_with_line(&mut graph);

    let mut tx = graph.transact();
    tx.object(order).unwrap().set("status", "open").unwrap();
    tx.object(line).unwrap().set("qty", 4).unwrap();
    tx.clear_changes(order, false).unwrap();
    assert!(!tx.changeset(order).unwrap().has_change("status").unwrap());
    assert!(tx.changeset(order).unwrap().has_change("lines").unwrap());
}

#[test]
fn removed_elements_are_orphaned() {
    let mut graph = graph();
    let (_, lines, line) = order_with_line(&mut graph);
    let mut tx = graph.transact();
    assert_eq!(tx.list(lines).unwrap().remove(&[line]).unwrap(), 1);
    let delta = tx.commit().unwrap();
    assert_eq!(delta.0.transition(line), RefTransition::Orphaned);
    assert_eq!(graph.ref_count(line).unwrap(), 0);
    assert!(graph.elements(lines).unwrap().is_empty());
}

#[test]
fn moving_between_containers_keeps_one_reference() {
    let mut graph = graph();
    let left = graph.create("Bin").unwrap();
    let right = graph.create("Bin").unwrap();
    let left = graph.list_of(left, "items").unwrap();
    let right = graph.list_of(right, "items").unwrap();
    let item = graph.create("Item").unwrap();
    {
        let mut tx = graph.transact();
        tx.list(left).unwrap().push(&[item]).unwrap();
        tx.commit().unwrap();
    }

    let mut tx = graph.transact();
    tx.list(left).unwrap().remove(&[item]).unwrap();
    tx.list(right).unwrap().push(&[item]).unwrap();
    let change = tx.change_ref(item).unwrap();
    assert_eq!(change.added(), &[Parent::element(right)]);
    assert_eq!(change.removed(), &[Parent::element(left)]);
    assert_eq!(change.delta(), 0);
    assert_eq!(tx.pending_parents(item).unwrap().as_slice(), &[Parent::element(right)]);

    // and back again leaves no trace
    tx.list(right).unwrap().remove(&[item]).unwrap();
    tx.list(left).unwrap().push(&[item]).unwrap();
    assert!(tx.change_ref(item).unwrap().is_empty());

    tx.list(left).unwrap().clear().unwrap();
    tx.list(right).unwrap().push(&[item]).unwrap();
    let delta = tx.commit().unwrap();
    assert_eq!(delta.0.transition(item), RefTransition::Unchanged);
    assert_eq!(graph.parents(item).unwrap(), &[Parent::element(right)]);
}

#[test]
fn sort_is_replayed_against_pending_values() {
    let mut graph = graph();
    let order = graph.create("Order").unwrap();
    let lines = graph.list_of(order, "lines").unwrap();
    let mut tx = graph.transact();
    let mut created = Vec::new();
    for (sku, rank) in [("A", 1), ("B", 2), ("C", 3)] {
        let line = tx.create("Line").unwrap();
        tx.object(line).unwrap().set("sku", sku).unwrap();
        tx.object(line).unwrap().set("rank", rank).unwrap();
        created.push(line);
    }
    tx.list(lines).unwrap().push(&created).unwrap();
    tx.commit().unwrap();

    let [a, b, c] = created[..] else { unreachable!() };
    let mut tx = graph.transact();
    tx.list(lines).unwrap().sort(Comparer::by_property("rank").reversed()).unwrap();
    assert_eq!(tx.elements(lines).unwrap(), vec![c, b, a]);
    // changes made after the sort still decide the committed order
    tx.object(a).unwrap().set("rank", 5).unwrap();
    tx.commit().unwrap();
    assert_eq!(graph.elements(lines).unwrap(), &[a, c, b]);
}

#[test]
fn keyed_update_merges_into_the_listed_element() {
    let mut graph = graph();
    let (_, lines, line) = order_with_line(&mut graph);

    let mut tx = graph.transact();
    let incoming = tx.create("Line").unwrap();
    tx.object(incoming).unwrap().set("sku", "A-1").unwrap();
    tx.object(incoming).unwrap().set("qty", 9).unwrap();
    assert!(tx.list(lines).unwrap().set(&[incoming], SetOptions::default()).unwrap());
    assert_eq!(tx.elements(lines).unwrap(), vec![line]);
    assert_eq!(tx.get(line, "qty").unwrap(), Value::from(9));
    tx.commit().unwrap();
    assert_eq!(graph.get(line, "qty").unwrap(), Value::from(9));
    assert_eq!(graph.ref_count(incoming).unwrap(), 0);
}

#[test]
fn read_only_list_properties() {
    let mut graph = graph();
    let (order, lines, _) = order_with_line(&mut graph);
    let other = graph.create("Order").unwrap();
    let other_lines = graph.list_of(other, "lines").unwrap();
    let mut tx = graph.transact();
    assert!(matches!(
        tx.object(order).unwrap().set("lines", other_lines),
        Err(Error::ReadOnlyViolation(_))
    ));
    assert_eq!(tx.list_of(order, "lines").unwrap(), lines);
    assert!(tx.changeset(order).is_none());
}

#[test]
fn values_of_the_wrong_type_are_refused() {
    let mut graph = graph();
    let order = graph.create("Order").unwrap();
    let line = graph.create("Line").unwrap();
    let bin = graph.create("Bin").unwrap();
    let items = graph.list_of(bin, "items").unwrap();
    let mut tx = graph.transact();
    assert!(matches!(
        tx.object(order).unwrap().set("customer", line),
        Err(Error::ArgumentInvalid(_))
    ));
    assert!(matches!(
        tx.list(items).unwrap().push(&[line]),
        Err(Error::ArgumentInvalid(_))
    ));
    assert!(tx.list(line).is_err());
    assert!(tx.object(items).is_err());
    assert!(tx.log().is_empty());
}

#[test]
fn versions_advance_per_mutation() {
    let mut graph = graph();
    let (order, _, _) = order_with_line(&mut graph);
    let before = graph.version();
    let mut tx = graph.transact();
    assert_eq!(tx.version(), before);
    tx.object(order).unwrap().set("status", "a").unwrap();
    tx.object(order).unwrap().set("status", "b").unwrap();
    assert_eq!(tx.version(), before + 2);
    assert_eq!(tx.changeset(order).unwrap().target_version(), before);
    assert_eq!(tx.changeset(order).unwrap().transaction_version(), before + 2);
    tx.commit().unwrap();
    assert_eq!(graph.version(), before + 2);
    assert_eq!(graph.object_version(order).unwrap(), before + 2);
}

#[test]
fn a_sort_keeps_its_order_when_the_sort_key_changes() {
    let mut graph = graph();
    let order = graph.create("Order").unwrap();
    let lines = graph.list_of(order, "lines").unwrap();
    let (a, b) = {
        let mut tx = graph.transact();
        let a = tx.create("Line").unwrap();
        tx.object(a).unwrap().set("sku", "A").unwrap();
        tx.object(a).unwrap().set("rank", 1).unwrap();
        let b = tx.create("Line").unwrap();
        tx.object(b).unwrap().set("sku", "B").unwrap();
        tx.object(b).unwrap().set("rank", 2).unwrap();
        tx.list(lines).unwrap().push(&[a, b]).unwrap();
        tx.commit().unwrap();
        (a, b)
    };

    let by_rank = Comparer::by_property("rank");
    let mut tx = graph.transact();
    tx.list(lines).unwrap().sort(by_rank.clone()).unwrap();
    assert!(tx.list(lines).unwrap().move_to(a, 1).unwrap());
    tx.list(lines).unwrap().sort(by_rank.clone()).unwrap();
    assert_eq!(tx.elements(lines).unwrap(), vec![a, b]);

    tx.object(a).unwrap().set("rank", 3).unwrap();
    assert_eq!(tx.elements(lines).unwrap(), vec![a, b]);
    assert_eq!(tx.list(lines).unwrap().remove(&[b]).unwrap(), 1);
    assert_eq!(tx.elements(lines).unwrap(), vec![a]);
    tx.commit().unwrap();

    assert_eq!(graph.elements(lines).unwrap(), &[a]);
    assert_eq!(graph.get(a, "rank").unwrap(), Value::from(3));
    assert_eq!(graph.ref_count(b).unwrap(), 0);
}

#[test]
fn sorting_again_sees_the_pending_sort_key() {
    let mut graph = graph();
    let (_, lines, first) = order_with_line(&mut graph);
    let second = graph.create("Line").unwrap();
    let mut tx = graph.transact();
    tx.object(second).unwrap().set("sku", "B-2").unwrap();
    tx.object(second).unwrap().set("rank", 1).unwrap();
    tx.object(first).unwrap().set("rank", 2).unwrap();
    tx.list(lines).unwrap().push(&[second]).unwrap();
    tx.list(lines).unwrap().sort(Comparer::by_property("rank")).unwrap();
    assert_eq!(tx.elements(lines).unwrap(), vec![second, first]);

    tx.object(second).unwrap().set("rank", 5).unwrap();
    tx.list(lines).unwrap().remove_at(-1, 1).unwrap();
    tx.list(lines).unwrap().push(&[first]).unwrap();
    tx.list(lines).unwrap().sort(Comparer::by_property("rank")).unwrap();
    assert_eq!(tx.elements(lines).unwrap(), vec![first, second]);
    tx.commit().unwrap();
    assert_eq!(graph.elements(lines).unwrap(), &[first, second]);
}

#[test]
fn referenced_changesets_are_at_least_as_recent_as_their_parents() {
    let mut graph = graph();
    let (order, _, _) = order_with_line(&mut graph);
    let customer = graph.create("Customer").unwrap();
    let bin = graph.create("Bin").unwrap();
    let items = graph.list_of(bin, "items").unwrap();
    let item = graph.create("Item").unwrap();

    let mut tx = graph.transact();
    tx.object(customer).unwrap().set("name", "Ada").unwrap();
    tx.object(item).unwrap().set("label", "bolt").unwrap();
    let touched = tx.changeset(customer).unwrap().transaction_version();
    tx.object(order).unwrap().set("status", "open").unwrap();
    tx.object(order).unwrap().set("customer", customer).unwrap();
    tx.list(items).unwrap().push(&[item]).unwrap();

    let parent = tx.changeset(order).unwrap().transaction_version();
    assert!(parent > touched);
    assert_eq!(tx.changeset(customer).unwrap().transaction_version(), parent);
    let list = tx.changeset(items).unwrap().transaction_version();
    assert!(tx.changeset(item).unwrap().transaction_version() >= list);
}

#[test]
fn clearing_a_list_restores_reference_counts() {
    let mut graph = graph();
    let (order, lines, line) = order_with_line(&mut graph);
    let (order_version, lines_version) = (
        graph.object_version(order).unwrap(),
        graph.object_version(lines).unwrap(),
    );

    let mut tx = graph.transact();
    let extra = tx.create("Line").unwrap();
    tx.object(extra).unwrap().set("sku", "B-2").unwrap();
    tx.list(lines).unwrap().push(&[extra]).unwrap();
    assert_eq!(tx.list(lines).unwrap().remove(&[extra, line]).unwrap(), 2);
    assert!(tx.elements(lines).unwrap().is_empty());
    assert_eq!(tx.change_ref(line).unwrap().delta(), -1);

    tx.clear_changes(lines, false).unwrap();
    assert_eq!(tx.elements(lines).unwrap(), vec![line]);
    assert!(tx.change_ref(line).unwrap().is_empty());
    assert!(tx.change_ref(extra).unwrap().is_empty());
    assert_eq!(tx.pending_parents(line).unwrap().len(), 1);
    assert!(tx.pending_parents(extra).unwrap().is_empty());
    assert!(!tx.changeset(lines).unwrap().has_changes());
    tx.commit().unwrap();

    assert_eq!(graph.elements(lines).unwrap(), &[line]);
    assert_eq!(graph.ref_count(line).unwrap(), 1);
    assert_eq!(graph.ref_count(extra).unwrap(), 0);
    // the commit left both untouched
    assert_eq!(graph.object_version(order).unwrap(), order_version);
    assert_eq!(graph.object_version(lines).unwrap(), lines_version);
}
