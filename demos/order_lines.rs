use txgraph::{
    Graph, PropertyDecl, SchemaBuilder, SetOptions, Value, ValueKind,
    changeset::Replace,
    sentinel::{ListSentinel, ReplaceSentinel, Sentinel, Visit},
};

/// Refuses negative quantities.
struct QuantityCheck;

impl Sentinel for QuantityCheck {
    type Error = String;
}

impl Visit for QuantityCheck {}

impl ListSentinel for QuantityCheck {}

impl ReplaceSentinel for QuantityCheck {
    fn replace(&mut self, property: &str, change: &Replace) -> Result<(), Self::Error> {
        match change.value_new() {
            Value::I64(qty) if property == "qty" && *qty < 0 => {
                Err(format!("quantity {qty} is negative"))
            }
            _ => Ok(()),
        }
    }
}

fn main() {
    let mut builder = SchemaBuilder::new();
    builder
        .complex("Order")
        .property(PropertyDecl::scalar("status", ValueKind::String).with_default("new"))
        .property(PropertyDecl::list("lines", "Line"));
    builder
        .complex("Line")
        .key("sku")
        .property(PropertyDecl::scalar("sku", ValueKind::String))
        .property(PropertyDecl::scalar("qty", ValueKind::I64).with_default(1));
    let mut graph = Graph::new(builder.build().unwrap());
    let order = graph.create("Order").unwrap();
    let lines = graph.list_of(order, "lines").unwrap();

    // Fill the order
    let first = {
        let mut tx = graph.transact();
        let mut created = Vec::new();
        for sku in ["A-1", "B-7", "C-3"] {
            let line = tx.create("Line").unwrap();
            tx.object(line).unwrap().set("sku", sku).unwrap();
            created.push(line);
        }
        tx.list(lines).unwrap().push(&created).unwrap();
        tx.object(order).unwrap().set("status", "open").unwrap();
        tx.commit().unwrap()
    };
    println!("First commit:\n{}", first.0);

    // Reconcile with what the customer asked for: B-7 is gone, a new D-2 goes first.
    let second = {
        let mut tx = graph.transact();
        let current = tx.elements(lines).unwrap();
        let extra = tx.create("Line").unwrap();
        tx.object(extra).unwrap().set("sku", "D-2").unwrap();
        tx.object(extra).unwrap().set("qty", 4).unwrap();
        let desired = [extra, current[0], current[2]];
        let changed = tx
            .list(lines)
            .unwrap()
            .set(&desired, SetOptions::default())
            .unwrap();
        println!("Reconciliation changed the list: {changed}");
        tx.commit().unwrap()
    };
    println!("Second commit:\n{}", second.0);

    // A validator vetoes the commit and the transaction stays open
    {
        let mut tx = graph.transact();
        let line = tx.elements(lines).unwrap()[0];
        tx.object(line).unwrap().set("qty", -2).unwrap();
        match tx.commit_with(&mut QuantityCheck) {
            Ok(_) => println!("Unexpectedly committed"),
            Err(e) => println!("Vetoed: {e} (still open: {})", tx.is_open()),
        }
        tx.object(line).unwrap().set("qty", 2).unwrap();
        tx.commit_with(&mut QuantityCheck).unwrap();
    }

    // The two first commits fold into one changeset
    let composed = first
        .0
        .changeset(order)
        .unwrap()
        .compose(&second.0.changeset(order).unwrap())
        .unwrap();
    println!("Composed:\n{}", composed.log());

    println!(
        "Final order: {}",
        serde_json::to_string_pretty(&graph.to_json(order).unwrap()).unwrap()
    );
}
