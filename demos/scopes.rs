use txgraph::{Error, Graph, PropertyDecl, SchemaBuilder, ScopeExit, Transaction, ValueKind};

/// Renames a playlist and drops its last track, inside a scope of its own.
fn tidy(tx: &mut Transaction<'_>, playlist: txgraph::ObjectId) -> Result<ScopeExit, Error> {
    let mut scope = tx.enter_scope()?;
    scope.object(playlist)?.set("title", "Road trip (short)")?;
    let tracks = scope.list_of(playlist, "tracks")?;
    scope.list(tracks)?.remove_at(-1, 1)?;
    scope.accept()
}

/// Like `tidy`, but gives up halfway. The early return drops the scope without accepting it.
fn give_up(tx: &mut Transaction<'_>, playlist: txgraph::ObjectId) -> Result<ScopeExit, Error> {
    let mut scope = tx.enter_scope()?;
    scope.object(playlist)?.set("title", "???")?;
    scope.object(playlist)?.set("title", 42)?;
    scope.accept()
}

fn main() {
    let mut builder = SchemaBuilder::new();
    builder
        .complex("Playlist")
        .property(PropertyDecl::scalar("title", ValueKind::String))
        .property(PropertyDecl::list("tracks", "Track"));
    builder
        .complex("Track")
        .property(PropertyDecl::scalar("name", ValueKind::String));
    let mut graph = Graph::new(builder.build().unwrap());
    let playlist = graph.create("Playlist").unwrap();
    let tracks = graph.list_of(playlist, "tracks").unwrap();
    {
        let mut tx = graph.transact();
        tx.object(playlist).unwrap().set("title", "Road trip").unwrap();
        for name in ["Intro", "Highway", "Outro"] {
            let track = tx.create("Track").unwrap();
            tx.object(track).unwrap().set("name", name).unwrap();
            tx.list(tracks).unwrap().push(&[track]).unwrap();
        }
        tx.commit().unwrap();
    }

    // Nested scopes: only the outermost accept commits
    {
        let mut tx = graph.transact();
        let mut outer = tx.enter_scope().unwrap();
        match tidy(&mut outer, playlist).unwrap() {
            ScopeExit::Open => println!("Inner scope accepted, transaction still open"),
            ScopeExit::Committed(_) => unreachable!("the outer scope is still active"),
        }
        if let ScopeExit::Committed(delta) = outer.accept().unwrap() {
            println!("Committed:\n{}", delta.0);
        }
    }
    println!("Tracks left: {}", graph.elements(tracks).unwrap().len());

    // A failing scope rejects the whole transaction
    {
        let mut tx = graph.transact();
        match give_up(&mut tx, playlist) {
            Ok(_) => println!("Unexpectedly accepted"),
            Err(e) => println!("Gave up: {e}"),
        }
        println!("Transaction open after the failure: {}", tx.is_open());
    }
    println!("Title: {}", graph.get(playlist, "title").unwrap());
}
