/// Grouped Async Example
///
/// This example demonstrates:
/// - Serving rows from a provider whose records arrive later
/// - Reading cells while they are still pending
/// - Settling the pending work and reading from the cache
/// - Grouping the settled rows into a two-level tree

use futures::channel::oneshot;
use livegrid::{
    shared_record, CachedDataSource, DataConfig, Fetch, FieldContext, FieldDef, FieldValue, FnProvider,
    MaybePending, Record, RowHierarchy, RowSet,
};
use std::cell::RefCell;
use std::rc::Rc;

fn main() {
    println!("=== LiveGrid Grouped Async Example ===\n");

    let rows = vec![
        ("Electronics", "Laptop", 5),
        ("Furniture", "Desk", 3),
        ("Electronics", "Mouse", 20),
        ("Furniture", "Chair", 8),
        ("Electronics", "Laptop", 2),
    ];

    // 1. A provider that answers every read with a future
    println!("1. Creating a remote provider with {} rows...", rows.len());
    let mut senders = Vec::new();
    let receivers = RefCell::new(Vec::new());
    for _ in &rows {
        let (tx, rx) = oneshot::channel::<Rc<Record>>();
        senders.push(Some(tx));
        receivers.borrow_mut().push(Some(rx));
    }
    let provider = FnProvider::new(rows.len(), move |i| match receivers.borrow_mut()[i].take() {
        Some(rx) => Fetch::pending(async move { rx.await.ok() }),
        None => Fetch::Missing,
    });

    let config = DataConfig::grouped_by(["category", "product"]);
    let mut source = CachedDataSource::new(provider, config, RowHierarchy::Grid);
    println!("   Row hierarchy: {:?}", source.row_hierarchy());
    println!("   Grouping levels: {}\n", source.get_group_length());

    // 2. The grid reads the quantity column before anything has arrived
    println!("2. Reading the quantity column...");
    let quantity = FieldDef::from("quantity");
    for i in 0..rows.len() {
        match source.get_original_field(i, &quantity, FieldContext::at(2, i)) {
            Ok(MaybePending::Pending(handle)) => println!("   row {}: pending {:?}", i, handle),
            Ok(other) => println!("   row {}: {:?}", i, other),
            Err(e) => println!("   row {}: error {}", i, e),
        }
    }
    println!("   Pending resolutions: {}\n", source.pending_count());

    // 3. Rows arrive in reverse order
    println!("3. Settling rows in reverse order...");
    for i in (0..rows.len()).rev() {
        let (category, product, qty) = rows[i];
        let record = shared_record([
            ("category", FieldValue::from(category)),
            ("product", FieldValue::from(product)),
            ("quantity", FieldValue::from(qty)),
        ]);
        if let Some(tx) = senders[i].take() {
            let _ = tx.send(record);
        }
        source.run_until_stalled();
    }
    println!("   Pending resolutions: {}", source.pending_count());
    if let Ok((records, fields)) = source.cache_stats() {
        println!("   Cached: {} records, {} fields\n", records, fields);
    }

    // 4. The same reads are now answered from the cache
    println!("4. Reading the quantity column again...");
    for i in 0..rows.len() {
        if let Ok(MaybePending::Ready(value)) = source.get_original_field(i, &quantity, FieldContext::at(2, i)) {
            println!("   row {}: {:?}", i, value);
        }
    }
    println!();

    // 5. Group the settled rows
    println!("5. Grouping by category, then product...");
    match source.process_records() {
        Ok(RowSet::Grouped(tree)) => {
            println!("   {} groups over {} records", tree.group_count(), tree.leaf_count());
            for category in tree.roots().iter().filter_map(|c| c.group_id()) {
                let Some(node) = tree.node(category) else { continue };
                println!("   {:?} ({} records)", node.key(), tree.node_leaves(category).count());
                for product in node.children().iter().filter_map(|c| c.group_id()) {
                    if let Some(sub) = tree.node(product) {
                        println!("     {:?} ({} records)", sub.key(), tree.node_leaves(product).count());
                    }
                }
            }
            if let Ok(json) = serde_json::to_string_pretty(&*tree) {
                println!("\n   As JSON:\n{}", json);
            }
        }
        Ok(RowSet::Flat(records)) => println!("   {} flat records", records.len()),
        Err(e) => println!("   error: {}", e),
    }

    source.release();
    println!("\n=== Example Complete ===");
}
