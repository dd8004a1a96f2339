/// LiveGrid Inspector
///
/// Loads a JSON array of records, groups it by the keys given on the command
/// line and prints the resulting rows as JSON.
///
/// Usage: `livegrid-inspect <records.json> [group-key ...]`
///
/// `FIELD_CACHE_POLICY` selects the field cache policy (`truthy` or `presence`).

use livegrid::{
    ArrayProvider, CachedDataSource, DataConfig, FieldCachePolicy, RecordProvider, RowHierarchy, RowSet,
};
use log::{info, warn};
use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let mut args = std::env::args().skip(1);
    let path = args
        .next()
        .ok_or("usage: livegrid-inspect <records.json> [group-key ...]")?;
    let keys: Vec<String> = args.collect();

    let policy = match std::env::var("FIELD_CACHE_POLICY") {
        Ok(value) => FieldCachePolicy::from_str(&value)?,
        Err(_) => FieldCachePolicy::default(),
    };
    let config = if keys.is_empty() {
        DataConfig::new()
    } else {
        DataConfig::grouped_by(keys)
    }
    .with_field_cache_policy(policy);

    let provider = ArrayProvider::from_json(&std::fs::read_to_string(&path)?)?;
    info!("loaded {} records from {}", provider.len(), path);

    let mut source = CachedDataSource::new(provider, config, RowHierarchy::Grid);
    let rows = source.process_records()?;
    match &rows {
        RowSet::Grouped(tree) => {
            info!("{} groups, {} records", tree.group_count(), tree.leaf_count());
            if tree.dropped() > 0 {
                warn!("{} records dropped for a missing grouping key", tree.dropped());
            }
        }
        RowSet::Flat(records) => info!("{} records, no grouping", records.len()),
    }

    println!("{}", serde_json::to_string_pretty(&rows)?);
    source.release();
    Ok(())
}
