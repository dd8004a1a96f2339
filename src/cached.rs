/// LiveGrid Cached Data Source
///
/// `CachedDataSource` wraps the base `DataSource` with memoization of values
/// that resolved asynchronously, so that re-rendering a cell does not start
/// the same fetch again, and with the grouping adapter that turns the flat
/// record list into a group tree when `groupByRules` is configured.
///
/// # Examples
///
/// ```
/// use livegrid::{shared_record, CachedDataSource, DataConfig, FieldValue, RowSet};
///
/// let records = vec![
///     shared_record([("region", FieldValue::from("north")), ("sales", 10.into())]),
///     shared_record([("region", FieldValue::from("south")), ("sales", 4.into())]),
///     shared_record([("region", FieldValue::from("north")), ("sales", 7.into())]),
/// ];
/// let mut source = CachedDataSource::of_array(records, DataConfig::grouped_by(["region"]));
/// assert_eq!(source.get_group_length(), 1);
///
/// match source.process_records().unwrap() {
///     RowSet::Grouped(tree) => {
///         assert_eq!(tree.roots().len(), 2);
///         assert_eq!(tree.leaf_count(), 3);
///     }
///     RowSet::Flat(_) => panic!("expected grouped rows"),
/// }
/// ```

use crate::aggregation::{AggregateValue, Aggregator, AggregatorHandle, CustomAggregator};
use crate::cache::ResolutionCache;
use crate::config::{DataConfig, RowHierarchy};
use crate::error::{DataSourceError, Result};
use crate::group::{GroupBy, GroupTree};
use crate::provider::{ArrayProvider, FieldContext, FieldDef, RecordProvider};
use crate::source::{DataSource, MaybePending, ResolutionListener};
use crate::value::{FieldValue, Record};
use log::{debug, trace};
use serde::{Serialize, Serializer};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// Rows handed to the layout engine after a processing pass.
#[derive(Debug, Clone)]
pub enum RowSet {
    Flat(Vec<Rc<Record>>),
    Grouped(Rc<GroupTree>),
}

impl RowSet {
    pub fn is_grouped(&self) -> bool {
        matches!(self, RowSet::Grouped(_))
    }

    pub fn as_tree(&self) -> Option<&Rc<GroupTree>> {
        match self {
            RowSet::Grouped(tree) => Some(tree),
            RowSet::Flat(_) => None,
        }
    }

    pub fn as_flat(&self) -> Option<&[Rc<Record>]> {
        match self {
            RowSet::Flat(rows) => Some(rows),
            RowSet::Grouped(_) => None,
        }
    }

    /// Number of top-level rows.
    pub fn len(&self) -> usize {
        match self {
            RowSet::Flat(rows) => rows.len(),
            RowSet::Grouped(tree) => tree.roots().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Serialize for RowSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            RowSet::Flat(rows) => serializer.collect_seq(rows.iter().map(|r| r.as_ref())),
            RowSet::Grouped(tree) => (**tree).serialize(serializer),
        }
    }
}

pub struct CachedDataSource {
    base: DataSource,
    /// `None` once released
    cache: Option<Rc<RefCell<ResolutionCache>>>,
    group_aggregator: Option<AggregatorHandle>,
}

impl CachedDataSource {
    /// Create a cached data source. Configured grouping forces tree rows.
    pub fn new<P>(provider: P, config: DataConfig, hierarchy: RowHierarchy) -> Self
    where
        P: RecordProvider + 'static,
    {
        let hierarchy = config.effective_hierarchy(hierarchy);
        let mut base = DataSource::new(provider, config, hierarchy);

        let cache = Rc::new(RefCell::new(ResolutionCache::new()));
        let weak = Rc::downgrade(&cache);
        let listener: Weak<RefCell<dyn ResolutionListener>> = weak;
        base.set_listener(listener);

        let mut source = CachedDataSource {
            base,
            cache: Some(cache),
            group_aggregator: None,
        };
        source.generate_field_aggregations();
        source
    }

    /// Cached data source over an in-memory array of records.
    pub fn of_array(records: Vec<Rc<Record>>, config: DataConfig) -> Self {
        Self::new(ArrayProvider::new(records), config, RowHierarchy::Grid)
    }

    fn cache(&self) -> Result<&Rc<RefCell<ResolutionCache>>> {
        self.cache.as_ref().ok_or(DataSourceError::Released)
    }

    /// Register the grouping aggregator when grouping keys are configured.
    fn generate_field_aggregations(&mut self) {
        let group_by: GroupBy = match self.base.config().group_by() {
            Some(group_by) if !group_by.is_empty() => group_by,
            _ => return,
        };
        debug!("grouping rows by {:?}", group_by.keys());

        let aggregator = CustomAggregator::new("", move |_, records, _| {
            AggregateValue::Groups(Rc::new(GroupTree::build(records, &group_by)))
        });
        self.group_aggregator = Some(self.base.register_aggregator(Box::new(aggregator)));
    }

    /// Record at `index`: the cached record if it settled earlier, otherwise
    /// whatever the base read yields.
    pub fn get_original_record(&mut self, index: usize) -> Result<MaybePending<Rc<Record>>> {
        let cached = self.cache()?.borrow().record(index).cloned();
        if let Some(record) = cached {
            return Ok(MaybePending::Ready(record));
        }
        self.base.get_original_record(index)
    }

    /// Field of the record at `index`, answered from the field cache when the
    /// configured policy counts the cached entry as a hit.
    pub fn get_original_field(
        &mut self,
        index: usize,
        field: &FieldDef,
        context: FieldContext,
    ) -> Result<MaybePending<FieldValue>> {
        let policy = self.base.config().field_cache_policy;
        let hit = self.cache()?.borrow().field_hit(index, field.id(), policy);
        if let Some(value) = hit {
            return Ok(value.map_or(MaybePending::Missing, MaybePending::Ready));
        }
        self.base.get_original_field(index, field, context)
    }

    /// Store a field value that settled asynchronously.
    pub fn field_promise_callback(&self, index: usize, field: &str, value: Option<FieldValue>) {
        match &self.cache {
            Some(cache) => cache.borrow_mut().field_settled(index, field, value),
            None => trace!("field {}[{}] settled after release, ignored", field, index),
        }
    }

    /// Store a record that settled asynchronously.
    pub fn record_promise_callback(&self, index: usize, record: Option<Rc<Record>>) {
        match &self.cache {
            Some(cache) => cache.borrow_mut().record_settled(index, record),
            None => trace!("record {} settled after release, ignored", index),
        }
    }

    /// Forget every cached record and field.
    pub fn clear_cache(&mut self) {
        if let Some(cache) = &self.cache {
            cache.borrow_mut().clear();
            debug!("resolution cache cleared");
        }
    }

    /// Tear down. Any later read fails with `DataSourceError::Released`.
    pub fn release(&mut self) {
        self.base.release();
        self.cache = None;
        self.group_aggregator = None;
    }

    pub fn is_released(&self) -> bool {
        self.cache.is_none()
    }

    /// Cached records once any have settled, else the base records.
    pub fn records(&self) -> Result<Vec<Option<Rc<Record>>>> {
        let cache = self.cache()?.borrow();
        if cache.record_count() > 0 {
            return Ok(cache.record_slots());
        }
        Ok(self.base.records())
    }

    /// Run the aggregation pass; grouped rows replace the flat rows when
    /// grouping is configured.
    pub fn process_records(&mut self) -> Result<RowSet> {
        let records = self.records()?;
        let rows = self.base.process_records(&records)?;

        if let Some(handle) = self.group_aggregator {
            if let Some(AggregateValue::Groups(tree)) = self.base.aggregate_value(handle) {
                return Ok(RowSet::Grouped(tree));
            }
        }
        Ok(RowSet::Flat(rows))
    }

    /// Number of grouping levels, 0 without grouping.
    pub fn get_group_length(&self) -> usize {
        self.base.config().group_length()
    }

    /// Replace the record provider and drop everything cached for the old one.
    pub fn set_provider<P>(&mut self, provider: P) -> Result<()>
    where
        P: RecordProvider + 'static,
    {
        self.cache()?;
        self.base.set_provider(provider)?;
        self.clear_cache();
        Ok(())
    }

    /// Attach another aggregator to the processing pass.
    pub fn register_aggregator(&mut self, aggregator: Box<dyn Aggregator>) -> Result<AggregatorHandle> {
        self.cache()?;
        Ok(self.base.register_aggregator(aggregator))
    }

    pub fn aggregate_value(&mut self, handle: AggregatorHandle) -> Option<AggregateValue> {
        self.base.aggregate_value(handle)
    }

    /// One event-loop tick: settle whatever pending work can settle.
    pub fn run_until_stalled(&mut self) {
        self.base.run_until_stalled();
    }

    pub fn pending_count(&self) -> usize {
        self.base.pending_count()
    }

    pub fn len(&self) -> usize {
        self.base.len()
    }

    pub fn is_empty(&self) -> bool {
        self.base.is_empty()
    }

    pub fn config(&self) -> &DataConfig {
        self.base.config()
    }

    pub fn row_hierarchy(&self) -> RowHierarchy {
        self.base.row_hierarchy()
    }

    pub fn hierarchy_expand_level(&self) -> Option<usize> {
        self.base.hierarchy_expand_level()
    }

    /// Snapshot of cache sizes as `(records, fields)`.
    pub fn cache_stats(&self) -> Result<(usize, usize)> {
        let cache = self.cache()?.borrow();
        Ok((cache.record_count(), cache.field_count()))
    }
}

impl std::fmt::Debug for CachedDataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedDataSource")
            .field("base", &self.base)
            .field("released", &self.is_released())
            .field("grouped", &self.group_aggregator.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FieldCachePolicy;
    use crate::provider::{Fetch, FnProvider};
    use crate::value::shared_record;
    use futures::channel::oneshot;
    use std::cell::Cell;

    /// Lazy provider whose record `i` settles when `senders[i]` fires.
    /// Counts how often the provider is asked.
    struct Remote {
        senders: Vec<Option<oneshot::Sender<Rc<Record>>>>,
        calls: Rc<Cell<usize>>,
    }

    impl Remote {
        fn source(n: usize, config: DataConfig) -> (CachedDataSource, Remote) {
            let calls = Rc::new(Cell::new(0));
            let counter = Rc::clone(&calls);
            let mut senders = Vec::new();
            let mut receivers = Vec::new();
            for _ in 0..n {
                let (tx, rx) = oneshot::channel();
                senders.push(Some(tx));
                receivers.push(Some(rx));
            }
            let receivers = RefCell::new(receivers);
            let provider = FnProvider::new(n, move |i| {
                counter.set(counter.get() + 1);
                match receivers.borrow_mut()[i].take() {
                    Some(rx) => Fetch::pending(async move { rx.await.ok() }),
                    None => Fetch::Missing,
                }
            });
            let source = CachedDataSource::new(provider, config, RowHierarchy::Grid);
            (source, Remote { senders, calls })
        }

        fn settle(&mut self, i: usize, record: Rc<Record>) {
            if let Some(tx) = self.senders[i].take() {
                tx.send(record).unwrap();
            }
        }
    }

    /// Array source with a getter field counting its invocations.
    fn counting_getter(value: FieldValue) -> (FieldDef, Rc<Cell<usize>>) {
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let field = FieldDef::getter("computed", move |_, _| {
            counter.set(counter.get() + 1);
            Fetch::Ready(value.clone())
        });
        (field, calls)
    }

    #[test]
    fn test_record_cache_hit_is_same_reference() {
        let (mut source, mut remote) = Remote::source(2, DataConfig::new());

        assert!(source.get_original_record(0).unwrap().is_pending());
        let rec = shared_record([("id", 0)]);
        remote.settle(0, Rc::clone(&rec));
        source.run_until_stalled();

        for _ in 0..3 {
            let got = source.get_original_record(0).unwrap().ready().unwrap();
            assert!(Rc::ptr_eq(&got, &rec));
        }
        // Only the first read reached the provider
        assert_eq!(remote.calls.get(), 1);
    }

    #[test]
    fn test_record_callback_populates_cache() {
        let mut source = CachedDataSource::of_array(vec![shared_record([("id", 0)])], DataConfig::new());
        let replacement = shared_record([("id", 100)]);
        source.record_promise_callback(0, Some(Rc::clone(&replacement)));

        let got = source.get_original_record(0).unwrap().ready().unwrap();
        assert!(Rc::ptr_eq(&got, &replacement));

        source.record_promise_callback(1, None);
        assert_eq!(source.cache_stats().unwrap(), (1, 0));
    }

    #[test]
    fn test_field_cache_hit_skips_delegation() {
        let mut source = CachedDataSource::of_array(vec![shared_record([("id", 0)])], DataConfig::new());
        let (field, calls) = counting_getter(FieldValue::from("fresh"));

        source.field_promise_callback(0, "computed", Some(FieldValue::from("cached")));
        let got = source.get_original_field(0, &field, FieldContext::default()).unwrap();
        assert_eq!(got, MaybePending::Ready(FieldValue::from("cached")));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_field_cache_miss_on_falsy() {
        let mut source = CachedDataSource::of_array(vec![shared_record([("id", 0)])], DataConfig::new());
        let (field, calls) = counting_getter(FieldValue::Int64(0));

        source.field_promise_callback(0, "computed", Some(FieldValue::Int64(0)));
        for _ in 0..2 {
            let got = source.get_original_field(0, &field, FieldContext::default()).unwrap();
            assert_eq!(got, MaybePending::Ready(FieldValue::Int64(0)));
        }
        // Cached zero never short-circuits
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_field_cache_presence_policy() {
        let config = DataConfig::new().with_field_cache_policy(FieldCachePolicy::Presence);
        let mut source = CachedDataSource::of_array(vec![shared_record([("id", 0)])], config);
        let (field, calls) = counting_getter(FieldValue::Int64(5));

        source.field_promise_callback(0, "computed", Some(FieldValue::Int64(0)));
        let got = source.get_original_field(0, &field, FieldContext::default()).unwrap();
        assert_eq!(got, MaybePending::Ready(FieldValue::Int64(0)));

        source.field_promise_callback(0, "computed", None);
        let got = source.get_original_field(0, &field, FieldContext::default()).unwrap();
        assert_eq!(got, MaybePending::Missing);
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_async_field_settles_into_cache() {
        let (mut source, mut remote) = Remote::source(1, DataConfig::new());
        let price = FieldDef::from("price");

        let first = source.get_original_field(0, &price, FieldContext::at(1, 1)).unwrap();
        assert!(first.is_pending());

        remote.settle(0, shared_record([("price", 12.5)]));
        source.run_until_stalled();
        assert_eq!(source.cache_stats().unwrap(), (1, 1));

        let got = source.get_original_field(0, &price, FieldContext::at(1, 1)).unwrap();
        assert_eq!(got, MaybePending::Ready(FieldValue::Float64(12.5)));
        assert_eq!(remote.calls.get(), 1);
    }

    #[test]
    fn test_clear_cache_idempotent() {
        let (mut source, mut remote) = Remote::source(1, DataConfig::new());
        source.get_original_record(0).unwrap();
        remote.settle(0, shared_record([("id", 0)]));
        source.run_until_stalled();
        source.field_promise_callback(0, "id", Some(FieldValue::Int64(0)));
        assert_eq!(source.cache_stats().unwrap(), (1, 1));

        source.clear_cache();
        source.clear_cache();
        assert_eq!(source.cache_stats().unwrap(), (0, 0));

        // The provider already handed out its only future; nothing cached now
        assert_eq!(source.get_original_record(0).unwrap(), MaybePending::Missing);
    }

    #[test]
    fn test_clear_cache_while_fetch_pending() {
        let (mut source, mut remote) = Remote::source(2, DataConfig::new());
        assert!(source.get_original_record(0).unwrap().is_pending());
        assert!(source.get_original_record(1).unwrap().is_pending());
        remote.settle(0, shared_record([("id", 0)]));
        source.run_until_stalled();

        let id = FieldDef::from("id");
        assert!(source.get_original_field(1, &id, FieldContext::default()).unwrap().is_pending());

        source.clear_cache();
        assert_eq!(source.cache_stats().unwrap(), (0, 0));

        // The fetch outlives the clear and lands in the emptied cache
        let late = shared_record([("id", 1)]);
        remote.settle(1, Rc::clone(&late));
        source.run_until_stalled();
        assert_eq!(source.cache_stats().unwrap(), (1, 1));

        let got = source.get_original_record(1).unwrap().ready().unwrap();
        assert!(Rc::ptr_eq(&got, &late));
        let slots = source.records().unwrap();
        assert_eq!(slots.len(), 2);
        assert!(slots[0].is_none());
        assert_eq!(
            source.get_original_field(1, &id, FieldContext::default()).unwrap(),
            MaybePending::Ready(FieldValue::Int64(1))
        );
        assert_eq!(remote.calls.get(), 2);
    }

    #[test]
    fn test_set_provider_drops_stale_settlement() {
        let (mut source, mut remote) = Remote::source(1, DataConfig::grouped_by(["id"]));
        assert!(source.get_original_record(0).unwrap().is_pending());

        source
            .set_provider(ArrayProvider::new(vec![shared_record([("id", "new")])]))
            .unwrap();
        remote.settle(0, shared_record([("id", "old")]));
        source.run_until_stalled();
        assert_eq!(source.cache_stats().unwrap(), (0, 0));

        let got = source.get_original_record(0).unwrap().ready().unwrap();
        assert_eq!(got["id"], FieldValue::from("new"));

        let rows = source.process_records().unwrap();
        let tree = rows.as_tree().unwrap();
        assert!(tree.find(&[FieldValue::from("new")]).is_some());
        assert!(tree.find(&[FieldValue::from("old")]).is_none());
    }

    #[test]
    fn test_records_prefers_cache() {
        let records = vec![shared_record([("id", 0)]), shared_record([("id", 1)])];
        let mut source = CachedDataSource::of_array(records, DataConfig::new());
        assert_eq!(source.records().unwrap().len(), 2);

        let late = shared_record([("id", 7)]);
        source.record_promise_callback(0, Some(Rc::clone(&late)));
        let slots = source.records().unwrap();
        assert_eq!(slots.len(), 1);
        assert!(Rc::ptr_eq(slots[0].as_ref().unwrap(), &late));

        source.clear_cache();
        assert_eq!(source.records().unwrap().len(), 2);
    }

    #[test]
    fn test_release() {
        let (mut source, mut remote) = Remote::source(1, DataConfig::grouped_by(["k"]));
        assert!(source.get_original_record(0).unwrap().is_pending());

        source.release();
        assert!(source.is_released());
        assert!(matches!(source.get_original_record(0), Err(DataSourceError::Released)));
        assert!(matches!(
            source.get_original_field(0, &FieldDef::from("k"), FieldContext::default()),
            Err(DataSourceError::Released)
        ));
        assert!(matches!(source.records(), Err(DataSourceError::Released)));
        assert!(matches!(source.process_records(), Err(DataSourceError::Released)));

        // Late settlement and late callbacks are no-ops
        remote.settle(0, shared_record([("k", "x")]));
        source.run_until_stalled();
        source.record_promise_callback(0, Some(shared_record([("k", "y")])));
        source.field_promise_callback(0, "k", Some(FieldValue::from("y")));
        source.clear_cache();
        assert_eq!(source.pending_count(), 0);
    }

    #[test]
    fn test_grouped_process_records() {
        let records = vec![
            shared_record([("k", "b")]),
            shared_record([("k", "a")]),
            shared_record([("k", "b")]),
        ];
        let mut source = CachedDataSource::of_array(records, DataConfig::grouped_by(["k"]));
        assert_eq!(source.row_hierarchy(), RowHierarchy::Tree);
        assert_eq!(source.get_group_length(), 1);

        let rows = source.process_records().unwrap();
        let tree = rows.as_tree().unwrap();
        assert_eq!(rows.len(), 2);
        let first = tree.node(tree.roots()[0].group_id().unwrap()).unwrap();
        assert_eq!(first.key(), &FieldValue::from("b"));
        assert_eq!(first.children().len(), 2);

        // Every pass rebuilds the tree
        let again = source.process_records().unwrap();
        assert!(!Rc::ptr_eq(tree, again.as_tree().unwrap()));
    }

    #[test]
    fn test_ungrouped_process_records() {
        let records = vec![shared_record([("k", 1)]), shared_record([("k", 2)])];
        let mut source = CachedDataSource::of_array(records, DataConfig::new());
        assert_eq!(source.get_group_length(), 0);
        assert_eq!(source.row_hierarchy(), RowHierarchy::Grid);

        let rows = source.process_records().unwrap();
        assert!(!rows.is_grouped());
        assert_eq!(rows.as_flat().unwrap().len(), 2);
    }

    #[test]
    fn test_empty_group_rules_stay_flat() {
        let records = vec![shared_record([("k", 1)])];
        let mut source = CachedDataSource::of_array(records, DataConfig::grouped_by(Vec::<String>::new()));
        assert_eq!(source.get_group_length(), 0);
        assert_eq!(source.row_hierarchy(), RowHierarchy::Tree);
        assert!(!source.process_records().unwrap().is_grouped());
    }

    #[test]
    fn test_grouping_runs_alongside_other_aggregators() {
        let records = vec![
            shared_record([("k", FieldValue::from("a")), ("v", 2.into())]),
            shared_record([("k", FieldValue::from("a")), ("v", 3.into())]),
        ];
        let mut source = CachedDataSource::of_array(records, DataConfig::grouped_by(["k"]));
        let total = source
            .register_aggregator(Box::new(CustomAggregator::new("v", |values, _, _| {
                AggregateValue::Value(FieldValue::Int64(values.iter().filter_map(FieldValue::as_i64).sum()))
            })))
            .unwrap();

        let rows = source.process_records().unwrap();
        assert!(rows.is_grouped());
        assert_eq!(source.aggregate_value(total), Some(AggregateValue::Value(FieldValue::Int64(5))));
    }

    #[test]
    fn test_grouping_waits_for_pending_records() {
        let (mut source, mut remote) = Remote::source(3, DataConfig::grouped_by(["k"]));
        for i in 0..3 {
            source.get_original_record(i).unwrap();
        }
        remote.settle(2, shared_record([("k", "late")]));
        remote.settle(0, shared_record([("k", "early")]));
        source.run_until_stalled();

        let rows = source.process_records().unwrap();
        let tree = rows.as_tree().unwrap();
        // Index order, not settlement order; the unsettled row is absent
        let keys: Vec<_> = tree
            .roots()
            .iter()
            .map(|c| tree.node(c.group_id().unwrap()).unwrap().key().clone())
            .collect();
        assert_eq!(keys, vec![FieldValue::from("early"), FieldValue::from("late")]);
        assert_eq!(tree.leaf_count(), 2);
    }

    #[test]
    fn test_set_provider_clears_cache() {
        let mut source = CachedDataSource::of_array(vec![shared_record([("id", 0)])], DataConfig::new());
        source.record_promise_callback(0, Some(shared_record([("id", 99)])));

        source
            .set_provider(ArrayProvider::new(vec![shared_record([("id", 1)]), shared_record([("id", 2)])]))
            .unwrap();
        assert_eq!(source.cache_stats().unwrap(), (0, 0));
        assert_eq!(source.len(), 2);
        let got = source.get_original_record(0).unwrap().ready().unwrap();
        assert_eq!(got["id"], FieldValue::Int64(1));
    }

    #[test]
    fn test_row_set_json() {
        let records = vec![shared_record([("k", "x")])];
        let mut flat = CachedDataSource::of_array(records.clone(), DataConfig::new());
        let json = serde_json::to_value(flat.process_records().unwrap()).unwrap();
        assert_eq!(json, serde_json::json!([{"k": "x"}]));

        let mut grouped = CachedDataSource::of_array(records, DataConfig::grouped_by(["k"]));
        let json = serde_json::to_value(grouped.process_records().unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{"vTableMerge": true, "vtableMergeName": "x", "children": [{"k": "x"}]}])
        );
    }
}
