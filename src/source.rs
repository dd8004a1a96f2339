/// LiveGrid Base Data Source
///
/// `DataSource` gives the renderer a synchronous view over a `RecordProvider`
/// whose records and fields may resolve asynchronously. It does no caching of
/// its own: a read either returns a value that is available now, reports it
/// as missing, or returns a `PendingHandle` and schedules the pending work.
///
/// # Event loop
///
/// Pending futures are spawned on a single-threaded `LocalPool` owned by the
/// data source. `run_until_stalled` is one event-loop tick: it drives every
/// spawned future as far as it can go. When a record or field settles, the
/// registered `ResolutionListener` is notified. The listener is held weakly,
/// so a settlement that arrives after the listener was dropped is ignored.
///
/// # In-flight records
///
/// While the fetch of a record is pending, further reads of that index return
/// the same handle without asking the provider again, and field reads on it
/// chain onto the in-flight fetch instead of starting their own.
///
/// # Provider generations
///
/// Every provider swap starts a new generation. Settlements are tagged with
/// the generation they were spawned in and dropped when it is no longer
/// current, so a slow fetch from the old provider never reaches the listener.

use crate::aggregation::{AggregateValue, Aggregator, AggregatorHandle, AggregatorRegistry};
use crate::config::{DataConfig, RowHierarchy};
use crate::error::{DataSourceError, Result};
use crate::provider::{ArrayProvider, Fetch, FieldContext, FieldDef, RecordProvider};
use crate::value::{FieldValue, Record};
use futures::executor::{LocalPool, LocalSpawner};
use futures::future::{FutureExt, LocalBoxFuture, Shared};
use futures::task::LocalSpawnExt;
use log::{debug, trace};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::rc::{Rc, Weak};

/// Identifies one scheduled resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PendingHandle(u64);

/// What a read returns while values may still be resolving.
#[derive(Debug, Clone, PartialEq)]
pub enum MaybePending<T> {
    Ready(T),
    /// Still resolving; the listener is notified when it settles
    Pending(PendingHandle),
    /// Undefined
    Missing,
}

impl<T> MaybePending<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, MaybePending::Ready(_))
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, MaybePending::Pending(_))
    }

    pub fn ready(self) -> Option<T> {
        match self {
            MaybePending::Ready(v) => Some(v),
            _ => None,
        }
    }

    pub fn handle(&self) -> Option<PendingHandle> {
        match self {
            MaybePending::Pending(h) => Some(*h),
            _ => None,
        }
    }
}

/// Receives values that settled after a read returned `Pending`.
pub trait ResolutionListener {
    /// `record` is `None` when the record settled as undefined.
    fn record_settled(&mut self, index: usize, record: Option<Rc<Record>>);

    /// `value` is `None` when the field settled as undefined.
    fn field_settled(&mut self, index: usize, field: &str, value: Option<FieldValue>);
}

type SharedRecord = Shared<LocalBoxFuture<'static, Option<Rc<Record>>>>;
type ListenerRef = Option<Weak<RefCell<dyn ResolutionListener>>>;

struct InFlight {
    handle: PendingHandle,
    record: SharedRecord,
}

/// Call the listener if it is still alive. Returns false if it is gone.
fn notify<F>(listener: &ListenerRef, f: F) -> bool
where
    F: FnOnce(&mut dyn ResolutionListener),
{
    match listener.as_ref().and_then(Weak::upgrade) {
        Some(listener) => {
            f(&mut *listener.borrow_mut());
            true
        }
        None => false,
    }
}

pub struct DataSource {
    provider: Box<dyn RecordProvider>,
    config: DataConfig,
    hierarchy: RowHierarchy,
    aggregators: AggregatorRegistry,
    pool: LocalPool,
    spawner: LocalSpawner,
    in_flight: Rc<RefCell<HashMap<usize, InFlight>>>,
    pending_fields: Rc<Cell<usize>>,
    generation: Rc<Cell<u64>>,
    listener: ListenerRef,
    next_handle: u64,
    released: bool,
}

impl DataSource {
    pub fn new<P>(provider: P, config: DataConfig, hierarchy: RowHierarchy) -> Self
    where
        P: RecordProvider + 'static,
    {
        let pool = LocalPool::new();
        let spawner = pool.spawner();
        DataSource {
            provider: Box::new(provider),
            config,
            hierarchy,
            aggregators: AggregatorRegistry::new(),
            pool,
            spawner,
            in_flight: Rc::new(RefCell::new(HashMap::new())),
            pending_fields: Rc::new(Cell::new(0)),
            generation: Rc::new(Cell::new(0)),
            listener: None,
            next_handle: 0,
            released: false,
        }
    }

    /// Data source over an in-memory array of records.
    pub fn of_array(records: Vec<Rc<Record>>, config: DataConfig) -> Self {
        Self::new(ArrayProvider::new(records), config, RowHierarchy::Grid)
    }

    /// Route settlements to `listener`. Replaces any previous listener.
    pub fn set_listener(&mut self, listener: Weak<RefCell<dyn ResolutionListener>>) {
        self.listener = Some(listener);
    }

    /// Swap the record provider. Fetches already in flight are not cancelled,
    /// but new reads no longer join them and their settlements are dropped.
    pub fn set_provider<P>(&mut self, provider: P) -> Result<()>
    where
        P: RecordProvider + 'static,
    {
        self.ensure_live()?;
        self.provider = Box::new(provider);
        self.in_flight.borrow_mut().clear();
        self.generation.set(self.generation.get() + 1);
        debug!(
            "record provider replaced ({} records, generation {})",
            self.provider.len(),
            self.generation.get()
        );
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.provider.len()
    }

    pub fn is_empty(&self) -> bool {
        self.provider.is_empty()
    }

    pub fn config(&self) -> &DataConfig {
        &self.config
    }

    pub fn row_hierarchy(&self) -> RowHierarchy {
        self.hierarchy
    }

    pub fn hierarchy_expand_level(&self) -> Option<usize> {
        self.config.hierarchy_expand_level
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    fn ensure_live(&self) -> Result<()> {
        if self.released {
            Err(DataSourceError::Released)
        } else {
            Ok(())
        }
    }

    fn next_handle(&mut self) -> PendingHandle {
        self.next_handle += 1;
        PendingHandle(self.next_handle)
    }

    /// Read the record at `index` from the provider.
    pub fn get_original_record(&mut self, index: usize) -> Result<MaybePending<Rc<Record>>> {
        self.ensure_live()?;

        let existing = self.in_flight.borrow().get(&index).map(|f| f.handle);
        if let Some(handle) = existing {
            return Ok(MaybePending::Pending(handle));
        }

        match self.provider.get(index) {
            Fetch::Ready(record) => Ok(MaybePending::Ready(record)),
            Fetch::Missing => Ok(MaybePending::Missing),
            Fetch::Pending(future) => {
                let handle = self.next_handle();
                let record = future.shared();
                self.in_flight.borrow_mut().insert(
                    index,
                    InFlight {
                        handle,
                        record: record.clone(),
                    },
                );

                let in_flight = Rc::clone(&self.in_flight);
                let listener = self.listener.clone();
                let current = Rc::clone(&self.generation);
                let generation = current.get();
                self.spawner.spawn_local(async move {
                    let settled = record.await;
                    {
                        let mut in_flight = in_flight.borrow_mut();
                        if matches!(in_flight.get(&index), Some(f) if f.handle == handle) {
                            in_flight.remove(&index);
                        }
                    }
                    if current.get() != generation {
                        trace!("record {} settled for a replaced provider, ignored", index);
                        return;
                    }
                    if !notify(&listener, |l| l.record_settled(index, settled)) {
                        trace!("record {} settled after listener release, ignored", index);
                    }
                })?;
                trace!("record {} pending ({:?})", index, handle);
                Ok(MaybePending::Pending(handle))
            }
        }
    }

    /// Read one field of the record at `index`.
    ///
    /// `context` is handed unchanged to getter fields.
    pub fn get_original_field(
        &mut self,
        index: usize,
        field: &FieldDef,
        context: FieldContext,
    ) -> Result<MaybePending<FieldValue>> {
        match self.get_original_record(index)? {
            MaybePending::Missing => Ok(MaybePending::Missing),
            MaybePending::Ready(record) => match field.resolve(&record, context) {
                Fetch::Ready(value) => Ok(MaybePending::Ready(value)),
                Fetch::Missing => Ok(MaybePending::Missing),
                Fetch::Pending(future) => self.settle_field_later(index, field.id(), future),
            },
            MaybePending::Pending(_) => {
                let record = self.in_flight.borrow().get(&index).map(|f| f.record.clone());
                let record = match record {
                    Some(record) => record,
                    None => return Ok(MaybePending::Missing),
                };
                let field = field.clone();
                let id = field.id().to_string();
                self.settle_field_later(index, &id, async move {
                    let record = match record.await {
                        Some(record) => record,
                        None => return None,
                    };
                    match field.resolve(&record, context) {
                        Fetch::Ready(value) => Some(value),
                        Fetch::Missing => None,
                        Fetch::Pending(future) => future.await,
                    }
                })
            }
        }
    }

    fn settle_field_later<F>(
        &mut self,
        index: usize,
        field: &str,
        future: F,
    ) -> Result<MaybePending<FieldValue>>
    where
        F: Future<Output = Option<FieldValue>> + 'static,
    {
        let handle = self.next_handle();
        let listener = self.listener.clone();
        let pending = Rc::clone(&self.pending_fields);
        let current = Rc::clone(&self.generation);
        let generation = current.get();
        let id = field.to_string();

        self.spawner.spawn_local(async move {
            let value = future.await;
            pending.set(pending.get().saturating_sub(1));
            if current.get() != generation {
                trace!("field {}[{}] settled for a replaced provider, ignored", id, index);
            } else if !notify(&listener, |l| l.field_settled(index, &id, value)) {
                trace!("field {}[{}] settled after listener release, ignored", id, index);
            }
        })?;
        self.pending_fields.set(self.pending_fields.get() + 1);
        trace!("field {}[{}] pending ({:?})", field, index, handle);
        Ok(MaybePending::Pending(handle))
    }

    /// Drive pending resolutions until none can make progress.
    pub fn run_until_stalled(&mut self) {
        self.pool.run_until_stalled();
    }

    /// Number of record fetches and field resolutions not yet settled.
    pub fn pending_count(&self) -> usize {
        self.in_flight.borrow().len() + self.pending_fields.get()
    }

    /// Records the provider holds in memory, as slots indexed by row.
    pub fn records(&self) -> Vec<Option<Rc<Record>>> {
        self.provider
            .records()
            .map(|records| records.into_iter().map(Some).collect())
            .unwrap_or_default()
    }

    pub fn register_aggregator(&mut self, aggregator: Box<dyn Aggregator>) -> AggregatorHandle {
        self.aggregators.register(aggregator)
    }

    pub fn aggregate_value(&mut self, handle: AggregatorHandle) -> Option<AggregateValue> {
        self.aggregators.value(handle)
    }

    pub fn aggregators(&self) -> &AggregatorRegistry {
        &self.aggregators
    }

    /// Run the aggregation pass over `records` and return the flat rows.
    ///
    /// Unsettled slots carry no fields and are skipped.
    pub fn process_records(&mut self, records: &[Option<Rc<Record>>]) -> Result<Vec<Rc<Record>>> {
        self.ensure_live()?;
        self.aggregators.reset_all();

        let rows: Vec<Rc<Record>> = records.iter().flatten().cloned().collect();
        for record in &rows {
            self.aggregators.push_all(record);
        }
        debug!(
            "processed {} of {} record slots through {} aggregators",
            rows.len(),
            records.len(),
            self.aggregators.len()
        );
        Ok(rows)
    }

    /// Tear down. Spawned resolutions are left to finish; they find no
    /// listener once the owner has dropped it.
    pub fn release(&mut self) {
        self.aggregators.clear();
        self.released = true;
        debug!("data source released");
    }
}

impl fmt::Debug for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSource")
            .field("len", &self.provider.len())
            .field("hierarchy", &self.hierarchy)
            .field("aggregators", &self.aggregators)
            .field("pending", &self.pending_count())
            .field("released", &self.released)
            .finish()
    }
}
