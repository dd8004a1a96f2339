/// LiveGrid Aggregation Pipeline
///
/// During a processing pass the data source pushes every available record into
/// each registered aggregator; aggregators compute their value lazily when it
/// is first read after the pass.
///
/// Only the custom aggregator is provided here. It wraps a caller-supplied
/// function and is the hook the grouping adapter uses to build the group tree
/// in the same pass as any other field aggregation.
///
/// Aggregators are held in an explicit `AggregatorRegistry` owned by the data
/// source. Registering returns an `AggregatorHandle` used to read the value
/// back.

use crate::group::GroupTree;
use crate::value::{FieldValue, Record};
use std::fmt;
use std::rc::Rc;

/// Kind of aggregation an aggregator performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregationType {
    /// Caller-defined function over the pushed values and records
    Custom,
}

/// Output of an aggregator.
#[derive(Debug, Clone)]
pub enum AggregateValue {
    /// Nothing computed (no function output or no records)
    Empty,
    Value(FieldValue),
    Groups(Rc<GroupTree>),
}

impl AggregateValue {
    pub fn as_value(&self) -> Option<&FieldValue> {
        match self {
            AggregateValue::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_groups(&self) -> Option<&Rc<GroupTree>> {
        match self {
            AggregateValue::Groups(tree) => Some(tree),
            _ => None,
        }
    }
}

// Group trees compare by identity.
impl PartialEq for AggregateValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (AggregateValue::Empty, AggregateValue::Empty) => true,
            (AggregateValue::Value(a), AggregateValue::Value(b)) => a == b,
            (AggregateValue::Groups(a), AggregateValue::Groups(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Function run by a custom aggregator: `(values, records, dimension)`.
///
/// `values` holds the dimension field of each pushed record that has one.
pub type AggregationFn = Rc<dyn Fn(&[FieldValue], &[Rc<Record>], &str) -> AggregateValue>;

pub trait Aggregator {
    fn aggregation_type(&self) -> AggregationType;

    /// Field this aggregator reads, empty when it works on whole records.
    fn dimension(&self) -> &str;

    /// Feed one record of the current pass.
    fn push(&mut self, record: &Rc<Record>);

    /// Forget everything pushed so far.
    fn reset(&mut self);

    /// Current value; computed on first read after a push or reset.
    fn value(&mut self) -> AggregateValue;
}

pub struct CustomAggregator {
    dimension: String,
    fun: AggregationFn,
    values: Vec<FieldValue>,
    records: Vec<Rc<Record>>,
    computed: Option<AggregateValue>,
}

impl CustomAggregator {
    pub fn new<F>(dimension: impl Into<String>, fun: F) -> Self
    where
        F: Fn(&[FieldValue], &[Rc<Record>], &str) -> AggregateValue + 'static,
    {
        CustomAggregator {
            dimension: dimension.into(),
            fun: Rc::new(fun),
            values: Vec::new(),
            records: Vec::new(),
            computed: None,
        }
    }

    /// Number of records pushed since the last reset.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Aggregator for CustomAggregator {
    fn aggregation_type(&self) -> AggregationType {
        AggregationType::Custom
    }

    fn dimension(&self) -> &str {
        &self.dimension
    }

    fn push(&mut self, record: &Rc<Record>) {
        if !self.dimension.is_empty() {
            if let Some(value) = record.get(&self.dimension) {
                self.values.push(value.clone());
            }
        }
        self.records.push(Rc::clone(record));
        self.computed = None;
    }

    fn reset(&mut self) {
        self.values.clear();
        self.records.clear();
        self.computed = None;
    }

    fn value(&mut self) -> AggregateValue {
        if let Some(ref computed) = self.computed {
            return computed.clone();
        }
        let computed = (self.fun)(&self.values, &self.records, &self.dimension);
        self.computed = Some(computed.clone());
        computed
    }
}

impl fmt::Debug for CustomAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomAggregator")
            .field("dimension", &self.dimension)
            .field("records", &self.records.len())
            .field("computed", &self.computed.is_some())
            .finish()
    }
}

/// Handle to an aggregator inside a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AggregatorHandle(usize);

/// Ordered list of the aggregators attached to one data source.
#[derive(Default)]
pub struct AggregatorRegistry {
    aggregators: Vec<Box<dyn Aggregator>>,
}

impl AggregatorRegistry {
    pub fn new() -> Self {
        AggregatorRegistry {
            aggregators: Vec::new(),
        }
    }

    pub fn register(&mut self, aggregator: Box<dyn Aggregator>) -> AggregatorHandle {
        self.aggregators.push(aggregator);
        AggregatorHandle(self.aggregators.len() - 1)
    }

    pub fn get(&self, handle: AggregatorHandle) -> Option<&dyn Aggregator> {
        self.aggregators.get(handle.0).map(|a| a.as_ref())
    }

    /// Value of one aggregator, `None` for a handle from another registry.
    pub fn value(&mut self, handle: AggregatorHandle) -> Option<AggregateValue> {
        self.aggregators.get_mut(handle.0).map(|a| a.value())
    }

    pub fn push_all(&mut self, record: &Rc<Record>) {
        for aggregator in self.aggregators.iter_mut() {
            aggregator.push(record);
        }
    }

    pub fn reset_all(&mut self) {
        for aggregator in self.aggregators.iter_mut() {
            aggregator.reset();
        }
    }

    /// Drop every aggregator. Handles issued earlier become dangling.
    pub fn clear(&mut self) {
        self.aggregators.clear();
    }

    pub fn len(&self) -> usize {
        self.aggregators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aggregators.is_empty()
    }
}

impl fmt::Debug for AggregatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregatorRegistry")
            .field("aggregators", &self.aggregators.len())
            .finish()
    }
}
