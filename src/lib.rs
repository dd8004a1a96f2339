/// LiveGrid - Caching Grid Data Source
///
/// A data source for virtualized grids whose records and fields may resolve
/// asynchronously. Values that settle later are memoized so repeated cell
/// reads do not refetch them, and flat records can be grouped into a
/// multi-level tree of merge nodes for tree-style row rendering.

pub mod value;
pub mod error;
pub mod config;
pub mod group;
pub mod aggregation;
pub mod provider;
pub mod source;
pub mod cache;
pub mod cached;

pub use value::{shared_record, FieldValue, GroupKey, Record};
pub use error::{DataSourceError, Result};
pub use config::{DataConfig, FieldCachePolicy, RowHierarchy};
pub use group::{GroupBy, GroupChild, GroupNode, GroupTree, Leaves, Level, NodeId};
pub use aggregation::{
    AggregateValue, AggregationFn, AggregationType, Aggregator, AggregatorHandle, AggregatorRegistry,
    CustomAggregator,
};
pub use provider::{
    ArrayProvider, Fetch, FieldContext, FieldDef, FieldFetch, FieldGetter, FnProvider, RecordFetch,
    RecordProvider,
};
pub use source::{DataSource, MaybePending, PendingHandle, ResolutionListener};
pub use cache::ResolutionCache;
pub use cached::{CachedDataSource, RowSet};
