/// Record providers and field definitions
///
/// A `RecordProvider` is the raw record source behind a data source. It may
/// hand records out synchronously (an in-memory array) or return a future
/// that settles later (a lazy or remote source). Field definitions work the
/// same way: a plain field name reads the record, a getter computes the value
/// and may itself be asynchronous.

use crate::error::Result;
use crate::value::{FieldValue, Record};
use futures::future::{FutureExt, LocalBoxFuture};
use std::fmt;
use std::future::Future;
use std::rc::Rc;

/// Result of asking a provider or getter for a value.
pub enum Fetch<T> {
    /// Available now
    Ready(T),
    /// Will settle later; `None` means it settled as undefined
    Pending(LocalBoxFuture<'static, Option<T>>),
    /// Undefined (no such record or field)
    Missing,
}

pub type RecordFetch = Fetch<Rc<Record>>;
pub type FieldFetch = Fetch<FieldValue>;

impl<T> Fetch<T> {
    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = Option<T>> + 'static,
    {
        Fetch::Pending(future.boxed_local())
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Fetch::Pending(_))
    }
}

impl<T> From<Option<T>> for Fetch<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Fetch::Ready(v),
            None => Fetch::Missing,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Fetch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fetch::Ready(v) => f.debug_tuple("Ready").field(v).finish(),
            Fetch::Pending(_) => f.write_str("Pending"),
            Fetch::Missing => f.write_str("Missing"),
        }
    }
}

/// Raw record source consumed by the data source.
pub trait RecordProvider {
    /// Number of records the source exposes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetch the record at `index`.
    fn get(&self, index: usize) -> RecordFetch;

    /// Flat snapshot of records the source already holds in memory.
    fn records(&self) -> Option<Vec<Rc<Record>>> {
        None
    }
}

/// Provider over an in-memory array; every record is available synchronously.
#[derive(Debug, Clone, Default)]
pub struct ArrayProvider {
    records: Vec<Rc<Record>>,
}

impl ArrayProvider {
    pub fn new(records: Vec<Rc<Record>>) -> Self {
        ArrayProvider { records }
    }

    /// Create a provider from a JSON array of objects.
    ///
    /// Nested arrays and objects are kept as composite field values.
    ///
    /// # Example
    ///
    /// ```
    /// use livegrid::{ArrayProvider, RecordProvider};
    ///
    /// let json = r#"[{"id": 1, "name": "Alice"}, {"id": 2, "name": "Bob"}]"#;
    /// let provider = ArrayProvider::from_json(json).unwrap();
    /// assert_eq!(provider.len(), 2);
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let parsed: Vec<Record> = serde_json::from_str(json)?;
        Ok(ArrayProvider::new(parsed.into_iter().map(Rc::new).collect()))
    }
}

impl FromIterator<Record> for ArrayProvider {
    fn from_iter<I: IntoIterator<Item = Record>>(iter: I) -> Self {
        ArrayProvider::new(iter.into_iter().map(Rc::new).collect())
    }
}

impl RecordProvider for ArrayProvider {
    fn len(&self) -> usize {
        self.records.len()
    }

    fn get(&self, index: usize) -> RecordFetch {
        self.records.get(index).cloned().into()
    }

    fn records(&self) -> Option<Vec<Rc<Record>>> {
        Some(self.records.clone())
    }
}

/// Provider backed by a closure; records may resolve asynchronously.
pub struct FnProvider {
    len: usize,
    get: Box<dyn Fn(usize) -> RecordFetch>,
}

impl FnProvider {
    pub fn new<F>(len: usize, get: F) -> Self
    where
        F: Fn(usize) -> RecordFetch + 'static,
    {
        FnProvider {
            len,
            get: Box::new(get),
        }
    }
}

impl RecordProvider for FnProvider {
    fn len(&self) -> usize {
        self.len
    }

    fn get(&self, index: usize) -> RecordFetch {
        if index >= self.len {
            return Fetch::Missing;
        }
        (self.get)(index)
    }
}

impl fmt::Debug for FnProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnProvider").field("len", &self.len).finish()
    }
}

/// Cell position a field is read for, forwarded untouched to getters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldContext {
    pub col: Option<usize>,
    pub row: Option<usize>,
}

impl FieldContext {
    pub fn at(col: usize, row: usize) -> Self {
        FieldContext {
            col: Some(col),
            row: Some(row),
        }
    }
}

pub type FieldGetter = Rc<dyn Fn(&Record, FieldContext) -> FieldFetch>;

/// How a column obtains its value from a record.
#[derive(Clone)]
pub enum FieldDef {
    /// Read the named field
    Name(String),
    /// Compute the value; `id` keys the field cache
    Getter { id: String, get: FieldGetter },
}

impl FieldDef {
    pub fn name(name: impl Into<String>) -> Self {
        FieldDef::Name(name.into())
    }

    pub fn getter<F>(id: impl Into<String>, get: F) -> Self
    where
        F: Fn(&Record, FieldContext) -> FieldFetch + 'static,
    {
        FieldDef::Getter {
            id: id.into(),
            get: Rc::new(get),
        }
    }

    /// Identifier the field cache is keyed by.
    pub fn id(&self) -> &str {
        match self {
            FieldDef::Name(name) => name,
            FieldDef::Getter { id, .. } => id,
        }
    }

    /// Resolve this field against a settled record.
    pub fn resolve(&self, record: &Record, context: FieldContext) -> FieldFetch {
        match self {
            FieldDef::Name(name) => record.get(name).cloned().into(),
            FieldDef::Getter { get, .. } => get(record, context),
        }
    }
}

impl From<&str> for FieldDef {
    fn from(name: &str) -> Self {
        FieldDef::Name(name.to_string())
    }
}

impl fmt::Debug for FieldDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldDef::Name(name) => f.debug_tuple("Name").field(name).finish(),
            FieldDef::Getter { id, .. } => f.debug_struct("Getter").field("id", id).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::shared_record;

    #[test]
    fn test_array_provider() {
        let provider = ArrayProvider::new(vec![shared_record([("id", 1)]), shared_record([("id", 2)])]);
        assert_eq!(provider.len(), 2);
        assert!(matches!(provider.get(1), Fetch::Ready(rec) if rec["id"] == FieldValue::Int64(2)));
        assert!(matches!(provider.get(2), Fetch::Missing));
        assert_eq!(provider.records().unwrap().len(), 2);
    }

    #[test]
    fn test_array_provider_from_json_nested_rows() {
        let json = r#"[{"name": "a", "children": [{"name": "b"}]}]"#;
        let provider = ArrayProvider::from_json(json).unwrap();
        let row = match provider.get(0) {
            Fetch::Ready(row) => row,
            other => panic!("expected a ready row, got {:?}", other),
        };
        let children = row["children"].as_array().unwrap();
        assert_eq!(children[0].as_object().unwrap()["name"], FieldValue::from("b"));

        let back = serde_json::to_value(&*row).unwrap();
        assert_eq!(back, serde_json::json!({"name": "a", "children": [{"name": "b"}]}));

        assert!(ArrayProvider::from_json("[]").unwrap().is_empty());
        assert!(ArrayProvider::from_json(r#"{"not": "an array"}"#).is_err());
    }

    #[test]
    fn test_fn_provider_bounds() {
        let provider = FnProvider::new(3, |i| Fetch::Ready(shared_record([("i", i as i64)])));
        assert!(matches!(provider.get(0), Fetch::Ready(_)));
        assert!(matches!(provider.get(3), Fetch::Missing));
        assert!(provider.records().is_none());
    }

    #[test]
    fn test_field_def_resolve() {
        let rec = shared_record([("price", 2.0), ("qty", 3.0)]);

        let by_name = FieldDef::from("price");
        assert_eq!(by_name.id(), "price");
        assert!(matches!(by_name.resolve(&rec, FieldContext::default()), Fetch::Ready(FieldValue::Float64(p)) if p == 2.0));
        assert!(matches!(FieldDef::name("nope").resolve(&rec, FieldContext::default()), Fetch::Missing));

        let total = FieldDef::getter("total", |rec, ctx| {
            assert_eq!(ctx, FieldContext::at(4, 7));
            let price = rec.get("price").and_then(FieldValue::as_f64).unwrap_or(0.0);
            let qty = rec.get("qty").and_then(FieldValue::as_f64).unwrap_or(0.0);
            Fetch::Ready(FieldValue::Float64(price * qty))
        });
        assert_eq!(total.id(), "total");
        assert!(matches!(total.resolve(&rec, FieldContext::at(4, 7)), Fetch::Ready(FieldValue::Float64(t)) if t == 6.0));
    }
}
