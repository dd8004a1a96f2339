/// Record and field caches for asynchronously resolved values
///
/// Both caches are keyed by row index and are populated only when a pending
/// record or field settles. They are independent: a settled field does not
/// imply a settled record at the same index, nor the reverse.

use crate::config::FieldCachePolicy;
use crate::source::ResolutionListener;
use crate::value::{FieldValue, Record};
use log::trace;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

#[derive(Debug, Default)]
pub struct ResolutionCache {
    records: BTreeMap<usize, Rc<Record>>,
    /// `None` entries are fields that settled as undefined
    fields: HashMap<usize, HashMap<String, Option<FieldValue>>>,
}

impl ResolutionCache {
    pub fn new() -> Self {
        ResolutionCache {
            records: BTreeMap::new(),
            fields: HashMap::new(),
        }
    }

    pub fn record(&self, index: usize) -> Option<&Rc<Record>> {
        self.records.get(&index)
    }

    pub fn set_record(&mut self, index: usize, record: Rc<Record>) {
        self.records.insert(index, record);
    }

    /// Raw field entry: outer `None` when nothing settled for it.
    pub fn field(&self, index: usize, field: &str) -> Option<&Option<FieldValue>> {
        self.fields.get(&index).and_then(|row| row.get(field))
    }

    /// Cached field value if it counts as a hit under `policy`.
    ///
    /// Returns `Some(None)` for a hit on a field that settled as undefined,
    /// which only the presence policy produces.
    pub fn field_hit(
        &self,
        index: usize,
        field: &str,
        policy: FieldCachePolicy,
    ) -> Option<Option<FieldValue>> {
        let entry = self.field(index, field)?;
        match policy {
            FieldCachePolicy::Truthy => match entry {
                Some(value) if value.is_truthy() => Some(Some(value.clone())),
                _ => None,
            },
            FieldCachePolicy::Presence => Some(entry.clone()),
        }
    }

    pub fn set_field(&mut self, index: usize, field: &str, value: Option<FieldValue>) {
        self.fields
            .entry(index)
            .or_default()
            .insert(field.to_string(), value);
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.fields.clear();
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Number of settled (index, field) entries.
    pub fn field_count(&self) -> usize {
        self.fields.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.fields.is_empty()
    }

    /// Cached records as row slots, `None` for rows not settled yet.
    ///
    /// The sequence runs up to the highest cached index.
    pub fn record_slots(&self) -> Vec<Option<Rc<Record>>> {
        let len = match self.records.keys().next_back() {
            Some(last) => last + 1,
            None => return Vec::new(),
        };
        let mut slots = vec![None; len];
        for (index, record) in &self.records {
            slots[*index] = Some(Rc::clone(record));
        }
        slots
    }
}

impl ResolutionListener for ResolutionCache {
    fn record_settled(&mut self, index: usize, record: Option<Rc<Record>>) {
        match record {
            Some(record) => {
                trace!("record {} cached", index);
                self.set_record(index, record);
            }
            None => trace!("record {} settled undefined, not cached", index),
        }
    }

    fn field_settled(&mut self, index: usize, field: &str, value: Option<FieldValue>) {
        trace!("field {}[{}] cached", field, index);
        self.set_field(index, field, value);
    }
}
