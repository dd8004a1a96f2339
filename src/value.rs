/// LiveGrid Field Values
///
/// A record is an open-ended mapping from field name to a tagged value. The
/// tag carries the value kind explicitly so that readers can branch on it
/// instead of relying on truthiness. A field that is not present in a record
/// is "undefined" and is distinct from `FieldValue::Null`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::rc::Rc;

/// One logical row of source data.
pub type Record = HashMap<String, FieldValue>;

/// Field value enum covering the value kinds a grid cell can show.
///
/// Serialized untagged, so a record round-trips as a plain JSON object.
/// Arrays and objects are carried opaquely, e.g. the nested `children` of a
/// tree-mode row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    String(String),
    Array(Vec<FieldValue>),
    Object(HashMap<String, FieldValue>),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int64(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view of the value, for both integer and float kinds.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int64(v) => Some(*v as f64),
            FieldValue::Float64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            FieldValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[FieldValue]> {
        match self {
            FieldValue::Array(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&HashMap<String, FieldValue>> {
        match self {
            FieldValue::Object(v) => Some(v),
            _ => None,
        }
    }

    /// JavaScript-style truthiness: `0`, `NaN`, `""`, `false` and `null` are
    /// falsy. Arrays and objects are truthy even when empty.
    pub fn is_truthy(&self) -> bool {
        match self {
            FieldValue::Null => false,
            FieldValue::Bool(b) => *b,
            FieldValue::Int64(v) => *v != 0,
            FieldValue::Float64(v) => *v != 0.0 && !v.is_nan(),
            FieldValue::String(s) => !s.is_empty(),
            FieldValue::Array(_) | FieldValue::Object(_) => true,
        }
    }

    /// Hashable key used to partition records during grouping, `None` for
    /// arrays and objects.
    pub fn group_key(&self) -> Option<GroupKey> {
        GroupKey::of(self)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Int64(v as i64)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int64(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float64(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

/// Build a shared record from `(field, value)` pairs.
///
/// # Examples
///
/// ```
/// use livegrid::{shared_record, FieldValue};
///
/// let rec = shared_record([("city", FieldValue::from("Oslo")), ("pop", 709_000.into())]);
/// assert_eq!(rec.get("city").and_then(|v| v.as_string()), Some("Oslo"));
/// assert_eq!(rec.get("pop").and_then(|v| v.as_i64()), Some(709_000));
/// ```
pub fn shared_record<K, V, I>(fields: I) -> Rc<Record>
where
    K: Into<String>,
    V: Into<FieldValue>,
    I: IntoIterator<Item = (K, V)>,
{
    Rc::new(
        fields
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect(),
    )
}

/// Grouping key with SameValueZero equality.
///
/// Integral floats collapse onto the integer key (`1` and `1.0` group
/// together), `-0.0` equals `0.0` and every NaN is the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GroupKey {
    Null,
    Bool(bool),
    Int(i64),
    /// Bit pattern of a non-integral float
    Float(u64),
    String(String),
}

/// 2^63, the first float magnitude that no longer fits an i64.
const I64_LIMIT: f64 = 9_223_372_036_854_775_808.0;

impl GroupKey {
    /// Key for a scalar value. Composite values have no key; a record whose
    /// grouping field holds one is treated like one with the field undefined.
    pub fn of(value: &FieldValue) -> Option<Self> {
        let key = match value {
            FieldValue::Null => GroupKey::Null,
            FieldValue::Bool(b) => GroupKey::Bool(*b),
            FieldValue::Int64(v) => GroupKey::Int(*v),
            FieldValue::Float64(v) => {
                if v.is_nan() {
                    GroupKey::Float(f64::NAN.to_bits())
                } else if v.fract() == 0.0 && v.abs() < I64_LIMIT {
                    GroupKey::Int(*v as i64)
                } else {
                    GroupKey::Float(v.to_bits())
                }
            }
            FieldValue::String(s) => GroupKey::String(s.clone()),
            FieldValue::Array(_) | FieldValue::Object(_) => return None,
        };
        Some(key)
    }
}
