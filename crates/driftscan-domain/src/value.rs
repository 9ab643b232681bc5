use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Canonical attribute map shared by every resource. `BTreeMap` keeps key
/// order deterministic so renderings of the same map are bit-identical.
pub type AttrMap = BTreeMap<String, AttrValue>;

/// Language-neutral attribute value.
///
/// Both ingestion sides (state file, HCL evaluation, platform APIs) converge
/// on this shape before anything is compared. Whole numbers are `Int`;
/// non-integral numbers are `Float`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<AttrValue>),
    Map(BTreeMap<String, AttrValue>),
}

impl AttrValue {
    pub fn is_null(&self) -> bool {
        matches!(self, AttrValue::Null)
    }

    /// Null, empty string, empty list and empty map all count as "nothing
    /// there"; the robust comparator treats them as equal to absence.
    pub fn is_empty_like(&self) -> bool {
        match self {
            AttrValue::Null => true,
            AttrValue::String(s) => s.is_empty(),
            AttrValue::List(l) => l.is_empty(),
            AttrValue::Map(m) => m.is_empty(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer view, accepting integral floats.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttrValue::Int(i) => Some(*i),
            AttrValue::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Int(i) => Some(*i as f64),
            AttrValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[AttrValue]> {
        match self {
            AttrValue::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, AttrValue>> {
        match self {
            AttrValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Textual form of a scalar, used when coercing tag values to strings.
    pub fn scalar_to_string(&self) -> Option<String> {
        match self {
            AttrValue::String(s) => Some(s.clone()),
            AttrValue::Bool(b) => Some(b.to_string()),
            AttrValue::Int(i) => Some(i.to_string()),
            AttrValue::Float(f) => Some(format_float(*f)),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            AttrValue::Null => serde_json::Value::Null,
            AttrValue::Bool(b) => serde_json::Value::Bool(*b),
            AttrValue::Int(i) => serde_json::Value::from(*i),
            AttrValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            AttrValue::String(s) => serde_json::Value::String(s.clone()),
            AttrValue::List(l) => serde_json::Value::Array(l.iter().map(|v| v.to_json()).collect()),
            AttrValue::Map(m) => serde_json::Value::Object(
                m.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

fn format_float(f: f64) -> String {
    if f.fract() == 0.0 && f.is_finite() {
        format!("{}", f as i64)
    } else {
        f.to_string()
    }
}

impl std::fmt::Display for AttrValue {
    /// Canonical JSON rendering; map keys are already sorted by `BTreeMap`.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttrValue::String(s) => write!(f, "{s}"),
            other => write!(
                f,
                "{}",
                serde_json::to_string(&other.to_json()).unwrap_or_else(|_| "null".into())
            ),
        }
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        AttrValue::Bool(b)
    }
}

impl From<i64> for AttrValue {
    fn from(i: i64) -> Self {
        AttrValue::Int(i)
    }
}

impl From<f64> for AttrValue {
    fn from(f: f64) -> Self {
        AttrValue::Float(f)
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::String(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::String(s)
    }
}

impl From<Vec<AttrValue>> for AttrValue {
    fn from(l: Vec<AttrValue>) -> Self {
        AttrValue::List(l)
    }
}

impl From<BTreeMap<String, AttrValue>> for AttrValue {
    fn from(m: BTreeMap<String, AttrValue>) -> Self {
        AttrValue::Map(m)
    }
}

impl From<serde_json::Value> for AttrValue {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => AttrValue::Null,
            serde_json::Value::Bool(b) => AttrValue::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    AttrValue::Int(i)
                } else {
                    AttrValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => AttrValue::String(s),
            serde_json::Value::Array(a) => {
                AttrValue::List(a.into_iter().map(AttrValue::from).collect())
            }
            serde_json::Value::Object(o) => AttrValue::Map(
                o.into_iter().map(|(k, v)| (k, AttrValue::from(v))).collect(),
            ),
        }
    }
}

/// Convert a whole JSON object into an [`AttrMap`].
pub fn attr_map_from_json(obj: serde_json::Map<String, serde_json::Value>) -> AttrMap {
    obj.into_iter().map(|(k, v)| (k, AttrValue::from(v))).collect()
}
