use std::collections::BTreeMap;

use driftscan_domain::{keys, AttrValue, Error, ErrorCode, Result};

/// How a source value becomes its canonical shape. `Ok(None)` means the
/// attribute coerces to "absent" and is not inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Coercion {
    /// Copy the value unchanged.
    Copy,
    /// String-to-string map; scalar values are formatted to text.
    Tags,
    /// Sequence of strings (scalars formatted).
    StringList,
    /// Single block-device map, possibly wrapped in a one-element sequence.
    BlockDevice { is_root: bool },
    /// Sequence of block-device maps; empty coerces to absent.
    BlockDeviceList,
    /// `[{enabled: bool}]`, a direct map, a bool, or a parseable string.
    Versioning,
    /// Nested single-occurrence block: unwrap a one-element sequence of maps.
    NestedBlock,
    /// Whole number as i64.
    Int,
    Bool,
}

pub(crate) fn apply(coercion: Coercion, key: &str, value: &AttrValue) -> Result<Option<AttrValue>> {
    match coercion {
        Coercion::Copy => Ok(Some(value.clone())),
        Coercion::Tags => coerce_tags(key, value).map(Some),
        Coercion::StringList => coerce_string_list(key, value).map(Some),
        Coercion::BlockDevice { is_root } => coerce_block_device(key, value, is_root),
        Coercion::BlockDeviceList => coerce_block_device_list(key, value),
        Coercion::Versioning => coerce_versioning(key, value).map(Some),
        Coercion::NestedBlock => coerce_nested_block(key, value),
        Coercion::Int => coerce_int(key, value).map(|i| Some(AttrValue::Int(i))),
        Coercion::Bool => coerce_bool(key, value).map(|b| Some(AttrValue::Bool(b))),
    }
}

fn mapping_error(key: &str, detail: impl Into<String>) -> Error {
    Error::new(ErrorCode::Mapping, format!("attribute '{key}': {}", detail.into()))
}

pub(crate) fn coerce_tags(key: &str, value: &AttrValue) -> Result<AttrValue> {
    let map = match value {
        AttrValue::Null => return Ok(AttrValue::Map(BTreeMap::new())),
        AttrValue::Map(m) => m,
        other => {
            return Err(mapping_error(key, format!("expected a map, got {other}")));
        }
    };
    let mut out = BTreeMap::new();
    for (tag_key, tag_value) in map {
        let text = tag_value
            .scalar_to_string()
            .ok_or_else(|| mapping_error(key, format!("non-scalar value for tag '{tag_key}'")))?;
        out.insert(tag_key.clone(), AttrValue::String(text));
    }
    Ok(AttrValue::Map(out))
}

fn coerce_string_list(key: &str, value: &AttrValue) -> Result<AttrValue> {
    let items = match value {
        AttrValue::List(l) => l.as_slice(),
        AttrValue::String(_) => std::slice::from_ref(value),
        other => {
            return Err(mapping_error(key, format!("expected a sequence of strings, got {other}")));
        }
    };
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let text = item
            .scalar_to_string()
            .ok_or_else(|| mapping_error(key, "non-scalar member in string sequence"))?;
        out.push(AttrValue::String(text));
    }
    Ok(AttrValue::List(out))
}

fn coerce_block_device(key: &str, value: &AttrValue, is_root: bool) -> Result<Option<AttrValue>> {
    let map = match value {
        AttrValue::Map(m) => m.clone(),
        AttrValue::List(l) if l.is_empty() => return Ok(None),
        AttrValue::List(l) if l.len() == 1 => match &l[0] {
            AttrValue::Map(m) => m.clone(),
            other => {
                return Err(mapping_error(key, format!("expected a block map, got {other}")));
            }
        },
        AttrValue::List(l) => {
            return Err(mapping_error(key, format!("expected a single block, got {} blocks", l.len())));
        }
        other => {
            return Err(mapping_error(key, format!("expected a block map, got {other}")));
        }
    };

    let mut out = BTreeMap::new();
    for (field, field_value) in map {
        let coerced = match field.as_str() {
            keys::VOLUME_SIZE | keys::IOPS | keys::THROUGHPUT => {
                AttrValue::Int(coerce_int(&format!("{key}.{field}"), &field_value)?)
            }
            keys::DELETE_ON_TERMINATION | keys::ENCRYPTED => {
                AttrValue::Bool(coerce_bool(&format!("{key}.{field}"), &field_value)?)
            }
            _ => field_value,
        };
        out.insert(field, coerced);
    }
    out.entry(keys::DELETE_ON_TERMINATION.to_string())
        .or_insert(AttrValue::Bool(is_root));
    Ok(Some(AttrValue::Map(out)))
}

fn coerce_block_device_list(key: &str, value: &AttrValue) -> Result<Option<AttrValue>> {
    let items = match value {
        AttrValue::List(l) if l.is_empty() => return Ok(None),
        AttrValue::List(l) => l.clone(),
        AttrValue::Map(_) => vec![value.clone()],
        other => {
            return Err(mapping_error(key, format!("expected a sequence of blocks, got {other}")));
        }
    };
    let mut out = Vec::with_capacity(items.len());
    for item in &items {
        match coerce_block_device(key, item, false)? {
            Some(block) => out.push(block),
            None => continue,
        }
    }
    if out.is_empty() {
        return Ok(None);
    }
    Ok(Some(AttrValue::List(out)))
}

fn coerce_versioning(key: &str, value: &AttrValue) -> Result<AttrValue> {
    let enabled = match value {
        AttrValue::Null => false,
        AttrValue::Bool(b) => *b,
        AttrValue::String(_) => coerce_bool(key, value)?,
        AttrValue::List(l) if l.is_empty() => false,
        AttrValue::List(l) if l.len() == 1 => versioning_block(key, &l[0])?,
        AttrValue::Map(_) => versioning_block(key, value)?,
        other => {
            return Err(mapping_error(key, format!("cannot read versioning from {other}")));
        }
    };
    Ok(AttrValue::Bool(enabled))
}

fn versioning_block(key: &str, value: &AttrValue) -> Result<bool> {
    let map = value
        .as_map()
        .ok_or_else(|| mapping_error(key, "versioning block is not a map"))?;
    match map.get("enabled") {
        None => Ok(false),
        Some(v) => coerce_bool(key, v),
    }
}

fn coerce_nested_block(key: &str, value: &AttrValue) -> Result<Option<AttrValue>> {
    match value {
        AttrValue::List(l) if l.is_empty() => Ok(None),
        AttrValue::List(l) if l.len() == 1 => match &l[0] {
            AttrValue::Map(_) => Ok(Some(l[0].clone())),
            other => Err(mapping_error(key, format!("expected a block map, got {other}"))),
        },
        AttrValue::List(_) | AttrValue::Map(_) => Ok(Some(value.clone())),
        AttrValue::Null => Ok(None),
        other => Err(mapping_error(key, format!("expected a nested block, got {other}"))),
    }
}

pub(crate) fn coerce_int(key: &str, value: &AttrValue) -> Result<i64> {
    if let Some(i) = value.as_i64() {
        return Ok(i);
    }
    if let Some(s) = value.as_str() {
        if let Ok(i) = s.parse::<i64>() {
            return Ok(i);
        }
    }
    Err(mapping_error(key, format!("cannot coerce {value} to an integer")))
}

pub(crate) fn coerce_bool(key: &str, value: &AttrValue) -> Result<bool> {
    match value {
        AttrValue::Bool(b) => Ok(*b),
        AttrValue::String(s) => match s.to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(mapping_error(key, format!("cannot coerce '{s}' to a boolean"))),
        },
        other => Err(mapping_error(key, format!("cannot coerce {other} to a boolean"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, AttrValue)]) -> AttrValue {
        AttrValue::Map(entries.iter().map(|(k, v)| (k.to_string(), v.clone())).collect())
    }

    #[test]
    fn tags_format_scalars() {
        let raw = map(&[
            ("Name", AttrValue::from("web")),
            ("Port", AttrValue::Int(8080)),
            ("Spot", AttrValue::Bool(true)),
        ]);
        let coerced = coerce_tags("tags", &raw).unwrap();
        let tags = coerced.as_map().unwrap();
        assert_eq!(tags["Port"], AttrValue::from("8080"));
        assert_eq!(tags["Spot"], AttrValue::from("true"));
    }

    #[test]
    fn tags_reject_nested_values() {
        let raw = map(&[("Meta", AttrValue::List(vec![]))]);
        let err = coerce_tags("tags", &raw).unwrap_err();
        assert_eq!(err.code, ErrorCode::Mapping);
    }

    #[test]
    fn null_tags_become_empty_map() {
        let coerced = coerce_tags("tags", &AttrValue::Null).unwrap();
        assert_eq!(coerced, AttrValue::Map(BTreeMap::new()));
    }

    #[test]
    fn root_block_device_defaults_delete_on_termination_true() {
        let raw = AttrValue::List(vec![map(&[("volume_size", AttrValue::Int(10))])]);
        let coerced = apply(Coercion::BlockDevice { is_root: true }, "root_block_device", &raw)
            .unwrap()
            .unwrap();
        let block = coerced.as_map().unwrap();
        assert_eq!(block["delete_on_termination"], AttrValue::Bool(true));
        assert_eq!(block["volume_size"], AttrValue::Int(10));
    }

    #[test]
    fn non_root_block_device_defaults_false() {
        let raw = map(&[("device_name", AttrValue::from("/dev/sdf"))]);
        let coerced = apply(Coercion::BlockDevice { is_root: false }, "ebs", &raw)
            .unwrap()
            .unwrap();
        assert_eq!(coerced.as_map().unwrap()["delete_on_termination"], AttrValue::Bool(false));
    }

    #[test]
    fn block_device_numeric_strings_become_ints() {
        let raw = map(&[("volume_size", AttrValue::from("100"))]);
        let coerced = apply(Coercion::BlockDevice { is_root: false }, "ebs", &raw)
            .unwrap()
            .unwrap();
        assert_eq!(coerced.as_map().unwrap()["volume_size"], AttrValue::Int(100));
    }

    #[test]
    fn empty_block_device_list_is_absent() {
        let coerced = apply(Coercion::BlockDeviceList, "ebs", &AttrValue::List(vec![])).unwrap();
        assert!(coerced.is_none());
    }

    #[test]
    fn versioning_unwraps_enabled_block() {
        let raw = AttrValue::List(vec![map(&[("enabled", AttrValue::Bool(true))])]);
        assert_eq!(coerce_versioning("versioning", &raw).unwrap(), AttrValue::Bool(true));
        assert_eq!(
            coerce_versioning("versioning", &AttrValue::List(vec![])).unwrap(),
            AttrValue::Bool(false)
        );
        assert_eq!(
            coerce_versioning("versioning", &AttrValue::from("true")).unwrap(),
            AttrValue::Bool(true)
        );
    }

    #[test]
    fn nested_block_unwraps_singleton() {
        let raw = AttrValue::List(vec![map(&[("index_document", AttrValue::from("index.html"))])]);
        let coerced = coerce_nested_block("website", &raw).unwrap().unwrap();
        assert!(coerced.as_map().unwrap().contains_key("index_document"));
    }
}
