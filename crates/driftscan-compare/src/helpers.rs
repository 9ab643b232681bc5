use std::collections::{BTreeMap, BTreeSet};

use driftscan_domain::{AttrValue, Error, ErrorCode, Result, TaskGroup};

/// Shared context handed to every comparison function. The group carries
/// the run's cancellation and bounds any fan-out a helper performs.
pub(crate) struct CompareCtx<'a> {
    pub group: &'a TaskGroup,
    pub ignored_tag_prefix: &'a str,
}

impl CompareCtx<'_> {
    pub fn check_cancelled(&self) -> Result<()> {
        if self.group.is_cancelled() {
            return Err(Error::cancelled());
        }
        Ok(())
    }
}

/// Result of one attribute comparison.
pub(crate) struct Outcome {
    pub equal: bool,
    pub details: Option<String>,
}

impl Outcome {
    pub fn equal() -> Self {
        Self { equal: true, details: None }
    }

    pub fn differs() -> Self {
        Self { equal: false, details: None }
    }

    pub fn differs_with(details: impl Into<String>) -> Self {
        Self { equal: false, details: Some(details.into()) }
    }
}

pub(crate) type CompareFn =
    fn(&CompareCtx, Option<&AttrValue>, Option<&AttrValue>) -> Result<Outcome>;

fn comparison_error(detail: impl Into<String>) -> Error {
    Error::new(ErrorCode::Comparison, detail)
}

// ── Robust default comparison ────────────────────────────────────────────────

/// Generic comparator: absent, null and empty collections are all "nothing",
/// numbers compare across int/float, everything else compares structurally.
pub(crate) fn default_compare(
    _ctx: &CompareCtx,
    desired: Option<&AttrValue>,
    actual: Option<&AttrValue>,
) -> Result<Outcome> {
    let equal = match (desired, actual) {
        (None, None) => true,
        (Some(value), None) | (None, Some(value)) => value.is_empty_like(),
        (Some(desired), Some(actual)) => robust_eq(desired, actual),
    };
    Ok(if equal { Outcome::equal() } else { Outcome::differs() })
}

pub(crate) fn robust_eq(a: &AttrValue, b: &AttrValue) -> bool {
    match (a, b) {
        (AttrValue::Int(_) | AttrValue::Float(_), AttrValue::Int(_) | AttrValue::Float(_)) => {
            a.as_f64() == b.as_f64()
        }
        (AttrValue::List(left), AttrValue::List(right)) => {
            left.len() == right.len()
                && left.iter().zip(right.iter()).all(|(l, r)| robust_eq(l, r))
        }
        (AttrValue::Map(left), AttrValue::Map(right)) => {
            left.len() == right.len()
                && left.iter().all(|(key, l)| right.get(key).is_some_and(|r| robust_eq(l, r)))
        }
        _ => {
            if a.is_empty_like() && b.is_empty_like() {
                return true;
            }
            a == b
        }
    }
}

// ── Tags ─────────────────────────────────────────────────────────────────────

fn string_map(
    value: Option<&AttrValue>,
    what: &str,
) -> Result<BTreeMap<String, String>> {
    let Some(value) = value else {
        return Ok(BTreeMap::new());
    };
    match value {
        AttrValue::Null => Ok(BTreeMap::new()),
        AttrValue::Map(entries) => entries
            .iter()
            .map(|(key, v)| {
                v.scalar_to_string()
                    .map(|text| (key.clone(), text))
                    .ok_or_else(|| comparison_error(format!("{what}: non-scalar value for '{key}'")))
            })
            .collect(),
        other => Err(comparison_error(format!("{what}: expected a map, got {other}"))),
    }
}

/// Compare tag maps, ignoring keys under the configured prefix on both sides.
pub(crate) fn tags_compare(
    ctx: &CompareCtx,
    desired: Option<&AttrValue>,
    actual: Option<&AttrValue>,
) -> Result<Outcome> {
    let filter = |mut tags: BTreeMap<String, String>| {
        if !ctx.ignored_tag_prefix.is_empty() {
            tags.retain(|key, _| !key.starts_with(ctx.ignored_tag_prefix));
        }
        tags
    };
    let desired_tags = filter(string_map(desired, "tags")?);
    let actual_tags = filter(string_map(actual, "tags")?);
    if desired_tags == actual_tags {
        return Ok(Outcome::equal());
    }

    let mut parts = Vec::new();
    for (key, expected) in &desired_tags {
        match actual_tags.get(key) {
            None => parts.push(format!("tag '{key}' missing")),
            Some(got) if got != expected => {
                parts.push(format!("tag '{key}' expected '{expected}', got '{got}'"));
            }
            Some(_) => {}
        }
    }
    for key in actual_tags.keys() {
        if !desired_tags.contains_key(key) {
            parts.push(format!("unexpected tag '{key}'"));
        }
    }
    Ok(Outcome::differs_with(parts.join("; ")))
}

// ── Unordered string sets ────────────────────────────────────────────────────

fn string_set(value: Option<&AttrValue>, what: &str) -> Result<BTreeSet<String>> {
    let Some(value) = value else {
        return Ok(BTreeSet::new());
    };
    match value {
        AttrValue::Null => Ok(BTreeSet::new()),
        AttrValue::List(items) => items
            .iter()
            .map(|item| {
                item.scalar_to_string()
                    .ok_or_else(|| comparison_error(format!("{what}: non-scalar member")))
            })
            .collect(),
        AttrValue::String(s) => Ok(BTreeSet::from([s.clone()])),
        other => Err(comparison_error(format!("{what}: expected a sequence, got {other}"))),
    }
}

/// Order-insensitive string sequence comparison (security groups and such).
pub(crate) fn unordered_strings_compare(
    _ctx: &CompareCtx,
    desired: Option<&AttrValue>,
    actual: Option<&AttrValue>,
) -> Result<Outcome> {
    let desired_set = string_set(desired, "string set")?;
    let actual_set = string_set(actual, "string set")?;
    if desired_set == actual_set {
        return Ok(Outcome::equal());
    }
    let missing: Vec<&str> = desired_set.difference(&actual_set).map(String::as_str).collect();
    let extra: Vec<&str> = actual_set.difference(&desired_set).map(String::as_str).collect();
    let mut parts = Vec::new();
    if !missing.is_empty() {
        parts.push(format!("missing: [{}]", missing.join(", ")));
    }
    if !extra.is_empty() {
        parts.push(format!("extra: [{}]", extra.join(", ")));
    }
    Ok(Outcome::differs_with(parts.join(", ")))
}

// ── JSON string equality ─────────────────────────────────────────────────────

/// Parse both sides as JSON and compare the parsed structures, so key order
/// and whitespace do not register as drift. Falls back to text comparison
/// when either side is not valid JSON.
pub(crate) fn json_string_compare(
    ctx: &CompareCtx,
    desired: Option<&AttrValue>,
    actual: Option<&AttrValue>,
) -> Result<Outcome> {
    let (Some(desired_text), Some(actual_text)) =
        (desired.and_then(|v| v.as_str()), actual.and_then(|v| v.as_str()))
    else {
        return default_compare(ctx, desired, actual);
    };

    let parsed = (
        serde_json::from_str::<serde_json::Value>(desired_text),
        serde_json::from_str::<serde_json::Value>(actual_text),
    );
    let equal = match parsed {
        (Ok(desired_json), Ok(actual_json)) => desired_json == actual_json,
        _ => desired_text == actual_text,
    };
    Ok(if equal { Outcome::equal() } else { Outcome::differs() })
}

// ── Map diffing ──────────────────────────────────────────────────────────────

/// Recursive structural diff with dotted paths, e.g.
/// `volume_size: expected 10, got 20`.
pub(crate) fn describe_map_diff(
    desired: &BTreeMap<String, AttrValue>,
    actual: &BTreeMap<String, AttrValue>,
    path: &str,
    out: &mut Vec<String>,
) {
    let dotted = |key: &str| {
        if path.is_empty() {
            key.to_string()
        } else {
            format!("{path}.{key}")
        }
    };
    for (key, expected) in desired {
        match actual.get(key) {
            None => {
                if !expected.is_empty_like() {
                    out.push(format!("{}: expected {expected}, actually absent", dotted(key)));
                }
            }
            Some(got) => match (expected, got) {
                (AttrValue::Map(left), AttrValue::Map(right)) => {
                    describe_map_diff(left, right, &dotted(key), out);
                }
                _ if robust_eq(expected, got) => {}
                _ => out.push(format!("{}: expected {expected}, got {got}", dotted(key))),
            },
        }
    }
    for (key, got) in actual {
        if !desired.contains_key(key) && !got.is_empty_like() {
            out.push(format!("{}: unexpected value {got}", dotted(key)));
        }
    }
}

fn as_block_map<'v>(
    value: Option<&'v AttrValue>,
    what: &str,
) -> Result<Option<&'v BTreeMap<String, AttrValue>>> {
    match value {
        None | Some(AttrValue::Null) => Ok(None),
        Some(AttrValue::Map(map)) => Ok(Some(map)),
        Some(AttrValue::List(items)) if items.is_empty() => Ok(None),
        Some(AttrValue::List(items)) if items.len() == 1 => match &items[0] {
            AttrValue::Map(map) => Ok(Some(map)),
            other => Err(comparison_error(format!("{what}: expected a block map, got {other}"))),
        },
        Some(other) => Err(comparison_error(format!("{what}: expected a block map, got {other}"))),
    }
}

/// Detailed comparison of single nested blocks (root block device,
/// encryption rules).
pub(crate) fn block_map_compare(
    ctx: &CompareCtx,
    desired: Option<&AttrValue>,
    actual: Option<&AttrValue>,
) -> Result<Outcome> {
    ctx.check_cancelled()?;
    let empty = BTreeMap::new();
    let desired_map = as_block_map(desired, "block")?.unwrap_or(&empty);
    let actual_map = as_block_map(actual, "block")?.unwrap_or(&empty);

    let mut differences = Vec::new();
    describe_map_diff(desired_map, actual_map, "", &mut differences);
    if differences.is_empty() {
        Ok(Outcome::equal())
    } else {
        Ok(Outcome::differs_with(differences.join("; ")))
    }
}

// ── Keyed unordered sequences of maps ────────────────────────────────────────

fn index_by_key<'v>(
    value: Option<&'v AttrValue>,
    key_field: &str,
    what: &str,
) -> Result<BTreeMap<String, &'v BTreeMap<String, AttrValue>>> {
    let Some(value) = value else {
        return Ok(BTreeMap::new());
    };
    let items = match value {
        AttrValue::Null => return Ok(BTreeMap::new()),
        AttrValue::List(items) => items.as_slice(),
        other => {
            return Err(comparison_error(format!("{what}: expected a sequence, got {other}")));
        }
    };
    let mut indexed = BTreeMap::new();
    for (position, item) in items.iter().enumerate() {
        let map = item
            .as_map()
            .ok_or_else(|| comparison_error(format!("{what}: element {position} is not a map")))?;
        let key = map
            .get(key_field)
            .and_then(|k| k.scalar_to_string())
            .ok_or_else(|| {
                comparison_error(format!("{what}: element {position} lacks key field '{key_field}'"))
            })?;
        indexed.insert(key, map);
    }
    Ok(indexed)
}

/// Order-insensitive comparison of a sequence of maps identified by
/// `key_field`. Elements present on both sides are diffed concurrently,
/// one task per key, spawned through the run's task group so the fan-out
/// stays within the engine's concurrency bound.
pub(crate) async fn keyed_unordered_compare(
    ctx: &CompareCtx<'_>,
    desired: Option<&AttrValue>,
    actual: Option<&AttrValue>,
    key_field: &str,
    what: &str,
) -> Result<Outcome> {
    let desired_index = index_by_key(desired, key_field, what)?;
    let actual_index = index_by_key(actual, key_field, what)?;

    let mut parts = Vec::new();
    for key in desired_index.keys() {
        if !actual_index.contains_key(key) {
            parts.push(format!("{what} '{key}' missing"));
        }
    }
    for key in actual_index.keys() {
        if !desired_index.contains_key(key) {
            parts.push(format!("unexpected {what} '{key}'"));
        }
    }

    let mut handles = Vec::new();
    for (key, desired_map) in &desired_index {
        let Some(actual_map) = actual_index.get(key) else {
            continue;
        };
        let key = key.clone();
        let desired_map = (*desired_map).clone();
        let actual_map = (*actual_map).clone();
        let handle = ctx
            .group
            .spawn(async move {
                let mut differences = Vec::new();
                describe_map_diff(&desired_map, &actual_map, "", &mut differences);
                (key, differences)
            })
            .await?;
        handles.push(handle);
    }
    for handle in handles {
        let (key, differences) = handle
            .await
            .map_err(|e| Error::wrap(ErrorCode::Internal, "per-key diff task failed", e))?;
        if !differences.is_empty() {
            parts.push(format!("{what} '{key}': {}", differences.join("; ")));
        }
    }

    if parts.is_empty() {
        Ok(Outcome::equal())
    } else {
        Ok(Outcome::differs_with(parts.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn group() -> TaskGroup {
        TaskGroup::new(CancellationToken::new(), 2)
    }

    fn ctx(group: &TaskGroup) -> CompareCtx<'_> {
        CompareCtx { group, ignored_tag_prefix: "aws:" }
    }

    fn map(entries: &[(&str, AttrValue)]) -> AttrValue {
        AttrValue::Map(entries.iter().map(|(k, v)| (k.to_string(), v.clone())).collect())
    }

    fn strings(items: &[&str]) -> AttrValue {
        AttrValue::List(items.iter().map(|s| AttrValue::from(*s)).collect())
    }

    #[test]
    fn default_compare_tolerates_numeric_types_and_absence() {
        let group = group();
        let c = ctx(&group);
        assert!(default_compare(&c, Some(&AttrValue::Int(1)), Some(&AttrValue::Float(1.0))).unwrap().equal);
        assert!(default_compare(&c, None, Some(&AttrValue::Null)).unwrap().equal);
        assert!(default_compare(&c, None, Some(&strings(&[]))).unwrap().equal);
        assert!(!default_compare(&c, Some(&AttrValue::from("a")), None).unwrap().equal);
        assert!(!default_compare(&c, Some(&AttrValue::Int(1)), Some(&AttrValue::Int(2))).unwrap().equal);
    }

    #[test]
    fn tags_ignore_reserved_prefix() {
        let group = group();
        let c = ctx(&group);
        let desired = map(&[("Name", AttrValue::from("web"))]);
        let actual = map(&[
            ("Name", AttrValue::from("web")),
            ("aws:autoscaling:group", AttrValue::from("asg-1")),
        ]);
        assert!(tags_compare(&c, Some(&desired), Some(&actual)).unwrap().equal);
    }

    #[test]
    fn tags_report_changed_missing_and_extra() {
        let group = group();
        let c = ctx(&group);
        let desired = map(&[("Name", AttrValue::from("web")), ("Env", AttrValue::from("prod"))]);
        let actual = map(&[("Name", AttrValue::from("app")), ("Team", AttrValue::from("core"))]);
        let outcome = tags_compare(&c, Some(&desired), Some(&actual)).unwrap();
        assert!(!outcome.equal);
        let details = outcome.details.unwrap();
        assert!(details.contains("tag 'Name' expected 'web', got 'app'"));
        assert!(details.contains("tag 'Env' missing"));
        assert!(details.contains("unexpected tag 'Team'"));
    }

    #[test]
    fn unordered_strings_ignore_order() {
        let group = group();
        let c = ctx(&group);
        let outcome = unordered_strings_compare(
            &c,
            Some(&strings(&["sg-1", "sg-2"])),
            Some(&strings(&["sg-2", "sg-1"])),
        )
        .unwrap();
        assert!(outcome.equal);

        let outcome = unordered_strings_compare(
            &c,
            Some(&strings(&["sg-1"])),
            Some(&strings(&["sg-2"])),
        )
        .unwrap();
        assert!(!outcome.equal);
        let details = outcome.details.unwrap();
        assert!(details.contains("missing: [sg-1]"));
        assert!(details.contains("extra: [sg-2]"));
    }

    #[test]
    fn json_strings_compare_semantically() {
        let group = group();
        let c = ctx(&group);
        let desired = AttrValue::from(r#"{"Version":"2012-10-17","Statement":[{"Effect":"Allow"}]}"#);
        let actual = AttrValue::from(r#"{ "Statement": [ {"Effect": "Allow"} ], "Version": "2012-10-17" }"#);
        assert!(json_string_compare(&c, Some(&desired), Some(&actual)).unwrap().equal);

        let broken = AttrValue::from("not json");
        assert!(!json_string_compare(&c, Some(&desired), Some(&broken)).unwrap().equal);
        assert!(json_string_compare(&c, Some(&broken), Some(&broken)).unwrap().equal);
    }

    #[test]
    fn block_map_diff_uses_dotted_paths() {
        let group = group();
        let c = ctx(&group);
        let desired = map(&[(
            "apply_server_side_encryption_by_default",
            map(&[("sse_algorithm", AttrValue::from("aws:kms"))]),
        )]);
        let actual = map(&[(
            "apply_server_side_encryption_by_default",
            map(&[("sse_algorithm", AttrValue::from("AES256"))]),
        )]);
        let outcome = block_map_compare(&c, Some(&desired), Some(&actual)).unwrap();
        assert!(!outcome.equal);
        assert!(outcome
            .details
            .unwrap()
            .contains("apply_server_side_encryption_by_default.sse_algorithm"));
    }

    #[tokio::test]
    async fn keyed_unordered_matches_by_key_field() {
        let group = group();
        let c = ctx(&group);
        let desired = AttrValue::List(vec![
            map(&[("device_name", AttrValue::from("/dev/sdf")), ("volume_size", AttrValue::Int(100))]),
            map(&[("device_name", AttrValue::from("/dev/sdg")), ("volume_size", AttrValue::Int(200))]),
        ]);
        let actual = AttrValue::List(vec![
            map(&[("device_name", AttrValue::from("/dev/sdg")), ("volume_size", AttrValue::Int(200))]),
            map(&[("device_name", AttrValue::from("/dev/sdf")), ("volume_size", AttrValue::Int(100))]),
        ]);
        let outcome =
            keyed_unordered_compare(&c, Some(&desired), Some(&actual), "device_name", "device")
                .await
                .unwrap();
        assert!(outcome.equal);

        let actual_changed = AttrValue::List(vec![
            map(&[("device_name", AttrValue::from("/dev/sdf")), ("volume_size", AttrValue::Int(999))]),
        ]);
        let outcome =
            keyed_unordered_compare(&c, Some(&desired), Some(&actual_changed), "device_name", "device")
                .await
                .unwrap();
        assert!(!outcome.equal);
        let details = outcome.details.unwrap();
        assert!(details.contains("'/dev/sdf': volume_size: expected 100, got 999"));
        assert!(details.contains("device '/dev/sdg' missing"));
    }

    #[test]
    fn identical_normalized_maps_never_diff() {
        let group = group();
        let c = ctx(&group);
        let value = map(&[
            ("volume_size", AttrValue::Int(10)),
            ("delete_on_termination", AttrValue::Bool(true)),
        ]);
        assert!(block_map_compare(&c, Some(&value), Some(&value)).unwrap().equal);
        assert!(default_compare(&c, Some(&value), Some(&value)).unwrap().equal);
    }
}
