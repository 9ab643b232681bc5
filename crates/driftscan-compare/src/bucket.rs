use std::collections::BTreeSet;

use driftscan_domain::{keys, AttrValue, Error, ErrorCode, ResourceKind, Result};

use crate::comparer::KindComparer;
use crate::helpers::{block_map_compare, json_string_compare, tags_compare, CompareCtx, Outcome};

/// Comparer for storage buckets. ACL, lifecycle, CORS, policy and encryption
/// each need their own comparison semantics; versioning and the remaining
/// scalars use the default comparator. Lifecycle rules diff per rule id
/// through the run's task group after singleton flattening.
pub fn storage_bucket_comparer(ignored_tag_prefix: &str) -> KindComparer {
    KindComparer::new(ResourceKind::StorageBucket, ignored_tag_prefix)
        .with(keys::TAGS, tags_compare)
        .with(keys::ACL, acl_compare)
        .with(keys::POLICY, json_string_compare)
        .with_keyed(keys::LIFECYCLE_RULES, "id", "lifecycle rule", Some(normalize_rules))
        .with(keys::CORS_RULES, cors_rules_compare)
        .with(keys::SERVER_SIDE_ENCRYPTION_CONFIGURATION, sse_compare)
        .with(keys::WEBSITE, block_map_compare)
        .with(keys::LOGGING, block_map_compare)
}

// ── ACL ──────────────────────────────────────────────────────────────────────

/// ACLs appear either as a canned name (`private`) or as explicit grants.
/// Grants compare as an unordered set of grantee/permission combinations.
fn acl_compare(
    _ctx: &CompareCtx,
    desired: Option<&AttrValue>,
    actual: Option<&AttrValue>,
) -> Result<Outcome> {
    let desired_set = grant_set(desired)?;
    let actual_set = grant_set(actual)?;
    if desired_set == actual_set {
        return Ok(Outcome::equal());
    }
    let missing: Vec<&str> = desired_set.difference(&actual_set).map(String::as_str).collect();
    let extra: Vec<&str> = actual_set.difference(&desired_set).map(String::as_str).collect();
    let mut parts = Vec::new();
    if !missing.is_empty() {
        parts.push(format!("missing grants: [{}]", missing.join(", ")));
    }
    if !extra.is_empty() {
        parts.push(format!("extra grants: [{}]", extra.join(", ")));
    }
    Ok(Outcome::differs_with(parts.join(", ")))
}

fn grant_set(value: Option<&AttrValue>) -> Result<BTreeSet<String>> {
    let mut out = BTreeSet::new();
    let Some(value) = value else {
        return Ok(out);
    };
    match value {
        AttrValue::Null => {}
        AttrValue::String(canned) => {
            out.insert(format!("canned:{canned}"));
        }
        AttrValue::List(grants) => {
            for grant in grants {
                let map = grant.as_map().ok_or_else(|| {
                    Error::new(ErrorCode::Comparison, "acl: grant is not a map")
                })?;
                let grantees = match map.get("grantee") {
                    None => vec!["owner".to_string()],
                    Some(AttrValue::List(list)) => {
                        list.iter().map(|g| g.to_string()).collect()
                    }
                    Some(single) => vec![single.to_string()],
                };
                let permissions = match (map.get("permission"), map.get("permissions")) {
                    (Some(p), _) => vec![p.to_string()],
                    (None, Some(AttrValue::List(list))) => {
                        list.iter().map(|p| p.to_string()).collect()
                    }
                    (None, Some(single)) => vec![single.to_string()],
                    (None, None) => {
                        return Err(Error::new(
                            ErrorCode::Comparison,
                            "acl: grant without a permission",
                        ));
                    }
                };
                for grantee in &grantees {
                    for permission in &permissions {
                        out.insert(format!("{grantee}#{permission}"));
                    }
                }
            }
        }
        other => {
            return Err(Error::new(
                ErrorCode::Comparison,
                format!("acl: expected a canned name or grant list, got {other}"),
            ));
        }
    }
    Ok(out)
}

// ── Lifecycle rules ──────────────────────────────────────────────────────────

/// Flatten optional singleton sequences recursively: the two state schemas
/// wrap sub-blocks like `expiration` either as a map or a one-element list.
fn flatten_singletons(value: &AttrValue) -> AttrValue {
    match value {
        AttrValue::List(items) if items.len() == 1 && items[0].as_map().is_some() => {
            flatten_singletons(&items[0])
        }
        AttrValue::List(items) => {
            AttrValue::List(items.iter().map(flatten_singletons).collect())
        }
        AttrValue::Map(entries) => AttrValue::Map(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), flatten_singletons(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn normalize_rules(value: Option<&AttrValue>) -> Option<AttrValue> {
    let rules = value?.as_list()?;
    Some(AttrValue::List(
        rules
            .iter()
            .map(|rule| match rule {
                AttrValue::Map(entries) => AttrValue::Map(
                    entries
                        .iter()
                        .filter(|(_, v)| !v.is_empty_like())
                        .map(|(k, v)| (k.clone(), flatten_singletons(v)))
                        .collect(),
                ),
                other => other.clone(),
            })
            .collect(),
    ))
}

// ── CORS rules ───────────────────────────────────────────────────────────────

/// CORS rules have no identity key; each rule canonicalizes (multi-valued
/// members sorted, empty members dropped) to a JSON string and the rule
/// sets compare unordered.
fn cors_rules_compare(
    ctx: &CompareCtx,
    desired: Option<&AttrValue>,
    actual: Option<&AttrValue>,
) -> Result<Outcome> {
    ctx.check_cancelled()?;
    let desired_set = cors_set(desired)?;
    let actual_set = cors_set(actual)?;
    if desired_set == actual_set {
        return Ok(Outcome::equal());
    }
    let missing = desired_set.difference(&actual_set).count();
    let extra = actual_set.difference(&desired_set).count();
    Ok(Outcome::differs_with(format!(
        "{missing} rule(s) missing, {extra} rule(s) unexpected"
    )))
}

fn cors_set(value: Option<&AttrValue>) -> Result<BTreeSet<String>> {
    let Some(value) = value else {
        return Ok(BTreeSet::new());
    };
    let rules = match value {
        AttrValue::Null => return Ok(BTreeSet::new()),
        AttrValue::List(rules) => rules,
        other => {
            return Err(Error::new(
                ErrorCode::Comparison,
                format!("cors_rules: expected a sequence, got {other}"),
            ));
        }
    };
    let mut out = BTreeSet::new();
    for rule in rules {
        let map = rule
            .as_map()
            .ok_or_else(|| Error::new(ErrorCode::Comparison, "cors_rules: rule is not a map"))?;
        let mut canonical = std::collections::BTreeMap::new();
        for (field, field_value) in map {
            if field_value.is_empty_like() {
                continue;
            }
            let canonical_value = match field_value {
                AttrValue::List(members) => {
                    let mut members: Vec<AttrValue> = members.clone();
                    members.sort_by_key(|m| m.to_string());
                    AttrValue::List(members)
                }
                other => other.clone(),
            };
            canonical.insert(field.clone(), canonical_value);
        }
        out.insert(AttrValue::Map(canonical).to_string());
    }
    Ok(out)
}

// ── Server-side encryption ───────────────────────────────────────────────────

/// Unwrap `[{rule: [{...}]}]` down to the rule map and diff it in detail.
fn sse_compare(
    ctx: &CompareCtx,
    desired: Option<&AttrValue>,
    actual: Option<&AttrValue>,
) -> Result<Outcome> {
    let desired_rule = unwrap_sse(desired);
    let actual_rule = unwrap_sse(actual);
    block_map_compare(ctx, desired_rule.as_ref(), actual_rule.as_ref())
}

fn unwrap_sse(value: Option<&AttrValue>) -> Option<AttrValue> {
    let mut current = flatten_singletons(value?);
    if let Some(map) = current.as_map() {
        if let Some(rule) = map.get("rule") {
            current = flatten_singletons(rule);
        }
    }
    Some(current)
}
