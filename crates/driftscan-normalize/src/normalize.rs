use std::collections::BTreeMap;

use driftscan_domain::{keys, AttrMap, AttrValue, Error, ResourceKind, Result};
use tracing::warn;

use crate::coerce;
use crate::mapping::rules;

/// Normalize a raw attribute map into the canonical shape for `kind`.
///
/// Every rule whose source key is present is attempted; a coercion failure
/// is logged, the attribute is left out, and the first such error is
/// returned once all rules have run. Absent source keys are skipped with no
/// default inserted, except `tags`, which always materializes as a (possibly
/// empty) string map.
pub fn normalize(kind: ResourceKind, raw: &AttrMap) -> Result<AttrMap> {
    let mut out = AttrMap::new();
    let mut first_error: Option<Error> = None;

    for rule in rules(kind) {
        let Some(value) = raw.get(rule.source) else {
            continue;
        };
        if out.contains_key(rule.target) {
            continue;
        }
        match coerce::apply(rule.coercion, rule.target, value) {
            Ok(Some(coerced)) => {
                out.insert(rule.target.to_string(), coerced);
            }
            Ok(None) => {}
            Err(err) => {
                warn!(
                    kind = %kind,
                    attribute = rule.target,
                    error = %err,
                    "attribute coercion failed"
                );
                first_error.get_or_insert(err);
            }
        }
    }

    if keys::registered(kind).contains(&keys::TAGS) && !out.contains_key(keys::TAGS) {
        out.insert(keys::TAGS.to_string(), AttrValue::Map(BTreeMap::new()));
    }

    if !out.contains_key(keys::NAME) {
        if let Some(name) = name_from_tags(&out) {
            out.insert(keys::NAME.to_string(), AttrValue::String(name));
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(out),
    }
}

fn name_from_tags(attrs: &AttrMap) -> Option<String> {
    attrs
        .get(keys::TAGS)?
        .as_map()?
        .get("Name")?
        .as_str()
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(entries: &[(&str, AttrValue)]) -> AttrMap {
        entries.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn tag_map(entries: &[(&str, &str)]) -> AttrValue {
        AttrValue::Map(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), AttrValue::from(*v)))
                .collect(),
        )
    }

    #[test]
    fn compute_schema_keys_rename() {
        let attrs = normalize(
            ResourceKind::ComputeInstance,
            &raw(&[
                ("instance_type", AttrValue::from("t2.micro")),
                ("ami", AttrValue::from("ami-123")),
                ("vpc_security_group_ids", AttrValue::List(vec![AttrValue::from("sg-1")])),
            ]),
        )
        .unwrap();
        assert_eq!(attrs["instance_type"], AttrValue::from("t2.micro"));
        assert_eq!(attrs["image_id"], AttrValue::from("ami-123"));
        assert!(attrs.contains_key("security_groups"));
        assert!(!attrs.contains_key("ami"));
    }

    #[test]
    fn missing_tags_become_empty_map() {
        let attrs = normalize(ResourceKind::ComputeInstance, &raw(&[])).unwrap();
        assert_eq!(attrs["tags"], AttrValue::Map(Default::default()));
    }

    #[test]
    fn name_inferred_from_name_tag() {
        let attrs = normalize(
            ResourceKind::ComputeInstance,
            &raw(&[("tags", tag_map(&[("Name", "web-server")]))]),
        )
        .unwrap();
        assert_eq!(attrs["name"], AttrValue::from("web-server"));
    }

    #[test]
    fn explicit_name_wins_over_tag() {
        let attrs = normalize(
            ResourceKind::StorageBucket,
            &raw(&[
                ("name", AttrValue::from("real-name")),
                ("tags", tag_map(&[("Name", "tag-name")])),
            ]),
        )
        .unwrap();
        assert_eq!(attrs["name"], AttrValue::from("real-name"));
    }

    #[test]
    fn failed_attribute_left_out_and_error_returned_after_all() {
        let input = raw(&[
            ("tags", AttrValue::from("not-a-map")),
            ("instance_type", AttrValue::from("t2.micro")),
        ]);
        let err = normalize(ResourceKind::ComputeInstance, &input).unwrap_err();
        assert_eq!(err.code, driftscan_domain::ErrorCode::Mapping);
    }

    #[test]
    fn normalization_is_idempotent() {
        let input = raw(&[
            ("instance_type", AttrValue::from("t2.micro")),
            ("ami", AttrValue::from("ami-123")),
            ("tags", tag_map(&[("Name", "web"), ("Env", "prod")])),
            (
                "root_block_device",
                AttrValue::List(vec![AttrValue::Map(
                    [("volume_size".to_string(), AttrValue::Int(10))].into_iter().collect(),
                )]),
            ),
        ]);
        let once = normalize(ResourceKind::ComputeInstance, &input).unwrap();
        let twice = normalize(ResourceKind::ComputeInstance, &once).unwrap();
        assert_eq!(once, twice);

        let root = twice["root_block_device"].as_map().unwrap();
        assert_eq!(root["delete_on_termination"], AttrValue::Bool(true));
    }

    #[test]
    fn normalized_keys_are_registered_for_kind() {
        let input = raw(&[
            ("instance_type", AttrValue::from("t2.micro")),
            ("ami", AttrValue::from("ami-1")),
            ("tags", tag_map(&[("Name", "web")])),
            ("subnet_id", AttrValue::from("subnet-1")),
        ]);
        let attrs = normalize(ResourceKind::ComputeInstance, &input).unwrap();
        for key in attrs.keys() {
            assert!(
                keys::is_registered(ResourceKind::ComputeInstance, key),
                "unexpected key {key}"
            );
        }
    }

    #[test]
    fn versioning_alias_and_canonical_agree() {
        let from_state = normalize(
            ResourceKind::StorageBucket,
            &raw(&[(
                "versioning",
                AttrValue::List(vec![AttrValue::Map(
                    [("enabled".to_string(), AttrValue::Bool(true))].into_iter().collect(),
                )]),
            )]),
        )
        .unwrap();
        let canonical =
            normalize(ResourceKind::StorageBucket, &raw(&[("versioning_enabled", AttrValue::Bool(true))]))
                .unwrap();
        assert_eq!(from_state["versioning_enabled"], canonical["versioning_enabled"]);
    }
}
