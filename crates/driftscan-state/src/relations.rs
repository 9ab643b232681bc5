use std::collections::BTreeMap;

use driftscan_domain::ResourceKind;
use serde_json::{Map, Value};
use tracing::debug;

use crate::parser::ParsedState;
use crate::schema::{RawInstance, RawResource};

/// Per-kind related-resource lookup. Returns the companion state blocks that
/// belong to `primary`, grouped by their trimmed subtype (`versioning`,
/// `policy`, ...). Kinds without split-out companions return `None` from
/// [`relations_for`], keeping the parser agnostic of the heuristic.
pub(crate) type RelationFn =
    for<'a> fn(&'a ParsedState, &RawResource, &RawInstance) -> BTreeMap<String, Vec<&'a RawInstance>>;

pub(crate) fn relations_for(kind: ResourceKind) -> Option<RelationFn> {
    match kind {
        ResourceKind::StorageBucket => Some(bucket_relations),
        _ => None,
    }
}

/// S3 buckets were split into one resource per configuration aspect
/// (`aws_s3_bucket_versioning`, `aws_s3_bucket_policy`, ...). A block is
/// related when its type carries the bucket prefix and its `bucket`
/// attribute points at the primary's name or id.
fn bucket_relations<'a>(
    state: &'a ParsedState,
    primary: &RawResource,
    primary_instance: &RawInstance,
) -> BTreeMap<String, Vec<&'a RawInstance>> {
    const PREFIX: &str = "aws_s3_bucket_";

    let bucket_names: Vec<&str> = ["id", "bucket"]
        .iter()
        .filter_map(|key| primary_instance.attributes.get(*key))
        .filter_map(Value::as_str)
        .collect();
    if bucket_names.is_empty() {
        return BTreeMap::new();
    }

    let mut related: BTreeMap<String, Vec<&RawInstance>> = BTreeMap::new();
    for resource in &state.raw.resources {
        if !resource.is_managed() || !resource.resource_type.starts_with(PREFIX) {
            continue;
        }
        let relation = resource.resource_type.trim_start_matches(PREFIX).to_string();
        for instance in &resource.instances {
            let points_at_primary = instance
                .attributes
                .get("bucket")
                .and_then(Value::as_str)
                .is_some_and(|b| bucket_names.contains(&b));
            if points_at_primary {
                debug!(
                    bucket = bucket_names[0],
                    relation = %relation,
                    "resolved related bucket resource"
                );
                related.entry(relation.clone()).or_default().push(instance);
            }
        }
    }
    related
}

/// Fold one related block's attributes into the primary raw attribute map.
/// The related representation wins over any legacy inline attribute of the
/// primary block.
pub(crate) fn merge_bucket_relation(
    attrs: &mut Map<String, Value>,
    relation: &str,
    related: &RawInstance,
) {
    match relation {
        "versioning" => {
            let enabled = related
                .attributes
                .get("versioning_configuration")
                .and_then(first_element)
                .and_then(|cfg| cfg.get("status"))
                .and_then(Value::as_str)
                .is_some_and(|status| status == "Enabled");
            attrs.insert("versioning_enabled".to_string(), Value::Bool(enabled));
            attrs.remove("versioning");
        }
        "policy" => {
            if let Some(policy) = related.attributes.get("policy") {
                attrs.insert("policy".to_string(), policy.clone());
            }
        }
        "lifecycle_configuration" => {
            if let Some(rules) = related.attributes.get("rule") {
                attrs.insert("lifecycle_rule".to_string(), rules.clone());
            }
        }
        "cors_configuration" => {
            if let Some(rules) = related.attributes.get("cors_rule") {
                attrs.insert("cors_rule".to_string(), rules.clone());
            }
        }
        "server_side_encryption_configuration" => {
            if let Some(rules) = related.attributes.get("rule") {
                let wrapped = Value::Array(vec![Value::Object(
                    [("rule".to_string(), rules.clone())].into_iter().collect(),
                )]);
                attrs.insert("server_side_encryption_configuration".to_string(), wrapped);
            }
        }
        "acl" => {
            if let Some(acl) = related.attributes.get("acl").filter(|v| !v.is_null()) {
                attrs.insert("acl".to_string(), acl.clone());
            }
        }
        "website_configuration" => {
            attrs.insert("website".to_string(), block_without_linkage(related));
        }
        "logging" => {
            attrs.insert("logging".to_string(), block_without_linkage(related));
        }
        other => {
            debug!(relation = other, "ignoring unrecognized bucket relation");
        }
    }
}

fn first_element(value: &Value) -> Option<&Value> {
    value.as_array().and_then(|a| a.first())
}

/// The related block's own attributes, minus the keys that only wire it to
/// the primary, wrapped as a single-occurrence nested block.
fn block_without_linkage(related: &RawInstance) -> Value {
    let mut block = related.attributes.clone();
    block.remove("bucket");
    block.remove("id");
    block.remove("expected_bucket_owner");
    Value::Array(vec![Value::Object(block)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_state;

    const STATE: &str = r#"{
        "version": 4,
        "resources": [
            {
                "mode": "managed",
                "type": "aws_s3_bucket",
                "name": "assets",
                "provider": "provider[\"registry.terraform.io/hashicorp/aws\"]",
                "instances": [{"schema_version": 0, "attributes": {"id": "my-assets", "bucket": "my-assets"}}]
            },
            {
                "mode": "managed",
                "type": "aws_s3_bucket_versioning",
                "name": "assets",
                "provider": "provider[\"registry.terraform.io/hashicorp/aws\"]",
                "instances": [{"schema_version": 0, "attributes": {"bucket": "my-assets", "versioning_configuration": [{"status": "Enabled"}]}}]
            },
            {
                "mode": "managed",
                "type": "aws_s3_bucket_policy",
                "name": "assets",
                "provider": "provider[\"registry.terraform.io/hashicorp/aws\"]",
                "instances": [{"schema_version": 0, "attributes": {"bucket": "other-bucket", "policy": "{}"}}]
            }
        ]
    }"#;

    #[test]
    fn finds_only_blocks_pointing_at_primary() {
        let state = parse_state("s", STATE).unwrap();
        let primary = &state.raw.resources[0];
        let instance = &primary.instances[0];
        let related = bucket_relations(&state, primary, instance);
        assert!(related.contains_key("versioning"));
        assert!(!related.contains_key("policy"), "policy points at another bucket");
    }

    #[test]
    fn versioning_merges_to_bool() {
        let state = parse_state("s", STATE).unwrap();
        let primary = &state.raw.resources[0];
        let instance = &primary.instances[0];
        let related = bucket_relations(&state, primary, instance);

        let mut attrs = instance.attributes.clone();
        for (relation, blocks) in &related {
            for block in blocks {
                merge_bucket_relation(&mut attrs, relation, block);
            }
        }
        assert_eq!(attrs["versioning_enabled"], Value::Bool(true));
    }
}
