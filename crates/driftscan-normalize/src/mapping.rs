use driftscan_domain::{keys, ResourceKind};

use crate::coerce::Coercion;

/// Map an IaC source type to its domain kind.
pub fn kind_for_source_type(source_type: &str) -> Option<ResourceKind> {
    match source_type {
        "aws_instance" => Some(ResourceKind::ComputeInstance),
        "aws_s3_bucket" => Some(ResourceKind::StorageBucket),
        "aws_db_instance" => Some(ResourceKind::DatabaseInstance),
        _ => None,
    }
}

/// One normalization rule: take `source` from the raw map, run it through
/// `coercion`, store it under `target`. Rules are tried in order; the first
/// rule to fill a target wins, so schema aliases list the preferred source
/// first and the canonical name itself is always present to keep
/// normalization idempotent.
pub(crate) struct Rule {
    pub source: &'static str,
    pub target: &'static str,
    pub coercion: Coercion,
}

const fn rule(source: &'static str, target: &'static str, coercion: Coercion) -> Rule {
    Rule { source, target, coercion }
}

pub(crate) fn rules(kind: ResourceKind) -> &'static [Rule] {
    match kind {
        ResourceKind::ComputeInstance => COMPUTE_RULES,
        ResourceKind::StorageBucket => BUCKET_RULES,
        ResourceKind::DatabaseInstance => DATABASE_RULES,
    }
}

static COMPUTE_RULES: &[Rule] = &[
    rule("id", keys::ID, Coercion::Copy),
    rule("arn", keys::ARN, Coercion::Copy),
    rule("name", keys::NAME, Coercion::Copy),
    rule(keys::INSTANCE_TYPE, keys::INSTANCE_TYPE, Coercion::Copy),
    rule("ami", keys::IMAGE_ID, Coercion::Copy),
    rule(keys::IMAGE_ID, keys::IMAGE_ID, Coercion::Copy),
    rule(keys::KEY_NAME, keys::KEY_NAME, Coercion::Copy),
    rule(keys::SUBNET_ID, keys::SUBNET_ID, Coercion::Copy),
    rule(keys::AVAILABILITY_ZONE, keys::AVAILABILITY_ZONE, Coercion::Copy),
    rule(keys::MONITORING, keys::MONITORING, Coercion::Bool),
    rule(keys::USER_DATA, keys::USER_DATA, Coercion::Copy),
    rule(keys::TAGS, keys::TAGS, Coercion::Tags),
    rule("vpc_security_group_ids", keys::SECURITY_GROUPS, Coercion::StringList),
    rule(keys::SECURITY_GROUPS, keys::SECURITY_GROUPS, Coercion::StringList),
    rule(
        keys::ROOT_BLOCK_DEVICE,
        keys::ROOT_BLOCK_DEVICE,
        Coercion::BlockDevice { is_root: true },
    ),
    rule("ebs_block_device", keys::EBS_BLOCK_DEVICES, Coercion::BlockDeviceList),
    rule(keys::EBS_BLOCK_DEVICES, keys::EBS_BLOCK_DEVICES, Coercion::BlockDeviceList),
];

static BUCKET_RULES: &[Rule] = &[
    rule("id", keys::ID, Coercion::Copy),
    rule("arn", keys::ARN, Coercion::Copy),
    rule("name", keys::NAME, Coercion::Copy),
    rule("region", keys::REGION, Coercion::Copy),
    rule(keys::BUCKET, keys::BUCKET, Coercion::Copy),
    rule(keys::ACL, keys::ACL, Coercion::Copy),
    rule(keys::POLICY, keys::POLICY, Coercion::Copy),
    rule(keys::TAGS, keys::TAGS, Coercion::Tags),
    rule("versioning", keys::VERSIONING_ENABLED, Coercion::Versioning),
    rule(keys::VERSIONING_ENABLED, keys::VERSIONING_ENABLED, Coercion::Versioning),
    rule("lifecycle_rule", keys::LIFECYCLE_RULES, Coercion::Copy),
    rule(keys::LIFECYCLE_RULES, keys::LIFECYCLE_RULES, Coercion::Copy),
    rule("cors_rule", keys::CORS_RULES, Coercion::Copy),
    rule(keys::CORS_RULES, keys::CORS_RULES, Coercion::Copy),
    rule(
        keys::SERVER_SIDE_ENCRYPTION_CONFIGURATION,
        keys::SERVER_SIDE_ENCRYPTION_CONFIGURATION,
        Coercion::NestedBlock,
    ),
    rule(keys::WEBSITE, keys::WEBSITE, Coercion::NestedBlock),
    rule(keys::LOGGING, keys::LOGGING, Coercion::NestedBlock),
];

static DATABASE_RULES: &[Rule] = &[
    rule("id", keys::ID, Coercion::Copy),
    rule("arn", keys::ARN, Coercion::Copy),
    rule("name", keys::NAME, Coercion::Copy),
    rule(keys::INSTANCE_CLASS, keys::INSTANCE_CLASS, Coercion::Copy),
    rule(keys::ENGINE, keys::ENGINE, Coercion::Copy),
    rule(keys::ENGINE_VERSION, keys::ENGINE_VERSION, Coercion::Copy),
    rule(keys::ALLOCATED_STORAGE, keys::ALLOCATED_STORAGE, Coercion::Int),
    rule(keys::STORAGE_TYPE, keys::STORAGE_TYPE, Coercion::Copy),
    rule(keys::MULTI_AZ, keys::MULTI_AZ, Coercion::Bool),
    rule(keys::BACKUP_RETENTION_PERIOD, keys::BACKUP_RETENTION_PERIOD, Coercion::Int),
    rule(keys::PUBLICLY_ACCESSIBLE, keys::PUBLICLY_ACCESSIBLE, Coercion::Bool),
    rule(keys::USERNAME, keys::USERNAME, Coercion::Copy),
    rule(keys::TAGS, keys::TAGS, Coercion::Tags),
];
