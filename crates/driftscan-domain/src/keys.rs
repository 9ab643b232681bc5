//! Canonical attribute keys.
//!
//! These are the stable, domain-level names every ingestion path normalizes
//! to. Comparers and configuration refer to attributes by these names only;
//! source-schema names (`ami`, `vpc_security_group_ids`, ...) never escape
//! the normalizer.

use crate::kind::ResourceKind;

// Always-permitted identity keys, valid for every kind.
pub const NAME: &str = "name";
pub const ID: &str = "id";
pub const ARN: &str = "arn";
pub const REGION: &str = "region";

// Compute instance.
pub const INSTANCE_TYPE: &str = "instance_type";
pub const IMAGE_ID: &str = "image_id";
pub const KEY_NAME: &str = "key_name";
pub const SUBNET_ID: &str = "subnet_id";
pub const AVAILABILITY_ZONE: &str = "availability_zone";
pub const MONITORING: &str = "monitoring";
pub const USER_DATA: &str = "user_data";
pub const TAGS: &str = "tags";
pub const SECURITY_GROUPS: &str = "security_groups";
pub const ROOT_BLOCK_DEVICE: &str = "root_block_device";
pub const EBS_BLOCK_DEVICES: &str = "ebs_block_devices";

// Block-device fields (inside the maps above).
pub const DEVICE_NAME: &str = "device_name";
pub const VOLUME_SIZE: &str = "volume_size";
pub const VOLUME_TYPE: &str = "volume_type";
pub const DELETE_ON_TERMINATION: &str = "delete_on_termination";
pub const ENCRYPTED: &str = "encrypted";
pub const IOPS: &str = "iops";
pub const THROUGHPUT: &str = "throughput";
pub const SNAPSHOT_ID: &str = "snapshot_id";
pub const KMS_KEY_ID: &str = "kms_key_id";

// Storage bucket.
pub const BUCKET: &str = "bucket";
pub const ACL: &str = "acl";
pub const POLICY: &str = "policy";
pub const VERSIONING_ENABLED: &str = "versioning_enabled";
pub const LIFECYCLE_RULES: &str = "lifecycle_rules";
pub const CORS_RULES: &str = "cors_rules";
pub const SERVER_SIDE_ENCRYPTION_CONFIGURATION: &str = "server_side_encryption_configuration";
pub const WEBSITE: &str = "website";
pub const LOGGING: &str = "logging";

// Database instance.
pub const INSTANCE_CLASS: &str = "instance_class";
pub const ENGINE: &str = "engine";
pub const ENGINE_VERSION: &str = "engine_version";
pub const ALLOCATED_STORAGE: &str = "allocated_storage";
pub const STORAGE_TYPE: &str = "storage_type";
pub const MULTI_AZ: &str = "multi_az";
pub const BACKUP_RETENTION_PERIOD: &str = "backup_retention_period";
pub const PUBLICLY_ACCESSIBLE: &str = "publicly_accessible";
pub const USERNAME: &str = "username";

/// Identity keys valid for every kind in addition to [`registered`].
pub fn baseline() -> &'static [&'static str] {
    &[NAME, ID, ARN, REGION]
}

/// The registered canonical keys for a kind.
pub fn registered(kind: ResourceKind) -> &'static [&'static str] {
    match kind {
        ResourceKind::ComputeInstance => &[
            INSTANCE_TYPE,
            IMAGE_ID,
            KEY_NAME,
            SUBNET_ID,
            AVAILABILITY_ZONE,
            MONITORING,
            USER_DATA,
            TAGS,
            SECURITY_GROUPS,
            ROOT_BLOCK_DEVICE,
            EBS_BLOCK_DEVICES,
        ],
        ResourceKind::StorageBucket => &[
            BUCKET,
            ACL,
            POLICY,
            TAGS,
            VERSIONING_ENABLED,
            LIFECYCLE_RULES,
            CORS_RULES,
            SERVER_SIDE_ENCRYPTION_CONFIGURATION,
            WEBSITE,
            LOGGING,
        ],
        ResourceKind::DatabaseInstance => &[
            INSTANCE_CLASS,
            ENGINE,
            ENGINE_VERSION,
            ALLOCATED_STORAGE,
            STORAGE_TYPE,
            MULTI_AZ,
            BACKUP_RETENTION_PERIOD,
            PUBLICLY_ACCESSIBLE,
            USERNAME,
            TAGS,
        ],
    }
}

/// Whether `key` is acceptable in a normalized map for `kind`.
pub fn is_registered(kind: ResourceKind, key: &str) -> bool {
    baseline().contains(&key) || registered(kind).contains(&key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_keys_valid_for_all_kinds() {
        for kind in ResourceKind::all() {
            for key in baseline() {
                assert!(is_registered(*kind, key));
            }
        }
    }

    #[test]
    fn kind_keys_do_not_bleed_across_kinds() {
        assert!(is_registered(ResourceKind::ComputeInstance, INSTANCE_TYPE));
        assert!(!is_registered(ResourceKind::StorageBucket, INSTANCE_TYPE));
        assert!(is_registered(ResourceKind::StorageBucket, VERSIONING_ENABLED));
        assert!(!is_registered(ResourceKind::DatabaseInstance, VERSIONING_ENABLED));
    }
}
