use driftscan_domain::{keys, ResourceKind};

use crate::comparer::KindComparer;
use crate::helpers::{block_map_compare, tags_compare, unordered_strings_compare};

/// Comparer for compute instances. Scalars use the default comparator;
/// attached EBS devices diff per device name through the run's task group.
pub fn compute_instance_comparer(ignored_tag_prefix: &str) -> KindComparer {
    KindComparer::new(ResourceKind::ComputeInstance, ignored_tag_prefix)
        .with(keys::TAGS, tags_compare)
        .with(keys::SECURITY_GROUPS, unordered_strings_compare)
        .with(keys::ROOT_BLOCK_DEVICE, block_map_compare)
        .with_keyed(keys::EBS_BLOCK_DEVICES, keys::DEVICE_NAME, "block device", None)
}
