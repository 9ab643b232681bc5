use driftscan_domain::{keys, ResourceKind};

use crate::comparer::KindComparer;
use crate::helpers::tags_compare;

/// Comparer for database instances. Everything the listing exposes is a
/// scalar, so the robust default comparator covers all of it except tags.
pub fn database_instance_comparer(ignored_tag_prefix: &str) -> KindComparer {
    KindComparer::new(ResourceKind::DatabaseInstance, ignored_tag_prefix)
        .with(keys::TAGS, tags_compare)
}
