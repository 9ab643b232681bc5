use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorCode};

/// Closed enumeration of the domain resource categories driftscan understands.
///
/// The string form (`compute_instance`, ...) is what appears in configuration
/// files and reports; adding a category means adding a variant here plus its
/// normalization tables and comparer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    ComputeInstance,
    StorageBucket,
    DatabaseInstance,
}

impl ResourceKind {
    pub fn all() -> &'static [ResourceKind] {
        &[
            ResourceKind::ComputeInstance,
            ResourceKind::StorageBucket,
            ResourceKind::DatabaseInstance,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::ComputeInstance => "compute_instance",
            ResourceKind::StorageBucket => "storage_bucket",
            ResourceKind::DatabaseInstance => "database_instance",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "compute_instance" => Ok(ResourceKind::ComputeInstance),
            "storage_bucket" => Ok(ResourceKind::StorageBucket),
            "database_instance" => Ok(ResourceKind::DatabaseInstance),
            other => Err(Error::new(
                ErrorCode::Mapping,
                format!("unknown resource kind '{other}'"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_str() {
        for kind in ResourceKind::all() {
            let parsed: ResourceKind = kind.as_str().parse().unwrap();
            assert_eq!(parsed, *kind);
        }
    }

    #[test]
    fn unknown_kind_is_a_mapping_error() {
        let err = "lambda_function".parse::<ResourceKind>().unwrap_err();
        assert_eq!(err.code, ErrorCode::Mapping);
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&ResourceKind::ComputeInstance).unwrap();
        assert_eq!(json, "\"compute_instance\"");
    }
}
