use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::kind::ResourceKind;
use crate::resource::ResourceMetadata;
use crate::value::AttrValue;

/// Outcome classification for a single resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriftStatus {
    NoDrift,
    Drifted,
    Missing,
    Unmanaged,
    Error,
}

impl DriftStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriftStatus::NoDrift => "NO_DRIFT",
            DriftStatus::Drifted => "DRIFTED",
            DriftStatus::Missing => "MISSING",
            DriftStatus::Unmanaged => "UNMANAGED",
            DriftStatus::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for DriftStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One semantic attribute difference between desired and actual.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDiff {
    pub attribute_name: String,
    pub expected_value: Option<AttrValue>,
    pub actual_value: Option<AttrValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl AttributeDiff {
    pub fn new(
        attribute_name: impl Into<String>,
        expected: Option<AttrValue>,
        actual: Option<AttrValue>,
    ) -> Self {
        Self {
            attribute_name: attribute_name.into(),
            expected_value: expected,
            actual_value: actual,
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Final per-resource verdict as it appears in reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub status: DriftStatus,
    #[serde(rename = "resource_kind")]
    pub kind: ResourceKind,
    pub source_identifier: String,
    pub provider_type: String,
    pub provider_assigned_id: String,
    pub differences: Vec<AttributeDiff>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ComparisonResult {
    fn from_metadata(status: DriftStatus, meta: &ResourceMetadata) -> Self {
        Self {
            status,
            kind: meta.kind,
            source_identifier: meta.source_identifier.clone(),
            provider_type: meta.provider_type.clone(),
            provider_assigned_id: meta.provider_assigned_id.clone(),
            differences: Vec::new(),
            error_message: None,
        }
    }

    pub fn no_drift(meta: &ResourceMetadata) -> Self {
        Self::from_metadata(DriftStatus::NoDrift, meta)
    }

    pub fn drifted(meta: &ResourceMetadata, differences: Vec<AttributeDiff>) -> Self {
        let mut result = Self::from_metadata(DriftStatus::Drifted, meta);
        result.differences = differences;
        result
    }

    pub fn missing(meta: &ResourceMetadata) -> Self {
        Self::from_metadata(DriftStatus::Missing, meta)
    }

    pub fn unmanaged(meta: &ResourceMetadata) -> Self {
        Self::from_metadata(DriftStatus::Unmanaged, meta)
    }

    pub fn error(meta: &ResourceMetadata, err: &Error) -> Self {
        let mut result = Self::from_metadata(DriftStatus::Error, meta);
        result.error_message = Some(err.log_message());
        result
    }

    /// Stable identity used by reporters: unmanaged resources have no source
    /// identifier, so the platform id stands in.
    pub fn display_identifier(&self) -> &str {
        if self.source_identifier.is_empty() {
            &self.provider_assigned_id
        } else {
            &self.source_identifier
        }
    }
}

/// Sort results by (kind, identifier) so every reporter emits a
/// deterministic view regardless of aggregation order.
pub fn sort_results(results: &mut [ComparisonResult]) {
    results.sort_by(|a, b| {
        a.kind
            .cmp(&b.kind)
            .then_with(|| a.display_identifier().cmp(b.display_identifier()))
    });
}

/// Per-status counts for the report summary block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_resources_processed: usize,
    pub no_drift: usize,
    pub drifted: usize,
    pub missing: usize,
    pub unmanaged: usize,
    pub errors: usize,
}

impl ReportSummary {
    pub fn tally(results: &[ComparisonResult]) -> Self {
        let mut summary = ReportSummary {
            total_resources_processed: results.len(),
            ..Default::default()
        };
        for result in results {
            match result.status {
                DriftStatus::NoDrift => summary.no_drift += 1,
                DriftStatus::Drifted => summary.drifted += 1,
                DriftStatus::Missing => summary.missing += 1,
                DriftStatus::Unmanaged => summary.unmanaged += 1,
                DriftStatus::Error => summary.errors += 1,
            }
        }
        summary
    }
}
