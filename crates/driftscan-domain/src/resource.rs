use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::kind::ResourceKind;
use crate::value::AttrMap;

/// Identity envelope carried by every resource, desired or actual.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMetadata {
    pub kind: ResourceKind,
    /// Short provider name, e.g. the last path component of a fully
    /// qualified provider address (`registry.terraform.io/hashicorp/aws`
    /// becomes `aws`).
    pub provider_type: String,
    /// Opaque identifier issued by the platform. Empty for desired resources
    /// the platform has not realized yet.
    pub provider_assigned_id: String,
    /// Stable logical address from the desired-state source, e.g.
    /// `aws_instance.web` or `module.m.aws_instance.web`.
    pub source_identifier: String,
    pub region: Option<String>,
    pub account_id: Option<String>,
}

impl ResourceMetadata {
    pub fn new(
        kind: ResourceKind,
        provider_type: impl Into<String>,
        source_identifier: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            provider_type: provider_type.into(),
            provider_assigned_id: String::new(),
            source_identifier: source_identifier.into(),
            region: None,
            account_id: None,
        }
    }

    pub fn with_provider_assigned_id(mut self, id: impl Into<String>) -> Self {
        self.provider_assigned_id = id.into();
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_account_id(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }
}

/// A resource as declared in the desired-state source. Attributes are fully
/// materialized at listing time and never change afterwards.
pub trait DesiredResource: Send + Sync {
    fn metadata(&self) -> &ResourceMetadata;
    fn attributes(&self) -> &AttrMap;
}

/// A resource as observed on the platform. Reading attributes may perform
/// remote calls, so the accessor is fallible and cancellation-aware;
/// implementations are expected to cache after the first successful fetch.
#[async_trait]
pub trait ActualResource: Send + Sync {
    fn metadata(&self) -> &ResourceMetadata;
    async fn attributes(&self, cancel: &CancellationToken) -> Result<AttrMap>;
}

/// In-memory [`DesiredResource`], produced by the state providers.
#[derive(Debug, Clone)]
pub struct StaticDesired {
    metadata: ResourceMetadata,
    attributes: AttrMap,
}

impl StaticDesired {
    pub fn new(metadata: ResourceMetadata, attributes: AttrMap) -> Self {
        Self { metadata, attributes }
    }
}

impl DesiredResource for StaticDesired {
    fn metadata(&self) -> &ResourceMetadata {
        &self.metadata
    }

    fn attributes(&self) -> &AttrMap {
        &self.attributes
    }
}

/// In-memory [`ActualResource`] with pre-fetched attributes. Used by tests
/// and by providers that materialize everything during listing.
#[derive(Debug, Clone)]
pub struct StaticActual {
    metadata: ResourceMetadata,
    attributes: AttrMap,
}

impl StaticActual {
    pub fn new(metadata: ResourceMetadata, attributes: AttrMap) -> Self {
        Self { metadata, attributes }
    }
}

#[async_trait]
impl ActualResource for StaticActual {
    fn metadata(&self) -> &ResourceMetadata {
        &self.metadata
    }

    async fn attributes(&self, cancel: &CancellationToken) -> Result<AttrMap> {
        if cancel.is_cancelled() {
            return Err(Error::cancelled());
        }
        Ok(self.attributes.clone())
    }
}
