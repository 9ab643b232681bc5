use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use driftscan_domain::value::attr_map_from_json;
use driftscan_domain::{
    DesiredResource, Error, ErrorCode, ResourceKind, ResourceMetadata, Result, StateProvider,
    StaticDesired,
};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::parser::{parse_state, ParsedState};
use crate::relations::{merge_bucket_relation, relations_for};
use crate::schema::{RawInstance, RawResource};

/// Desired-state provider backed by a terraform state file.
///
/// The file is read, parsed and validated at most once per instance; later
/// calls observe the cached document or the cached error.
pub struct TfStateProvider {
    path: PathBuf,
    cache: OnceCell<Result<Arc<ParsedState>>>,
}

impl TfStateProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: OnceCell::new(),
        }
    }

    /// Read + parse runs at most once per instance. The file read is raced
    /// against cancellation; a cancelled attempt leaves the cache unset so a
    /// later caller can still load, while real outcomes (including parse
    /// errors) are cached.
    async fn load(&self, cancel: &CancellationToken) -> Result<Arc<ParsedState>> {
        self.cache
            .get_or_try_init(|| async {
                let path_display = self.path.display().to_string();
                let read = tokio::select! {
                    _ = cancel.cancelled() => return Err(Error::cancelled()),
                    read = tokio::fs::read_to_string(&self.path) => read,
                };
                let outcome = match read {
                    Ok(content) => {
                        debug!(path = %path_display, bytes = content.len(), "read state file");
                        parse_state(&path_display, &content).map(Arc::new)
                    }
                    Err(e) => Err(Error::user(
                        ErrorCode::StateRead,
                        format!("cannot read state file '{path_display}'"),
                    )
                    .with_suggestion("check state.tfstate.path in the configuration")
                    .with_source(e)),
                };
                Ok(outcome)
            })
            .await?
            .clone()
    }

    fn build_desired(
        &self,
        state: &ParsedState,
        kind: ResourceKind,
        resource: &RawResource,
        instance: &RawInstance,
    ) -> Result<Arc<dyn DesiredResource>> {
        let mut raw_attrs = instance.attributes.clone();
        if let Some(relations) = relations_for(kind) {
            for (relation, blocks) in relations(state, resource, instance) {
                for block in blocks {
                    merge_bucket_relation(&mut raw_attrs, &relation, block);
                }
            }
        }

        let attributes = driftscan_normalize::normalize(kind, &attr_map_from_json(raw_attrs))?;

        let mut metadata =
            ResourceMetadata::new(kind, resource.provider_type(), resource.address(instance));
        if let Some(id) = instance.attributes.get("id").and_then(|v| v.as_str()) {
            metadata = metadata.with_provider_assigned_id(id);
        }
        if let Some(region) = instance.attributes.get("region").and_then(|v| v.as_str()) {
            metadata = metadata.with_region(region);
        }

        Ok(Arc::new(StaticDesired::new(metadata, attributes)))
    }
}

#[async_trait]
impl StateProvider for TfStateProvider {
    fn name(&self) -> &'static str {
        "tfstate"
    }

    async fn list(
        &self,
        cancel: &CancellationToken,
        kind: ResourceKind,
    ) -> Result<Vec<Arc<dyn DesiredResource>>> {
        if cancel.is_cancelled() {
            return Err(Error::cancelled());
        }
        let state = self.load(cancel).await?;

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for resource in &state.raw.resources {
            if !resource.is_managed() {
                continue;
            }
            if driftscan_normalize::kind_for_source_type(&resource.resource_type) != Some(kind) {
                continue;
            }
            for instance in &resource.instances {
                let address = resource.address(instance);
                if !seen.insert(address.clone()) {
                    return Err(Error::user(
                        ErrorCode::StateParse,
                        format!("duplicate resource address '{address}' in state"),
                    ));
                }
                out.push(self.build_desired(&state, kind, resource, instance)?);
            }
        }
        debug!(kind = %kind, count = out.len(), "listed desired resources from state");
        Ok(out)
    }

    async fn get(
        &self,
        cancel: &CancellationToken,
        kind: ResourceKind,
        identifier: &str,
    ) -> Result<Arc<dyn DesiredResource>> {
        if cancel.is_cancelled() {
            return Err(Error::cancelled());
        }
        let state = self.load(cancel).await?;

        for resource in &state.raw.resources {
            if !resource.is_managed() {
                continue;
            }
            for instance in &resource.instances {
                if resource.address(instance) != identifier {
                    continue;
                }
                if driftscan_normalize::kind_for_source_type(&resource.resource_type) != Some(kind) {
                    return Err(Error::new(
                        ErrorCode::ResourceNotFound,
                        format!("resource '{identifier}' exists but is not a {kind}"),
                    ));
                }
                return self.build_desired(&state, kind, resource, instance);
            }
        }
        Err(Error::new(
            ErrorCode::ResourceNotFound,
            format!("resource '{identifier}' not found in state"),
        ))
    }
}
