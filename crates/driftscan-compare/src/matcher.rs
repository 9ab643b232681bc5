use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use driftscan_domain::{
    keys, ActualResource, DesiredResource, Error, ErrorCode, MatchOutcome, MatchedPair, Matcher,
    Result,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Pairs resources through an identifying tag carried by the actual side
/// whose value is the desired resource's source identifier.
pub struct TagMatcher {
    tag_key: String,
}

impl TagMatcher {
    pub fn new(tag_key: impl Into<String>) -> Result<Self> {
        let tag_key = tag_key.into();
        if tag_key.is_empty() {
            return Err(Error::user(
                ErrorCode::ConfigValidation,
                "matcher tag key must not be empty",
            )
            .with_suggestion("set settings.matcher_config.tag.key"));
        }
        if tag_key.starts_with("aws:") {
            warn!(
                tag_key = %tag_key,
                "matcher tag key is in the reserved aws: namespace; AWS will reject writes to it"
            );
        }
        Ok(Self { tag_key })
    }

    async fn tag_value(
        &self,
        cancel: &CancellationToken,
        actual: &Arc<dyn ActualResource>,
    ) -> Result<Option<String>> {
        let attrs = actual.attributes(cancel).await?;
        Ok(attrs
            .get(keys::TAGS)
            .and_then(|t| t.as_map())
            .and_then(|tags| tags.get(&self.tag_key))
            .and_then(|v| v.as_str())
            .filter(|v| !v.is_empty())
            .map(String::from))
    }
}

#[async_trait]
impl Matcher for TagMatcher {
    async fn pair(
        &self,
        cancel: &CancellationToken,
        desired: Vec<Arc<dyn DesiredResource>>,
        actual: Vec<Arc<dyn ActualResource>>,
    ) -> Result<MatchOutcome> {
        // Index actuals by tag value. First occurrence wins on duplicates.
        let mut index: HashMap<String, usize> = HashMap::new();
        for (position, resource) in actual.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(Error::cancelled());
            }
            let value = match self.tag_value(cancel, resource).await {
                Ok(value) => value,
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(
                        provider_assigned_id = %resource.metadata().provider_assigned_id,
                        error = %e,
                        "cannot read attributes while indexing; treating as unmatched"
                    );
                    continue;
                }
            };
            let Some(value) = value else {
                debug!(
                    provider_assigned_id = %resource.metadata().provider_assigned_id,
                    tag_key = %self.tag_key,
                    "actual resource has no identifying tag"
                );
                continue;
            };
            if index.contains_key(&value) {
                warn!(
                    tag_value = %value,
                    provider_assigned_id = %resource.metadata().provider_assigned_id,
                    "duplicate identifying tag value; keeping the first occurrence"
                );
                continue;
            }
            index.insert(value, position);
        }

        let mut outcome = MatchOutcome::default();
        let mut used = vec![false; actual.len()];
        let mut seen_identifiers: HashMap<String, ()> = HashMap::new();
        for resource in desired {
            if cancel.is_cancelled() {
                return Err(Error::cancelled());
            }
            let identifier = resource.metadata().source_identifier.clone();
            if identifier.is_empty() {
                warn!("desired resource without a source identifier cannot be matched");
                outcome.unmatched_desired.push(resource);
                continue;
            }
            if seen_identifiers.insert(identifier.clone(), ()).is_some() {
                error!(
                    source_identifier = %identifier,
                    "duplicate desired source identifier; skipping the later occurrence"
                );
                continue;
            }
            match index.get(&identifier) {
                Some(&position) => {
                    used[position] = true;
                    outcome.matched.push(MatchedPair {
                        desired: resource,
                        actual: actual[position].clone(),
                    });
                }
                None => outcome.unmatched_desired.push(resource),
            }
        }

        for (position, resource) in actual.into_iter().enumerate() {
            if !used[position] {
                outcome.unmatched_actual.push(resource);
            }
        }

        debug!(
            matched = outcome.matched.len(),
            unmatched_desired = outcome.unmatched_desired.len(),
            unmatched_actual = outcome.unmatched_actual.len(),
            "matching complete"
        );
        Ok(outcome)
    }
}
