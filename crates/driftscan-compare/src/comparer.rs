use std::collections::HashMap;

use async_trait::async_trait;
use driftscan_domain::{
    AttrMap, AttrValue, AttributeDiff, Comparer, Error, ResourceKind, Result, TaskGroup,
};
use tracing::debug;

use crate::helpers::{default_compare, keyed_unordered_compare, CompareCtx, CompareFn};

/// Pre-pass applied to both sides of a keyed sequence before diffing
/// (lifecycle rules flatten their optional singleton sub-blocks).
pub(crate) type SequenceNormalizer = fn(Option<&AttrValue>) -> Option<AttrValue>;

/// How one attribute is compared: a plain function, or a keyed unordered
/// sequence diff that fans out one bounded task per key.
pub(crate) enum AttributeCompare {
    Plain(CompareFn),
    KeyedUnordered {
        key_field: &'static str,
        what: &'static str,
        normalize: Option<SequenceNormalizer>,
    },
}

/// Comparer assembled from per-attribute comparison functions.
///
/// Attributes without a registered function go through the robust default
/// comparator. A failing function does not abort the pair: the failure is
/// recorded as a difference and the remaining attributes still compare.
pub struct KindComparer {
    kind: ResourceKind,
    ignored_tag_prefix: String,
    overrides: HashMap<&'static str, AttributeCompare>,
}

impl KindComparer {
    pub(crate) fn new(kind: ResourceKind, ignored_tag_prefix: impl Into<String>) -> Self {
        Self {
            kind,
            ignored_tag_prefix: ignored_tag_prefix.into(),
            overrides: HashMap::new(),
        }
    }

    pub(crate) fn with(mut self, attribute: &'static str, func: CompareFn) -> Self {
        self.overrides.insert(attribute, AttributeCompare::Plain(func));
        self
    }

    pub(crate) fn with_keyed(
        mut self,
        attribute: &'static str,
        key_field: &'static str,
        what: &'static str,
        normalize: Option<SequenceNormalizer>,
    ) -> Self {
        self.overrides
            .insert(attribute, AttributeCompare::KeyedUnordered { key_field, what, normalize });
        self
    }
}

#[async_trait]
impl Comparer for KindComparer {
    fn kind(&self) -> ResourceKind {
        self.kind
    }

    async fn compare(
        &self,
        group: &TaskGroup,
        desired: &AttrMap,
        actual: &AttrMap,
        attributes: &[String],
    ) -> Result<Vec<AttributeDiff>> {
        let ctx = CompareCtx {
            group,
            ignored_tag_prefix: &self.ignored_tag_prefix,
        };

        let mut diffs = Vec::new();
        for attribute in attributes {
            if group.is_cancelled() {
                return Err(Error::cancelled());
            }
            let desired_value = desired.get(attribute);
            let actual_value = actual.get(attribute);
            let outcome = match self.overrides.get(attribute.as_str()) {
                Some(AttributeCompare::Plain(func)) => func(&ctx, desired_value, actual_value),
                Some(AttributeCompare::KeyedUnordered { key_field, what, normalize }) => {
                    match normalize {
                        Some(normalize) => {
                            let desired_norm = normalize(desired_value);
                            let actual_norm = normalize(actual_value);
                            keyed_unordered_compare(
                                &ctx,
                                desired_norm.as_ref(),
                                actual_norm.as_ref(),
                                key_field,
                                what,
                            )
                            .await
                        }
                        None => {
                            keyed_unordered_compare(&ctx, desired_value, actual_value, key_field, what)
                                .await
                        }
                    }
                }
                None => default_compare(&ctx, desired_value, actual_value),
            };

            match outcome {
                Ok(outcome) if outcome.equal => {}
                Ok(outcome) => {
                    let mut diff = AttributeDiff::new(
                        attribute.clone(),
                        desired_value.cloned(),
                        actual_value.cloned(),
                    );
                    if let Some(details) = outcome.details {
                        diff = diff.with_details(details);
                    }
                    diffs.push(diff);
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    debug!(kind = %self.kind, attribute = %attribute, error = %e, "attribute comparison failed");
                    diffs.push(
                        AttributeDiff::new(
                            attribute.clone(),
                            desired_value.cloned(),
                            actual_value.cloned(),
                        )
                        .with_details(format!("Comparison error: {e}")),
                    );
                }
            }
        }
        Ok(diffs)
    }
}
