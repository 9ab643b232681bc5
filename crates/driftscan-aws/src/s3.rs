use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::types::BucketVersioningStatus;
use aws_sdk_s3::Client;
use driftscan_domain::{
    keys, ActualResource, AttrMap, AttrValue, Error, ErrorCode, ResourceKind, ResourceMetadata,
    Result,
};
use tokio::sync::{mpsc, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::limiter::ApiLimiter;

pub(crate) async fn list_buckets(
    client: &Client,
    limiter: &ApiLimiter,
    region: Option<&str>,
    cancel: &CancellationToken,
    out: &mpsc::Sender<Arc<dyn ActualResource>>,
) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::cancelled());
    }
    limiter.until_ready().await;
    let output = client
        .list_buckets()
        .send()
        .await
        .map_err(|e| Error::wrap(ErrorCode::Internal, "ListBuckets failed", e))?;

    let mut listed = 0usize;
    for bucket in output.buckets() {
        if cancel.is_cancelled() {
            return Err(Error::cancelled());
        }
        let Some(name) = bucket.name() else {
            continue;
        };

        // ListBuckets is account-global; filter to the configured region.
        let bucket_region = bucket_location(client, limiter, name).await?;
        if let Some(region) = region {
            if bucket_region != region {
                debug!(bucket = name, bucket_region = %bucket_region, "skipping bucket outside region");
                continue;
            }
        }

        let metadata = ResourceMetadata::new(ResourceKind::StorageBucket, "aws", "")
            .with_provider_assigned_id(name)
            .with_region(bucket_region.clone());
        let resource = S3Bucket {
            client: client.clone(),
            limiter: limiter.clone(),
            metadata,
            name: name.to_string(),
            region: bucket_region,
            cache: OnceCell::new(),
        };
        listed += 1;
        if out.send(Arc::new(resource)).await.is_err() {
            return Err(Error::cancelled());
        }
    }
    debug!(count = listed, "listed s3 buckets");
    Ok(())
}

async fn bucket_location(client: &Client, limiter: &ApiLimiter, name: &str) -> Result<String> {
    limiter.until_ready().await;
    let output = client
        .get_bucket_location()
        .bucket(name)
        .send()
        .await
        .map_err(|e| Error::wrap(ErrorCode::Internal, "GetBucketLocation failed", e))?;
    // An absent or empty constraint means the original region.
    Ok(output
        .location_constraint()
        .map(|c| c.as_str())
        .filter(|c| !c.is_empty())
        .unwrap_or("us-east-1")
        .to_string())
}

/// Whether this error just means "that configuration was never set".
fn is_absent_config<E, R>(err: &aws_sdk_s3::error::SdkError<E, R>) -> bool
where
    E: ProvideErrorMetadata,
{
    matches!(
        err.code(),
        Some(
            "NoSuchTagSet"
                | "NoSuchBucketPolicy"
                | "NoSuchCORSConfiguration"
                | "NoSuchLifecycleConfiguration"
                | "NoSuchWebsiteConfiguration"
                | "ServerSideEncryptionConfigurationNotFoundError"
        )
    )
}

macro_rules! absent_on_missing {
    ($result:expr, $what:literal) => {
        match $result {
            Ok(output) => Some(output),
            Err(e) if is_absent_config(&e) => None,
            Err(e) => return Err(Error::wrap(ErrorCode::Internal, concat!($what, " failed"), e)),
        }
    };
}

/// A bucket observed by the listing. Every configuration aspect is its own
/// API call, so the attribute map is assembled lazily and cached.
struct S3Bucket {
    client: Client,
    limiter: ApiLimiter,
    metadata: ResourceMetadata,
    name: String,
    region: String,
    cache: OnceCell<AttrMap>,
}

#[async_trait]
impl ActualResource for S3Bucket {
    fn metadata(&self) -> &ResourceMetadata {
        &self.metadata
    }

    async fn attributes(&self, cancel: &CancellationToken) -> Result<AttrMap> {
        if cancel.is_cancelled() {
            return Err(Error::cancelled());
        }
        self.cache
            .get_or_try_init(|| async { self.fetch(cancel).await })
            .await
            .cloned()
    }
}

impl S3Bucket {
    async fn fetch(&self, cancel: &CancellationToken) -> Result<AttrMap> {
        let mut raw = AttrMap::new();
        raw.insert(keys::BUCKET.to_string(), AttrValue::from(self.name.as_str()));
        raw.insert(keys::NAME.to_string(), AttrValue::from(self.name.as_str()));
        raw.insert(keys::REGION.to_string(), AttrValue::from(self.region.as_str()));

        self.fetch_tags(cancel, &mut raw).await?;
        self.fetch_versioning(cancel, &mut raw).await?;
        self.fetch_policy(cancel, &mut raw).await?;
        self.fetch_acl(cancel, &mut raw).await?;
        self.fetch_cors(cancel, &mut raw).await?;
        self.fetch_lifecycle(cancel, &mut raw).await?;
        self.fetch_encryption(cancel, &mut raw).await?;
        self.fetch_website(cancel, &mut raw).await?;
        self.fetch_logging(cancel, &mut raw).await?;

        driftscan_normalize::normalize(ResourceKind::StorageBucket, &raw)
    }

    async fn ready(&self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::cancelled());
        }
        self.limiter.until_ready().await;
        Ok(())
    }

    async fn fetch_tags(&self, cancel: &CancellationToken, raw: &mut AttrMap) -> Result<()> {
        self.ready(cancel).await?;
        let output = absent_on_missing!(
            self.client.get_bucket_tagging().bucket(self.name.as_str()).send().await,
            "GetBucketTagging"
        );
        let tags: BTreeMap<String, AttrValue> = output
            .map(|o| {
                o.tag_set()
                    .iter()
                    .map(|tag| (tag.key().to_string(), AttrValue::from(tag.value())))
                    .collect()
            })
            .unwrap_or_default();
        raw.insert(keys::TAGS.to_string(), AttrValue::Map(tags));
        Ok(())
    }

    async fn fetch_versioning(&self, cancel: &CancellationToken, raw: &mut AttrMap) -> Result<()> {
        self.ready(cancel).await?;
        let output = self
            .client
            .get_bucket_versioning()
            .bucket(self.name.as_str())
            .send()
            .await
            .map_err(|e| Error::wrap(ErrorCode::Internal, "GetBucketVersioning failed", e))?;
        let enabled = output
            .status()
            .is_some_and(|status| *status == BucketVersioningStatus::Enabled);
        raw.insert(keys::VERSIONING_ENABLED.to_string(), AttrValue::Bool(enabled));
        Ok(())
    }

    async fn fetch_policy(&self, cancel: &CancellationToken, raw: &mut AttrMap) -> Result<()> {
        self.ready(cancel).await?;
        let output = absent_on_missing!(
            self.client.get_bucket_policy().bucket(self.name.as_str()).send().await,
            "GetBucketPolicy"
        );
        if let Some(policy) = output.and_then(|o| o.policy().map(String::from)) {
            raw.insert(keys::POLICY.to_string(), AttrValue::String(policy));
        }
        Ok(())
    }

    async fn fetch_acl(&self, cancel: &CancellationToken, raw: &mut AttrMap) -> Result<()> {
        self.ready(cancel).await?;
        let output = self
            .client
            .get_bucket_acl()
            .bucket(self.name.as_str())
            .send()
            .await
            .map_err(|e| Error::wrap(ErrorCode::Internal, "GetBucketAcl failed", e))?;

        let mut grants = Vec::new();
        for grant in output.grants() {
            let mut entry = AttrMap::new();
            if let Some(grantee) = grant.grantee() {
                let mut grantee_map = AttrMap::new();
                grantee_map.insert("type".to_string(), AttrValue::from(grantee.r#type().as_str()));
                if let Some(uri) = grantee.uri() {
                    grantee_map.insert("uri".to_string(), AttrValue::from(uri));
                }
                if let Some(id) = grantee.id() {
                    grantee_map.insert("id".to_string(), AttrValue::from(id));
                }
                entry.insert(
                    "grantee".to_string(),
                    AttrValue::List(vec![AttrValue::Map(grantee_map)]),
                );
            }
            if let Some(permission) = grant.permission() {
                entry.insert("permission".to_string(), AttrValue::from(permission.as_str()));
            }
            grants.push(AttrValue::Map(entry));
        }
        if !grants.is_empty() {
            raw.insert(keys::ACL.to_string(), AttrValue::List(grants));
        }
        Ok(())
    }

    async fn fetch_cors(&self, cancel: &CancellationToken, raw: &mut AttrMap) -> Result<()> {
        self.ready(cancel).await?;
        let output = absent_on_missing!(
            self.client.get_bucket_cors().bucket(self.name.as_str()).send().await,
            "GetBucketCors"
        );
        let Some(output) = output else {
            return Ok(());
        };

        let string_list = |items: &[String]| {
            AttrValue::List(items.iter().map(|s| AttrValue::from(s.as_str())).collect())
        };
        let mut rules = Vec::new();
        for rule in output.cors_rules() {
            let mut entry = AttrMap::new();
            entry.insert("allowed_headers".to_string(), string_list(rule.allowed_headers()));
            entry.insert("allowed_methods".to_string(), string_list(rule.allowed_methods()));
            entry.insert("allowed_origins".to_string(), string_list(rule.allowed_origins()));
            entry.insert("expose_headers".to_string(), string_list(rule.expose_headers()));
            if let Some(max_age) = rule.max_age_seconds() {
                entry.insert("max_age_seconds".to_string(), AttrValue::Int(max_age as i64));
            }
            rules.push(AttrValue::Map(entry));
        }
        if !rules.is_empty() {
            raw.insert(keys::CORS_RULES.to_string(), AttrValue::List(rules));
        }
        Ok(())
    }

    async fn fetch_lifecycle(&self, cancel: &CancellationToken, raw: &mut AttrMap) -> Result<()> {
        self.ready(cancel).await?;
        let output = absent_on_missing!(
            self.client
                .get_bucket_lifecycle_configuration()
                .bucket(self.name.as_str())
                .send()
                .await,
            "GetBucketLifecycleConfiguration"
        );
        let Some(output) = output else {
            return Ok(());
        };

        let mut rules = Vec::new();
        for rule in output.rules() {
            let mut entry = AttrMap::new();
            if let Some(id) = rule.id() {
                entry.insert("id".to_string(), AttrValue::from(id));
            }
            let status = rule.status();
            entry.insert("status".to_string(), AttrValue::from(status.as_str()));
            if let Some(expiration) = rule.expiration() {
                let mut expiration_map = AttrMap::new();
                if let Some(days) = expiration.days() {
                    expiration_map.insert("days".to_string(), AttrValue::Int(days as i64));
                }
                if let Some(marker) = expiration.expired_object_delete_marker() {
                    expiration_map
                        .insert("expired_object_delete_marker".to_string(), AttrValue::Bool(marker));
                }
                if !expiration_map.is_empty() {
                    entry.insert("expiration".to_string(), AttrValue::Map(expiration_map));
                }
            }
            let transitions: Vec<AttrValue> = rule
                .transitions()
                .iter()
                .map(|transition| {
                    let mut transition_map = AttrMap::new();
                    if let Some(days) = transition.days() {
                        transition_map.insert("days".to_string(), AttrValue::Int(days as i64));
                    }
                    if let Some(class) = transition.storage_class() {
                        transition_map
                            .insert("storage_class".to_string(), AttrValue::from(class.as_str()));
                    }
                    AttrValue::Map(transition_map)
                })
                .collect();
            if !transitions.is_empty() {
                entry.insert("transition".to_string(), AttrValue::List(transitions));
            }
            rules.push(AttrValue::Map(entry));
        }
        if !rules.is_empty() {
            raw.insert(keys::LIFECYCLE_RULES.to_string(), AttrValue::List(rules));
        }
        Ok(())
    }

    async fn fetch_encryption(&self, cancel: &CancellationToken, raw: &mut AttrMap) -> Result<()> {
        self.ready(cancel).await?;
        let output = absent_on_missing!(
            self.client.get_bucket_encryption().bucket(self.name.as_str()).send().await,
            "GetBucketEncryption"
        );
        let Some(configuration) =
            output.and_then(|o| o.server_side_encryption_configuration().cloned())
        else {
            return Ok(());
        };

        let mut rules = Vec::new();
        for rule in configuration.rules() {
            let mut entry = AttrMap::new();
            if let Some(default) = rule.apply_server_side_encryption_by_default() {
                let mut default_map = AttrMap::new();
                default_map.insert(
                    "sse_algorithm".to_string(),
                    AttrValue::from(default.sse_algorithm().as_str()),
                );
                if let Some(kms_key) = default.kms_master_key_id() {
                    default_map.insert("kms_master_key_id".to_string(), AttrValue::from(kms_key));
                }
                entry.insert(
                    "apply_server_side_encryption_by_default".to_string(),
                    AttrValue::Map(default_map),
                );
            }
            if let Some(bucket_key) = rule.bucket_key_enabled() {
                entry.insert("bucket_key_enabled".to_string(), AttrValue::Bool(bucket_key));
            }
            rules.push(AttrValue::Map(entry));
        }
        if !rules.is_empty() {
            let mut wrapper = AttrMap::new();
            wrapper.insert("rule".to_string(), AttrValue::List(rules));
            raw.insert(
                keys::SERVER_SIDE_ENCRYPTION_CONFIGURATION.to_string(),
                AttrValue::List(vec![AttrValue::Map(wrapper)]),
            );
        }
        Ok(())
    }

    async fn fetch_website(&self, cancel: &CancellationToken, raw: &mut AttrMap) -> Result<()> {
        self.ready(cancel).await?;
        let output = absent_on_missing!(
            self.client.get_bucket_website().bucket(self.name.as_str()).send().await,
            "GetBucketWebsite"
        );
        let Some(output) = output else {
            return Ok(());
        };

        let mut website = AttrMap::new();
        if let Some(index) = output.index_document() {
            website.insert("index_document".to_string(), AttrValue::from(index.suffix()));
        }
        if let Some(error) = output.error_document() {
            website.insert("error_document".to_string(), AttrValue::from(error.key()));
        }
        if !website.is_empty() {
            raw.insert(
                keys::WEBSITE.to_string(),
                AttrValue::List(vec![AttrValue::Map(website)]),
            );
        }
        Ok(())
    }

    async fn fetch_logging(&self, cancel: &CancellationToken, raw: &mut AttrMap) -> Result<()> {
        self.ready(cancel).await?;
        let output = self
            .client
            .get_bucket_logging()
            .bucket(self.name.as_str())
            .send()
            .await
            .map_err(|e| Error::wrap(ErrorCode::Internal, "GetBucketLogging failed", e))?;
        if let Some(logging) = output.logging_enabled() {
            let mut logging_map = AttrMap::new();
            logging_map.insert(
                "target_bucket".to_string(),
                AttrValue::from(logging.target_bucket()),
            );
            logging_map.insert(
                "target_prefix".to_string(),
                AttrValue::from(logging.target_prefix()),
            );
            raw.insert(
                keys::LOGGING.to_string(),
                AttrValue::List(vec![AttrValue::Map(logging_map)]),
            );
        }
        Ok(())
    }
}
