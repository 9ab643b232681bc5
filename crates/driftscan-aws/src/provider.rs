use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use driftscan_domain::{
    ActualResource, PlatformFilters, PlatformProvider, ResourceKind, Result,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::limiter::{new_limiter, ApiLimiter};

/// Platform provider over the AWS SDK. Construction loads credentials the
/// standard way (environment, shared config, instance metadata); the
/// limiter is shared across the EC2 and S3 clients.
pub struct AwsPlatformProvider {
    ec2: aws_sdk_ec2::Client,
    s3: aws_sdk_s3::Client,
    limiter: ApiLimiter,
    region: Option<String>,
}

impl AwsPlatformProvider {
    pub async fn connect(
        region: Option<String>,
        profile: Option<String>,
        api_rps: u32,
    ) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region.clone() {
            loader = loader.region(aws_config::Region::new(region));
        }
        if let Some(profile) = &profile {
            loader = loader.profile_name(profile);
        }
        let shared = loader.load().await;
        info!(
            region = region.as_deref().unwrap_or("<default>"),
            profile = profile.as_deref().unwrap_or("<default>"),
            api_rps,
            "aws platform provider ready"
        );
        Self {
            ec2: aws_sdk_ec2::Client::new(&shared),
            s3: aws_sdk_s3::Client::new(&shared),
            limiter: new_limiter(api_rps),
            region,
        }
    }
}

#[async_trait]
impl PlatformProvider for AwsPlatformProvider {
    fn name(&self) -> &'static str {
        "aws"
    }

    async fn list(
        &self,
        cancel: &CancellationToken,
        kinds: &[ResourceKind],
        filters: &BTreeMap<ResourceKind, PlatformFilters>,
        out: mpsc::Sender<Arc<dyn ActualResource>>,
    ) -> Result<()> {
        let empty = PlatformFilters::new();
        for kind in kinds {
            let kind_filters = filters.get(kind).unwrap_or(&empty);
            match kind {
                ResourceKind::ComputeInstance => {
                    crate::ec2::list_instances(
                        &self.ec2,
                        &self.limiter,
                        self.region.as_deref(),
                        cancel,
                        kind_filters,
                        &out,
                    )
                    .await?;
                }
                ResourceKind::StorageBucket => {
                    crate::s3::list_buckets(
                        &self.s3,
                        &self.limiter,
                        self.region.as_deref(),
                        cancel,
                        &out,
                    )
                    .await?;
                }
                ResourceKind::DatabaseInstance => {
                    warn!(
                        kind = %kind,
                        "aws provider does not list this kind yet; desired resources will report as missing"
                    );
                }
            }
        }
        Ok(())
    }
}
