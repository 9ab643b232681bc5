use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_ec2::types::{Filter, Instance, InstanceAttributeName, InstanceStateName};
use aws_sdk_ec2::Client;
use base64::Engine;
use driftscan_domain::{
    keys, ActualResource, AttrMap, AttrValue, Error, ErrorCode, PlatformFilters, ResourceKind,
    ResourceMetadata, Result,
};
use tokio::sync::{mpsc, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::limiter::ApiLimiter;

pub(crate) async fn list_instances(
    client: &Client,
    limiter: &ApiLimiter,
    region: Option<&str>,
    cancel: &CancellationToken,
    filters: &PlatformFilters,
    out: &mpsc::Sender<Arc<dyn ActualResource>>,
) -> Result<()> {
    let mut next_token: Option<String> = None;
    let mut listed = 0usize;
    loop {
        if cancel.is_cancelled() {
            return Err(Error::cancelled());
        }
        limiter.until_ready().await;

        let mut request = client.describe_instances();
        for (name, value) in filters {
            request = request.filters(
                Filter::builder().name(name.as_str()).values(value.as_str()).build(),
            );
        }
        if let Some(token) = &next_token {
            request = request.next_token(token.as_str());
        }
        let output = request
            .send()
            .await
            .map_err(|e| Error::wrap(ErrorCode::Internal, "DescribeInstances failed", e))?;

        for reservation in output.reservations() {
            for instance in reservation.instances() {
                let terminated = instance
                    .state()
                    .and_then(|s| s.name())
                    .is_some_and(|name| *name == InstanceStateName::Terminated);
                if terminated {
                    continue;
                }
                let Some(instance_id) = instance.instance_id() else {
                    continue;
                };
                let mut metadata =
                    ResourceMetadata::new(ResourceKind::ComputeInstance, "aws", "")
                        .with_provider_assigned_id(instance_id);
                if let Some(region) = region {
                    metadata = metadata.with_region(region);
                }
                let resource = Ec2Instance {
                    client: client.clone(),
                    limiter: limiter.clone(),
                    metadata,
                    instance: instance.clone(),
                    cache: OnceCell::new(),
                };
                listed += 1;
                if out.send(Arc::new(resource)).await.is_err() {
                    return Err(Error::cancelled());
                }
            }
        }

        next_token = output.next_token().map(String::from);
        if next_token.is_none() {
            break;
        }
    }
    debug!(count = listed, "listed ec2 instances");
    Ok(())
}

/// An EC2 instance observed by the listing. Volume detail and user data
/// need extra API calls, so the full attribute map is built on first use
/// and cached.
struct Ec2Instance {
    client: Client,
    limiter: ApiLimiter,
    metadata: ResourceMetadata,
    instance: Instance,
    cache: OnceCell<AttrMap>,
}

#[async_trait]
impl ActualResource for Ec2Instance {
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

impl Ec2Instance {
    async fn fetch(&self, cancel: &CancellationToken) -> Result<AttrMap> {
        let mut raw = instance_raw_attrs(&self.instance);

        if let Some(user_data) = self.fetch_user_data(cancel).await? {
            raw.insert(keys::USER_DATA.to_string(), AttrValue::String(user_data));
        }
        self.enrich_block_devices(cancel, &mut raw).await?;

        driftscan_normalize::normalize(ResourceKind::ComputeInstance, &raw)
    }

    async fn fetch_user_data(&self, cancel: &CancellationToken) -> Result<Option<String>> {
        if cancel.is_cancelled() {
            return Err(Error::cancelled());
        }
        self.limiter.until_ready().await;
        let output = self
            .client
            .describe_instance_attribute()
            .instance_id(self.metadata.provider_assigned_id.as_str())
            .attribute(InstanceAttributeName::UserData)
            .send()
            .await
            .map_err(|e| {
                Error::wrap(ErrorCode::Internal, "DescribeInstanceAttribute failed", e)
            })?;

        let Some(encoded) = output.user_data().and_then(|u| u.value()) else {
            return Ok(None);
        };
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| Error::wrap(ErrorCode::Mapping, "user data is not valid base64", e))?;
        Ok(Some(String::from_utf8_lossy(&decoded).into_owned()))
    }

    /// Join the instance's block-device mappings with volume detail from
    /// DescribeVolumes and split them into root and additional devices.
    async fn enrich_block_devices(
        &self,
        cancel: &CancellationToken,
        raw: &mut AttrMap,
    ) -> Result<()> {
        let mappings = self.instance.block_device_mappings();
        if mappings.is_empty() {
            return Ok(());
        }
        if cancel.is_cancelled() {
            return Err(Error::cancelled());
        }

        let volume_ids: Vec<String> = mappings
            .iter()
            .filter_map(|m| m.ebs().and_then(|e| e.volume_id()))
            .map(String::from)
            .collect();
        let mut volumes: BTreeMap<String, AttrMap> = BTreeMap::new();
        if !volume_ids.is_empty() {
            self.limiter.until_ready().await;
            let output = self
                .client
                .describe_volumes()
                .set_volume_ids(Some(volume_ids))
                .send()
                .await
                .map_err(|e| Error::wrap(ErrorCode::Internal, "DescribeVolumes failed", e))?;
            for volume in output.volumes() {
                let Some(volume_id) = volume.volume_id() else {
                    continue;
                };
                let mut detail = AttrMap::new();
                if let Some(size) = volume.size() {
                    detail.insert(keys::VOLUME_SIZE.to_string(), AttrValue::Int(size as i64));
                }
                if let Some(volume_type) = volume.volume_type() {
                    detail.insert(
                        keys::VOLUME_TYPE.to_string(),
                        AttrValue::from(volume_type.as_str()),
                    );
                }
                if let Some(encrypted) = volume.encrypted() {
                    detail.insert(keys::ENCRYPTED.to_string(), AttrValue::Bool(encrypted));
                }
                if let Some(iops) = volume.iops() {
                    detail.insert(keys::IOPS.to_string(), AttrValue::Int(iops as i64));
                }
                if let Some(throughput) = volume.throughput() {
                    detail.insert(keys::THROUGHPUT.to_string(), AttrValue::Int(throughput as i64));
                }
                if let Some(snapshot_id) = volume.snapshot_id() {
                    if !snapshot_id.is_empty() {
                        detail.insert(keys::SNAPSHOT_ID.to_string(), AttrValue::from(snapshot_id));
                    }
                }
                if let Some(kms_key_id) = volume.kms_key_id() {
                    detail.insert(keys::KMS_KEY_ID.to_string(), AttrValue::from(kms_key_id));
                }
                volumes.insert(volume_id.to_string(), detail);
            }
        }

        let root_device = self.instance.root_device_name().unwrap_or_default();
        let mut extra_devices = Vec::new();
        for mapping in mappings {
            let Some(device_name) = mapping.device_name() else {
                continue;
            };
            let mut device = AttrMap::new();
            device.insert(keys::DEVICE_NAME.to_string(), AttrValue::from(device_name));
            if let Some(ebs) = mapping.ebs() {
                if let Some(delete) = ebs.delete_on_termination() {
                    device.insert(keys::DELETE_ON_TERMINATION.to_string(), AttrValue::Bool(delete));
                }
                if let Some(detail) = ebs.volume_id().and_then(|id| volumes.get(id)) {
                    device.extend(detail.clone());
                }
            }
            if device_name == root_device {
                raw.insert(keys::ROOT_BLOCK_DEVICE.to_string(), AttrValue::Map(device));
            } else {
                extra_devices.push(AttrValue::Map(device));
            }
        }
        if !extra_devices.is_empty() {
            raw.insert(keys::EBS_BLOCK_DEVICES.to_string(), AttrValue::List(extra_devices));
        }
        Ok(())
    }
}

/// The attribute subset available directly on the DescribeInstances model.
fn instance_raw_attrs(instance: &Instance) -> AttrMap {
    let mut raw = AttrMap::new();
    if let Some(instance_type) = instance.instance_type() {
        raw.insert(
            keys::INSTANCE_TYPE.to_string(),
            AttrValue::from(instance_type.as_str()),
        );
    }
    if let Some(image_id) = instance.image_id() {
        raw.insert(keys::IMAGE_ID.to_string(), AttrValue::from(image_id));
    }
    if let Some(key_name) = instance.key_name() {
        raw.insert(keys::KEY_NAME.to_string(), AttrValue::from(key_name));
    }
    if let Some(subnet_id) = instance.subnet_id() {
        raw.insert(keys::SUBNET_ID.to_string(), AttrValue::from(subnet_id));
    }
    if let Some(zone) = instance.placement().and_then(|p| p.availability_zone()) {
        raw.insert(keys::AVAILABILITY_ZONE.to_string(), AttrValue::from(zone));
    }
    if let Some(state) = instance.monitoring().and_then(|m| m.state()) {
        raw.insert(
            keys::MONITORING.to_string(),
            AttrValue::Bool(state.as_str() == "enabled"),
        );
    }

    let tags: BTreeMap<String, AttrValue> = instance
        .tags()
        .iter()
        .filter_map(|tag| {
            Some((
                tag.key()?.to_string(),
                AttrValue::from(tag.value().unwrap_or_default()),
            ))
        })
        .collect();
    raw.insert(keys::TAGS.to_string(), AttrValue::Map(tags));

    let groups: Vec<AttrValue> = instance
        .security_groups()
        .iter()
        .filter_map(|group| group.group_id().or(group.group_name()))
        .map(AttrValue::from)
        .collect();
    if !groups.is_empty() {
        raw.insert(keys::SECURITY_GROUPS.to_string(), AttrValue::List(groups));
    }
    raw
}
