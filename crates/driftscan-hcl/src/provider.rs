use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use driftscan_domain::{
    DesiredResource, Error, ErrorCode, ResourceKind, ResourceMetadata, Result, StateProvider,
    StaticDesired,
};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::diag::{has_fatal, into_error, Diagnostic};
use crate::eval::evaluate_body;
use crate::files::load_module_dir;
use crate::scope::build_scope;

/// Where and how to evaluate a terraform module directory.
#[derive(Debug, Clone)]
pub struct ModuleConfig {
    pub directory: PathBuf,
    pub var_files: Vec<PathBuf>,
    pub workspace: String,
}

/// One discovered `resource` block after evaluation. `desired` holds the
/// evaluation error for blocks that failed; `list` skips those with a
/// warning while `get` surfaces the error.
struct ResourceEntry {
    address: String,
    kind: ResourceKind,
    desired: Result<Arc<StaticDesired>>,
}

struct EvaluatedModule {
    entries: Vec<ResourceEntry>,
}

/// Desired-state provider that evaluates `.tf`/`.tf.json` files directly,
/// for detecting drift before anything was ever applied. Parse and scope
/// construction run at most once per instance.
pub struct TfHclProvider {
    config: ModuleConfig,
    cache: OnceCell<Result<Arc<EvaluatedModule>>>,
}

impl TfHclProvider {
    pub fn new(config: ModuleConfig) -> Self {
        Self {
            config,
            cache: OnceCell::new(),
        }
    }

    /// Initialization runs at most once per instance; a cancelled attempt
    /// leaves the cache unset so a later caller can still initialize, while
    /// real outcomes (including errors) are cached.
    async fn load(&self, cancel: &CancellationToken) -> Result<Arc<EvaluatedModule>> {
        self.cache
            .get_or_try_init(|| async {
                match self.initialize(cancel) {
                    Err(e) if e.is_cancelled() => Err(e),
                    outcome => Ok(outcome.map(Arc::new)),
                }
            })
            .await?
            .clone()
    }

    fn initialize(&self, cancel: &CancellationToken) -> Result<EvaluatedModule> {
        let mut diags: Vec<Diagnostic> = Vec::new();
        let files = load_module_dir(&self.config.directory, cancel, &mut diags)?;
        if has_fatal(&diags) {
            return Err(into_error(&diags, ErrorCode::StateParse)
                .with_suggestion("fix the configuration syntax errors listed above"));
        }

        let scope = build_scope(
            &files,
            &self.config.directory,
            &self.config.var_files,
            &self.config.workspace,
            cancel,
            &mut diags,
        )?;
        if has_fatal(&diags) {
            return Err(into_error(&diags, ErrorCode::StateParse)
                .with_suggestion("fix the variable and locals errors listed above"));
        }

        let mut seen_addresses: HashSet<String> = HashSet::new();
        let mut entries = Vec::new();
        for file in &files {
            for block in file.body.blocks() {
                if cancel.is_cancelled() {
                    return Err(Error::cancelled());
                }
                if block.identifier() != "resource" {
                    continue;
                }
                let labels = block.labels();
                if labels.len() != 2 {
                    diags.push(
                        Diagnostic::error("resource block must have a type and a name")
                            .with_subject(file.path.display().to_string()),
                    );
                    continue;
                }
                let source_type = labels[0].as_str().to_string();
                let name = labels[1].as_str().to_string();
                let address = format!("{source_type}.{name}");

                if !seen_addresses.insert(address.clone()) {
                    diags.push(
                        Diagnostic::error(format!("duplicate resource definition '{address}'"))
                            .with_subject(file.path.display().to_string()),
                    );
                    continue;
                }
                let Some(kind) = driftscan_normalize::kind_for_source_type(&source_type) else {
                    debug!(address = %address, "skipping resource of unmapped type");
                    continue;
                };

                let mut block_diags = Vec::new();
                let raw = evaluate_body(block.body(), &scope, cancel, &address, &mut block_diags)?;
                let desired = if has_fatal(&block_diags) {
                    Err(into_error(&block_diags, ErrorCode::StateParse))
                } else {
                    driftscan_normalize::normalize(kind, &raw).map(|attributes| {
                        let provider_type =
                            source_type.split('_').next().unwrap_or("aws").to_string();
                        let metadata = ResourceMetadata::new(kind, provider_type, &address);
                        Arc::new(StaticDesired::new(metadata, attributes))
                    })
                };
                entries.push(ResourceEntry { address, kind, desired });
            }
        }

        // A duplicate address means the desired state itself is incoherent;
        // fatal regardless of which lookup path found it.
        if has_fatal(&diags) {
            return Err(into_error(&diags, ErrorCode::StateParse));
        }
        debug!(
            directory = %self.config.directory.display(),
            resources = entries.len(),
            "evaluated terraform module"
        );
        Ok(EvaluatedModule { entries })
    }
}

#[async_trait]
impl StateProvider for TfHclProvider {
    fn name(&self) -> &'static str {
        "tfhcl"
    }

    async fn list(
        &self,
        cancel: &CancellationToken,
        kind: ResourceKind,
    ) -> Result<Vec<Arc<dyn DesiredResource>>> {
        if cancel.is_cancelled() {
            return Err(Error::cancelled());
        }
        let module = self.load(cancel).await?;

        let mut out: Vec<Arc<dyn DesiredResource>> = Vec::new();
        for entry in module.entries.iter().filter(|e| e.kind == kind) {
            match &entry.desired {
                Ok(desired) => out.push(desired.clone()),
                Err(e) => {
                    warn!(
                        address = %entry.address,
                        error = %e,
                        "skipping resource that failed to evaluate"
                    );
                }
            }
        }
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
        let module = self.load(cancel).await?;

        let Some(entry) = module.entries.iter().find(|e| e.address == identifier) else {
            return Err(Error::new(
                ErrorCode::ResourceNotFound,
                format!("resource '{identifier}' not found in configuration"),
            ));
        };
        if entry.kind != kind {
            return Err(Error::new(
                ErrorCode::ResourceNotFound,
                format!("resource '{identifier}' exists but is not a {kind}"),
            ));
        }
        match &entry.desired {
            Ok(desired) => Ok(desired.clone() as Arc<dyn DesiredResource>),
            Err(e) => Err(Error::wrap(
                ErrorCode::StateParse,
                format!("resource '{identifier}' failed to evaluate"),
                e.clone(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftscan_domain::AttrValue;

    fn provider_for(sources: &[(&str, &str)]) -> (tempfile::TempDir, TfHclProvider) {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in sources {
            std::fs::write(dir.path().join(name), content).unwrap();
        }
        let provider = TfHclProvider::new(ModuleConfig {
            directory: dir.path().to_path_buf(),
            var_files: vec![],
            workspace: "default".to_string(),
        });
        (dir, provider)
    }

    const MAIN_TF: &str = r#"
variable "instance_type" {
  default = "t2.micro"
}

locals {
  common_tags = {
    Env  = terraform.workspace
    Team = upper("core")
  }
}

resource "aws_instance" "web" {
  instance_type = var.instance_type
  ami           = "ami-123"
  subnet_id     = aws_subnet.main.id
  tags          = local.common_tags

  root_block_device {
    volume_size = 10
  }
}

resource "aws_s3_bucket" "assets" {
  bucket = "drift-assets"
}
"#;

    #[tokio::test]
    async fn evaluates_resources_with_scope() {
        let (_dir, provider) = provider_for(&[("main.tf", MAIN_TF)]);
        let token = CancellationToken::new();
        let listed = provider.list(&token, ResourceKind::ComputeInstance).await.unwrap();
        assert_eq!(listed.len(), 1);

        let attrs = listed[0].attributes();
        assert_eq!(attrs["instance_type"], AttrValue::from("t2.micro"));
        assert_eq!(attrs["image_id"], AttrValue::from("ami-123"));
        // Reference to another resource is unknown statically: omitted.
        assert!(!attrs.contains_key("subnet_id"));

        let tags = attrs["tags"].as_map().unwrap();
        assert_eq!(tags["Env"], AttrValue::from("default"));
        assert_eq!(tags["Team"], AttrValue::from("CORE"));

        // Nested block became a single map with the root default applied.
        let root = attrs["root_block_device"].as_map().unwrap();
        assert_eq!(root["volume_size"], AttrValue::Int(10));
        assert_eq!(root["delete_on_termination"], AttrValue::Bool(true));
    }

    #[tokio::test]
    async fn get_by_address_and_kind() {
        let (_dir, provider) = provider_for(&[("main.tf", MAIN_TF)]);
        let token = CancellationToken::new();

        let desired = provider
            .get(&token, ResourceKind::StorageBucket, "aws_s3_bucket.assets")
            .await
            .unwrap();
        assert_eq!(desired.metadata().source_identifier, "aws_s3_bucket.assets");

        let err = provider
            .get(&token, ResourceKind::ComputeInstance, "aws_s3_bucket.assets")
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ResourceNotFound);
    }

    #[tokio::test]
    async fn duplicate_addresses_are_fatal_for_both_paths() {
        let (_dir, provider) = provider_for(&[
            ("a.tf", "resource \"aws_instance\" \"web\" {\n  instance_type = \"t2.micro\"\n}\n"),
            ("b.tf", "resource \"aws_instance\" \"web\" {\n  instance_type = \"t2.small\"\n}\n"),
        ]);
        let token = CancellationToken::new();

        let err = provider.list(&token, ResourceKind::ComputeInstance).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::StateParse);

        let err = provider
            .get(&token, ResourceKind::ComputeInstance, "aws_instance.web")
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::StateParse);
    }

    #[tokio::test]
    async fn failing_block_skipped_in_list() {
        let (_dir, provider) = provider_for(&[(
            "main.tf",
            "resource \"aws_instance\" \"bad\" {\n  instance_type = var.never_declared\n}\n\nresource \"aws_instance\" \"good\" {\n  instance_type = \"t2.micro\"\n}\n",
        )]);
        let token = CancellationToken::new();
        let listed = provider.list(&token, ResourceKind::ComputeInstance).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].metadata().source_identifier, "aws_instance.good");

        // The same block is an explicit error through get.
        let err = provider
            .get(&token, ResourceKind::ComputeInstance, "aws_instance.bad")
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::StateParse);
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let (_dir, provider) = provider_for(&[("main.tf", MAIN_TF)]);
        let token = CancellationToken::new();
        token.cancel();
        let err = provider.list(&token, ResourceKind::ComputeInstance).await.unwrap_err();
        assert!(err.is_cancelled());

        // A cancelled attempt must not poison the cache for later callers.
        let fresh = CancellationToken::new();
        let listed = provider.list(&fresh, ResourceKind::ComputeInstance).await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn repeated_ebs_blocks_become_a_sequence() {
        let (_dir, provider) = provider_for(&[(
            "main.tf",
            r#"
resource "aws_instance" "web" {
  instance_type = "t2.micro"

  ebs_block_device {
    device_name = "/dev/sdf"
    volume_size = 100
  }

  ebs_block_device {
    device_name = "/dev/sdg"
    volume_size = 200
  }
}
"#,
        )]);
        let token = CancellationToken::new();
        let listed = provider.list(&token, ResourceKind::ComputeInstance).await.unwrap();
        let devices = listed[0].attributes()["ebs_block_devices"].as_list().unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(
            devices[1].as_map().unwrap()["delete_on_termination"],
            AttrValue::Bool(false)
        );
    }
}
