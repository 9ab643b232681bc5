use serde::Deserialize;

/// Top-level tfstate document. Unknown fields are ignored so minor schema
/// revisions within a supported version still parse.
#[derive(Debug, Deserialize)]
pub(crate) struct RawState {
    pub version: i64,
    #[serde(default)]
    pub terraform_version: Option<String>,
    #[serde(default)]
    pub resources: Vec<RawResource>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawResource {
    #[serde(default)]
    pub mode: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub name: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub instances: Vec<RawInstance>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawInstance {
    #[serde(default)]
    pub schema_version: i64,
    #[serde(default)]
    pub index_key: Option<serde_json::Value>,
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl RawResource {
    pub fn is_managed(&self) -> bool {
        self.mode == "managed"
    }

    /// Logical address of one instance of this resource:
    /// `module.type.name` when a module path is present, else `type.name`,
    /// suffixed with the instance index for counted/for_each resources.
    pub fn address(&self, instance: &RawInstance) -> String {
        let base = match &self.module {
            Some(module) => format!("{}.{}.{}", module, self.resource_type, self.name),
            None => format!("{}.{}", self.resource_type, self.name),
        };
        match &instance.index_key {
            None => base,
            Some(serde_json::Value::String(key)) => format!("{base}[\"{key}\"]"),
            Some(other) => format!("{base}[{other}]"),
        }
    }

    /// Short provider name from the fully-qualified address, e.g.
    /// `provider["registry.terraform.io/hashicorp/aws"]` becomes `aws`.
    pub fn provider_type(&self) -> String {
        let inner = self
            .provider
            .trim_start_matches("provider[\"")
            .trim_end_matches("\"]");
        inner.rsplit('/').next().unwrap_or(inner).to_string()
    }
}
