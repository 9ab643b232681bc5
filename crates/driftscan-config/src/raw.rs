use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Raw YAML shape of the configuration file. Everything is optional here;
/// defaulting and validation happen in the loader.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawConfig {
    #[serde(default)]
    pub settings: RawSettings,
    #[serde(default)]
    pub state: RawStateConfig,
    #[serde(default)]
    pub platform: RawPlatformConfig,
    #[serde(default)]
    pub resources: Vec<RawResourceConfig>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawSettings {
    pub log_level: Option<String>,
    pub log_format: Option<String>,
    pub concurrency: Option<i64>,
    pub matcher: Option<String>,
    #[serde(default)]
    pub matcher_config: RawMatcherConfig,
    pub reporter: Option<String>,
    #[serde(default)]
    pub reporter_config: RawReporterConfig,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawMatcherConfig {
    #[serde(default)]
    pub tag: RawTagMatcherConfig,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawTagMatcherConfig {
    pub key: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawReporterConfig {
    #[serde(default)]
    pub text: RawTextReporterConfig,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawTextReporterConfig {
    pub no_color: Option<bool>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawStateConfig {
    pub provider_type: Option<String>,
    #[serde(default)]
    pub tfstate: RawTfStateConfig,
    #[serde(default)]
    pub tfhcl: RawTfHclConfig,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawTfStateConfig {
    pub path: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawTfHclConfig {
    pub directory: Option<String>,
    #[serde(default)]
    pub var_files: Vec<String>,
    pub workspace: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawPlatformConfig {
    #[serde(default)]
    pub aws: RawAwsConfig,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawAwsConfig {
    pub region: Option<String>,
    pub profile: Option<String>,
    pub api_rps: Option<i64>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RawResourceConfig {
    pub kind: String,
    #[serde(default)]
    pub platform_filters: BTreeMap<String, String>,
    #[serde(default)]
    pub attributes: Vec<String>,
}
