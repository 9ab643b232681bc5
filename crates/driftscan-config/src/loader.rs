use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use driftscan_domain::{Error, ErrorCode, ResourceKind, Result};

use crate::raw::RawConfig;

pub const DEFAULT_CONCURRENCY: usize = 10;
pub const DEFAULT_API_RPS: u32 = 10;
pub const DEFAULT_WORKSPACE: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(validation(format!(
                "settings.log_level must be one of debug, info, warn, error; got '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(validation(format!(
                "settings.log_format must be text or json; got '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReporterKind {
    Text,
    Json,
}

impl std::str::FromStr for ReporterKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(ReporterKind::Text),
            "json" => Ok(ReporterKind::Json),
            other => Err(validation(format!(
                "settings.reporter must be text or json; got '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub log_level: LogLevel,
    pub log_format: LogFormat,
    pub concurrency: usize,
    pub matcher_tag_key: String,
    pub reporter: ReporterKind,
    pub reporter_no_color: bool,
}

/// Which desired-state source to use; exactly one is configured.
#[derive(Debug, Clone)]
pub enum StateBackend {
    Tfstate {
        path: PathBuf,
    },
    Tfhcl {
        directory: PathBuf,
        var_files: Vec<PathBuf>,
        workspace: String,
    },
}

impl StateBackend {
    pub fn provider_name(&self) -> &'static str {
        match self {
            StateBackend::Tfstate { .. } => "tfstate",
            StateBackend::Tfhcl { .. } => "tfhcl",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlatformConfig {
    pub region: Option<String>,
    pub profile: Option<String>,
    pub api_rps: u32,
}

#[derive(Debug, Clone)]
pub struct ResourceConfig {
    pub kind: ResourceKind,
    pub platform_filters: BTreeMap<String, String>,
    pub attributes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub settings: Settings,
    pub state: StateBackend,
    pub platform: PlatformConfig,
    pub resources: Vec<ResourceConfig>,
}

fn validation(message: impl Into<String>) -> Error {
    Error::user(ErrorCode::ConfigValidation, message)
        .with_suggestion("review the configuration file against the documented options")
}

/// Read and parse the raw configuration file. Overlay and validation are
/// separate steps so the CLI can weave in environment and flag overrides.
pub fn load(path: &Path) -> Result<RawConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::user(
            ErrorCode::ConfigRead,
            format!("cannot read config file '{}'", path.display()),
        )
        .with_suggestion("pass --config with a readable configuration file")
        .with_source(e)
    })?;
    serde_yaml::from_str(&content).map_err(|e| {
        Error::user(
            ErrorCode::ConfigParse,
            format!("config file '{}' is not valid YAML", path.display()),
        )
        .with_source(e)
    })
}

/// Validate a raw configuration into the typed form the engine consumes.
pub fn validate(raw: RawConfig) -> Result<Config> {
    let log_level = raw
        .settings
        .log_level
        .as_deref()
        .unwrap_or("info")
        .parse::<LogLevel>()?;
    let log_format = raw
        .settings
        .log_format
        .as_deref()
        .unwrap_or("text")
        .parse::<LogFormat>()?;

    let concurrency = match raw.settings.concurrency {
        None => DEFAULT_CONCURRENCY,
        Some(n) if n >= 1 => n as usize,
        Some(n) => {
            return Err(validation(format!("settings.concurrency must be >= 1; got {n}")));
        }
    };

    match raw.settings.matcher.as_deref() {
        None | Some("tag") => {}
        Some(other) => {
            return Err(validation(format!("settings.matcher must be 'tag'; got '{other}'")));
        }
    }
    let matcher_tag_key = raw
        .settings
        .matcher_config
        .tag
        .key
        .filter(|key| !key.is_empty())
        .ok_or_else(|| validation("settings.matcher_config.tag.key must be set and non-empty"))?;

    let reporter = raw
        .settings
        .reporter
        .as_deref()
        .unwrap_or("text")
        .parse::<ReporterKind>()?;
    let reporter_no_color = raw.settings.reporter_config.text.no_color.unwrap_or(false);

    let state = match raw.state.provider_type.as_deref() {
        Some("tfstate") => {
            let path = raw
                .state
                .tfstate
                .path
                .filter(|p| !p.is_empty())
                .ok_or_else(|| validation("state.tfstate.path is required for provider_type tfstate"))?;
            StateBackend::Tfstate { path: PathBuf::from(path) }
        }
        Some("tfhcl") => {
            let directory = raw
                .state
                .tfhcl
                .directory
                .filter(|d| !d.is_empty())
                .ok_or_else(|| {
                    validation("state.tfhcl.directory is required for provider_type tfhcl")
                })?;
            StateBackend::Tfhcl {
                directory: PathBuf::from(directory),
                var_files: raw.state.tfhcl.var_files.iter().map(PathBuf::from).collect(),
                workspace: raw
                    .state
                    .tfhcl
                    .workspace
                    .filter(|w| !w.is_empty())
                    .unwrap_or_else(|| DEFAULT_WORKSPACE.to_string()),
            }
        }
        Some(other) => {
            return Err(validation(format!(
                "state.provider_type must be tfstate or tfhcl; got '{other}'"
            )));
        }
        None => return Err(validation("state.provider_type is required")),
    };

    let api_rps = match raw.platform.aws.api_rps {
        None => DEFAULT_API_RPS,
        Some(n) if (1..=100).contains(&n) => n as u32,
        Some(n) => {
            return Err(validation(format!(
                "platform.aws.api_rps must be between 1 and 100; got {n}"
            )));
        }
    };
    let platform = PlatformConfig {
        region: raw.platform.aws.region,
        profile: raw.platform.aws.profile,
        api_rps,
    };

    if raw.resources.is_empty() {
        return Err(validation("at least one entry under resources is required"));
    }
    let mut seen_kinds = BTreeSet::new();
    let mut resources = Vec::with_capacity(raw.resources.len());
    for resource in raw.resources {
        let kind = resource
            .kind
            .parse::<ResourceKind>()
            .map_err(|_| validation(format!("unknown resource kind '{}'", resource.kind)))?;
        if !seen_kinds.insert(kind) {
            return Err(validation(format!("resource kind '{kind}' is configured twice")));
        }
        if resource.attributes.is_empty() {
            return Err(validation(format!(
                "resources[{kind}].attributes must not be empty"
            )));
        }
        if resource.attributes.iter().any(String::is_empty) {
            return Err(validation(format!(
                "resources[{kind}].attributes must not contain empty names"
            )));
        }
        resources.push(ResourceConfig {
            kind,
            platform_filters: resource.platform_filters,
            attributes: resource.attributes,
        });
    }

    Ok(Config {
        settings: Settings {
            log_level,
            log_format,
            concurrency,
            matcher_tag_key,
            reporter,
            reporter_no_color,
        },
        state,
        platform,
        resources,
    })
}
