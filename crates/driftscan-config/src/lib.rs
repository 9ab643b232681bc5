//! Run configuration: YAML file, `DRIFT_` environment overlay and the
//! last-applied CLI attribute override, validated into typed config.

mod loader;
mod overrides;
mod raw;

pub use loader::{load, validate, Config, LogFormat, LogLevel, PlatformConfig, ReporterKind,
    ResourceConfig, Settings, StateBackend};
pub use overrides::{apply_attribute_overrides, apply_env_overlay};
pub use raw::RawConfig;
