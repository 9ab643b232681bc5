use driftscan_domain::{Error, ErrorCode, Result};
use tracing::warn;

use crate::loader::Config;
use crate::raw::RawConfig;

/// Prefix of environment variables that overlay configuration options.
pub const ENV_PREFIX: &str = "DRIFT_";

/// Overlay recognized `DRIFT_*` environment variables onto the raw
/// configuration (dots in the option path become underscores, e.g.
/// `DRIFT_SETTINGS_LOG_LEVEL` sets `settings.log_level`). The option table
/// is closed, so underscores inside option names stay unambiguous;
/// unrecognized variables only produce a warning.
pub fn apply_env_overlay(
    raw: &mut RawConfig,
    vars: impl Iterator<Item = (String, String)>,
) -> Result<()> {
    for (name, value) in vars {
        let Some(option) = name.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        match option {
            "SETTINGS_LOG_LEVEL" => raw.settings.log_level = Some(value),
            "SETTINGS_LOG_FORMAT" => raw.settings.log_format = Some(value),
            "SETTINGS_CONCURRENCY" => {
                raw.settings.concurrency = Some(parse_number(&name, &value)?);
            }
            "SETTINGS_MATCHER" => raw.settings.matcher = Some(value),
            "SETTINGS_MATCHER_CONFIG_TAG_KEY" => {
                raw.settings.matcher_config.tag.key = Some(value);
            }
            "SETTINGS_REPORTER" => raw.settings.reporter = Some(value),
            "SETTINGS_REPORTER_CONFIG_TEXT_NO_COLOR" => {
                raw.settings.reporter_config.text.no_color = Some(parse_bool(&name, &value)?);
            }
            "STATE_PROVIDER_TYPE" => raw.state.provider_type = Some(value),
            "STATE_TFSTATE_PATH" => raw.state.tfstate.path = Some(value),
            "STATE_TFHCL_DIRECTORY" => raw.state.tfhcl.directory = Some(value),
            "STATE_TFHCL_WORKSPACE" => raw.state.tfhcl.workspace = Some(value),
            "PLATFORM_AWS_REGION" => raw.platform.aws.region = Some(value),
            "PLATFORM_AWS_PROFILE" => raw.platform.aws.profile = Some(value),
            "PLATFORM_AWS_API_RPS" => {
                raw.platform.aws.api_rps = Some(parse_number(&name, &value)?);
            }
            // Consumed by the CLI flag layer, not a config option.
            "CONFIG" => {}
            other => {
                warn!(variable = %format!("{ENV_PREFIX}{other}"), "unrecognized configuration variable ignored");
            }
        }
    }
    Ok(())
}

fn parse_number(name: &str, value: &str) -> Result<i64> {
    value.parse::<i64>().map_err(|_| {
        Error::user(
            ErrorCode::ConfigValidation,
            format!("environment variable {name} must be a number; got '{value}'"),
        )
    })
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(Error::user(
            ErrorCode::ConfigValidation,
            format!("environment variable {name} must be a boolean; got '{value}'"),
        )),
    }
}

/// Apply the `--attributes` override, the last layer after file and
/// environment. Grammar: semicolon-separated `kind=attr1,attr2` entries.
/// A kind that is not already configured is ignored with a warning.
pub fn apply_attribute_overrides(config: &mut Config, spec: &str) -> Result<()> {
    for entry in spec.split(';').filter(|entry| !entry.trim().is_empty()) {
        let Some((kind_text, attrs_text)) = entry.split_once('=') else {
            return Err(Error::user(
                ErrorCode::ConfigValidation,
                format!("invalid --attributes entry '{entry}'; expected kind=attr1,attr2"),
            ));
        };
        let kind_text = kind_text.trim();
        let attributes: Vec<String> = attrs_text
            .split(',')
            .map(str::trim)
            .filter(|attr| !attr.is_empty())
            .map(String::from)
            .collect();
        if attributes.is_empty() {
            return Err(Error::user(
                ErrorCode::ConfigValidation,
                format!("--attributes entry '{entry}' lists no attribute names"),
            ));
        }

        let Ok(kind) = kind_text.parse::<driftscan_domain::ResourceKind>() else {
            warn!(kind = kind_text, "--attributes names an unknown kind; ignoring");
            continue;
        };
        match config.resources.iter_mut().find(|r| r.kind == kind) {
            Some(resource) => resource.attributes = attributes,
            None => {
                warn!(
                    kind = %kind,
                    "--attributes names a kind absent from configured resources; ignoring"
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::validate;
    use crate::raw::RawResourceConfig;
    use std::collections::BTreeMap;

    fn minimal_raw() -> RawConfig {
        let mut raw = RawConfig::default();
        raw.settings.matcher_config.tag.key = Some("TFResourceAddress".to_string());
        raw.state.provider_type = Some("tfstate".to_string());
        raw.state.tfstate.path = Some("terraform.tfstate".to_string());
        raw.resources.push(RawResourceConfig {
            kind: "compute_instance".to_string(),
            platform_filters: BTreeMap::new(),
            attributes: vec!["instance_type".to_string()],
        });
        raw
    }

    #[test]
    fn env_overlay_sets_recognized_options() {
        let mut raw = minimal_raw();
        apply_env_overlay(
            &mut raw,
            vec![
                ("DRIFT_SETTINGS_LOG_LEVEL".to_string(), "debug".to_string()),
                ("DRIFT_SETTINGS_CONCURRENCY".to_string(), "3".to_string()),
                ("DRIFT_PLATFORM_AWS_REGION".to_string(), "eu-west-1".to_string()),
                ("HOME".to_string(), "/root".to_string()),
                ("DRIFT_NOT_A_REAL_OPTION".to_string(), "x".to_string()),
            ]
            .into_iter(),
        )
        .unwrap();
        assert_eq!(raw.settings.log_level.as_deref(), Some("debug"));
        assert_eq!(raw.settings.concurrency, Some(3));
        assert_eq!(raw.platform.aws.region.as_deref(), Some("eu-west-1"));
    }

    #[test]
    fn env_overlay_rejects_malformed_numbers() {
        let mut raw = minimal_raw();
        let err = apply_env_overlay(
            &mut raw,
            vec![("DRIFT_SETTINGS_CONCURRENCY".to_string(), "many".to_string())].into_iter(),
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigValidation);
    }

    #[test]
    fn attribute_override_replaces_configured_kind() {
        let mut config = validate(minimal_raw()).unwrap();
        apply_attribute_overrides(&mut config, "compute_instance=tags,image_id").unwrap();
        assert_eq!(config.resources[0].attributes, vec!["tags", "image_id"]);
    }

    #[test]
    fn attribute_override_ignores_unconfigured_kind() {
        let mut config = validate(minimal_raw()).unwrap();
        apply_attribute_overrides(&mut config, "storage_bucket=acl;compute_instance=tags").unwrap();
        assert_eq!(config.resources.len(), 1);
        assert_eq!(config.resources[0].attributes, vec!["tags"]);
    }

    #[test]
    fn attribute_override_grammar_errors() {
        let mut config = validate(minimal_raw()).unwrap();
        assert!(apply_attribute_overrides(&mut config, "compute_instance").is_err());
        assert!(apply_attribute_overrides(&mut config, "compute_instance=").is_err());
    }
}
