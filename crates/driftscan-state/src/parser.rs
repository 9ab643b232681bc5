use driftscan_domain::{Error, ErrorCode, Result};

use crate::schema::RawState;

/// Minimum tfstate format version this parser understands.
const MIN_SUPPORTED_VERSION: i64 = 3;

/// A validated, in-memory state document.
#[derive(Debug)]
pub(crate) struct ParsedState {
    pub raw: RawState,
}

pub(crate) fn parse_state(path: &str, content: &str) -> Result<ParsedState> {
    if content.trim().is_empty() {
        return Err(Error::user(
            ErrorCode::StateParse,
            format!("state file '{path}' is empty"),
        )
        .with_suggestion("check that the path points at a real terraform state file"));
    }

    let raw: RawState = serde_json::from_str(content).map_err(|e| {
        Error::user(
            ErrorCode::StateParse,
            format!("state file '{path}' is not valid JSON"),
        )
        .with_suggestion("check that the path points at a real terraform state file")
        .with_source(e)
    })?;

    if raw.version < MIN_SUPPORTED_VERSION {
        return Err(Error::user(
            ErrorCode::UnsupportedStateVersion,
            format!(
                "state file '{path}' has version {}, minimum supported is {MIN_SUPPORTED_VERSION}",
                raw.version
            ),
        )
        .with_suggestion("upgrade the state with a recent terraform release"));
    }

    Ok(ParsedState { raw })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_content() {
        let err = parse_state("s.tfstate", "  \n").unwrap_err();
        assert_eq!(err.code, ErrorCode::StateParse);
        assert!(err.user_facing);
    }

    #[test]
    fn rejects_invalid_json() {
        let err = parse_state("s.tfstate", "{not json").unwrap_err();
        assert_eq!(err.code, ErrorCode::StateParse);
    }

    #[test]
    fn rejects_version_2() {
        let err = parse_state("s.tfstate", r#"{"version": 2, "resources": []}"#).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedStateVersion);
    }

    #[test]
    fn accepts_version_4() {
        let state = parse_state("s.tfstate", r#"{"version": 4, "resources": []}"#).unwrap();
        assert_eq!(state.raw.version, 4);
        assert!(state.raw.terraform_version.is_none());
    }
}
