use std::path::{Path, PathBuf};

use driftscan_domain::{Error, ErrorCode, Result};
use hcl::expr::{Expression, Object, ObjectKey, TemplateExpr};
use hcl::structure::{Attribute, Block, Body};
use hcl::Identifier;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::diag::Diagnostic;

/// One parsed configuration file, already lifted into HCL structure form.
/// `.tf.json` files are converted so everything downstream sees one shape.
#[derive(Debug)]
pub(crate) struct SourceFile {
    pub path: PathBuf,
    pub body: Body,
}

/// Load every `.tf` / `.tf.json` file directly under `dir` (non-recursive).
/// IO problems abort with a coded error; malformed files become diagnostics.
/// Cancellation is observed between files.
pub(crate) fn load_module_dir(
    dir: &Path,
    cancel: &CancellationToken,
    diags: &mut Vec<Diagnostic>,
) -> Result<Vec<SourceFile>> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        Error::user(
            ErrorCode::StateRead,
            format!("cannot read module directory '{}'", dir.display()),
        )
        .with_suggestion("check state.tfhcl.directory in the configuration")
        .with_source(e)
    })?;

    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| {
            Error::wrap(ErrorCode::StateRead, "error walking module directory", e)
        })?;
        let path = entry.path();
        if path.is_file() && (is_tf_json(&path) || is_tf(&path)) {
            paths.push(path);
        }
    }
    // Directory order is platform-dependent; sort for reproducible diagnostics.
    paths.sort();

    if paths.is_empty() {
        return Err(Error::user(
            ErrorCode::StateParse,
            format!("no .tf or .tf.json files in '{}'", dir.display()),
        )
        .with_suggestion("point state.tfhcl.directory at a terraform module"));
    }

    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        if cancel.is_cancelled() {
            return Err(Error::cancelled());
        }
        let content = std::fs::read_to_string(&path).map_err(|e| {
            Error::wrap(
                ErrorCode::StateRead,
                format!("cannot read '{}'", path.display()),
                e,
            )
        })?;
        let body = if is_tf_json(&path) {
            parse_tf_json(&path, &content, diags)
        } else {
            parse_tf(&path, &content, diags)
        };
        if let Some(body) = body {
            debug!(path = %path.display(), "parsed configuration file");
            files.push(SourceFile { path, body });
        }
    }
    Ok(files)
}

fn is_tf_json(path: &Path) -> bool {
    path.to_string_lossy().ends_with(".tf.json")
}

fn is_tf(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "tf")
}

fn parse_tf(path: &Path, content: &str, diags: &mut Vec<Diagnostic>) -> Option<Body> {
    match hcl::parse(content) {
        Ok(body) => Some(body),
        Err(e) => {
            diags.push(
                Diagnostic::error("configuration file does not parse")
                    .with_subject(path.display().to_string())
                    .with_detail(e.to_string()),
            );
            None
        }
    }
}

/// Lift terraform JSON syntax into the structural form the rest of the
/// evaluator operates on. Only the block types the evaluator understands
/// (`resource`, `variable`, `locals`) are lifted; the rest is ignored.
fn parse_tf_json(path: &Path, content: &str, diags: &mut Vec<Diagnostic>) -> Option<Body> {
    let root: serde_json::Value = match serde_json::from_str(content) {
        Ok(v) => v,
        Err(e) => {
            diags.push(
                Diagnostic::error("configuration file is not valid JSON")
                    .with_subject(path.display().to_string())
                    .with_detail(e.to_string()),
            );
            return None;
        }
    };
    let Some(root) = root.as_object() else {
        diags.push(
            Diagnostic::error("top level of a .tf.json file must be an object")
                .with_subject(path.display().to_string()),
        );
        return None;
    };

    let mut builder = Body::builder();
    for (section, value) in root {
        match (section.as_str(), value) {
            ("resource", serde_json::Value::Object(types)) => {
                for (resource_type, names) in types {
                    let Some(names) = names.as_object() else { continue };
                    for (name, attrs) in names {
                        let Some(attrs) = attrs.as_object() else { continue };
                        let mut block = Block::builder("resource")
                            .add_label(resource_type.as_str())
                            .add_label(name.as_str());
                        for (key, attr_value) in attrs {
                            block = block.add_attribute(Attribute::new(
                                Identifier::sanitized(key),
                                json_to_expression(attr_value),
                            ));
                        }
                        builder = builder.add_block(block.build());
                    }
                }
            }
            ("variable", serde_json::Value::Object(vars)) => {
                for (name, decl) in vars {
                    let mut block = Block::builder("variable").add_label(name.as_str());
                    if let Some(default) = decl.get("default") {
                        block = block.add_attribute(Attribute::new(
                            Identifier::sanitized("default"),
                            json_to_expression(default),
                        ));
                    }
                    builder = builder.add_block(block.build());
                }
            }
            ("locals", serde_json::Value::Object(locals)) => {
                let mut block = Block::builder("locals");
                for (name, local_value) in locals {
                    block = block.add_attribute(Attribute::new(
                        Identifier::sanitized(name),
                        json_to_expression(local_value),
                    ));
                }
                builder = builder.add_block(block.build());
            }
            (other, _) => {
                debug!(path = %path.display(), section = other, "skipping unsupported section");
            }
        }
    }
    Some(builder.build())
}

/// JSON value to HCL expression. Strings carrying `${` become template
/// expressions so interpolation works the same as in native syntax.
fn json_to_expression(value: &serde_json::Value) -> Expression {
    match value {
        serde_json::Value::Null => Expression::Null,
        serde_json::Value::Bool(b) => Expression::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Expression::Number(hcl::Number::from(i))
            } else {
                hcl::Number::from_f64(n.as_f64().unwrap_or(0.0))
                    .map(Expression::Number)
                    .unwrap_or(Expression::Null)
            }
        }
        serde_json::Value::String(s) => {
            if s.contains("${") {
                Expression::TemplateExpr(Box::new(TemplateExpr::QuotedString(s.clone())))
            } else {
                Expression::String(s.clone())
            }
        }
        serde_json::Value::Array(items) => {
            Expression::Array(items.iter().map(json_to_expression).collect())
        }
        serde_json::Value::Object(entries) => Expression::Object(Object::from_iter(
            entries.iter().map(|(k, v)| {
                (
                    ObjectKey::Expression(Expression::String(k.clone())),
                    json_to_expression(v),
                )
            }),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn empty_directory_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut diags = Vec::new();
        let err = load_module_dir(dir.path(), &CancellationToken::new(), &mut diags).unwrap_err();
        assert_eq!(err.code, ErrorCode::StateParse);
    }

    #[test]
    fn loads_tf_and_tf_json_but_nothing_else() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "main.tf", "locals {\n  a = 1\n}\n");
        write(dir.path(), "extra.tf.json", r#"{"locals": {"b": 2}}"#);
        write(dir.path(), "README.md", "nope");

        let mut diags = Vec::new();
        let files = load_module_dir(dir.path(), &CancellationToken::new(), &mut diags).unwrap();
        assert_eq!(files.len(), 2);
        assert!(diags.is_empty());
    }

    #[test]
    fn broken_hcl_becomes_a_fatal_diagnostic() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "main.tf", "resource \"aws_instance\" {\n");

        let mut diags = Vec::new();
        load_module_dir(dir.path(), &CancellationToken::new(), &mut diags).unwrap();
        assert!(diags.iter().any(Diagnostic::is_error));
    }

    #[test]
    fn cancelled_token_stops_loading() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "main.tf", "locals {\n  a = 1\n}\n");
        let token = CancellationToken::new();
        token.cancel();
        let mut diags = Vec::new();
        let err = load_module_dir(dir.path(), &token, &mut diags).unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn tf_json_resources_lift_to_blocks() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "main.tf.json",
            r#"{"resource": {"aws_instance": {"web": {"instance_type": "t2.micro"}}}}"#,
        );
        let mut diags = Vec::new();
        let files = load_module_dir(dir.path(), &CancellationToken::new(), &mut diags).unwrap();
        let blocks: Vec<_> = files[0].body.blocks().collect();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].identifier(), "resource");
    }
}
