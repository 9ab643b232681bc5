use std::collections::BTreeMap;
use std::path::Path;

use driftscan_domain::{Error, Result};
use hcl::eval::{Context, Evaluate, FuncArgs, FuncDef, ParamType};
use hcl::expr::Expression;
use hcl::Value;
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::diag::Diagnostic;
use crate::eval::local_dependencies;
use crate::files::SourceFile;

/// Fully-constructed static evaluation scope: `var`, `local`, `path` and
/// `terraform` objects plus the supported functions.
#[derive(Debug)]
pub(crate) struct Scope {
    var: Value,
    local: Value,
    path: Value,
    terraform: Value,
}

impl Scope {
    pub fn context(&self) -> Context<'_> {
        let mut ctx = base_context();
        ctx.declare_var("var", self.var.clone());
        ctx.declare_var("local", self.local.clone());
        ctx.declare_var("path", self.path.clone());
        ctx.declare_var("terraform", self.terraform.clone());
        ctx
    }
}

/// Context with functions only, for evaluating constant expressions such as
/// variable defaults and tfvars values.
fn base_context<'a>() -> Context<'a> {
    let mut ctx = Context::new();
    ctx.declare_func(
        "upper",
        FuncDef::builder().param(ParamType::String).build(func_upper),
    );
    ctx.declare_func(
        "lower",
        FuncDef::builder().param(ParamType::String).build(func_lower),
    );
    ctx.declare_func(
        "join",
        FuncDef::builder()
            .param(ParamType::String)
            .param(ParamType::Array(Box::new(ParamType::Any)))
            .build(func_join),
    );
    ctx.declare_func(
        "length",
        FuncDef::builder().param(ParamType::Any).build(func_length),
    );
    ctx
}

fn func_upper(args: FuncArgs) -> std::result::Result<Value, String> {
    let s = args[0].as_str().ok_or("upper: argument must be a string")?;
    Ok(Value::from(s.to_uppercase()))
}

fn func_lower(args: FuncArgs) -> std::result::Result<Value, String> {
    let s = args[0].as_str().ok_or("lower: argument must be a string")?;
    Ok(Value::from(s.to_lowercase()))
}

fn func_join(args: FuncArgs) -> std::result::Result<Value, String> {
    let separator = args[0].as_str().ok_or("join: separator must be a string")?;
    let items = args[1].as_array().ok_or("join: second argument must be a list")?;
    let rendered = items
        .iter()
        .map(scalar_text)
        .collect::<std::result::Result<Vec<String>, String>>()?;
    Ok(Value::from(rendered.join(separator)))
}

fn func_length(args: FuncArgs) -> std::result::Result<Value, String> {
    let length = match &args[0] {
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        Value::Object(entries) => entries.len(),
        other => return Err(format!("length: cannot measure {other}")),
    };
    Ok(Value::from(length as u64))
}

fn scalar_text(value: &Value) -> std::result::Result<String, String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(format!("cannot render {other} as a string")),
    }
}

/// Build the module scope. Fatal problems (duplicate declarations, cyclic or
/// unevaluable locals, unreadable var files) are pushed onto `diags`; the
/// caller checks for error severity before using the returned scope.
/// Cancellation is observed between files, var files and locals.
pub(crate) fn build_scope(
    files: &[SourceFile],
    module_dir: &Path,
    var_files: &[std::path::PathBuf],
    workspace: &str,
    cancel: &CancellationToken,
    diags: &mut Vec<Diagnostic>,
) -> Result<Scope> {
    let declared = collect_variables(files, cancel, diags)?;
    let overrides = load_var_files(var_files, cancel, diags)?;

    let mut var_object = hcl::value::Map::new();
    for (name, default) in &declared {
        let value = match overrides.get(name) {
            Some(overridden) => Some(overridden.clone()),
            None => default.clone(),
        };
        // Declared-but-valueless variables stay absent; referencing one is
        // an evaluation error at the point of use.
        if let Some(value) = value {
            var_object.insert(name.clone(), value);
        }
    }
    for name in overrides.keys() {
        if !declared.contains_key(name) {
            warn!(variable = %name, "variable override has no matching declaration");
        }
    }

    let module_path = module_dir
        .canonicalize()
        .unwrap_or_else(|_| module_dir.to_path_buf());
    let path_object = Value::Object(hcl::value::Map::from_iter([(
        "module".to_string(),
        Value::from(module_path.display().to_string()),
    )]));
    let terraform_object = Value::Object(hcl::value::Map::from_iter([(
        "workspace".to_string(),
        Value::from(workspace.to_string()),
    )]));

    let mut scope = Scope {
        var: Value::Object(var_object),
        local: Value::Object(hcl::value::Map::new()),
        path: path_object,
        terraform: terraform_object,
    };
    evaluate_locals(files, &mut scope, cancel, diags)?;
    Ok(scope)
}

fn collect_variables(
    files: &[SourceFile],
    cancel: &CancellationToken,
    diags: &mut Vec<Diagnostic>,
) -> Result<BTreeMap<String, Option<Value>>> {
    let ctx = base_context();
    let mut declared: BTreeMap<String, Option<Value>> = BTreeMap::new();

    for file in files {
        if cancel.is_cancelled() {
            return Err(Error::cancelled());
        }
        for block in file.body.blocks() {
            if block.identifier() != "variable" {
                continue;
            }
            let Some(name) = block.labels().first().map(|l| l.as_str().to_string()) else {
                diags.push(
                    Diagnostic::error("variable block without a name")
                        .with_subject(file.path.display().to_string()),
                );
                continue;
            };
            if declared.contains_key(&name) {
                diags.push(
                    Diagnostic::error(format!("duplicate variable declaration '{name}'"))
                        .with_subject(file.path.display().to_string()),
                );
                continue;
            }

            let default = block
                .body()
                .attributes()
                .find(|attr| attr.key() == "default")
                .map(|attr| attr.expr().evaluate(&ctx));
            match default {
                None => {
                    declared.insert(name, None);
                }
                Some(Ok(value)) => {
                    declared.insert(name, Some(value));
                }
                Some(Err(e)) => {
                    diags.push(
                        Diagnostic::error(format!("cannot evaluate default of variable '{name}'"))
                            .with_subject(file.path.display().to_string())
                            .with_detail(e.to_string()),
                    );
                    declared.insert(name, None);
                }
            }
        }
    }
    Ok(declared)
}

fn load_var_files(
    var_files: &[std::path::PathBuf],
    cancel: &CancellationToken,
    diags: &mut Vec<Diagnostic>,
) -> Result<BTreeMap<String, Value>> {
    let ctx = base_context();
    let mut overrides = BTreeMap::new();

    for path in var_files {
        if cancel.is_cancelled() {
            return Err(Error::cancelled());
        }
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                diags.push(
                    Diagnostic::error("cannot read variable file")
                        .with_subject(path.display().to_string())
                        .with_detail(e.to_string()),
                );
                continue;
            }
        };

        if path.to_string_lossy().ends_with(".json") {
            match serde_json::from_str::<serde_json::Value>(&content) {
                Ok(serde_json::Value::Object(entries)) => {
                    for (name, value) in entries {
                        overrides.insert(name, json_to_hcl_value(value));
                    }
                }
                Ok(_) => diags.push(
                    Diagnostic::error("variable file must contain a JSON object")
                        .with_subject(path.display().to_string()),
                ),
                Err(e) => diags.push(
                    Diagnostic::error("variable file is not valid JSON")
                        .with_subject(path.display().to_string())
                        .with_detail(e.to_string()),
                ),
            }
            continue;
        }

        match hcl::parse(&content) {
            Ok(body) => {
                for attr in body.attributes() {
                    match attr.expr().evaluate(&ctx) {
                        Ok(value) => {
                            overrides.insert(attr.key().to_string(), value);
                        }
                        Err(e) => diags.push(
                            Diagnostic::error(format!(
                                "cannot evaluate variable '{}' in file",
                                attr.key()
                            ))
                            .with_subject(path.display().to_string())
                            .with_detail(e.to_string()),
                        ),
                    }
                }
            }
            Err(e) => diags.push(
                Diagnostic::error("variable file does not parse")
                    .with_subject(path.display().to_string())
                    .with_detail(e.to_string()),
            ),
        }
    }
    Ok(overrides)
}

fn json_to_hcl_value(value: serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::from(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else {
                Value::from(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => Value::from(s),
        serde_json::Value::Array(items) => {
            Value::Array(items.into_iter().map(json_to_hcl_value).collect())
        }
        serde_json::Value::Object(entries) => Value::Object(
            entries
                .into_iter()
                .map(|(k, v)| (k, json_to_hcl_value(v)))
                .collect(),
        ),
    }
}

/// Evaluate all `locals` blocks in dependency order. File order carries no
/// meaning; the order comes from a topological sort of `local.*` references.
fn evaluate_locals(
    files: &[SourceFile],
    scope: &mut Scope,
    cancel: &CancellationToken,
    diags: &mut Vec<Diagnostic>,
) -> Result<()> {
    let mut definitions: BTreeMap<String, (Expression, String)> = BTreeMap::new();
    for file in files {
        if cancel.is_cancelled() {
            return Err(Error::cancelled());
        }
        for block in file.body.blocks() {
            if block.identifier() != "locals" {
                continue;
            }
            for attr in block.body().attributes() {
                let name = attr.key().to_string();
                if definitions.contains_key(&name) {
                    diags.push(
                        Diagnostic::error(format!("duplicate local value '{name}'"))
                            .with_subject(file.path.display().to_string()),
                    );
                    continue;
                }
                definitions.insert(name, (attr.expr().clone(), file.path.display().to_string()));
            }
        }
    }
    if definitions.is_empty() {
        return Ok(());
    }

    let mut graph: DiGraph<String, ()> = DiGraph::new();
    let indices: BTreeMap<String, _> = definitions
        .keys()
        .map(|name| (name.clone(), graph.add_node(name.clone())))
        .collect();
    for (name, (expr, _)) in &definitions {
        for dependency in local_dependencies(expr) {
            if let Some(dep_index) = indices.get(&dependency) {
                // Dependency first: edge dep -> dependent.
                graph.add_edge(*dep_index, indices[name], ());
            }
        }
    }

    let order = match toposort(&graph, None) {
        Ok(order) => order,
        Err(_) => {
            diags.push(Diagnostic::error("cyclic reference between local values"));
            return Ok(());
        }
    };

    let mut local_object = hcl::value::Map::new();
    for index in order {
        if cancel.is_cancelled() {
            return Err(Error::cancelled());
        }
        let name = graph[index].clone();
        let (expr, subject) = &definitions[&name];
        scope.local = Value::Object(local_object.clone());
        match expr.evaluate(&scope.context()) {
            Ok(value) => {
                debug!(local = %name, "evaluated local value");
                local_object.insert(name, value);
            }
            Err(e) => {
                diags.push(
                    Diagnostic::error(format!("cannot evaluate local value '{name}'"))
                        .with_subject(subject.clone())
                        .with_detail(e.to_string()),
                );
            }
        }
    }
    scope.local = Value::Object(local_object);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::has_fatal;
    use crate::files::load_module_dir;

    fn scope_for(sources: &[(&str, &str)], var_files: &[(&str, &str)]) -> (Scope, Vec<Diagnostic>) {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in sources {
            std::fs::write(dir.path().join(name), content).unwrap();
        }
        let mut var_paths = Vec::new();
        for (name, content) in var_files {
            let path = dir.path().join(name);
            std::fs::write(&path, content).unwrap();
            var_paths.push(path);
        }

        let token = CancellationToken::new();
        let mut diags = Vec::new();
        let files = load_module_dir(dir.path(), &token, &mut diags).unwrap();
        let scope =
            build_scope(&files, dir.path(), &var_paths, "default", &token, &mut diags).unwrap();
        (scope, diags)
    }

    fn eval(scope: &Scope, src: &str) -> Value {
        let body = hcl::parse(src).unwrap();
        let attr = body.attributes().next().unwrap();
        attr.expr().evaluate(&scope.context()).unwrap()
    }

    #[test]
    fn variable_default_used_when_no_override() {
        let (scope, diags) =
            scope_for(&[("main.tf", "variable \"region\" {\n  default = \"eu-west-1\"\n}\n")], &[]);
        assert!(!has_fatal(&diags));
        assert_eq!(eval(&scope, "a = var.region"), Value::from("eu-west-1"));
    }

    #[test]
    fn var_file_overrides_default() {
        let (scope, diags) = scope_for(
            &[("main.tf", "variable \"region\" {\n  default = \"eu-west-1\"\n}\n")],
            &[("prod.tfvars", "region = \"us-east-2\"\n")],
        );
        assert!(!has_fatal(&diags));
        assert_eq!(eval(&scope, "a = var.region"), Value::from("us-east-2"));
    }

    #[test]
    fn json_var_file_supported() {
        let (scope, diags) = scope_for(
            &[("main.tf", "variable \"count_max\" {}\n")],
            &[("prod.tfvars.json", r#"{"count_max": 3}"#)],
        );
        assert!(!has_fatal(&diags));
        assert_eq!(eval(&scope, "a = var.count_max"), Value::from(3));
    }

    #[test]
    fn valueless_variable_errors_on_reference() {
        let (scope, diags) = scope_for(&[("main.tf", "variable \"unset\" {}\n")], &[]);
        assert!(!has_fatal(&diags));
        let body = hcl::parse("a = var.unset").unwrap();
        let attr = body.attributes().next().unwrap();
        assert!(attr.expr().evaluate(&scope.context()).is_err());
    }

    #[test]
    fn locals_evaluate_in_dependency_order_across_files() {
        // "derived" is defined before its dependency, and in an earlier file.
        let (scope, diags) = scope_for(
            &[
                ("a.tf", "locals {\n  derived = \"${local.base}-app\"\n}\n"),
                ("b.tf", "locals {\n  base = var.prefix\n}\n"),
                ("vars.tf", "variable \"prefix\" {\n  default = \"drift\"\n}\n"),
            ],
            &[],
        );
        assert!(!has_fatal(&diags), "{diags:?}");
        assert_eq!(eval(&scope, "a = local.derived"), Value::from("drift-app"));
    }

    #[test]
    fn duplicate_local_is_fatal() {
        let (_scope, diags) = scope_for(
            &[
                ("a.tf", "locals {\n  x = 1\n}\n"),
                ("b.tf", "locals {\n  x = 2\n}\n"),
            ],
            &[],
        );
        assert!(has_fatal(&diags));
    }

    #[test]
    fn cyclic_locals_are_fatal() {
        let (_scope, diags) = scope_for(
            &[("a.tf", "locals {\n  x = local.y\n  y = local.x\n}\n")],
            &[],
        );
        assert!(has_fatal(&diags));
    }

    #[test]
    fn workspace_and_functions_available() {
        let (scope, _diags) = scope_for(&[("main.tf", "locals {\n  a = 1\n}\n")], &[]);
        assert_eq!(eval(&scope, "a = terraform.workspace"), Value::from("default"));
        assert_eq!(eval(&scope, "a = upper(\"abc\")"), Value::from("ABC"));
        let module = eval(&scope, "a = path.module");
        assert!(module.as_str().unwrap().starts_with('/'));
    }

    #[test]
    fn join_and_length_functions() {
        let (scope, _diags) = scope_for(&[("main.tf", "locals {\n  a = 1\n}\n")], &[]);
        assert_eq!(
            eval(&scope, "a = join(\"-\", [\"a\", \"b\", 3])"),
            Value::from("a-b-3")
        );
        assert_eq!(eval(&scope, "a = length([1, 2, 3])"), Value::from(3));
        assert_eq!(eval(&scope, "a = length(\"abcd\")"), Value::from(4));
    }
}
