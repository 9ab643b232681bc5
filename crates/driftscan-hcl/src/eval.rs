use std::collections::{BTreeMap, BTreeSet};

use driftscan_domain::{AttrMap, AttrValue, Error, Result};
use hcl::expr::{Expression, ObjectKey, TemplateExpr, TraversalOperator};
use hcl::eval::Evaluate;
use hcl::structure::Body;
use hcl::template::{Element, Template};
use hcl::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::diag::Diagnostic;
use crate::scope::Scope;

/// A `root.attr` reference found in an expression (`var.region` gives
/// root `var`, attr `region`; a bare `count` gives root `count`, no attr).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct FreeRef {
    pub root: String,
    pub attr: Option<String>,
}

/// The roots the static scope can resolve. Anything else (resource
/// references, data sources, `count`, ...) is unknown at evaluation time.
const STATIC_ROOTS: &[&str] = &["var", "local", "path", "terraform"];

pub(crate) fn collect_refs(expr: &Expression, out: &mut BTreeSet<FreeRef>) {
    match expr {
        Expression::Variable(v) => {
            out.insert(FreeRef { root: v.as_str().to_string(), attr: None });
        }
        Expression::Traversal(t) => {
            if let Expression::Variable(root) = &t.expr {
                let attr = t.operators.first().and_then(|op| match op {
                    TraversalOperator::GetAttr(ident) => Some(ident.as_str().to_string()),
                    _ => None,
                });
                out.insert(FreeRef { root: root.as_str().to_string(), attr });
            } else {
                collect_refs(&t.expr, out);
            }
            for op in &t.operators {
                if let TraversalOperator::Index(idx) = op {
                    collect_refs(idx, out);
                }
            }
        }
        Expression::Array(items) => {
            for item in items {
                collect_refs(item, out);
            }
        }
        Expression::Object(entries) => {
            for (key, value) in entries {
                if let ObjectKey::Expression(key_expr) = key {
                    collect_refs(key_expr, out);
                }
                collect_refs(value, out);
            }
        }
        Expression::TemplateExpr(template) => collect_template_refs(template, out),
        Expression::FuncCall(call) => {
            for arg in &call.args {
                collect_refs(arg, out);
            }
        }
        Expression::Parenthesis(inner) => collect_refs(inner, out),
        Expression::Conditional(cond) => {
            collect_refs(&cond.cond_expr, out);
            collect_refs(&cond.true_expr, out);
            collect_refs(&cond.false_expr, out);
        }
        Expression::Operation(op) => match op.as_ref() {
            hcl::expr::Operation::Unary(unary) => collect_refs(&unary.expr, out),
            hcl::expr::Operation::Binary(binary) => {
                collect_refs(&binary.lhs_expr, out);
                collect_refs(&binary.rhs_expr, out);
            }
        },
        Expression::ForExpr(for_expr) => {
            collect_refs(&for_expr.collection_expr, out);
            if let Some(key_expr) = &for_expr.key_expr {
                collect_refs(key_expr, out);
            }
            collect_refs(&for_expr.value_expr, out);
            if let Some(cond) = &for_expr.cond_expr {
                collect_refs(cond, out);
            }
        }
        _ => {}
    }
}

fn collect_template_refs(template: &TemplateExpr, out: &mut BTreeSet<FreeRef>) {
    let Ok(parsed) = Template::from_expr(template) else {
        return;
    };
    collect_template_element_refs(&parsed, out);
}

fn collect_template_element_refs(template: &Template, out: &mut BTreeSet<FreeRef>) {
    for element in template.elements() {
        match element {
            Element::Literal(_) => {}
            Element::Interpolation(interp) => collect_refs(&interp.expr, out),
            Element::Directive(directive) => match &**directive {
                hcl::template::Directive::If(if_dir) => {
                    collect_refs(&if_dir.cond_expr, out);
                    collect_template_element_refs(&if_dir.true_template, out);
                    if let Some(false_template) = &if_dir.false_template {
                        collect_template_element_refs(false_template, out);
                    }
                }
                hcl::template::Directive::For(for_dir) => {
                    collect_refs(&for_dir.collection_expr, out);
                    collect_template_element_refs(&for_dir.template, out);
                }
            },
        }
    }
}

/// The names of locals this expression depends on, for dependency ordering.
pub(crate) fn local_dependencies(expr: &Expression) -> BTreeSet<String> {
    let mut refs = BTreeSet::new();
    collect_refs(expr, &mut refs);
    refs.into_iter()
        .filter(|r| r.root == "local")
        .filter_map(|r| r.attr)
        .collect()
}

/// Whether every root this expression references can be resolved from the
/// static scope. `for` expressions bind their own variables, so this errs on
/// the side of treating a bound-variable reference as unresolvable; that
/// only widens the "omitted" set, never produces a wrong value.
pub(crate) fn is_statically_resolvable(expr: &Expression) -> bool {
    let mut refs = BTreeSet::new();
    collect_refs(expr, &mut refs);
    refs.iter().all(|r| STATIC_ROOTS.contains(&r.root.as_str()))
}

pub(crate) fn to_attr_value(value: Value) -> AttrValue {
    match value {
        Value::Null => AttrValue::Null,
        Value::Bool(b) => AttrValue::Bool(b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                AttrValue::Int(i)
            } else {
                AttrValue::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => AttrValue::String(s),
        Value::Array(items) => AttrValue::List(items.into_iter().map(to_attr_value).collect()),
        Value::Object(entries) => AttrValue::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k, to_attr_value(v)))
                .collect(),
        ),
    }
}

/// Evaluate a resource (or nested block) body to a raw attribute map.
///
/// Attribute expressions outside the static scope are omitted; evaluation
/// failures inside it become diagnostics. Nested blocks always surface as an
/// ordered sequence of maps, one element per occurrence. Cancellation is
/// observed on entry of every (nested) block; it is the only error here.
pub(crate) fn evaluate_body(
    body: &Body,
    scope: &Scope,
    cancel: &CancellationToken,
    subject: &str,
    diags: &mut Vec<Diagnostic>,
) -> Result<AttrMap> {
    if cancel.is_cancelled() {
        return Err(Error::cancelled());
    }
    let ctx = scope.context();

    let mut raw = AttrMap::new();
    for attr in body.attributes() {
        let expr = attr.expr();
        if !is_statically_resolvable(expr) {
            debug!(subject, attribute = attr.key(), "omitting unresolvable attribute");
            continue;
        }
        match expr.evaluate(&ctx) {
            Ok(value) => {
                raw.insert(attr.key().to_string(), to_attr_value(value));
            }
            Err(e) => {
                diags.push(
                    Diagnostic::error(format!("cannot evaluate attribute '{}'", attr.key()))
                        .with_subject(subject.to_string())
                        .with_detail(e.to_string()),
                );
            }
        }
    }

    let mut nested: BTreeMap<String, Vec<AttrValue>> = BTreeMap::new();
    for block in body.blocks() {
        let inner = evaluate_body(
            block.body(),
            scope,
            cancel,
            &format!("{subject}.{}", block.identifier()),
            diags,
        )?;
        nested
            .entry(block.identifier().to_string())
            .or_default()
            .push(AttrValue::Map(inner));
    }
    for (name, occurrences) in nested {
        raw.insert(name, AttrValue::List(occurrences));
    }
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_expr(src: &str) -> Expression {
        let body = hcl::parse(src).unwrap();
        body.attributes().next().unwrap().expr().clone()
    }

    #[test]
    fn static_refs_are_resolvable() {
        assert!(is_statically_resolvable(&first_expr("a = var.region")));
        assert!(is_statically_resolvable(&first_expr("a = local.name")));
        assert!(is_statically_resolvable(&first_expr("a = \"${var.x}-${terraform.workspace}\"")));
        assert!(is_statically_resolvable(&first_expr("a = 42")));
    }

    #[test]
    fn resource_refs_are_not_resolvable() {
        assert!(!is_statically_resolvable(&first_expr("a = aws_security_group.sg.id")));
        assert!(!is_statically_resolvable(&first_expr("a = data.aws_ami.latest.id")));
        assert!(!is_statically_resolvable(&first_expr("a = \"prefix-${aws_vpc.main.id}\"")));
    }

    #[test]
    fn local_dependencies_found_in_templates() {
        let deps = local_dependencies(&first_expr("a = \"${local.base}-${local.suffix}\""));
        assert_eq!(deps.into_iter().collect::<Vec<_>>(), vec!["base", "suffix"]);
    }

    #[test]
    fn whole_numbers_convert_to_int() {
        assert_eq!(to_attr_value(Value::from(10)), AttrValue::Int(10));
        assert_eq!(to_attr_value(Value::from(1.5)), AttrValue::Float(1.5));
    }
}
