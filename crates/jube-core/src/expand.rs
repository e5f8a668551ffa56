//! Parameter-space expansion (spec Section 3, "Parameter expansion").
//!
//! Three passes turn a set of `Parameterset`s into the list of
//! `ParameterPoint`s a benchmark's steps run over:
//!
//! 1. `merge_parametersets` resolves same-named parameters across
//!    sets according to `DuplicateMode`.
//! 2. `cartesian_points` takes the Cartesian product of every
//!    template parameter's raw alternatives.
//! 3. `resolve_point` substitutes `$name` references (bounded to five
//!    passes to catch runaway self-reference), evaluates `script`/
//!    `env`/`tag` modes, and type-checks `int`/`float` parameters.

use crate::context::EngineContext;
use crate::error::{EngineError, Result};
use crate::exprbool::BoolExpr;
use crate::script::ScriptRegistry;
use crate::types::{DuplicateMode, Parameter, ParameterMode, ParameterPoint, Parameterset, ValueType};
use std::collections::{HashMap, HashSet};

const MAX_SUBSTITUTION_PASSES: usize = 5;

/// Merge the parametersets referenced by a step into one ordered list
/// of parameters, applying `DuplicateMode` wherever two sets define
/// the same parameter name.
pub fn merge_parametersets(sets: &[&Parameterset]) -> Result<Vec<Parameter>> {
    let mut order: Vec<String> = Vec::new();
    let mut merged: HashMap<String, Parameter> = HashMap::new();

    for set in sets {
        for param in &set.parameters {
            match merged.get(&param.name) {
                None => {
                    order.push(param.name.clone());
                    merged.insert(param.name.clone(), param.clone());
                }
                Some(existing) => {
                    let combined = merge_one(existing, param)?;
                    merged.insert(param.name.clone(), combined);
                }
            }
        }
    }

    Ok(order.into_iter().map(|name| merged.remove(&name).unwrap()).collect())
}

fn merge_one(existing: &Parameter, incoming: &Parameter) -> Result<Parameter> {
    let mode = incoming.duplicate;
    match mode {
        DuplicateMode::Replace => Ok(incoming.clone()),
        DuplicateMode::Concat => {
            let mut merged = incoming.clone();
            merged.raw_value = format!(
                "{}{}{}",
                existing.raw_value, incoming.separator, incoming.raw_value
            );
            Ok(merged)
        }
        DuplicateMode::Error => Err(EngineError::Config(format!(
            "duplicate parameter '{}' with duplicate=\"error\"",
            incoming.name
        ))),
        DuplicateMode::None => {
            if existing.raw_value == incoming.raw_value
                && existing.separator == incoming.separator
                && existing.mode == incoming.mode
            {
                Ok(existing.clone())
            } else {
                Err(EngineError::Config(format!(
                    "parameter '{}' redefined with a different value; use duplicate=\"replace\"/\"concat\"/\"error\" to disambiguate",
                    incoming.name
                )))
            }
        }
    }
}

/// Cartesian product of every template parameter's raw alternatives.
/// Non-template parameters contribute their single fixed value to
/// every resulting point. Order of `parameters` determines the
/// nesting order of the product (first parameter varies slowest).
pub fn cartesian_points(parameters: &[Parameter]) -> Vec<ParameterPoint> {
    let mut points: Vec<ParameterPoint> = vec![ParameterPoint::new()];

    for param in parameters {
        let alternatives = param.alternatives();
        let mut next = Vec::with_capacity(points.len() * alternatives.len());
        for point in &points {
            for alt in &alternatives {
                let mut extended = point.clone();
                extended.insert(param.name.clone(), alt.clone());
                next.push(extended);
            }
        }
        points = next;
    }

    points
}

/// Resolve one raw point to its final values: bounded `$name`
/// substitution, then per-parameter mode evaluation and type check.
pub fn resolve_point(
    point: &ParameterPoint,
    parameters: &[Parameter],
    ctx: &EngineContext,
    registry: &ScriptRegistry,
    active_tags: &HashSet<String>,
) -> Result<ParameterPoint> {
    let by_name: HashMap<&str, &Parameter> =
        parameters.iter().map(|p| (p.name.as_str(), p)).collect();

    let mut resolved = point.clone();
    for _ in 0..MAX_SUBSTITUTION_PASSES {
        let mut changed = false;
        let snapshot = resolved.clone();
        for (_, value) in resolved.iter_mut() {
            let substituted = substitute_once(value, &snapshot);
            if &substituted != value {
                changed = true;
                *value = substituted;
            }
        }
        if !changed {
            break;
        }
    }

    for (name, value) in &resolved {
        if let Some(token) = residual_reference(value) {
            return Err(EngineError::Resolution(format!(
                "parameter '{name}' could not be fully resolved: unresolved reference '{token}' remains (circular or undefined $-reference)"
            )));
        }
    }

    for (name, value) in resolved.iter_mut() {
        let Some(param) = by_name.get(name.as_str()) else {
            continue;
        };
        *value = match &param.mode {
            ParameterMode::Text => value.clone(),
            ParameterMode::Env => std::env::var(value.as_str()).unwrap_or_default(),
            ParameterMode::Tag => {
                let expr = BoolExpr::parse(value).map_err(EngineError::Resolution)?;
                expr.eval(active_tags).to_string()
            }
            ParameterMode::Script(mode_name) => {
                let env: HashMap<String, String> = parameters
                    .iter()
                    .filter(|p| p.export)
                    .filter_map(|p| resolved.get(&p.name).map(|v| (p.name.clone(), v.clone())))
                    .collect();
                registry.evaluate(mode_name, ctx, value, &env)?
            }
        };
        check_type(name, &resolved[name], param.value_type)?;
    }

    Ok(resolved)
}

fn substitute_once(value: &str, point: &ParameterPoint) -> String {
    let mut out = String::with_capacity(value.len());
    let bytes = value.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            let rest = &value[i + 1..];
            let (name, consumed) = if let Some(stripped) = rest.strip_prefix('{') {
                match stripped.find('}') {
                    Some(end) => (&stripped[..end], end + 2),
                    None => ("", 0),
                }
            } else {
                let end = rest
                    .find(|c: char| !(c.is_alphanumeric() || c == '_'))
                    .unwrap_or(rest.len());
                (&rest[..end], end + 1)
            };
            if !name.is_empty() {
                if let Some(replacement) = point.get(name) {
                    out.push_str(replacement);
                    i += 1 + consumed;
                    continue;
                }
            }
        }
        let ch = value[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

/// Find a leftover `$name`/`${name}` token in an already-substituted
/// value. Present after the bounded substitution loop only when two or
/// more parameters reference each other cyclically (each pass
/// substitutes the other's still-unresolved placeholder, so `changed`
/// eventually goes false while literal `$`-text remains embedded).
fn residual_reference(value: &str) -> Option<String> {
    let bytes = value.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            let rest = &value[i + 1..];
            let token = if let Some(stripped) = rest.strip_prefix('{') {
                stripped.find('}').map(|end| format!("${{{}}}", &stripped[..end]))
            } else {
                let end = rest
                    .find(|c: char| !(c.is_alphanumeric() || c == '_'))
                    .unwrap_or(rest.len());
                (end > 0).then(|| format!("${}", &rest[..end]))
            };
            if let Some(token) = token {
                return Some(token);
            }
        }
        let ch = value[i..].chars().next().unwrap();
        i += ch.len_utf8();
    }
    None
}

fn check_type(name: &str, value: &str, value_type: ValueType) -> Result<()> {
    match value_type {
        ValueType::String => Ok(()),
        ValueType::Int => value
            .parse::<i64>()
            .map(|_| ())
            .map_err(|_| EngineError::Resolution(format!("parameter '{name}' = '{value}' is not an int"))),
        ValueType::Float => value
            .parse::<f64>()
            .map(|_| ())
            .map_err(|_| EngineError::Resolution(format!("parameter '{name}' = '{value}' is not a float"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UpdateMode;

    fn text_param(name: &str, raw: &str, sep: &str) -> Parameter {
        Parameter {
            name: name.into(),
            value_type: ValueType::String,
            mode: ParameterMode::Text,
            raw_value: raw.into(),
            separator: sep.into(),
            export: false,
            update_mode: UpdateMode::Never,
            duplicate: DuplicateMode::None,
            tag: None,
        }
    }

    #[test]
    fn cartesian_product_covers_all_combinations() {
        let params = vec![text_param("a", "1,2", ","), text_param("b", "x,y", ",")];
        let points = cartesian_points(&params);
        assert_eq!(points.len(), 4);
        assert!(points.iter().any(|p| p["a"] == "1" && p["b"] == "x"));
        assert!(points.iter().any(|p| p["a"] == "2" && p["b"] == "y"));
    }

    #[test]
    fn substitution_resolves_references_across_passes() {
        let mut point = ParameterPoint::new();
        point.insert("a".into(), "$b".into());
        point.insert("b".into(), "$c".into());
        point.insert("c".into(), "final".into());

        let params = vec![text_param("a", "$b", ","), text_param("b", "$c", ","), text_param("c", "final", ",")];
        let ctx = EngineContext::default();
        let registry = ScriptRegistry::with_shell();
        let resolved = resolve_point(&point, &params, &ctx, &registry, &HashSet::new()).unwrap();
        assert_eq!(resolved["a"], "final");
        assert_eq!(resolved["b"], "final");
    }

    #[test]
    fn mutually_cyclic_reference_errors_instead_of_leaking_dollar_text() {
        let mut point = ParameterPoint::new();
        point.insert("a".into(), "$b".into());
        point.insert("b".into(), "$a".into());

        let params = vec![text_param("a", "$b", ","), text_param("b", "$a", ",")];
        let ctx = EngineContext::default();
        let registry = ScriptRegistry::with_shell();
        let err = resolve_point(&point, &params, &ctx, &registry, &HashSet::new()).unwrap_err();
        assert!(matches!(err, EngineError::Resolution(_)));
    }

    #[test]
    fn int_type_check_rejects_non_numeric() {
        let mut param = text_param("n", "abc", ",");
        param.value_type = ValueType::Int;
        let mut point = ParameterPoint::new();
        point.insert("n".into(), "abc".into());
        let ctx = EngineContext::default();
        let registry = ScriptRegistry::with_shell();
        let err = resolve_point(&point, &[param], &ctx, &registry, &HashSet::new()).unwrap_err();
        assert!(matches!(err, EngineError::Resolution(_)));
    }

    #[test]
    fn duplicate_concat_appends_alternatives() {
        let mut a = Parameterset::default();
        a.name = "a".into();
        a.parameters.push(text_param("n", "1,2", ","));
        let mut b = Parameterset::default();
        b.name = "b".into();
        let mut second = text_param("n", "3,4", ",");
        second.duplicate = DuplicateMode::Concat;
        b.parameters.push(second);

        let merged = merge_parametersets(&[&a, &b]).unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].alternatives(), vec!["1", "2", "3", "4"]);
    }

    #[test]
    fn duplicate_none_rejects_conflicting_redefinition() {
        let mut a = Parameterset::default();
        a.name = "a".into();
        a.parameters.push(text_param("n", "1", ","));
        let mut b = Parameterset::default();
        b.name = "b".into();
        b.parameters.push(text_param("n", "2", ","));

        assert!(merge_parametersets(&[&a, &b]).is_err());
    }
}
