//! Pattern compilation and statistical reduction (spec Section 4.5,
//! "Statistical reduction" / "Derived patterns").

use crate::error::{EngineError, Result};
use crate::types::ValueType;
use regex::RegexBuilder;
use std::collections::{HashMap, HashSet};

/// A named scan pattern (spec Section 4.5, "Input").
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Pattern {
    pub name: String,
    /// The regex itself for a primary pattern, or a `$other_suffix`
    /// expression for a derived pattern.
    pub expression: String,
    #[serde(default)]
    pub value_type: ValueType,
    #[serde(default)]
    pub dotall: bool,
    /// Value used when the pattern matches nothing in a file.
    #[serde(default)]
    pub default: Option<String>,
}

impl Pattern {
    /// A derived pattern references another pattern's suffixed value,
    /// e.g. `$other_max`, rather than scanning text itself.
    pub fn is_derived(&self) -> bool {
        self.expression.trim_start().starts_with('$')
    }

    fn compiled(&self) -> Result<regex::Regex> {
        RegexBuilder::new(&self.expression)
            .dot_matches_new_line(self.dotall)
            .build()
            .map_err(EngineError::from)
    }
}

/// All capture strings a primary pattern matched in one file, in
/// order of appearance.
pub fn scan(pattern: &Pattern, text: &str) -> Result<Vec<String>> {
    let regex = pattern.compiled()?;
    let mut captures = Vec::new();
    for cap in regex.captures_iter(text) {
        let value = cap
            .get(1)
            .or_else(|| cap.get(0))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        captures.push(value);
    }
    Ok(captures)
}

/// The eight statistical suffixes a scanned (or reduced) numeric
/// series exposes (spec Section 4.5, "Statistical reduction").
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stats {
    pub first: Option<String>,
    pub last: Option<String>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub avg: Option<f64>,
    pub std: Option<f64>,
    pub sum: Option<f64>,
    pub cnt: usize,
}

impl Stats {
    pub fn suffix(&self, suffix: &str) -> Option<String> {
        match suffix {
            "first" => self.first.clone(),
            "last" => self.last.clone(),
            "min" => self.min.map(|v| v.to_string()),
            "max" => self.max.map(|v| v.to_string()),
            "avg" => self.avg.map(|v| v.to_string()),
            "std" => self.std.map(|v| v.to_string()),
            "sum" => self.sum.map(|v| v.to_string()),
            "cnt" => Some(self.cnt.to_string()),
            _ => None,
        }
    }
}

/// Reduce a sequence of matched strings into `Stats`. `default`
/// supplies a value (and is treated as the sole match) when `matches`
/// is empty; numeric suffixes are only populated when `value_type` is
/// `Int`/`Float` and every element parses.
pub fn reduce(matches: &[String], value_type: ValueType, default: Option<&str>) -> Stats {
    if matches.is_empty() {
        return match default {
            Some(value) => Stats {
                first: Some(value.to_string()),
                last: Some(value.to_string()),
                cnt: 0,
                ..Stats::default()
            },
            None => Stats::default(),
        };
    }

    let first = matches.first().cloned();
    let last = matches.last().cloned();
    let cnt = matches.len();

    let numeric: Option<Vec<f64>> = match value_type {
        ValueType::String => None,
        ValueType::Int | ValueType::Float => matches.iter().map(|s| s.parse::<f64>().ok()).collect(),
    };

    let Some(values) = numeric else {
        return Stats {
            first,
            last,
            cnt,
            ..Stats::default()
        };
    };

    let sum: f64 = values.iter().sum();
    let avg = sum / values.len() as f64;
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let std = if values.len() > 1 {
        let variance =
            values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / (values.len() as f64 - 1.0);
        variance.sqrt()
    } else {
        0.0
    };

    Stats {
        first,
        last,
        min: Some(min),
        max: Some(max),
        avg: Some(avg),
        std: Some(std),
        sum: Some(sum),
        cnt,
    }
}

/// Evaluate derived patterns (those whose expression is a
/// `$other_suffix` reference) against a base table of already-reduced
/// primary pattern stats. Derived patterns may themselves be
/// referenced by other derived patterns, so evaluation proceeds in
/// topological order; a cycle fails the whole pass (spec Section 4.5,
/// "Derived patterns").
pub fn evaluate_derived(
    patterns: &[Pattern],
    primary_stats: &HashMap<String, Stats>,
) -> Result<HashMap<String, String>> {
    let derived: Vec<&Pattern> = patterns.iter().filter(|p| p.is_derived()).collect();
    let mut resolved: HashMap<String, String> = HashMap::new();
    let mut in_progress: HashSet<String> = HashSet::new();

    for pattern in &derived {
        resolve_derived(pattern, &derived, primary_stats, &mut resolved, &mut in_progress)?;
    }

    Ok(resolved)
}

fn resolve_derived(
    pattern: &Pattern,
    derived: &[&Pattern],
    primary_stats: &HashMap<String, Stats>,
    resolved: &mut HashMap<String, String>,
    in_progress: &mut HashSet<String>,
) -> Result<String> {
    if let Some(value) = resolved.get(&pattern.name) {
        return Ok(value.clone());
    }
    if !in_progress.insert(pattern.name.clone()) {
        return Err(EngineError::Analyzer(format!(
            "circular derived-pattern reference involving '{}'",
            pattern.name
        )));
    }

    let reference = pattern.expression.trim_start_matches('$');
    let value = if let Some((base, suffix)) = split_suffix(reference) {
        if let Some(stats) = primary_stats.get(base) {
            stats.suffix(suffix).unwrap_or_default()
        } else if let Some(other) = derived.iter().find(|p| p.name == base) {
            resolve_derived(other, derived, primary_stats, resolved, in_progress)?
        } else {
            return Err(EngineError::Analyzer(format!(
                "derived pattern '{}' references unknown pattern '{}'",
                pattern.name, base
            )));
        }
    } else {
        return Err(EngineError::Analyzer(format!(
            "derived pattern '{}' has no recognizable suffix",
            pattern.name
        )));
    };

    in_progress.remove(&pattern.name);
    resolved.insert(pattern.name.clone(), value.clone());
    Ok(value)
}

const SUFFIXES: &[&str] = &["first", "last", "min", "max", "avg", "std", "sum", "cnt"];

fn split_suffix(reference: &str) -> Option<(&str, &str)> {
    for suffix in SUFFIXES {
        if let Some(base) = reference.strip_suffix(&format!("_{suffix}")) {
            return Some((base, suffix));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_collects_capture_group_one() {
        let pattern = Pattern {
            name: "time".into(),
            expression: r"time=(\d+\.\d+)".into(),
            value_type: ValueType::Float,
            dotall: false,
            default: None,
        };
        let text = "run1 time=1.5\nrun2 time=2.5\n";
        let matches = scan(&pattern, text).unwrap();
        assert_eq!(matches, vec!["1.5", "2.5"]);
    }

    #[test]
    fn reduce_computes_stats_for_numeric_series() {
        let matches = vec!["1".to_string(), "2".to_string(), "3".to_string()];
        let stats = reduce(&matches, ValueType::Int, None);
        assert_eq!(stats.sum, Some(6.0));
        assert_eq!(stats.avg, Some(2.0));
        assert_eq!(stats.min, Some(1.0));
        assert_eq!(stats.max, Some(3.0));
        assert_eq!(stats.cnt, 3);
    }

    #[test]
    fn reduce_uses_default_when_no_match() {
        let stats = reduce(&[], ValueType::Int, Some("0"));
        assert_eq!(stats.first, Some("0".to_string()));
        assert_eq!(stats.cnt, 0);
    }

    #[test]
    fn derived_pattern_resolves_against_primary_stats() {
        let mut primary = HashMap::new();
        primary.insert(
            "time".to_string(),
            reduce(&["1".into(), "3".into()], ValueType::Float, None),
        );
        let derived = Pattern {
            name: "slowdown".into(),
            expression: "$time_max".into(),
            value_type: ValueType::Float,
            dotall: false,
            default: None,
        };
        let result = evaluate_derived(std::slice::from_ref(&derived), &primary).unwrap();
        assert_eq!(result["slowdown"], "3");
    }

    #[test]
    fn circular_derived_pattern_fails() {
        let a = Pattern {
            name: "a".into(),
            expression: "$b_first".into(),
            value_type: ValueType::Float,
            dotall: false,
            default: None,
        };
        let b = Pattern {
            name: "b".into(),
            expression: "$a_first".into(),
            value_type: ValueType::Float,
            dotall: false,
            default: None,
        };
        let result = evaluate_derived(&[a, b], &HashMap::new());
        assert!(result.is_err());
    }
}
