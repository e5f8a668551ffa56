//! Result Composer: renders analyzed rows to table/syslog/database
//! sinks (spec Section 4.6).

pub mod database;
pub mod syslog;
pub mod table;

use crate::analyzer::AnalysisRow;
use crate::error::{Result, SchedulerError};
use jube_core::doc::{Document, ResultSink};
use jube_core::exprbool::BoolExpr;
use jube_core::types::ValueType;
use std::collections::HashMap;

const STAT_SUFFIXES: &[&str] = &["first", "last", "min", "max", "avg", "std", "sum", "cnt"];

/// Build a `name -> declared ValueType` map from a document's
/// parameters and patterns (including their statistical suffix
/// columns), so a table sink can sort a numeric column by value
/// instead of lexicographically (spec Section 4.6, "Table").
pub fn value_types(document: &Document) -> HashMap<String, ValueType> {
    let mut types = HashMap::new();
    for pset in &document.parametersets {
        for param in &pset.parameters {
            types.insert(param.name.clone(), param.value_type);
        }
    }
    for pset in &document.patternsets {
        for pattern in &pset.patterns {
            if pattern.is_derived() {
                continue;
            }
            types.insert(pattern.name.clone(), pattern.value_type);
            for suffix in STAT_SUFFIXES {
                types.insert(format!("{}_{suffix}", pattern.name), pattern.value_type);
            }
        }
    }
    types
}

/// One flattened row: parameter point plus analyzed values, as handed
/// to every sink.
pub type Record = HashMap<String, String>;

/// Flatten each analyzed workpackage into one record: its parameter
/// point, its pattern values, and `workpackage`/`step` bookkeeping
/// columns.
pub fn flatten(rows: &[AnalysisRow]) -> Vec<Record> {
    rows.iter()
        .map(|row| {
            let mut record: Record = row.point.clone().into_iter().collect();
            record.extend(row.values.clone());
            record.insert("workpackage".to_string(), row.workpackage.to_string());
            record.insert("step".to_string(), row.step.clone());
            record
        })
        .collect()
}

fn filtered<'a>(records: &'a [Record], filter: Option<&str>) -> Result<Vec<&'a Record>> {
    let Some(filter) = filter else {
        return Ok(records.iter().collect());
    };
    let expr = BoolExpr::parse(filter)
        .map_err(jube_core::EngineError::Resolution)
        .map_err(SchedulerError::from)?;
    Ok(records.iter().filter(|record| expr.eval(*record)).collect())
}

/// Render every declared result sink against the full analyzed set
/// (spec Section 4.6, "Result Composer"). `types` drives typed table
/// sorting; pass `&HashMap::new()` when no declared types are known.
pub async fn compose(sinks: &[ResultSink], rows: &[AnalysisRow], types: &HashMap<String, ValueType>) -> Result<()> {
    let records = flatten(rows);
    for sink in sinks {
        match sink {
            ResultSink::Table {
                style,
                sort,
                transpose,
                filter,
                columns,
                ..
            } => {
                let rows = filtered(&records, filter.as_deref())?;
                let rendered = table::render(&rows, *style, sort, *transpose, columns, types)?;
                println!("{rendered}");
            }
            ResultSink::Syslog { host, port, filter, .. } => {
                let rows = filtered(&records, filter.as_deref())?;
                syslog::send(host, *port, &rows)?;
            }
            ResultSink::Database { path, primekeys, filter, .. } => {
                let rows = filtered(&records, filter.as_deref())?;
                database::upsert(path, primekeys, &rows).await?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use jube_core::{Id, ParameterPoint};

    #[test]
    fn flatten_merges_point_and_values() {
        let mut point = ParameterPoint::new();
        point.insert("n".to_string(), "2".to_string());
        let mut values = HashMap::new();
        values.insert("time_avg".to_string(), "1.5".to_string());

        let row = AnalysisRow {
            workpackage: Id::new(1),
            step: "run".to_string(),
            point,
            values,
        };

        let records = flatten(std::slice::from_ref(&row));
        assert_eq!(records[0]["n"], "2");
        assert_eq!(records[0]["time_avg"], "1.5");
        assert_eq!(records[0]["step"], "run");
    }

    #[test]
    fn filter_excludes_records_whose_expression_is_false() {
        let mut a = Record::new();
        a.insert("fast".to_string(), "true".to_string());
        let mut b = Record::new();
        b.insert("fast".to_string(), "false".to_string());

        let records = vec![a, b];
        let kept = filtered(&records, Some("fast")).unwrap();
        assert_eq!(kept.len(), 1);
    }
}
