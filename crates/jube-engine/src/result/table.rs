//! Table sink (spec Section 4.6, "Table"): csv/pretty/aligned
//! rendering over a sorted, optionally transposed record set.

use crate::error::{Result, SchedulerError};
use crate::result::Record;
use comfy_table::{presets, Cell, Table as ComfyTable};
use jube_core::doc::{ColumnSpec, TableStyle};
use jube_core::types::ValueType;
use std::cmp::Ordering;
use std::collections::HashMap;

pub fn render(
    records: &[&Record],
    style: TableStyle,
    sort: &[String],
    transpose: bool,
    columns: &[ColumnSpec],
    types: &HashMap<String, ValueType>,
) -> Result<String> {
    let mut sorted: Vec<&Record> = records.to_vec();
    for key in sort.iter().rev() {
        let numeric = matches!(types.get(key), Some(ValueType::Int) | Some(ValueType::Float));
        sorted.sort_by(|a, b| {
            let av = a.get(key).cloned().unwrap_or_default();
            let bv = b.get(key).cloned().unwrap_or_default();
            if numeric {
                let an: Option<f64> = av.parse().ok();
                let bn: Option<f64> = bv.parse().ok();
                match (an, bn) {
                    (Some(an), Some(bn)) => an.partial_cmp(&bn).unwrap_or(Ordering::Equal),
                    _ => av.cmp(&bv),
                }
            } else {
                av.cmp(&bv)
            }
        });
    }

    let fields: Vec<String> = if columns.is_empty() {
        let mut names: Vec<String> = sorted.iter().flat_map(|r| r.keys().cloned()).collect();
        names.sort();
        names.dedup();
        names
    } else {
        columns.iter().map(|c| c.field.clone()).collect()
    };

    let headers: Vec<String> = if columns.is_empty() {
        fields.clone()
    } else {
        columns.iter().map(|c| c.title.clone().unwrap_or_else(|| c.field.clone())).collect()
    };

    let rows: Vec<Vec<String>> = sorted
        .iter()
        .map(|record| {
            fields
                .iter()
                .enumerate()
                .map(|(i, field)| {
                    let raw = record.get(field).cloned().unwrap_or_default();
                    format_value(&raw, columns.get(i).and_then(|c| c.format.as_deref()))
                })
                .collect()
        })
        .collect();

    let (headers, rows) = if transpose { transpose_rows(&headers, &rows) } else { (headers, rows) };

    match style {
        TableStyle::Csv => render_csv(&headers, &rows),
        TableStyle::Pretty | TableStyle::Aligned => Ok(render_comfy(&headers, &rows, style)),
    }
}

fn format_value(raw: &str, format: Option<&str>) -> String {
    let Some(format) = format else { return raw.to_string() };
    let precision = format
        .strip_prefix("%.")
        .and_then(|s| s.strip_suffix('f'))
        .and_then(|s| s.parse::<usize>().ok());
    match (precision, raw.parse::<f64>()) {
        (Some(precision), Ok(value)) => format!("{value:.precision$}"),
        _ => raw.to_string(),
    }
}

fn transpose_rows(headers: &[String], rows: &[Vec<String>]) -> (Vec<String>, Vec<Vec<String>>) {
    let mut new_headers = vec!["field".to_string()];
    new_headers.extend((0..rows.len()).map(|i| format!("row{i}")));

    let new_rows = headers
        .iter()
        .enumerate()
        .map(|(col, header)| {
            let mut row = vec![header.clone()];
            row.extend(rows.iter().map(|r| r.get(col).cloned().unwrap_or_default()));
            row
        })
        .collect();

    (new_headers, new_rows)
}

fn render_csv(headers: &[String], rows: &[Vec<String>]) -> Result<String> {
    let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
    writer
        .write_record(headers)
        .map_err(|e| SchedulerError::Engine(jube_core::EngineError::Config(e.to_string())))?;
    for row in rows {
        writer
            .write_record(row)
            .map_err(|e| SchedulerError::Engine(jube_core::EngineError::Config(e.to_string())))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| SchedulerError::Engine(jube_core::EngineError::Config(e.to_string())))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn render_comfy(headers: &[String], rows: &[Vec<String>], style: TableStyle) -> String {
    let mut table = ComfyTable::new();
    table.load_preset(if style == TableStyle::Aligned { presets::ASCII_FULL } else { presets::UTF8_FULL });
    table.set_header(headers.iter().map(|h| Cell::new(h)).collect::<Vec<_>>());
    for row in rows {
        table.add_row(row.iter().map(|c| Cell::new(c)).collect::<Vec<_>>());
    }
    table.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(n: &str, avg: &str) -> Record {
        let mut r = Record::new();
        r.insert("n".to_string(), n.to_string());
        r.insert("time_avg".to_string(), avg.to_string());
        r
    }

    #[test]
    fn csv_render_sorts_and_includes_header() {
        let a = record("2", "3.0");
        let b = record("1", "1.0");
        let records = vec![&a, &b];
        let rendered = render(&records, TableStyle::Csv, &["n".to_string()], false, &[], &HashMap::new()).unwrap();
        let lines: Vec<&str> = rendered.lines().collect();
        assert!(lines[1].starts_with('1'));
        assert!(lines[2].starts_with('2'));
    }

    #[test]
    fn transpose_swaps_fields_and_rows() {
        let a = record("1", "2.0");
        let records = vec![&a];
        let rendered = render(&records, TableStyle::Csv, &[], true, &[], &HashMap::new()).unwrap();
        assert!(rendered.contains("field"));
    }

    #[test]
    fn numeric_sort_orders_by_value_not_lexicographically() {
        let a = record("2", "1.0");
        let b = record("10", "1.0");
        let records = vec![&a, &b];
        let mut types = HashMap::new();
        types.insert("n".to_string(), ValueType::Int);
        let rendered = render(&records, TableStyle::Csv, &["n".to_string()], false, &[], &types).unwrap();
        let lines: Vec<&str> = rendered.lines().collect();
        assert!(lines[1].starts_with('2'));
        assert!(lines[2].starts_with("10"));
    }
}
