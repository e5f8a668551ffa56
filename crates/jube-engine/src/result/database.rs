//! Database sink (spec Section 4.6, "Database"): a schema-once SQLite
//! table with a primekeys upsert, grounded on this crate's former
//! daemon storage layer's pool-and-migration idiom (see `DESIGN.md`).

use crate::error::Result;
use crate::result::Record;
use sqlx::sqlite::SqlitePoolOptions;
use std::collections::BTreeSet;
use std::path::Path;

pub async fn upsert(path: &Path, primekeys: &[String], records: &[&Record]) -> Result<()> {
    if records.is_empty() {
        return Ok(());
    }

    let url = format!("sqlite://{}?mode=rwc", path.display());
    let pool = SqlitePoolOptions::new().max_connections(1).connect(&url).await?;

    let mut columns: BTreeSet<String> = BTreeSet::new();
    for record in records {
        columns.extend(record.keys().cloned());
    }
    let columns: Vec<String> = columns.into_iter().collect();

    let column_defs = columns.iter().map(|c| format!("\"{c}\" TEXT")).collect::<Vec<_>>().join(", ");
    let primary = if primekeys.is_empty() {
        String::new()
    } else {
        let keys = primekeys.iter().map(|k| format!("\"{k}\"")).collect::<Vec<_>>().join(", ");
        format!(", PRIMARY KEY ({keys})")
    };
    sqlx::query(&format!("CREATE TABLE IF NOT EXISTS results ({column_defs}{primary})"))
        .execute(&pool)
        .await?;

    let placeholders = columns.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
    let column_list = columns.iter().map(|c| format!("\"{c}\"")).collect::<Vec<_>>().join(", ");
    let insert_sql = format!("INSERT OR REPLACE INTO results ({column_list}) VALUES ({placeholders})");

    for record in records {
        let mut query = sqlx::query(&insert_sql);
        for column in &columns {
            query = query.bind(record.get(column).cloned().unwrap_or_default());
        }
        query.execute(&pool).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn upsert_creates_table_and_inserts_rows() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("results.db");

        let mut row = Record::new();
        row.insert("n".to_string(), "1".to_string());
        row.insert("time_avg".to_string(), "1.5".to_string());

        upsert(&db_path, &["n".to_string()], &[&row]).await.unwrap();

        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new().max_connections(1).connect(&url).await.unwrap();
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM results").fetch_one(&pool).await.unwrap();
        assert_eq!(count.0, 1);
    }
}
