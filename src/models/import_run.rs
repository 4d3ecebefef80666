use crate::error::{AkigError, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportRunStatus {
    Running,
    Done,
    DoneWithErrors,
    Failed,
}

impl ImportRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportRunStatus::Running => "running",
            ImportRunStatus::Done => "done",
            ImportRunStatus::DoneWithErrors => "done_with_errors",
            ImportRunStatus::Failed => "failed",
        }
    }
}

impl FromStr for ImportRunStatus {
    type Err = AkigError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(ImportRunStatus::Running),
            "done" => Ok(ImportRunStatus::Done),
            "done_with_errors" => Ok(ImportRunStatus::DoneWithErrors),
            "failed" => Ok(ImportRunStatus::Failed),
            other => Err(AkigError::validation(format!(
                "unknown import status '{}'",
                other
            ))),
        }
    }
}

/// One execution of a CSV/JSON payment import
#[derive(Debug, Clone, Serialize)]
pub struct ImportRun {
    pub id: i64,
    pub agency_id: i64,
    pub source_file: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub rows_total: i64,
    pub rows_inserted: i64,
    pub rows_duplicated: i64,
    pub rows_failed: i64,
    pub status: ImportRunStatus,
    pub errors: Vec<String>,
}

/// Counters accumulated while importing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportCounts {
    pub rows_total: i64,
    pub rows_inserted: i64,
    pub rows_duplicated: i64,
    pub rows_failed: i64,
}

const RUN_COLUMNS: &str = "id, agency_id, source_file, started_at, finished_at, rows_total, \
     rows_inserted, rows_duplicated, rows_failed, status, errors";

impl ImportRun {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let status: String = row.get("status")?;
        let errors: Option<String> = row.get("errors")?;
        Ok(ImportRun {
            id: row.get("id")?,
            agency_id: row.get("agency_id")?,
            source_file: row.get("source_file")?,
            started_at: row.get("started_at")?,
            finished_at: row.get("finished_at")?,
            rows_total: row.get("rows_total")?,
            rows_inserted: row.get("rows_inserted")?,
            rows_duplicated: row.get("rows_duplicated")?,
            rows_failed: row.get("rows_failed")?,
            status: status.parse().unwrap_or(ImportRunStatus::Failed),
            errors: errors
                .and_then(|e| serde_json::from_str(&e).ok())
                .unwrap_or_default(),
        })
    }
}

pub fn start_import_run(conn: &Connection, agency_id: i64, source_file: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO import_runs (agency_id, source_file, started_at) VALUES (?1, ?2, ?3)",
        params![agency_id, source_file, crate::db::now_rfc3339()],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Close a run with its final counters. The status follows from the counts
/// unless `failed` is set.
pub fn finish_import_run(
    conn: &Connection,
    id: i64,
    counts: &ImportCounts,
    errors: &[String],
    failed: bool,
) -> Result<ImportRunStatus> {
    let status = if failed {
        ImportRunStatus::Failed
    } else if counts.rows_failed > 0 {
        ImportRunStatus::DoneWithErrors
    } else {
        ImportRunStatus::Done
    };

    conn.execute(
        "UPDATE import_runs SET finished_at = ?1, rows_total = ?2, rows_inserted = ?3,
                rows_duplicated = ?4, rows_failed = ?5, status = ?6, errors = ?7
         WHERE id = ?8",
        params![
            crate::db::now_rfc3339(),
            counts.rows_total,
            counts.rows_inserted,
            counts.rows_duplicated,
            counts.rows_failed,
            status.as_str(),
            serde_json::to_string(errors)?,
            id
        ],
    )?;
    Ok(status)
}

pub fn get_import_run(conn: &Connection, agency_id: i64, id: i64) -> Result<ImportRun> {
    conn.query_row(
        &format!(
            "SELECT {} FROM import_runs WHERE id = ?1 AND agency_id = ?2",
            RUN_COLUMNS
        ),
        params![id, agency_id],
        ImportRun::from_row,
    )
    .optional()?
    .ok_or_else(|| AkigError::not_found("import run", id))
}

pub fn list_import_runs(conn: &Connection, agency_id: i64, limit: u32) -> Result<Vec<ImportRun>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM import_runs WHERE agency_id = ?1 ORDER BY started_at DESC, id DESC LIMIT ?2",
        RUN_COLUMNS
    ))?;
    let runs = stmt
        .query_map(params![agency_id, limit], ImportRun::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(runs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ensure_default_agency, open_database};

    #[test]
    fn test_run_lifecycle() {
        let conn = open_database(":memory:").unwrap();
        let agency = ensure_default_agency(&conn).unwrap();

        let id = start_import_run(&conn, agency, "paiements_2024.csv").unwrap();
        let run = get_import_run(&conn, agency, id).unwrap();
        assert_eq!(run.status, ImportRunStatus::Running);
        assert!(run.errors.is_empty());

        let counts = ImportCounts {
            rows_total: 3,
            rows_inserted: 1,
            rows_duplicated: 1,
            rows_failed: 1,
        };
        let status =
            finish_import_run(&conn, id, &counts, &["line 3: amount missing".into()], false)
                .unwrap();
        assert_eq!(status, ImportRunStatus::DoneWithErrors);

        let run = get_import_run(&conn, agency, id).unwrap();
        assert_eq!(run.rows_inserted, 1);
        assert_eq!(run.errors, vec!["line 3: amount missing".to_string()]);
        assert!(run.finished_at.is_some());
        assert_eq!(list_import_runs(&conn, agency, 10).unwrap().len(), 1);
    }

    #[test]
    fn test_failed_flag_wins() {
        let conn = open_database(":memory:").unwrap();
        let agency = ensure_default_agency(&conn).unwrap();
        let id = start_import_run(&conn, agency, "x.csv").unwrap();

        let status = finish_import_run(&conn, id, &ImportCounts::default(), &[], true).unwrap();
        assert_eq!(status, ImportRunStatus::Failed);
    }
}
