use super::RunReport;
use crate::model::RunMode;
use anyhow::Context;
use rusqlite::Connection;
use serde_json::{json, Value};

pub fn begin_run(conn: &Connection, job: &str, mode: RunMode, term: &str) -> anyhow::Result<String> {
    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO grading_runs(id, job, mode, term, started_at) VALUES(?, ?, ?, ?, ?)",
        (&id, job, mode.as_str(), term, chrono::Utc::now().to_rfc3339()),
    )
    .context("record grading run start")?;
    Ok(id)
}

pub fn finish_run(conn: &Connection, report: &RunReport) -> anyhow::Result<()> {
    let report_json = serde_json::to_string(report)?;
    conn.execute(
        "UPDATE grading_runs SET finished_at = ?, report_json = ? WHERE id = ?",
        (chrono::Utc::now().to_rfc3339(), report_json, &report.run_id),
    )
    .context("record grading run finish")?;
    Ok(())
}

/// Most recent runs first. Unfinished runs have a null `report`.
pub fn list_runs(conn: &Connection, limit: i64) -> anyhow::Result<Vec<Value>> {
    let mut stmt = conn.prepare(
        "SELECT id, job, mode, term, started_at, finished_at, report_json
         FROM grading_runs ORDER BY started_at DESC, id LIMIT ?",
    )?;
    let rows = stmt
        .query_map([limit], |r| {
            let report_json: Option<String> = r.get(6)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "job": r.get::<_, String>(1)?,
                "mode": r.get::<_, String>(2)?,
                "term": r.get::<_, Option<String>>(3)?,
                "startedAt": r.get::<_, String>(4)?,
                "finishedAt": r.get::<_, Option<String>>(5)?,
                "report": report_json
                    .and_then(|s| serde_json::from_str::<Value>(&s).ok())
                    .unwrap_or(Value::Null),
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
