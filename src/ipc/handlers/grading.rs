use crate::config::{self, GradingConfig};
use crate::grading::{finalize, incomplete, milestone, runs, stats};
use crate::ipc::error::{err, grading_err, ok};
use crate::ipc::types::{AppState, Request};
use crate::model::RunMode;
use crate::snapshot;
use crate::store::{GradingStore, SqliteStore};
use chrono::NaiveDate;
use serde_json::json;
use std::path::PathBuf;

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("missing {}", key))
}

fn get_required_i64(params: &serde_json::Value, key: &str) -> Result<i64, String> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| format!("missing {}", key))
}

fn parse_mode(params: &serde_json::Value, cfg: &GradingConfig) -> Result<RunMode, String> {
    match params.get("mode") {
        None | Some(serde_json::Value::Null) => Ok(cfg.default_mode),
        Some(v) => v
            .as_str()
            .and_then(RunMode::parse)
            .ok_or_else(|| "mode must be one of: debug, commit".to_string()),
    }
}

fn parse_date(params: &serde_json::Value, key: &str) -> Result<Option<NaiveDate>, String> {
    match params.get(key).and_then(|v| v.as_str()) {
        None => Ok(None),
        Some(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map(Some)
            .map_err(|_| format!("{} must be YYYY-MM-DD", key)),
    }
}

fn load_config(state: &AppState, id: &str) -> Result<GradingConfig, serde_json::Value> {
    let conn = state.conn_or_err(id)?;
    config::load(conn).map_err(|e| err(id, "db_query_failed", e.to_string(), None))
}

fn handle_final_grades(state: &mut AppState, req: &Request) -> serde_json::Value {
    let cfg = match load_config(state, &req.id) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let mode = match parse_mode(&req.params, &cfg) {
        Ok(m) => m,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    let snapshot_path = req
        .params
        .get("snapshotPath")
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from);
    let (Some(conn), Some(workspace)) = (state.db.as_ref(), state.workspace.as_ref()) else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut snapshot_written = None;
    if let (RunMode::Commit, Some(path)) = (mode, snapshot_path) {
        match snapshot::export_snapshot(conn, workspace, &path) {
            Ok(s) => snapshot_written = Some(s.path.to_string_lossy().to_string()),
            Err(e) => {
                return err(
                    &req.id,
                    "io_failed",
                    e.to_string(),
                    Some(json!({ "path": path.to_string_lossy() })),
                )
            }
        }
    }

    match finalize::run_final_grades(conn, &cfg, mode) {
        Ok(mut report) => {
            report.snapshot = snapshot_written;
            ok(&req.id, json!(report))
        }
        Err(e) => err(&req.id, "grading_failed", format!("{e:#}"), None),
    }
}

fn handle_incompletes(state: &mut AppState, req: &Request) -> serde_json::Value {
    let cfg = match load_config(state, &req.id) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let mode = match parse_mode(&req.params, &cfg) {
        Ok(m) => m,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    let today = match parse_date(&req.params, "today") {
        Ok(d) => d.unwrap_or_else(|| chrono::Local::now().date_naive()),
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    let conn = match state.conn_or_err(&req.id) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match incomplete::run_incompletes(conn, &cfg, mode, today) {
        Ok(report) => ok(&req.id, json!(report)),
        Err(e) => err(&req.id, "grading_failed", format!("{e:#}"), None),
    }
}

fn handle_stats(state: &mut AppState, req: &Request) -> serde_json::Value {
    let cfg = match load_config(state, &req.id) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let conn = match state.conn_or_err(&req.id) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let store = SqliteStore::new(conn);
    let term = match store.active_term() {
        Ok(Some(t)) => t.term,
        Ok(None) => return err(&req.id, "not_found", "no active term", None),
        Err(e) => return grading_err(&req.id, &e),
    };
    let counters = match stats::term_counters(&store, &cfg, &term) {
        Ok(v) => v,
        Err(e) => return grading_err(&req.id, &e),
    };
    ok(
        &req.id,
        json!({
            "term": term,
            "finalGrades": counters.final_grades,
            "incompletes": counters.incompletes,
        }),
    )
}

fn handle_resolve_due_date(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match state.conn_or_err(&req.id) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let p = &req.params;
    let parsed = (|| {
        Ok::<_, String>((
            get_required_str(p, "term")?,
            get_required_i64(p, "pace")?,
            get_required_str(p, "paceTrack")?,
            get_required_i64(p, "milestoneNumber")?,
            get_required_str(p, "msType")?,
            get_required_str(p, "studentId")?,
        ))
    })();
    let (term, pace, pace_track, ms_nbr, ms_type, student_id) = match parsed {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };

    let store = SqliteStore::new(conn);
    match milestone::resolve_due_date(&store, &term, pace, &pace_track, ms_nbr, &ms_type, &student_id) {
        Ok(Some(resolved)) => ok(&req.id, json!(resolved)),
        Ok(None) => err(
            &req.id,
            "not_found",
            "no milestone for the given schedule cell",
            Some(json!({ "term": term, "pace": pace, "paceTrack": pace_track, "milestoneNumber": ms_nbr, "msType": ms_type })),
        ),
        Err(e) => grading_err(&req.id, &e),
    }
}

fn handle_pace_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match state.conn_or_err(&req.id) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let (student_id, course_id) = match (
        get_required_str(&req.params, "studentId"),
        get_required_str(&req.params, "courseId"),
    ) {
        (Ok(s), Ok(c)) => (s, c),
        (Err(msg), _) | (_, Err(msg)) => return err(&req.id, "bad_params", msg, None),
    };
    match SqliteStore::new(conn).pace_summaries(&student_id, &course_id) {
        Ok(rows) => ok(&req.id, json!({ "rows": rows })),
        Err(e) => grading_err(&req.id, &e),
    }
}

fn handle_runs(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match state.conn_or_err(&req.id) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let limit = req
        .params
        .get("limit")
        .and_then(|v| v.as_i64())
        .unwrap_or(20)
        .clamp(1, 500);
    match runs::list_runs(conn, limit) {
        Ok(rows) => ok(&req.id, json!({ "runs": rows })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grading.finalGrades" => Some(handle_final_grades(state, req)),
        "grading.incompletes" => Some(handle_incompletes(state, req)),
        "grading.stats" => Some(handle_stats(state, req)),
        "grading.resolveDueDate" => Some(handle_resolve_due_date(state, req)),
        "grading.paceSummary" => Some(handle_pace_summary(state, req)),
        "grading.runs" => Some(handle_runs(state, req)),
        _ => None,
    }
}
