//! End-of-term grading pipeline.
//!
//! One registration flows through pace resolution, pace summary materialization, point
//! aggregation, classification and flag writing. The two jobs, final grades and
//! Incomplete resolution, differ only in which registrations they select and when they
//! finalize. Every registration is resolved inside its own SQLite transaction.

pub mod classify;
pub mod coursework;
pub mod finalize;
pub mod flags;
pub mod incomplete;
pub mod milestone;
pub mod pace;
pub mod points;
pub mod reference;
pub mod runs;
pub mod stats;
pub mod summary;

#[cfg(test)]
pub(crate) mod testutil;

use crate::config::GradingConfig;
use crate::error::{GradingError, GradingResult};
use crate::model::{Grade, PaceSummaryRow, RegKey, Registration, RunMode};
use crate::store::{GradingStore, SqliteStore};
use reference::ReferenceData;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct Graded {
    pub pace: pace::PaceAssignment,
    pub totals: points::PointTotals,
    pub grade: Grade,
    pub rows: Vec<PaceSummaryRow>,
}

#[derive(Debug, Clone)]
pub enum Computation {
    /// Section does not enforce review deadlines; nothing is graded.
    Skipped,
    Graded(Graded),
}

/// Resolves pace, rebuilds the pace summary and classifies the registration. Pace summary
/// rows are written in commit mode; nothing else is mutated here.
pub fn compute(
    store: &dyn GradingStore,
    refdata: &ReferenceData,
    cfg: &GradingConfig,
    mode: RunMode,
    reg: &Registration,
) -> GradingResult<Computation> {
    let Some(assignment) = pace::resolve(store, refdata, reg)? else {
        return Ok(Computation::Skipped);
    };
    let rows = summary::materialize(store, cfg, mode, reg, &assignment)?;
    let totals = points::aggregate(store, reg, &rows)?;
    let grade = classify::course_grade(reg, totals.total, refdata.section(&reg.course, &reg.sect))?;
    tracing::debug!(
        reg = %reg.key(),
        pace = assignment.pace,
        track = %assignment.pace_track,
        exam = totals.exam_total,
        review = totals.review_total,
        grade = %grade,
        "registration computed"
    );
    Ok(Computation::Graded(Graded {
        pace: assignment,
        totals,
        grade,
        rows,
    }))
}

/// Runs `f` against a store bound to a fresh transaction. Commit mode commits on success;
/// debug mode and any error roll back when the transaction drops.
pub fn in_registration_tx<T, F>(conn: &Connection, mode: RunMode, f: F) -> GradingResult<T>
where
    F: FnOnce(&dyn GradingStore) -> GradingResult<T>,
{
    let tx = conn.unchecked_transaction()?;
    let out = {
        let store = SqliteStore::new(&tx);
        f(&store)?
    };
    if !mode.is_debug() {
        tx.commit()
            .map_err(|e| GradingError::write("commit registration", e))?;
    }
    Ok(out)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationFailure {
    pub key: RegKey,
    pub code: &'static str,
    pub message: String,
}

/// Summary of one job run, returned to callers and stored in the run audit.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: String,
    pub job: &'static str,
    pub mode: RunMode,
    pub term: String,
    pub considered: usize,
    pub graded: usize,
    pub skipped: usize,
    pub already_final: usize,
    pub challenge: usize,
    pub locked: usize,
    pub resolved: usize,
    pub stalled: usize,
    pub pending: usize,
    pub failed: usize,
    pub errors_by_code: BTreeMap<&'static str, usize>,
    pub grades: BTreeMap<String, usize>,
    pub failures: Vec<RegistrationFailure>,
    pub ignored_reset: usize,
    pub ignored_remaining: usize,
    pub snapshot: Option<String>,
    pub before: Option<Value>,
    pub after: Option<Value>,
}

impl RunReport {
    pub fn new(run_id: String, job: &'static str, mode: RunMode, term: &str) -> Self {
        Self {
            run_id,
            job,
            mode,
            term: term.to_string(),
            considered: 0,
            graded: 0,
            skipped: 0,
            already_final: 0,
            challenge: 0,
            locked: 0,
            resolved: 0,
            stalled: 0,
            pending: 0,
            failed: 0,
            errors_by_code: BTreeMap::new(),
            grades: BTreeMap::new(),
            failures: Vec::new(),
            ignored_reset: 0,
            ignored_remaining: 0,
            snapshot: None,
            before: None,
            after: None,
        }
    }

    pub fn count_grade(&mut self, grade: Option<Grade>) {
        let label = grade.map(Grade::as_str).unwrap_or("none");
        *self.grades.entry(label.to_string()).or_insert(0) += 1;
    }

    /// Logs and tallies a failed registration. The job continues.
    pub fn record_failure(&mut self, reg: &Registration, err: &GradingError) {
        let key = reg.key();
        match err {
            GradingError::Consistency(_) => {
                tracing::warn!(student = %key.student_id, course = %key.course, sect = %key.sect, "{}", err)
            }
            _ => {
                tracing::error!(student = %key.student_id, course = %key.course, sect = %key.sect, code = err.code(), "{}", err)
            }
        }
        self.failed += 1;
        *self.errors_by_code.entry(err.code()).or_insert(0) += 1;
        self.failures.push(RegistrationFailure {
            key,
            code: err.code(),
            message: err.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grading::testutil::{reg, seed_reference, TestDb};

    #[test]
    fn failed_closure_rolls_back_earlier_writes() {
        let db = TestDb::new();
        let r = db.insert_reg(reg("S1", "M 117", "001"));
        let key = r.key();
        let result: GradingResult<()> = in_registration_tx(&db.conn, RunMode::Commit, |store| {
            store.update_registration_completion_grade(&key, "Y", Some(95), Some("A"))?;
            Err(GradingError::Consistency("boom".into()))
        });
        assert!(result.is_err());
        let completed: String = db
            .conn
            .query_row("SELECT completed FROM registrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(completed, "N");
    }

    #[test]
    fn compute_skips_unenforced_sections() {
        let db = TestDb::new();
        seed_reference(&db.conn);
        let r = db.insert_reg(reg("S1", "M 117", "801"));
        let store = db.store();
        let refdata = ReferenceData::load(&store, "SP25").unwrap();
        let got = compute(&store, &refdata, &GradingConfig::default(), RunMode::Debug, &r).unwrap();
        assert!(matches!(got, Computation::Skipped));
    }

    #[test]
    fn report_tallies_failures_by_code() {
        let mut report = RunReport::new("r1".into(), "finalGrades", RunMode::Debug, "SP25");
        let r = reg("S1", "M 117", "001");
        report.record_failure(&r, &GradingError::Configuration("x".into()));
        report.record_failure(&r, &GradingError::Configuration("y".into()));
        report.count_grade(Some(Grade::B));
        assert_eq!(report.failed, 2);
        assert_eq!(report.errors_by_code.get("configuration"), Some(&2));
        assert_eq!(report.grades.get("B"), Some(&1));
    }
}
