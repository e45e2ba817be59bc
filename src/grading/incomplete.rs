use super::reference::ReferenceData;
use super::{compute, coursework, flags, in_registration_tx, runs, stats, Computation, RunReport};
use crate::config::GradingConfig;
use crate::error::GradingResult;
use crate::model::{Grade, Registration, RunMode};
use crate::store::{GradingStore, SqliteStore};
use anyhow::Context;
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::Serialize;

pub const JOB: &str = "incompletes";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IncompleteState {
    /// Graded and coursework locked. Terminal.
    Resolved,
    /// No deadline on record; left alone until one is entered.
    Stalled,
    /// Deadline not yet reached; the pace summary is dropped and rebuilt next run.
    Pending,
}

/// An A always resolves. Otherwise the Incomplete resolves only once its deadline is
/// strictly before `today`.
pub fn next_state(grade: Grade, deadline: Option<NaiveDate>, today: NaiveDate) -> IncompleteState {
    if grade == Grade::A {
        return IncompleteState::Resolved;
    }
    match deadline {
        None => IncompleteState::Stalled,
        Some(d) if d < today => IncompleteState::Resolved,
        Some(_) => IncompleteState::Pending,
    }
}

pub fn is_eligible(cfg: &GradingConfig, reg: &Registration) -> bool {
    reg.is_incomplete_in_progress()
        && !reg.is_dropped()
        && reg.on_final_class_roll()
        && cfg.is_graded_course(&reg.course)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Skipped,
    Evaluated(IncompleteState, Grade),
}

fn resolve_one(
    store: &dyn GradingStore,
    refdata: &ReferenceData,
    cfg: &GradingConfig,
    mode: RunMode,
    today: NaiveDate,
    reg: &Registration,
) -> GradingResult<Outcome> {
    let graded = match compute(store, refdata, cfg, mode, reg)? {
        Computation::Skipped => return Ok(Outcome::Skipped),
        Computation::Graded(g) => g,
    };

    let state = next_state(graded.grade, reg.i_deadline_dt, today);
    match state {
        IncompleteState::Resolved => {
            flags::apply(store, mode, reg, graded.totals.total, Some(graded.grade))?;
            coursework::lock(store, mode, reg)?;
            tracing::info!(
                reg = %reg.key(),
                origin_term = ?reg.i_term,
                grade = %graded.grade,
                points = graded.totals.total,
                "incomplete resolved"
            );
        }
        IncompleteState::Stalled => {
            tracing::warn!(
                student = %reg.student_id,
                course = %reg.course,
                sect = %reg.sect,
                "incomplete has no deadline date"
            );
        }
        IncompleteState::Pending => {
            if mode.is_debug() {
                tracing::info!(reg = %reg.key(), "would delete pace summary for pending incomplete");
            } else {
                store.delete_pace_summary(&reg.key())?;
            }
        }
    }
    Ok(Outcome::Evaluated(state, graded.grade))
}

/// Evaluates every in-progress Incomplete in the active term against `today`.
pub fn run_incompletes(
    conn: &Connection,
    cfg: &GradingConfig,
    mode: RunMode,
    today: NaiveDate,
) -> anyhow::Result<RunReport> {
    let store = SqliteStore::new(conn);
    let term = store
        .active_term()?
        .context("no active term")?
        .term;

    let run_id = runs::begin_run(conn, JOB, mode, &term)?;
    let mut report = RunReport::new(run_id, JOB, mode, &term);
    tracing::info!(run = %report.run_id, term = %term, today = %today, mode = mode.as_str(), "incompletes started");

    let before = stats::incomplete_stats(&store, cfg, &term)?;
    stats::log_incomplete_stats("before", &before);
    report.before = Some(serde_json::to_value(&before)?);

    let refdata = ReferenceData::load(&store, &term)?;
    let regs: Vec<Registration> = store
        .registrations_for_term(&term, true, false)?
        .into_iter()
        .filter(|r| is_eligible(cfg, r))
        .collect();
    tracing::info!(count = regs.len(), "incomplete registrations to process");

    for reg in &regs {
        report.considered += 1;
        if reg.coursework_locked {
            report.already_final += 1;
            continue;
        }
        match in_registration_tx(conn, mode, |s| resolve_one(s, &refdata, cfg, mode, today, reg)) {
            Ok(Outcome::Skipped) => report.skipped += 1,
            Ok(Outcome::Evaluated(state, grade)) => {
                report.graded += 1;
                match state {
                    IncompleteState::Resolved => {
                        report.resolved += 1;
                        report.locked += 1;
                        report.count_grade(Some(grade));
                    }
                    IncompleteState::Stalled => report.stalled += 1,
                    IncompleteState::Pending => report.pending += 1,
                }
            }
            Err(e) => report.record_failure(reg, &e),
        }
    }

    let after = stats::incomplete_stats(&store, cfg, &term)?;
    stats::log_incomplete_stats("after", &after);
    report.after = Some(serde_json::to_value(&after)?);

    runs::finish_run(conn, &report)?;
    tracing::info!(
        run = %report.run_id,
        resolved = report.resolved,
        stalled = report.stalled,
        pending = report.pending,
        failed = report.failed,
        "incompletes finished"
    );
    Ok(report)
}
