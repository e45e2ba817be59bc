use super::reference::ReferenceData;
use super::{compute, coursework, flags, in_registration_tx, runs, stats, Computation, RunReport};
use crate::config::GradingConfig;
use crate::error::GradingResult;
use crate::model::{Grade, Registration, RunMode};
use crate::store::{GradingStore, SqliteStore};
use anyhow::Context;
use rusqlite::Connection;

pub const JOB: &str = "finalGrades";

/// Current-term registrations the final-grades pass touches.
pub fn is_eligible(cfg: &GradingConfig, reg: &Registration) -> bool {
    !reg.is_incomplete_in_progress()
        && !reg.is_dropped()
        && !reg.is_ignored()
        && reg.on_final_class_roll()
        && cfg.is_graded_course(&reg.course)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Challenge(Grade),
    Skipped,
    Graded { grade: Grade, locked: bool },
}

/// Challenge-section registrations pass on a matching placement credit and store no score.
fn grade_challenge(
    store: &dyn GradingStore,
    mode: RunMode,
    reg: &Registration,
) -> GradingResult<Grade> {
    let credited = store
        .placement_credits(&reg.student_id)?
        .iter()
        .any(|c| c.course == reg.course && c.exam_placed == "C");
    let (completed, grade) = if credited {
        ("Y", Grade::S)
    } else {
        tracing::warn!(student = %reg.student_id, course = %reg.course, "no challenge credit on file");
        ("N", Grade::U)
    };

    if mode.is_debug() {
        tracing::info!(
            reg = %reg.key(),
            completed,
            grade = %grade,
            exam_placed = if credited { "M" } else { "unchanged" },
            "would set challenge registration"
        );
        return Ok(grade);
    }

    let key = reg.key();
    store.update_registration_open_status(
        &key,
        "N",
        reg.final_class_roll.as_deref(),
        reg.last_class_roll_dt,
    )?;
    store.update_registration_completion_grade(&key, completed, None, Some(grade.as_str()))?;
    if credited {
        store.update_registration_exam_placed(&key, "M")?;
    }
    Ok(grade)
}

fn finalize_one(
    store: &dyn GradingStore,
    refdata: &ReferenceData,
    cfg: &GradingConfig,
    mode: RunMode,
    reg: &Registration,
) -> GradingResult<Outcome> {
    if cfg.is_challenge_section(&reg.sect) {
        return grade_challenge(store, mode, reg).map(Outcome::Challenge);
    }
    let graded = match compute(store, refdata, cfg, mode, reg)? {
        Computation::Skipped => return Ok(Outcome::Skipped),
        Computation::Graded(g) => g,
    };
    flags::apply(store, mode, reg, graded.totals.total, Some(graded.grade))?;
    let locked = graded.grade == Grade::A;
    if locked {
        coursework::lock(store, mode, reg)?;
    }
    Ok(Outcome::Graded {
        grade: graded.grade,
        locked,
    })
}

/// Grades every eligible registration in the active term, then resets ignored
/// registrations. One registration's failure never stops the pass.
pub fn run_final_grades(
    conn: &Connection,
    cfg: &GradingConfig,
    mode: RunMode,
) -> anyhow::Result<RunReport> {
    let store = SqliteStore::new(conn);
    let term = store
        .active_term()?
        .context("no active term")?
        .term;

    let run_id = runs::begin_run(conn, JOB, mode, &term)?;
    let mut report = RunReport::new(run_id, JOB, mode, &term);
    tracing::info!(run = %report.run_id, term = %term, mode = mode.as_str(), "final grades started");

    let before = stats::term_counters(&store, cfg, &term)?;
    stats::log_term_counters("before", &before);
    report.before = Some(serde_json::to_value(&before)?);

    let refdata = ReferenceData::load(&store, &term)?;
    let regs: Vec<Registration> = store
        .registrations_for_term(&term, false, false)?
        .into_iter()
        .filter(|r| is_eligible(cfg, r))
        .collect();
    tracing::info!(count = regs.len(), "registrations to process");

    for reg in &regs {
        report.considered += 1;
        if reg.coursework_locked {
            report.already_final += 1;
            continue;
        }
        match in_registration_tx(conn, mode, |s| finalize_one(s, &refdata, cfg, mode, reg)) {
            Ok(Outcome::Challenge(grade)) => {
                report.challenge += 1;
                report.count_grade(Some(grade));
            }
            Ok(Outcome::Skipped) => report.skipped += 1,
            Ok(Outcome::Graded { grade, locked }) => {
                report.graded += 1;
                report.locked += usize::from(locked);
                report.count_grade(Some(grade));
            }
            Err(e) => report.record_failure(reg, &e),
        }
    }

    let (reset, remaining) = stats::reset_ignored(conn, cfg, mode, &term)?;
    report.ignored_reset = reset;
    report.ignored_remaining = remaining;

    let after = stats::term_counters(&store, cfg, &term)?;
    stats::log_term_counters("after", &after);
    report.after = Some(serde_json::to_value(&after)?);

    runs::finish_run(conn, &report)?;
    tracing::info!(
        run = %report.run_id,
        graded = report.graded,
        challenge = report.challenge,
        skipped = report.skipped,
        already_final = report.already_final,
        failed = report.failed,
        "final grades finished"
    );
    Ok(report)
}
