use super::milestone::{milestone_number, resolve_due_date, review_points, schedule_context};
use super::pace::PaceAssignment;
use crate::config::GradingConfig;
use crate::error::{GradingError, GradingResult};
use crate::model::{ExamAttempt, PaceSummaryRow, Registration, RunMode};
use crate::store::GradingStore;

pub const REVIEW_EXAM_TYPES: [&str; 6] = ["R", "RE", "UR", "MR", "FR", "SR"];

/// First-passing review exams, ordered by unit then completion. Only review versions
/// (codes ending in "RE") qualify; an attempt with no version code never does.
pub fn first_passed_reviews(attempts: &[ExamAttempt]) -> Vec<&ExamAttempt> {
    let mut out: Vec<&ExamAttempt> = attempts
        .iter()
        .filter(|a| {
            a.passed == "Y"
                && a.is_first_passed.as_deref() == Some("Y")
                && a.version.as_deref().is_some_and(|v| v.ends_with("RE"))
                && REVIEW_EXAM_TYPES.contains(&a.exam_type.as_str())
        })
        .collect();
    out.sort_by(|a, b| {
        (a.unit, a.exam_dt, a.finish_time, a.serial_nbr).cmp(&(
            b.unit,
            b.exam_dt,
            b.finish_time,
            b.serial_nbr,
        ))
    });
    out
}

/// Computes every PaceSummaryRow for the registration, then replaces the stored set.
///
/// All rows are computed before anything is written, so a unit whose due date or points
/// configuration cannot be resolved fails the whole registration with nothing touched.
/// Points configuration is only required for exams taken on or before their due date.
pub fn materialize(
    store: &dyn GradingStore,
    cfg: &GradingConfig,
    mode: RunMode,
    reg: &Registration,
    assignment: &PaceAssignment,
) -> GradingResult<Vec<PaceSummaryRow>> {
    let Some(pace_order) = reg.pace_order else {
        tracing::debug!(reg = %reg.key(), "no pace order; pace summary not built");
        replace_all(store, mode, reg, &[])?;
        return Ok(Vec::new());
    };

    let ctx = schedule_context(store, reg, assignment)?;
    if ctx.pace == 0 {
        tracing::debug!(reg = %reg.key(), "pace 0; pace summary not built");
        replace_all(store, mode, reg, &[])?;
        return Ok(Vec::new());
    }
    let points_term = match (reg.is_incomplete_in_progress(), reg.i_term.as_deref()) {
        (true, Some(origin)) => origin.to_string(),
        _ => reg.term.clone(),
    };

    let attempts = store.exam_attempts(&reg.student_id, &reg.course, false)?;
    let mut rows = Vec::new();
    for exam in first_passed_reviews(&attempts) {
        let ms_nbr = milestone_number(ctx.pace, pace_order, exam.unit).ok_or_else(|| {
            GradingError::Consistency(format!(
                "milestone number out of range: pace {}, order {}, unit {} for {}",
                ctx.pace,
                pace_order,
                exam.unit,
                reg.key()
            ))
        })?;

        let due = resolve_due_date(
            store,
            &ctx.term,
            ctx.pace,
            &ctx.pace_track,
            ms_nbr,
            &cfg.review_milestone_type,
            &reg.student_id,
        )?
        .ok_or_else(|| {
            GradingError::Consistency(format!(
                "unable to determine due date for {} milestone {} (pace {} track {} in {})",
                reg.student_id, ms_nbr, ctx.pace, ctx.pace_track, ctx.term
            ))
        })?;

        // Late exams earn nothing, so their points configuration is never consulted.
        let re_points = if exam.exam_dt > due.date {
            0
        } else {
            let on_time = store
                .review_points_config(&points_term, &reg.course, &reg.sect, exam.unit)?
                .ok_or_else(|| {
                    GradingError::Configuration(format!(
                        "no on-time review points for {} unit {} in {}",
                        reg.course, exam.unit, points_term
                    ))
                })?;
            review_points(exam.exam_dt, due.date, on_time)
        };

        rows.push(PaceSummaryRow {
            term: reg.term.clone(),
            student_id: reg.student_id.clone(),
            course: reg.course.clone(),
            sect: reg.sect.clone(),
            i_in_progress: reg.i_in_progress.clone(),
            pace: ctx.pace,
            pace_track: ctx.pace_track.clone(),
            pace_order,
            ms_nbr,
            ms_unit: exam.unit,
            ms_date: due.date,
            new_ms_date: due.overridden.then(|| "Y".to_string()),
            exam_dt: exam.exam_dt,
            re_points,
        });
    }

    replace_all(store, mode, reg, &rows)?;
    Ok(rows)
}

fn replace_all(
    store: &dyn GradingStore,
    mode: RunMode,
    reg: &Registration,
    rows: &[PaceSummaryRow],
) -> GradingResult<()> {
    if mode.is_debug() {
        for row in rows {
            tracing::info!(
                reg = %reg.key(),
                ms_nbr = row.ms_nbr,
                unit = row.ms_unit,
                due = %row.ms_date,
                exam_dt = %row.exam_dt,
                points = row.re_points,
                "would write pace summary row"
            );
        }
        return Ok(());
    }
    store.delete_pace_summary(&reg.key())?;
    for row in rows {
        store.replace_pace_summary(row)?;
    }
    Ok(())
}
