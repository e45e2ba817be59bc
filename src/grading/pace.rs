use super::reference::ReferenceData;
use crate::error::{GradingError, GradingResult};
use crate::model::Registration;
use crate::store::GradingStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaceAssignment {
    pub pace: i64,
    pub pace_track: String,
}

/// Resolves pace and pace track for a registration.
///
/// `Ok(None)` means the registration's pacing structure has review-exam deadlines turned
/// off and pace-based grading should be skipped for it. A section or pacing structure that
/// is missing altogether is a configuration error. An enforcing section can still resolve
/// to pace 0, e.g. an uncounted Incomplete with no other current-term courses.
pub fn resolve(
    store: &dyn GradingStore,
    refdata: &ReferenceData,
    reg: &Registration,
) -> GradingResult<Option<PaceAssignment>> {
    if !refdata.review_deadlines_enforced(&reg.course, &reg.sect)? {
        return Ok(None);
    }
    let pace = resolve_pace(store, refdata, reg)?;
    let pace_track = resolve_pace_track(store, refdata, reg)?;
    Ok(Some(PaceAssignment { pace, pace_track }))
}

pub fn resolve_pace_track(
    store: &dyn GradingStore,
    refdata: &ReferenceData,
    reg: &Registration,
) -> GradingResult<String> {
    let track = if reg.is_incomplete_in_progress() {
        let origin = reg.i_term.as_deref().ok_or_else(|| {
            GradingError::Consistency(format!("Incomplete {} has no origin term", reg.key()))
        })?;
        store
            .student_term(origin, &reg.student_id)?
            .and_then(|st| st.pace_track)
    } else {
        let stored = store
            .student_term(&reg.term, &reg.student_id)?
            .and_then(|st| st.pace_track);
        stored.or_else(|| {
            refdata
                .pacing_for_section(&reg.course, &reg.sect)
                .and_then(|p| p.def_pace_track.clone())
        })
    };

    match track {
        Some(t) if !t.trim().is_empty() => Ok(truncate_track(&t)),
        _ => Err(GradingError::Configuration(format!(
            "unable to determine pace track for {}",
            reg.key()
        ))),
    }
}

/// Tracks may carry suffixes ("A2"); only the first character selects the schedule.
pub fn truncate_track(track: &str) -> String {
    track.trim().chars().take(1).collect()
}

/// Counts the registrations that make up the student's pace. Returns 0 when `reg` is not
/// in a deadline-enforcing section.
pub fn resolve_pace(
    store: &dyn GradingStore,
    refdata: &ReferenceData,
    reg: &Registration,
) -> GradingResult<i64> {
    if !refdata.review_deadlines_enforced(&reg.course, &reg.sect)? {
        return Ok(0);
    }

    let student_regs = store.registrations_for_student(&refdata.term, &reg.student_id)?;
    let total = count_paced(&student_regs, |course, sect| {
        refdata.enforces_review_deadlines(course, sect)
    });

    if let Some(stored) = store
        .student_term(&refdata.term, &reg.student_id)?
        .and_then(|st| st.pace)
    {
        if stored != total {
            // Tolerated drift: the computed value wins.
            tracing::warn!(
                student = %reg.student_id,
                course = %reg.course,
                computed = total,
                stored,
                "pace mismatch between registrations and student-term record"
            );
        }
    }

    Ok(total)
}

/// Current-term registrations plus counted prior-term Incompletes, both restricted to
/// enforcing sections. Dropped, ignored and alternate-instruction ("OT") rows never count.
pub fn count_paced<F>(regs: &[Registration], enforcing: F) -> i64
where
    F: Fn(&str, &str) -> bool,
{
    let mut current = 0;
    let mut prior = 0;
    for r in regs {
        if r.is_dropped() || r.is_ignored() || r.instrn_type.as_deref() == Some("OT") {
            continue;
        }
        if !enforcing(&r.course, &r.sect) {
            continue;
        }
        if r.i_term.is_none() {
            current += 1;
        } else if r.is_counted_incomplete() {
            prior += 1;
        }
    }
    current + prior
}
