use super::pace::{truncate_track, PaceAssignment};
use crate::error::{GradingError, GradingResult};
use crate::model::{Milestone, MilestoneOverride, Registration};
use crate::store::GradingStore;
use chrono::NaiveDate;
use serde::Serialize;

/// `pace*100 + pace_order*10 + unit`, defined for pace 1..=8, pace order 1..=9, unit 0..=9.
pub fn milestone_number(pace: i64, pace_order: i64, unit: i64) -> Option<i64> {
    if !(1..=8).contains(&pace) || !(1..=9).contains(&pace_order) || !(0..=9).contains(&unit) {
        return None;
    }
    Some(pace * 100 + pace_order * 10 + unit)
}

/// Inverse of [`milestone_number`]: `(pace, pace_order, unit)`.
pub fn decode_milestone_number(ms_nbr: i64) -> Option<(i64, i64, i64)> {
    let pace = ms_nbr / 100;
    let pace_order = (ms_nbr / 10) % 10;
    let unit = ms_nbr % 10;
    milestone_number(pace, pace_order, unit)
        .filter(|n| *n == ms_nbr)
        .map(|_| (pace, pace_order, unit))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedDueDate {
    pub date: NaiveDate,
    /// Audit only; grading never branches on it.
    pub overridden: bool,
}

/// Base date for the milestone, pushed later by the latest matching student override.
/// `None` when there is no base milestone row.
pub fn pick_due_date(
    milestones: &[Milestone],
    overrides: &[MilestoneOverride],
    ms_nbr: i64,
    ms_type: &str,
) -> Option<ResolvedDueDate> {
    let base = milestones
        .iter()
        .find(|m| m.ms_nbr == ms_nbr && m.ms_type == ms_type)?
        .ms_date;

    let latest_override = overrides
        .iter()
        .filter(|o| o.ms_nbr == ms_nbr && o.ms_type == ms_type)
        .map(|o| o.ms_date)
        .max();

    match latest_override {
        Some(d) if d > base => Some(ResolvedDueDate {
            date: d,
            overridden: true,
        }),
        _ => Some(ResolvedDueDate {
            date: base,
            overridden: false,
        }),
    }
}

pub fn resolve_due_date(
    store: &dyn GradingStore,
    term: &str,
    pace: i64,
    pace_track: &str,
    ms_nbr: i64,
    ms_type: &str,
    student_id: &str,
) -> GradingResult<Option<ResolvedDueDate>> {
    let milestones = store.milestones(term, pace, pace_track)?;
    if !milestones
        .iter()
        .any(|m| m.ms_nbr == ms_nbr && m.ms_type == ms_type)
    {
        return Ok(None);
    }
    let overrides = store.milestone_overrides(term, pace_track, student_id)?;
    Ok(pick_due_date(&milestones, &overrides, ms_nbr, ms_type))
}

/// On-time value when the exam was completed on or before the due date, else 0.
pub fn review_points(exam_dt: NaiveDate, due: NaiveDate, on_time_points: i64) -> i64 {
    if exam_dt > due {
        0
    } else {
        on_time_points
    }
}

/// The term, pace and track whose milestone schedule applies to a registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleContext {
    pub term: String,
    pub pace: i64,
    pub pace_track: String,
}

/// An in-progress Incomplete that is not counted toward the current pace keeps the
/// schedule it started under in its origin term. Everything else uses the current term
/// with the computed pace.
pub fn schedule_context(
    store: &dyn GradingStore,
    reg: &Registration,
    assignment: &PaceAssignment,
) -> GradingResult<ScheduleContext> {
    if reg.is_incomplete_in_progress() && !reg.is_counted_incomplete() {
        if let Some(origin) = reg.i_term.as_deref() {
            let st = store.student_term(origin, &reg.student_id)?;
            let (Some(pace), Some(track)) = (
                st.as_ref().and_then(|s| s.pace),
                st.as_ref().and_then(|s| s.pace_track.clone()),
            ) else {
                return Err(GradingError::Configuration(format!(
                    "no origin-term pace for {} in {}",
                    reg.key(),
                    origin
                )));
            };
            return Ok(ScheduleContext {
                term: origin.to_string(),
                pace,
                pace_track: truncate_track(&track),
            });
        }
    }
    Ok(ScheduleContext {
        term: reg.term.clone(),
        pace: assignment.pace,
        pace_track: assignment.pace_track.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn ms(nbr: i64, ty: &str, date: &str) -> Milestone {
        Milestone {
            term: "SP25".into(),
            pace: 3,
            pace_track: "A".into(),
            ms_nbr: nbr,
            ms_type: ty.into(),
            ms_date: d(date),
        }
    }

    fn ov(nbr: i64, ty: &str, date: &str) -> MilestoneOverride {
        MilestoneOverride {
            term: "SP25".into(),
            pace_track: "A".into(),
            student_id: "S1".into(),
            ms_nbr: nbr,
            ms_type: ty.into(),
            ms_date: d(date),
        }
    }

    #[test]
    fn milestone_numbers_are_invertible_over_the_whole_domain() {
        let mut seen = std::collections::HashSet::new();
        for pace in 1..=8 {
            for order in 1..=9 {
                for unit in 0..=9 {
                    let n = milestone_number(pace, order, unit).expect("in range");
                    assert!(seen.insert(n), "duplicate milestone number {}", n);
                    assert_eq!(decode_milestone_number(n), Some((pace, order, unit)));
                }
            }
        }
        assert_eq!(milestone_number(3, 2, 4), Some(324));
        assert_eq!(milestone_number(0, 2, 4), None);
        assert_eq!(milestone_number(9, 2, 4), None);
        assert_eq!(milestone_number(3, 10, 4), None);
        assert_eq!(decode_milestone_number(304), None);
    }

    #[test]
    fn later_override_wins_and_earlier_is_ignored() {
        let base = vec![ms(324, "RE", "2025-03-10"), ms(324, "FE", "2025-03-20")];
        let later = vec![ov(324, "RE", "2025-03-11"), ov(324, "RE", "2025-03-12")];
        let got = pick_due_date(&base, &later, 324, "RE").unwrap();
        assert_eq!(got.date, d("2025-03-12"));
        assert!(got.overridden);

        let earlier = vec![ov(324, "RE", "2025-03-01")];
        let got = pick_due_date(&base, &earlier, 324, "RE").unwrap();
        assert_eq!(got.date, d("2025-03-10"));
        assert!(!got.overridden);

        let same_day = vec![ov(324, "RE", "2025-03-10")];
        assert!(!pick_due_date(&base, &same_day, 324, "RE").unwrap().overridden);
    }

    #[test]
    fn override_without_base_row_is_not_found() {
        let overrides = vec![ov(325, "RE", "2025-03-12")];
        assert_eq!(pick_due_date(&[ms(324, "RE", "2025-03-10")], &overrides, 325, "RE"), None);
    }

    #[test]
    fn review_points_respect_resolved_deadline() {
        let due = d("2025-03-12");
        assert_eq!(review_points(d("2025-03-11"), due, 5), 5);
        assert_eq!(review_points(d("2025-03-12"), due, 5), 5);
        assert_eq!(review_points(d("2025-03-13"), due, 5), 0);
    }
}
