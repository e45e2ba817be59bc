use crate::error::GradingResult;
use crate::model::{ExamAttempt, PaceSummaryRow, Registration};
use crate::store::GradingStore;
use serde::Serialize;
use std::collections::BTreeMap;

/// Proctored unit and final exam types whose scores make up the exam total.
pub const PROCTORED_EXAM_TYPES: [&str; 6] = ["U", "UE", "M", "ME", "F", "FE"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PointTotals {
    pub exam_total: i64,
    pub review_total: i64,
    pub total: i64,
}

/// Best passing proctored score per unit, summed. Retakes never add up.
pub fn exam_total(attempts: &[ExamAttempt]) -> i64 {
    let mut best: BTreeMap<i64, i64> = BTreeMap::new();
    for a in attempts {
        if a.passed != "Y" || !PROCTORED_EXAM_TYPES.contains(&a.exam_type.as_str()) {
            continue;
        }
        let score = a.exam_score.unwrap_or(0);
        let slot = best.entry(a.unit).or_insert(score);
        if score > *slot {
            *slot = score;
        }
    }
    best.values().sum()
}

/// Highest review points per unit across pace summary rows, summed.
pub fn review_total(rows: &[PaceSummaryRow]) -> i64 {
    let mut best: BTreeMap<i64, i64> = BTreeMap::new();
    for row in rows {
        let slot = best.entry(row.ms_unit).or_insert(row.re_points);
        if row.re_points > *slot {
            *slot = row.re_points;
        }
    }
    best.values().sum()
}

/// Totals for a registration.
///
/// Review points come from stored pace summaries for the student's course, with the rows
/// belonging to this registration replaced by `fresh_rows`. Debug and commit runs therefore
/// see the same total even though only commit runs persist the rows.
pub fn aggregate(
    store: &dyn GradingStore,
    reg: &Registration,
    fresh_rows: &[PaceSummaryRow],
) -> GradingResult<PointTotals> {
    let attempts = store.exam_attempts(&reg.student_id, &reg.course, false)?;
    let exam_total = exam_total(&attempts);

    let mut rows: Vec<PaceSummaryRow> = store
        .pace_summaries(&reg.student_id, &reg.course)?
        .into_iter()
        .filter(|r| !(r.sect == reg.sect && r.term == reg.term))
        .collect();
    rows.extend_from_slice(fresh_rows);
    let review_total = review_total(&rows);

    Ok(PointTotals {
        exam_total,
        review_total,
        total: exam_total + review_total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grading::testutil::{reg, TestDb};
    use chrono::NaiveDate;

    fn row(unit: i64, points: i64) -> PaceSummaryRow {
        let d = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        PaceSummaryRow {
            term: "SP25".into(),
            student_id: "S1".into(),
            course: "M 117".into(),
            sect: "001".into(),
            i_in_progress: None,
            pace: 3,
            pace_track: "A".into(),
            pace_order: 2,
            ms_nbr: 320 + unit,
            ms_unit: unit,
            ms_date: d,
            new_ms_date: None,
            exam_dt: d,
            re_points: points,
        }
    }

    #[test]
    fn exam_total_takes_best_passing_score_per_unit() {
        let db = TestDb::new();
        db.exam("S1", "M 117", 1, "UE", "Y", 12, "2025-02-01");
        db.exam("S1", "M 117", 1, "UE", "Y", 14, "2025-02-03");
        db.exam("S1", "M 117", 2, "UE", "N", 18, "2025-02-10");
        db.exam("S1", "M 117", 2, "R", "Y", 10, "2025-02-09");
        db.exam("S1", "M 117", 5, "FE", "Y", 30, "2025-04-01");
        let attempts = db.store().exam_attempts("S1", "M 117", false).unwrap();
        assert_eq!(exam_total(&attempts), 44);
    }

    #[test]
    fn review_total_counts_each_unit_once() {
        let rows = vec![row(1, 5), row(1, 0), row(2, 0), row(3, 5)];
        assert_eq!(review_total(&rows), 10);
        assert_eq!(review_total(&[]), 0);
    }

    #[test]
    fn aggregate_prefers_fresh_rows_over_stored_ones() {
        let db = TestDb::new();
        let store = db.store();
        let r = db.insert_reg(reg("S1", "M 117", "001"));
        db.exam("S1", "M 117", 1, "UE", "Y", 40, "2025-02-01");
        db.exam("S1", "M 117", 2, "UE", "Y", 37, "2025-02-20");
        store.replace_pace_summary(&row(1, 0)).unwrap();
        store.replace_pace_summary(&row(2, 0)).unwrap();

        let fresh = vec![row(1, 5), row(2, 5)];
        let totals = aggregate(&store, &r, &fresh).unwrap();
        assert_eq!(
            totals,
            PointTotals {
                exam_total: 77,
                review_total: 10,
                total: 87
            }
        );
    }
}
