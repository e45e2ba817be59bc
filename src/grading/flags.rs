use crate::error::GradingResult;
use crate::model::{Grade, Registration, RunMode};
use crate::store::GradingStore;
use serde::Serialize;

/// Field values written to a registration for a computed grade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagUpdate {
    pub open_status: &'static str,
    pub completed: &'static str,
    pub score: Option<i64>,
    pub grade: Option<Grade>,
    pub delete_pace_summary: bool,
}

/// Registration flags for a computed grade:
///
/// | grade   | open status | completed | score      |
/// |---------|-------------|-----------|------------|
/// | F       | N           | N         | total      |
/// | I       | Y           | N         | cleared    |
/// | A,B,C,D | N           | Y         | total      |
/// | U       | N           | N         | total      |
/// | other   | N           | N         | cleared, grade cleared |
///
/// An `I` also drops the registration's pace summary rows.
pub fn flag_update(grade: Option<Grade>, total: i64) -> FlagUpdate {
    match grade {
        Some(Grade::F) => FlagUpdate {
            open_status: "N",
            completed: "N",
            score: Some(total),
            grade,
            delete_pace_summary: false,
        },
        Some(Grade::I) => FlagUpdate {
            open_status: "Y",
            completed: "N",
            score: None,
            grade,
            delete_pace_summary: true,
        },
        Some(Grade::A | Grade::B | Grade::C | Grade::D) => FlagUpdate {
            open_status: "N",
            completed: "Y",
            score: Some(total),
            grade,
            delete_pace_summary: false,
        },
        Some(Grade::U) => FlagUpdate {
            open_status: "N",
            completed: "N",
            score: Some(total),
            grade,
            delete_pace_summary: false,
        },
        Some(Grade::S) | None => FlagUpdate {
            open_status: "N",
            completed: "N",
            score: None,
            grade: None,
            delete_pace_summary: false,
        },
    }
}

/// Writes completion, score, grade and open status for the registration.
///
/// Both updates run on the caller's connection; inside the per-registration transaction
/// they commit or roll back together.
pub fn apply(
    store: &dyn GradingStore,
    mode: RunMode,
    reg: &Registration,
    total: i64,
    grade: Option<Grade>,
) -> GradingResult<FlagUpdate> {
    let update = flag_update(grade, total);
    let key = reg.key();

    if mode.is_debug() {
        tracing::info!(
            reg = %key,
            open_status = update.open_status,
            completed = update.completed,
            score = ?update.score,
            grade = ?update.grade.map(Grade::as_str),
            delete_pace_summary = update.delete_pace_summary,
            "would set registration flags"
        );
        return Ok(update);
    }

    store.update_registration_completion_grade(
        &key,
        update.completed,
        update.score,
        update.grade.map(Grade::as_str),
    )?;
    store.update_registration_open_status(
        &key,
        update.open_status,
        reg.final_class_roll.as_deref(),
        reg.last_class_roll_dt,
    )?;
    if update.delete_pace_summary {
        store.delete_pace_summary(&key)?;
    }
    Ok(update)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grading::testutil::{reg, TestDb};

    fn stored(db: &TestDb) -> (String, String, Option<i64>, Option<String>) {
        db.conn
            .query_row(
                "SELECT open_status, completed, score, course_grade FROM registrations
                 WHERE student_id = 'S1' AND course = 'M 117'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .unwrap()
    }

    #[test]
    fn grade_table() {
        assert_eq!(flag_update(Some(Grade::B), 82).completed, "Y");
        assert_eq!(flag_update(Some(Grade::B), 82).score, Some(82));
        assert_eq!(flag_update(Some(Grade::U), 40).completed, "N");
        assert_eq!(flag_update(Some(Grade::U), 40).score, Some(40));
        assert_eq!(flag_update(Some(Grade::F), 75).open_status, "N");
        assert_eq!(flag_update(Some(Grade::F), 75).score, Some(75));

        let inc = flag_update(Some(Grade::I), 75);
        assert_eq!((inc.open_status, inc.completed, inc.score), ("Y", "N", None));
        assert!(inc.delete_pace_summary);

        let none = flag_update(None, 75);
        assert_eq!((none.score, none.grade), (None, None));
    }

    #[test]
    fn commit_writes_both_updates() {
        let db = TestDb::new();
        let mut r = reg("S1", "M 117", "001");
        r.score = Some(3);
        let r = db.insert_reg(r);
        apply(&db.store(), RunMode::Commit, &r, 82, Some(Grade::B)).unwrap();
        assert_eq!(
            stored(&db),
            ("N".to_string(), "Y".to_string(), Some(82), Some("B".to_string()))
        );
    }

    #[test]
    fn debug_leaves_registration_untouched() {
        let db = TestDb::new();
        let r = db.insert_reg(reg("S1", "M 117", "001"));
        apply(&db.store(), RunMode::Debug, &r, 82, Some(Grade::B)).unwrap();
        assert_eq!(stored(&db), ("Y".to_string(), "N".to_string(), None, None));
    }

    #[test]
    fn missing_registration_is_a_write_error() {
        let db = TestDb::new();
        let r = reg("S1", "M 117", "001");
        let err = apply(&db.store(), RunMode::Commit, &r, 82, Some(Grade::B)).unwrap_err();
        assert_eq!(err.code(), "write");
    }
}
