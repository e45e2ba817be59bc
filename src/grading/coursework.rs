use crate::error::GradingResult;
use crate::model::{Registration, RunMode};
use crate::store::GradingStore;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptKind {
    Exam,
    Homework,
}

/// Next `passed` value once an attempt has been counted toward a final grade, or `None`
/// when the attempt is left as is.
///
/// | kind     | Y | N | P, n, G, V | anything else |
/// |----------|---|---|------------|---------------|
/// | exam     | P | n | unchanged  | unchanged     |
/// | homework | P | G | unchanged  | V             |
///
/// Locked values map to themselves, so locking twice changes nothing.
pub fn locked_flag(kind: AttemptKind, current: &str) -> Option<&'static str> {
    match (kind, current) {
        (_, "Y") => Some("P"),
        (AttemptKind::Exam, "N") => Some("n"),
        (AttemptKind::Exam, _) => None,
        (AttemptKind::Homework, "N") => Some("G"),
        (AttemptKind::Homework, "P" | "G" | "V") => None,
        (AttemptKind::Homework, _) => Some("V"),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockSummary {
    pub exams_locked: usize,
    pub homework_locked: usize,
}

/// Locks every exam and homework attempt of the registration's student and course and
/// marks the registration finalized.
pub fn lock(
    store: &dyn GradingStore,
    mode: RunMode,
    reg: &Registration,
) -> GradingResult<LockSummary> {
    let mut summary = LockSummary::default();

    for exam in store.exam_attempts(&reg.student_id, &reg.course, true)? {
        let Some(next) = locked_flag(AttemptKind::Exam, &exam.passed) else {
            continue;
        };
        summary.exams_locked += 1;
        if mode.is_debug() {
            tracing::info!(serial = exam.serial_nbr, from = %exam.passed, to = next, "would lock exam attempt");
        } else {
            store.lock_exam_attempt(exam.serial_nbr, next)?;
        }
    }

    for hw in store.homework_attempts(&reg.student_id, &reg.course, true)? {
        let Some(next) = locked_flag(AttemptKind::Homework, &hw.passed) else {
            continue;
        };
        summary.homework_locked += 1;
        if mode.is_debug() {
            tracing::info!(serial = hw.serial_nbr, from = %hw.passed, to = next, "would lock homework attempt");
        } else {
            store.lock_homework_attempt(hw.serial_nbr, next)?;
        }
    }

    if !mode.is_debug() {
        store.mark_coursework_locked(&reg.key())?;
    }
    tracing::debug!(
        reg = %reg.key(),
        exams = summary.exams_locked,
        homework = summary.homework_locked,
        "coursework locked"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grading::testutil::{reg, TestDb};

    #[test]
    fn transition_table() {
        use AttemptKind::*;
        assert_eq!(locked_flag(Exam, "Y"), Some("P"));
        assert_eq!(locked_flag(Exam, "N"), Some("n"));
        assert_eq!(locked_flag(Exam, "P"), None);
        assert_eq!(locked_flag(Exam, "n"), None);
        assert_eq!(locked_flag(Exam, "X"), None);
        assert_eq!(locked_flag(Homework, "Y"), Some("P"));
        assert_eq!(locked_flag(Homework, "N"), Some("G"));
        assert_eq!(locked_flag(Homework, "X"), Some("V"));
        for locked in ["P", "G", "V"] {
            assert_eq!(locked_flag(Homework, locked), None);
        }
    }

    #[test]
    fn second_lock_is_a_no_op() {
        let db = TestDb::new();
        let r = db.insert_reg(reg("S1", "M 117", "001"));
        db.exam("S1", "M 117", 1, "UE", "Y", 14, "2025-02-01");
        db.exam("S1", "M 117", 2, "UE", "N", 8, "2025-02-10");
        db.homework("S1", "M 117", 1, "Y");
        db.homework("S1", "M 117", 1, "N");
        db.homework("S1", "M 117", 2, "X");
        let store = db.store();

        let first = lock(&store, RunMode::Commit, &r).unwrap();
        assert_eq!(first.exams_locked, 2);
        assert_eq!(first.homework_locked, 3);
        assert_eq!(db.passed_flags("exam_attempts", "S1"), vec!["P", "n"]);
        assert_eq!(db.passed_flags("homework_attempts", "S1"), vec!["P", "G", "V"]);

        let second = lock(&store, RunMode::Commit, &r).unwrap();
        assert_eq!(second, LockSummary::default());
        assert_eq!(db.passed_flags("exam_attempts", "S1"), vec!["P", "n"]);
        assert_eq!(db.passed_flags("homework_attempts", "S1"), vec!["P", "G", "V"]);
    }

    #[test]
    fn debug_reports_without_locking() {
        let db = TestDb::new();
        let r = db.insert_reg(reg("S1", "M 117", "001"));
        db.exam("S1", "M 117", 1, "UE", "Y", 14, "2025-02-01");
        let summary = lock(&db.store(), RunMode::Debug, &r).unwrap();
        assert_eq!(summary.exams_locked, 1);
        assert_eq!(db.passed_flags("exam_attempts", "S1"), vec!["Y"]);
    }
}
