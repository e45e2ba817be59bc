use super::in_registration_tx;
use crate::config::GradingConfig;
use crate::error::GradingResult;
use crate::model::{Registration, RunMode};
use crate::store::{GradingStore, SqliteStore};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashSet;

/// Counters over current-term, non-Incomplete registrations on the final class roll in
/// graded courses. Challenge-section rows are counted as placement registrations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalGradeStats {
    pub non_placement_students: usize,
    pub non_placement_registrations: usize,
    pub ignored_registrations: usize,
    pub placement_registrations: usize,
    pub non_placement_completed: usize,
    pub placement_completed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncompleteStats {
    pub students: usize,
    pub registrations: usize,
    pub completed: usize,
    pub counted_in_pace: usize,
}

/// Both counter sets for a term, as reported before and after the final-grades pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TermCounters {
    pub final_grades: FinalGradeStats,
    pub incompletes: IncompleteStats,
}

fn in_scope(cfg: &GradingConfig, reg: &Registration) -> bool {
    reg.on_final_class_roll() && cfg.is_graded_course(&reg.course)
}

pub fn final_grade_stats(
    store: &dyn GradingStore,
    cfg: &GradingConfig,
    term: &str,
) -> GradingResult<FinalGradeStats> {
    let mut stats = FinalGradeStats::default();
    let mut students = HashSet::new();
    for reg in store.registrations_for_term(term, false, false)? {
        if !in_scope(cfg, &reg) {
            continue;
        }
        let completed = reg.completed == "Y";
        if cfg.is_challenge_section(&reg.sect) {
            stats.placement_registrations += 1;
            stats.placement_completed += usize::from(completed);
        } else if reg.is_ignored() {
            stats.ignored_registrations += 1;
        } else {
            students.insert(reg.student_id.clone());
            stats.non_placement_registrations += 1;
            stats.non_placement_completed += usize::from(completed);
        }
    }
    stats.non_placement_students = students.len();
    Ok(stats)
}

pub fn incomplete_stats(
    store: &dyn GradingStore,
    cfg: &GradingConfig,
    term: &str,
) -> GradingResult<IncompleteStats> {
    let mut stats = IncompleteStats::default();
    let mut students = HashSet::new();
    for reg in store.registrations_for_term(term, true, false)? {
        if !reg.is_incomplete_in_progress() || !in_scope(cfg, &reg) {
            continue;
        }
        students.insert(reg.student_id.clone());
        stats.registrations += 1;
        stats.completed += usize::from(reg.completed == "Y");
        stats.counted_in_pace += usize::from(reg.is_counted_incomplete());
    }
    stats.students = students.len();
    Ok(stats)
}

pub fn log_final_grade_stats(label: &str, stats: &FinalGradeStats) {
    tracing::info!(
        label = %label,
        non_placement_students = stats.non_placement_students,
        non_placement_registrations = stats.non_placement_registrations,
        ignored = stats.ignored_registrations,
        placement_registrations = stats.placement_registrations,
        non_placement_completed = stats.non_placement_completed,
        placement_completed = stats.placement_completed,
        "final grade statistics"
    );
}

pub fn log_incomplete_stats(label: &str, stats: &IncompleteStats) {
    tracing::info!(
        label = %label,
        students = stats.students,
        registrations = stats.registrations,
        completed = stats.completed,
        counted_in_pace = stats.counted_in_pace,
        "incomplete statistics"
    );
}

pub fn term_counters(
    store: &dyn GradingStore,
    cfg: &GradingConfig,
    term: &str,
) -> GradingResult<TermCounters> {
    Ok(TermCounters {
        final_grades: final_grade_stats(store, cfg, term)?,
        incompletes: incomplete_stats(store, cfg, term)?,
    })
}

pub fn log_term_counters(label: &str, counters: &TermCounters) {
    log_final_grade_stats(label, &counters.final_grades);
    log_incomplete_stats(label, &counters.incompletes);
}

/// Resets ignored ('G') registrations to an ungraded, non-open state and returns the
/// ignored count recomputed afterwards.
///
/// Runs after the grading pass, so ignored registrations are never graded in the same
/// run that resets them; a later run picks them up as ordinary registrations.
pub fn reset_ignored(
    conn: &Connection,
    cfg: &GradingConfig,
    mode: RunMode,
    term: &str,
) -> GradingResult<(usize, usize)> {
    let ignored: Vec<Registration> = {
        let store = SqliteStore::new(conn);
        store
            .registrations_for_term(term, false, false)?
            .into_iter()
            .filter(|r| in_scope(cfg, r) && !cfg.is_challenge_section(&r.sect) && r.is_ignored())
            .collect()
    };

    let mut reset = 0;
    for reg in &ignored {
        let key = reg.key();
        if mode.is_debug() {
            tracing::info!(
                reg = %key,
                "would reset ignored registration to open_status N, completed N, grade U, no score"
            );
            reset += 1;
            continue;
        }
        let outcome = in_registration_tx(conn, mode, |store| {
            store.update_registration_open_status(&key, "N", Some("Y"), reg.last_class_roll_dt)?;
            store.update_registration_completion_grade(&key, "N", None, Some("U"))
        });
        match outcome {
            Ok(()) => reset += 1,
            Err(e) => tracing::warn!(reg = %key, code = e.code(), "failed to reset ignored registration: {}", e),
        }
    }

    let store = SqliteStore::new(conn);
    let remaining = final_grade_stats(&store, cfg, term)?.ignored_registrations;
    tracing::info!(reset, remaining, "ignored registrations recounted");
    Ok((reset, remaining))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grading::testutil::{reg, TestDb};

    fn seed(db: &TestDb) {
        db.insert_reg(reg("S1", "M 117", "001"));
        let mut done = reg("S1", "M 118", "001");
        done.completed = "Y".into();
        db.insert_reg(done);
        let mut ignored = reg("S2", "M 117", "001");
        ignored.open_status = Some("G".into());
        ignored.score = Some(12);
        db.insert_reg(ignored);
        let mut placed = reg("S3", "M 117", "550");
        placed.completed = "Y".into();
        db.insert_reg(placed);
        let mut inc = reg("S4", "M 124", "001");
        inc.i_in_progress = Some("Y".into());
        inc.i_term = Some("FA24".into());
        inc.i_counted = Some("Y".into());
        db.insert_reg(inc);
        let mut dropped = reg("S5", "M 117", "001");
        dropped.open_status = Some("D".into());
        db.insert_reg(dropped);
        db.insert_reg(reg("S6", "M 160", "001"));
    }

    #[test]
    fn counters_partition_registrations() {
        let db = TestDb::new();
        seed(&db);
        let cfg = GradingConfig::default();
        let store = db.store();
        let stats = final_grade_stats(&store, &cfg, "SP25").unwrap();
        assert_eq!(
            stats,
            FinalGradeStats {
                non_placement_students: 1,
                non_placement_registrations: 2,
                ignored_registrations: 1,
                placement_registrations: 1,
                non_placement_completed: 1,
                placement_completed: 1,
            }
        );
        let inc = incomplete_stats(&store, &cfg, "SP25").unwrap();
        assert_eq!(
            inc,
            IncompleteStats {
                students: 1,
                registrations: 1,
                completed: 0,
                counted_in_pace: 1,
            }
        );
    }

    #[test]
    fn reset_ignored_clears_score_and_recounts() {
        let db = TestDb::new();
        seed(&db);
        let cfg = GradingConfig::default();

        assert_eq!(reset_ignored(&db.conn, &cfg, RunMode::Debug, "SP25").unwrap(), (1, 1));
        assert_eq!(reset_ignored(&db.conn, &cfg, RunMode::Commit, "SP25").unwrap(), (1, 0));

        let row: (String, String, Option<i64>, String) = db
            .conn
            .query_row(
                "SELECT open_status, completed, score, course_grade FROM registrations
                 WHERE student_id = 'S2'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .unwrap();
        assert_eq!(row, ("N".into(), "N".into(), None, "U".into()));
    }
}
