//! Query/update operations the grading pipeline needs from the workspace database.
//!
//! Read failures surface as `GradingError::Query`, write failures as `GradingError::Write`.
//! The SQLite store borrows a connection, so a caller holding an open transaction can hand
//! `&*tx` to it and every call below joins that transaction.

use crate::error::{GradingError, GradingResult};
use crate::model::{
    CourseSection, ExamAttempt, GradeThresholds, HomeworkAttempt, Milestone, MilestoneOverride,
    PaceSummaryRow, PacingStructure, PlacementCredit, RegKey, Registration, StudentTerm, Term,
};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, Row};

pub trait GradingStore {
    fn active_term(&self) -> GradingResult<Option<Term>>;
    fn student_term(&self, term: &str, student_id: &str) -> GradingResult<Option<StudentTerm>>;
    fn pacing_structures_for_term(&self, term: &str) -> GradingResult<Vec<PacingStructure>>;
    fn course_sections_for_term(&self, term: &str) -> GradingResult<Vec<CourseSection>>;
    fn registrations_for_term(
        &self,
        term: &str,
        include_incomplete: bool,
        include_dropped: bool,
    ) -> GradingResult<Vec<Registration>>;
    fn registrations_for_student(
        &self,
        term: &str,
        student_id: &str,
    ) -> GradingResult<Vec<Registration>>;
    fn exam_attempts(
        &self,
        student_id: &str,
        course: &str,
        include_locked: bool,
    ) -> GradingResult<Vec<ExamAttempt>>;
    fn homework_attempts(
        &self,
        student_id: &str,
        course: &str,
        include_locked: bool,
    ) -> GradingResult<Vec<HomeworkAttempt>>;
    fn milestones(&self, term: &str, pace: i64, pace_track: &str) -> GradingResult<Vec<Milestone>>;
    fn milestone_overrides(
        &self,
        term: &str,
        pace_track: &str,
        student_id: &str,
    ) -> GradingResult<Vec<MilestoneOverride>>;
    fn review_points_config(
        &self,
        term: &str,
        course: &str,
        sect: &str,
        unit: i64,
    ) -> GradingResult<Option<i64>>;
    fn placement_credits(&self, student_id: &str) -> GradingResult<Vec<PlacementCredit>>;
    fn pace_summaries(&self, student_id: &str, course: &str) -> GradingResult<Vec<PaceSummaryRow>>;

    /// Upsert keyed by (student, course, section, pace, pace track, unit).
    fn replace_pace_summary(&self, row: &PaceSummaryRow) -> GradingResult<()>;
    fn delete_pace_summary(&self, key: &RegKey) -> GradingResult<usize>;
    fn update_registration_completion_grade(
        &self,
        key: &RegKey,
        completed: &str,
        score: Option<i64>,
        grade: Option<&str>,
    ) -> GradingResult<()>;
    fn update_registration_open_status(
        &self,
        key: &RegKey,
        open_status: &str,
        final_class_roll: Option<&str>,
        last_class_roll_dt: Option<NaiveDate>,
    ) -> GradingResult<()>;
    fn update_registration_exam_placed(&self, key: &RegKey, exam_placed: &str)
        -> GradingResult<()>;
    fn mark_coursework_locked(&self, key: &RegKey) -> GradingResult<()>;
    fn lock_exam_attempt(&self, serial_nbr: i64, new_flag: &str) -> GradingResult<()>;
    fn lock_homework_attempt(&self, serial_nbr: i64, new_flag: &str) -> GradingResult<()>;
}

pub struct SqliteStore<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }
}

const REG_COLUMNS: &str = "student_id, course, sect, term, pace_order, open_status, completed,
    course_grade, score, exam_placed, instrn_type, i_in_progress, i_term, i_counted,
    i_deadline_dt, final_class_roll, last_class_roll_dt, coursework_locked";

fn registration_from_row(r: &Row<'_>) -> rusqlite::Result<Registration> {
    Ok(Registration {
        student_id: r.get(0)?,
        course: r.get(1)?,
        sect: r.get(2)?,
        term: r.get(3)?,
        pace_order: r.get(4)?,
        open_status: r.get(5)?,
        completed: r.get(6)?,
        course_grade: r.get(7)?,
        score: r.get(8)?,
        exam_placed: r.get(9)?,
        instrn_type: r.get(10)?,
        i_in_progress: r.get(11)?,
        i_term: r.get(12)?,
        i_counted: r.get(13)?,
        i_deadline_dt: r.get(14)?,
        final_class_roll: r.get(15)?,
        last_class_roll_dt: r.get(16)?,
        coursework_locked: r.get::<_, String>(17)? == "Y",
    })
}

fn pace_summary_from_row(r: &Row<'_>) -> rusqlite::Result<PaceSummaryRow> {
    Ok(PaceSummaryRow {
        term: r.get(0)?,
        student_id: r.get(1)?,
        course: r.get(2)?,
        sect: r.get(3)?,
        i_in_progress: r.get(4)?,
        pace: r.get(5)?,
        pace_track: r.get(6)?,
        pace_order: r.get(7)?,
        ms_nbr: r.get(8)?,
        ms_unit: r.get(9)?,
        ms_date: r.get(10)?,
        new_ms_date: r.get(11)?,
        exam_dt: r.get(12)?,
        re_points: r.get(13)?,
    })
}

fn expect_one_row(changed: usize, what: &str, key: &RegKey) -> GradingResult<()> {
    if changed == 0 {
        return Err(GradingError::Write(format!("{}: no registration for {}", what, key)));
    }
    Ok(())
}

impl GradingStore for SqliteStore<'_> {
    fn active_term(&self) -> GradingResult<Option<Term>> {
        let term = self
            .conn
            .query_row(
                "SELECT term, start_dt, end_dt FROM terms WHERE active = 1 ORDER BY term DESC LIMIT 1",
                [],
                |r| {
                    Ok(Term {
                        term: r.get(0)?,
                        start_dt: r.get(1)?,
                        end_dt: r.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(term)
    }

    fn student_term(&self, term: &str, student_id: &str) -> GradingResult<Option<StudentTerm>> {
        let row = self
            .conn
            .query_row(
                "SELECT term, student_id, pace, pace_track FROM student_terms
                 WHERE term = ? AND student_id = ?",
                (term, student_id),
                |r| {
                    Ok(StudentTerm {
                        term: r.get(0)?,
                        student_id: r.get(1)?,
                        pace: r.get(2)?,
                        pace_track: r.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn pacing_structures_for_term(&self, term: &str) -> GradingResult<Vec<PacingStructure>> {
        let mut stmt = self.conn.prepare(
            "SELECT term, pacing_structure, re_due_date_enforced, def_pace_track
             FROM pacing_structures WHERE term = ? ORDER BY pacing_structure",
        )?;
        let rows = stmt
            .query_map([term], |r| {
                Ok(PacingStructure {
                    term: r.get(0)?,
                    pacing_structure: r.get(1)?,
                    re_due_date_enforced: r.get::<_, String>(2)? == "Y",
                    def_pace_track: r.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn course_sections_for_term(&self, term: &str) -> GradingResult<Vec<CourseSection>> {
        let mut stmt = self.conn.prepare(
            "SELECT term, course, sect, pacing_structure, a_min_score, b_min_score, c_min_score, d_min_score
             FROM course_sections WHERE term = ? ORDER BY course, sect",
        )?;
        let rows = stmt
            .query_map([term], |r| {
                Ok(CourseSection {
                    term: r.get(0)?,
                    course: r.get(1)?,
                    sect: r.get(2)?,
                    pacing_structure: r.get(3)?,
                    thresholds: GradeThresholds {
                        a_min: r.get(4)?,
                        b_min: r.get(5)?,
                        c_min: r.get(6)?,
                        d_min: r.get(7)?,
                    },
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn registrations_for_term(
        &self,
        term: &str,
        include_incomplete: bool,
        include_dropped: bool,
    ) -> GradingResult<Vec<Registration>> {
        let mut sql = format!("SELECT {} FROM registrations WHERE term = ?", REG_COLUMNS);
        if !include_incomplete {
            sql.push_str(" AND COALESCE(i_in_progress, 'N') <> 'Y'");
        }
        if !include_dropped {
            sql.push_str(" AND COALESCE(open_status, '') <> 'D'");
        }
        sql.push_str(" ORDER BY student_id, course, sect");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([term], registration_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn registrations_for_student(
        &self,
        term: &str,
        student_id: &str,
    ) -> GradingResult<Vec<Registration>> {
        let sql = format!(
            "SELECT {} FROM registrations WHERE term = ? AND student_id = ? ORDER BY course, sect",
            REG_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map((term, student_id), registration_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn exam_attempts(
        &self,
        student_id: &str,
        course: &str,
        include_locked: bool,
    ) -> GradingResult<Vec<ExamAttempt>> {
        let mut sql = String::from(
            "SELECT serial_nbr, student_id, course, unit, exam_type, passed, exam_score, exam_dt,
                    finish_time, is_first_passed, version
             FROM exam_attempts WHERE student_id = ? AND course = ?",
        );
        if !include_locked {
            sql.push_str(" AND passed IN ('Y', 'N')");
        }
        sql.push_str(" ORDER BY exam_dt, finish_time, serial_nbr");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map((student_id, course), |r| {
                Ok(ExamAttempt {
                    serial_nbr: r.get(0)?,
                    student_id: r.get(1)?,
                    course: r.get(2)?,
                    unit: r.get(3)?,
                    exam_type: r.get(4)?,
                    passed: r.get(5)?,
                    exam_score: r.get(6)?,
                    exam_dt: r.get(7)?,
                    finish_time: r.get(8)?,
                    is_first_passed: r.get(9)?,
                    version: r.get(10)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn homework_attempts(
        &self,
        student_id: &str,
        course: &str,
        include_locked: bool,
    ) -> GradingResult<Vec<HomeworkAttempt>> {
        let mut sql = String::from(
            "SELECT serial_nbr, student_id, course, unit, passed
             FROM homework_attempts WHERE student_id = ? AND course = ?",
        );
        if !include_locked {
            sql.push_str(" AND passed IN ('Y', 'N')");
        }
        sql.push_str(" ORDER BY hw_dt, serial_nbr");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map((student_id, course), |r| {
                Ok(HomeworkAttempt {
                    serial_nbr: r.get(0)?,
                    student_id: r.get(1)?,
                    course: r.get(2)?,
                    unit: r.get(3)?,
                    passed: r.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn milestones(&self, term: &str, pace: i64, pace_track: &str) -> GradingResult<Vec<Milestone>> {
        let mut stmt = self.conn.prepare(
            "SELECT term, pace, pace_track, ms_nbr, ms_type, ms_date
             FROM milestones WHERE term = ? AND pace = ? AND pace_track = ?
             ORDER BY ms_nbr, ms_type",
        )?;
        let rows = stmt
            .query_map((term, pace, pace_track), |r| {
                Ok(Milestone {
                    term: r.get(0)?,
                    pace: r.get(1)?,
                    pace_track: r.get(2)?,
                    ms_nbr: r.get(3)?,
                    ms_type: r.get(4)?,
                    ms_date: r.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn milestone_overrides(
        &self,
        term: &str,
        pace_track: &str,
        student_id: &str,
    ) -> GradingResult<Vec<MilestoneOverride>> {
        let mut stmt = self.conn.prepare(
            "SELECT term, pace_track, student_id, ms_nbr, ms_type, ms_date
             FROM milestone_overrides WHERE term = ? AND pace_track = ? AND student_id = ?
             ORDER BY ms_nbr, ms_date",
        )?;
        let rows = stmt
            .query_map((term, pace_track, student_id), |r| {
                Ok(MilestoneOverride {
                    term: r.get(0)?,
                    pace_track: r.get(1)?,
                    student_id: r.get(2)?,
                    ms_nbr: r.get(3)?,
                    ms_type: r.get(4)?,
                    ms_date: r.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn review_points_config(
        &self,
        term: &str,
        course: &str,
        sect: &str,
        unit: i64,
    ) -> GradingResult<Option<i64>> {
        let points: Option<Option<i64>> = self
            .conn
            .query_row(
                "SELECT re_points_ontime FROM course_units
                 WHERE term = ? AND course = ? AND sect = ? AND unit = ?",
                (term, course, sect, unit),
                |r| r.get(0),
            )
            .optional()?;
        Ok(points.flatten())
    }

    fn placement_credits(&self, student_id: &str) -> GradingResult<Vec<PlacementCredit>> {
        let mut stmt = self.conn.prepare(
            "SELECT student_id, course, exam_placed FROM placement_credits WHERE student_id = ?",
        )?;
        let rows = stmt
            .query_map([student_id], |r| {
                Ok(PlacementCredit {
                    student_id: r.get(0)?,
                    course: r.get(1)?,
                    exam_placed: r.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn pace_summaries(&self, student_id: &str, course: &str) -> GradingResult<Vec<PaceSummaryRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT term, student_id, course, sect, i_in_progress, pace, pace_track, pace_order,
                    ms_nbr, ms_unit, ms_date, new_ms_date, exam_dt, re_points
             FROM pace_summaries WHERE student_id = ? AND course = ?
             ORDER BY ms_unit, ms_nbr",
        )?;
        let rows = stmt
            .query_map((student_id, course), pace_summary_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn replace_pace_summary(&self, row: &PaceSummaryRow) -> GradingResult<()> {
        self.conn
            .execute(
                "INSERT INTO pace_summaries(term, student_id, course, sect, i_in_progress, pace,
                    pace_track, pace_order, ms_nbr, ms_unit, ms_date, new_ms_date, exam_dt, re_points)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(student_id, course, sect, pace, pace_track, ms_unit) DO UPDATE SET
                   term = excluded.term,
                   i_in_progress = excluded.i_in_progress,
                   pace_order = excluded.pace_order,
                   ms_nbr = excluded.ms_nbr,
                   ms_date = excluded.ms_date,
                   new_ms_date = excluded.new_ms_date,
                   exam_dt = excluded.exam_dt,
                   re_points = excluded.re_points",
                rusqlite::params![
                    row.term,
                    row.student_id,
                    row.course,
                    row.sect,
                    row.i_in_progress,
                    row.pace,
                    row.pace_track,
                    row.pace_order,
                    row.ms_nbr,
                    row.ms_unit,
                    row.ms_date,
                    row.new_ms_date,
                    row.exam_dt,
                    row.re_points,
                ],
            )
            .map_err(|e| GradingError::write("replace pace summary", e))?;
        Ok(())
    }

    fn delete_pace_summary(&self, key: &RegKey) -> GradingResult<usize> {
        self.conn
            .execute(
                "DELETE FROM pace_summaries
                 WHERE student_id = ? AND course = ? AND sect = ? AND term = ?",
                (&key.student_id, &key.course, &key.sect, &key.term),
            )
            .map_err(|e| GradingError::write("delete pace summary", e))
    }

    fn update_registration_completion_grade(
        &self,
        key: &RegKey,
        completed: &str,
        score: Option<i64>,
        grade: Option<&str>,
    ) -> GradingResult<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE registrations SET completed = ?, score = ?, course_grade = ?
                 WHERE student_id = ? AND course = ? AND sect = ? AND term = ?",
                rusqlite::params![
                    completed,
                    score,
                    grade,
                    key.student_id,
                    key.course,
                    key.sect,
                    key.term
                ],
            )
            .map_err(|e| GradingError::write("update completion/grade", e))?;
        expect_one_row(changed, "update completion/grade", key)
    }

    fn update_registration_open_status(
        &self,
        key: &RegKey,
        open_status: &str,
        final_class_roll: Option<&str>,
        last_class_roll_dt: Option<NaiveDate>,
    ) -> GradingResult<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE registrations SET open_status = ?, final_class_roll = ?, last_class_roll_dt = ?
                 WHERE student_id = ? AND course = ? AND sect = ? AND term = ?",
                rusqlite::params![
                    open_status,
                    final_class_roll,
                    last_class_roll_dt,
                    key.student_id,
                    key.course,
                    key.sect,
                    key.term
                ],
            )
            .map_err(|e| GradingError::write("update open status", e))?;
        expect_one_row(changed, "update open status", key)
    }

    fn update_registration_exam_placed(
        &self,
        key: &RegKey,
        exam_placed: &str,
    ) -> GradingResult<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE registrations SET exam_placed = ?
                 WHERE student_id = ? AND course = ? AND sect = ? AND term = ?",
                (exam_placed, &key.student_id, &key.course, &key.sect, &key.term),
            )
            .map_err(|e| GradingError::write("update exam placed", e))?;
        expect_one_row(changed, "update exam placed", key)
    }

    fn mark_coursework_locked(&self, key: &RegKey) -> GradingResult<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE registrations SET coursework_locked = 'Y'
                 WHERE student_id = ? AND course = ? AND sect = ? AND term = ?",
                (&key.student_id, &key.course, &key.sect, &key.term),
            )
            .map_err(|e| GradingError::write("mark coursework locked", e))?;
        expect_one_row(changed, "mark coursework locked", key)
    }

    fn lock_exam_attempt(&self, serial_nbr: i64, new_flag: &str) -> GradingResult<()> {
        self.conn
            .execute(
                "UPDATE exam_attempts SET passed = ? WHERE serial_nbr = ?",
                (new_flag, serial_nbr),
            )
            .map_err(|e| GradingError::write("lock exam attempt", e))?;
        Ok(())
    }

    fn lock_homework_attempt(&self, serial_nbr: i64, new_flag: &str) -> GradingResult<()> {
        self.conn
            .execute(
                "UPDATE homework_attempts SET passed = ? WHERE serial_nbr = ?",
                (new_flag, serial_nbr),
            )
            .map_err(|e| GradingError::write("lock homework attempt", e))?;
        Ok(())
    }
}
