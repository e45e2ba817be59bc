use super::summary::REVIEW_EXAM_TYPES;
use crate::db;
use crate::model::Registration;
use crate::store::SqliteStore;
use rusqlite::Connection;

pub struct TestDb {
    pub conn: Connection,
}

impl TestDb {
    pub fn new() -> Self {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::init_schema(&conn).expect("init schema");
        Self { conn }
    }

    pub fn store(&self) -> SqliteStore<'_> {
        SqliteStore::new(&self.conn)
    }

    pub fn insert_reg(&self, r: Registration) -> Registration {
        self.conn
            .execute(
                "INSERT INTO registrations(student_id, course, sect, term, pace_order, open_status,
                    completed, course_grade, score, exam_placed, instrn_type, i_in_progress, i_term,
                    i_counted, i_deadline_dt, final_class_roll, last_class_roll_dt, coursework_locked)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                rusqlite::params![
                    r.student_id,
                    r.course,
                    r.sect,
                    r.term,
                    r.pace_order,
                    r.open_status,
                    r.completed,
                    r.course_grade,
                    r.score,
                    r.exam_placed,
                    r.instrn_type,
                    r.i_in_progress,
                    r.i_term,
                    r.i_counted,
                    r.i_deadline_dt,
                    r.final_class_roll,
                    r.last_class_roll_dt,
                    if r.coursework_locked { "Y" } else { "N" },
                ],
            )
            .expect("insert registration");
        r
    }

    pub fn exam(&self, student: &str, course: &str, unit: i64, exam_type: &str, passed: &str, score: i64, dt: &str) {
        self.conn
            .execute(
                "INSERT INTO exam_attempts(student_id, course, unit, exam_type, passed, exam_score,
                    exam_dt, finish_time, is_first_passed, version)
                 VALUES(?, ?, ?, ?, ?, ?, ?, 600, ?, ?)",
                rusqlite::params![
                    student,
                    course,
                    unit,
                    exam_type,
                    passed,
                    score,
                    dt,
                    if passed == "Y" { "Y" } else { "N" },
                    exam_version(course, unit, exam_type),
                ],
            )
            .expect("insert exam attempt");
    }

    pub fn homework(&self, student: &str, course: &str, unit: i64, passed: &str) {
        self.conn
            .execute(
                "INSERT INTO homework_attempts(student_id, course, sect, unit, objective, hw_type, passed,
                    hw_score, hw_dt)
                 VALUES(?, ?, '001', ?, 1, 'HW', ?, 2, '2025-02-01')",
                (student, course, unit, passed),
            )
            .expect("insert homework attempt");
    }

    pub fn passed_flags(&self, table: &str, student: &str) -> Vec<String> {
        let sql = format!(
            "SELECT passed FROM {} WHERE student_id = ? ORDER BY serial_nbr",
            table
        );
        let mut stmt = self.conn.prepare(&sql).expect("prepare");
        stmt.query_map([student], |r| r.get(0))
            .expect("query")
            .collect::<Result<Vec<String>, _>>()
            .expect("collect")
    }
}

/// "M 117" unit 1 gives "171RE" for review types and "171UE" etc. otherwise.
pub fn exam_version(course: &str, unit: i64, exam_type: &str) -> String {
    let digits: String = course.chars().filter(|c| c.is_ascii_digit()).collect();
    let short = digits.get(digits.len().saturating_sub(2)..).unwrap_or("");
    let suffix = if REVIEW_EXAM_TYPES.contains(&exam_type) {
        "RE"
    } else {
        exam_type
    };
    format!("{}{}{}", short, unit, suffix)
}

/// A plain current-term registration on the final class roll.
pub fn reg(student: &str, course: &str, sect: &str) -> Registration {
    Registration {
        student_id: student.to_string(),
        course: course.to_string(),
        sect: sect.to_string(),
        term: "SP25".to_string(),
        pace_order: Some(1),
        open_status: Some("Y".to_string()),
        completed: "N".to_string(),
        course_grade: None,
        score: None,
        exam_placed: None,
        instrn_type: None,
        i_in_progress: None,
        i_term: None,
        i_counted: None,
        i_deadline_dt: None,
        final_class_roll: Some("Y".to_string()),
        last_class_roll_dt: None,
        coursework_locked: false,
    }
}

/// SP25 is active. Section 001 of every paced course enforces review deadlines (track A
/// default, A/B/C/D at 90/80/70/60); section 801 does not; 550 is the challenge section.
/// FA24 carries the same sections for Incomplete origin-term lookups.
pub fn seed_reference(conn: &Connection) {
    conn.execute_batch(
        "INSERT INTO terms(term, active) VALUES('SP25', 1), ('FA24', 0);
         INSERT INTO pacing_structures(term, pacing_structure, re_due_date_enforced, def_pace_track)
           VALUES('SP25', 'STD', 'Y', 'A'), ('SP25', 'SELF', 'N', 'A'),
                 ('FA24', 'STD', 'Y', 'A');",
    )
    .expect("seed terms");
    for term in ["SP25", "FA24"] {
        for course in ["M 117", "M 118", "M 124", "M 125", "M 126"] {
            conn.execute(
                "INSERT INTO course_sections(term, course, sect, pacing_structure,
                    a_min_score, b_min_score, c_min_score, d_min_score)
                 VALUES(?, ?, '001', 'STD', 90, 80, 70, 60)",
                (term, course),
            )
            .expect("seed section");
            for unit in 1..=4 {
                conn.execute(
                    "INSERT INTO course_units(term, course, sect, unit, re_points_ontime)
                     VALUES(?, ?, '001', ?, 5)",
                    (term, course, unit),
                )
                .expect("seed unit");
            }
        }
    }
    conn.execute_batch(
        "INSERT INTO course_sections(term, course, sect, pacing_structure) VALUES('SP25', 'M 117', '801', 'SELF');
         INSERT INTO course_sections(term, course, sect, pacing_structure) VALUES('SP25', 'M 117', '550', 'SELF');",
    )
    .expect("seed extra sections");
}
