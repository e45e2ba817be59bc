use rusqlite::{Connection, OptionalExtension};
use std::path::{Path, PathBuf};

pub const DB_FILE_NAME: &str = "gradingd.sqlite3";

pub fn db_path(workspace: &Path) -> PathBuf {
    workspace.join(DB_FILE_NAME)
}

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let conn = Connection::open(db_path(workspace))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS terms(
            term TEXT PRIMARY KEY,
            active INTEGER NOT NULL DEFAULT 0,
            start_dt TEXT,
            end_dt TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_terms(
            term TEXT NOT NULL,
            student_id TEXT NOT NULL,
            pace INTEGER,
            pace_track TEXT,
            PRIMARY KEY(term, student_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS pacing_structures(
            term TEXT NOT NULL,
            pacing_structure TEXT NOT NULL,
            re_due_date_enforced TEXT NOT NULL DEFAULT 'N',
            def_pace_track TEXT,
            PRIMARY KEY(term, pacing_structure)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_sections(
            term TEXT NOT NULL,
            course TEXT NOT NULL,
            sect TEXT NOT NULL,
            pacing_structure TEXT,
            a_min_score INTEGER,
            b_min_score INTEGER,
            c_min_score INTEGER,
            d_min_score INTEGER,
            PRIMARY KEY(term, course, sect)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_units(
            term TEXT NOT NULL,
            course TEXT NOT NULL,
            sect TEXT NOT NULL,
            unit INTEGER NOT NULL,
            re_points_ontime INTEGER,
            PRIMARY KEY(term, course, sect, unit)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS registrations(
            student_id TEXT NOT NULL,
            course TEXT NOT NULL,
            sect TEXT NOT NULL,
            term TEXT NOT NULL,
            pace_order INTEGER,
            open_status TEXT,
            completed TEXT NOT NULL DEFAULT 'N',
            course_grade TEXT,
            score INTEGER,
            exam_placed TEXT,
            instrn_type TEXT,
            i_in_progress TEXT,
            i_term TEXT,
            i_counted TEXT,
            i_deadline_dt TEXT,
            final_class_roll TEXT,
            last_class_roll_dt TEXT,
            PRIMARY KEY(student_id, course, sect, term)
        )",
        [],
    )?;
    ensure_registrations_coursework_locked(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_registrations_term ON registrations(term)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_registrations_student ON registrations(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS milestones(
            term TEXT NOT NULL,
            pace INTEGER NOT NULL,
            pace_track TEXT NOT NULL,
            ms_nbr INTEGER NOT NULL,
            ms_type TEXT NOT NULL,
            ms_date TEXT NOT NULL,
            PRIMARY KEY(term, pace, pace_track, ms_nbr, ms_type)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS milestone_overrides(
            id INTEGER PRIMARY KEY,
            term TEXT NOT NULL,
            pace_track TEXT NOT NULL,
            student_id TEXT NOT NULL,
            ms_nbr INTEGER NOT NULL,
            ms_type TEXT NOT NULL,
            ms_date TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_milestone_overrides_student
         ON milestone_overrides(term, pace_track, student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exam_attempts(
            serial_nbr INTEGER PRIMARY KEY,
            student_id TEXT NOT NULL,
            course TEXT NOT NULL,
            unit INTEGER NOT NULL,
            exam_type TEXT NOT NULL,
            passed TEXT NOT NULL,
            exam_score INTEGER,
            exam_dt TEXT NOT NULL,
            finish_time INTEGER,
            is_first_passed TEXT,
            version TEXT
        )",
        [],
    )?;
    ensure_exam_attempts_version(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exam_attempts_student_course
         ON exam_attempts(student_id, course)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS homework_attempts(
            serial_nbr INTEGER PRIMARY KEY,
            student_id TEXT NOT NULL,
            course TEXT NOT NULL,
            sect TEXT,
            unit INTEGER NOT NULL,
            objective INTEGER,
            hw_type TEXT,
            passed TEXT NOT NULL,
            hw_score INTEGER,
            hw_dt TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_homework_attempts_student_course
         ON homework_attempts(student_id, course)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS pace_summaries(
            term TEXT NOT NULL,
            student_id TEXT NOT NULL,
            course TEXT NOT NULL,
            sect TEXT NOT NULL,
            i_in_progress TEXT,
            pace INTEGER NOT NULL,
            pace_track TEXT NOT NULL,
            pace_order INTEGER NOT NULL,
            ms_nbr INTEGER NOT NULL,
            ms_unit INTEGER NOT NULL,
            ms_date TEXT NOT NULL,
            new_ms_date TEXT,
            exam_dt TEXT NOT NULL,
            re_points INTEGER NOT NULL,
            UNIQUE(student_id, course, sect, pace, pace_track, ms_unit)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_pace_summaries_student_course
         ON pace_summaries(student_id, course)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS placement_credits(
            student_id TEXT NOT NULL,
            course TEXT NOT NULL,
            exam_placed TEXT NOT NULL,
            exam_dt TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_placement_credits_student
         ON placement_credits(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grading_runs(
            id TEXT PRIMARY KEY,
            job TEXT NOT NULL,
            mode TEXT NOT NULL,
            term TEXT,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            report_json TEXT
        )",
        [],
    )?;

    Ok(())
}

// Workspaces created before locking was tracked on the registration carry no marker column.
fn ensure_registrations_coursework_locked(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "registrations", "coursework_locked")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE registrations ADD COLUMN coursework_locked TEXT NOT NULL DEFAULT 'N'",
        [],
    )?;
    Ok(())
}

fn ensure_exam_attempts_version(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "exam_attempts", "version")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE exam_attempts ADD COLUMN version TEXT", [])?;
    Ok(())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_init_is_repeatable() {
        let conn = Connection::open_in_memory().expect("open");
        init_schema(&conn).expect("first init");
        init_schema(&conn).expect("second init");
        assert!(table_has_column(&conn, "registrations", "coursework_locked").expect("pragma"));
        assert!(table_has_column(&conn, "exam_attempts", "version").expect("pragma"));
    }

    #[test]
    fn older_exam_table_gains_version_column() {
        let conn = Connection::open_in_memory().expect("open");
        conn.execute(
            "CREATE TABLE exam_attempts(
                serial_nbr INTEGER PRIMARY KEY,
                student_id TEXT NOT NULL,
                course TEXT NOT NULL,
                unit INTEGER NOT NULL,
                exam_type TEXT NOT NULL,
                passed TEXT NOT NULL,
                exam_score INTEGER,
                exam_dt TEXT NOT NULL,
                finish_time INTEGER,
                is_first_passed TEXT
            )",
            [],
        )
        .expect("legacy table");
        init_schema(&conn).expect("init");
        assert!(table_has_column(&conn, "exam_attempts", "version").expect("pragma"));
    }

    #[test]
    fn settings_round_trip_overwrites() {
        let conn = Connection::open_in_memory().expect("open");
        init_schema(&conn).expect("init");
        assert!(settings_get_json(&conn, "setup.grading").expect("get").is_none());
        settings_set_json(&conn, "setup.grading", &serde_json::json!({"a": 1})).expect("set");
        settings_set_json(&conn, "setup.grading", &serde_json::json!({"a": 2})).expect("set");
        let v = settings_get_json(&conn, "setup.grading").expect("get").expect("some");
        assert_eq!(v["a"], 2);
    }
}
