use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a job performs its mutations or only logs them.
///
/// Every mutating call takes the mode explicitly; the computation path is identical in
/// both modes and only the persistence-write boundary differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Debug,
    Commit,
}

impl RunMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Some(Self::Debug),
            "commit" => Some(Self::Commit),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Commit => "commit",
        }
    }

    pub fn is_debug(self) -> bool {
        self == Self::Debug
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    U,
    F,
    I,
    S,
}

impl Grade {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "A" => Some(Self::A),
            "B" => Some(Self::B),
            "C" => Some(Self::C),
            "D" => Some(Self::D),
            "U" => Some(Self::U),
            "F" => Some(Self::F),
            "I" => Some(Self::I),
            "S" => Some(Self::S),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::U => "U",
            Self::F => "F",
            Self::I => "I",
            Self::S => "S",
        }
    }

    /// Stored grades that are never recomputed.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::F | Self::I)
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegKey {
    pub student_id: String,
    pub course: String,
    pub sect: String,
    pub term: String,
}

impl fmt::Display for RegKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} in {} sect {} ({})",
            self.student_id, self.course, self.sect, self.term
        )
    }
}

#[derive(Debug, Clone)]
pub struct Term {
    pub term: String,
    pub start_dt: Option<NaiveDate>,
    pub end_dt: Option<NaiveDate>,
}

#[derive(Debug, Clone)]
pub struct StudentTerm {
    pub term: String,
    pub student_id: String,
    pub pace: Option<i64>,
    pub pace_track: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PacingStructure {
    pub term: String,
    pub pacing_structure: String,
    pub re_due_date_enforced: bool,
    pub def_pace_track: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeThresholds {
    pub a_min: Option<i64>,
    pub b_min: Option<i64>,
    pub c_min: Option<i64>,
    pub d_min: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct CourseSection {
    pub term: String,
    pub course: String,
    pub sect: String,
    pub pacing_structure: Option<String>,
    pub thresholds: GradeThresholds,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub student_id: String,
    pub course: String,
    pub sect: String,
    pub term: String,
    pub pace_order: Option<i64>,
    pub open_status: Option<String>,
    pub completed: String,
    pub course_grade: Option<String>,
    pub score: Option<i64>,
    pub exam_placed: Option<String>,
    pub instrn_type: Option<String>,
    pub i_in_progress: Option<String>,
    pub i_term: Option<String>,
    pub i_counted: Option<String>,
    pub i_deadline_dt: Option<NaiveDate>,
    pub final_class_roll: Option<String>,
    pub last_class_roll_dt: Option<NaiveDate>,
    pub coursework_locked: bool,
}

impl Registration {
    pub fn key(&self) -> RegKey {
        RegKey {
            student_id: self.student_id.clone(),
            course: self.course.clone(),
            sect: self.sect.clone(),
            term: self.term.clone(),
        }
    }

    pub fn is_incomplete_in_progress(&self) -> bool {
        flag_is(&self.i_in_progress, "Y")
    }

    pub fn is_counted_incomplete(&self) -> bool {
        flag_is(&self.i_counted, "Y")
    }

    pub fn is_dropped(&self) -> bool {
        flag_is(&self.open_status, "D")
    }

    pub fn is_ignored(&self) -> bool {
        flag_is(&self.open_status, "G")
    }

    pub fn on_final_class_roll(&self) -> bool {
        flag_is(&self.final_class_roll, "Y")
    }

    pub fn stored_grade(&self) -> Option<Grade> {
        self.course_grade.as_deref().and_then(Grade::parse)
    }
}

pub fn flag_is(flag: &Option<String>, value: &str) -> bool {
    flag.as_deref() == Some(value)
}

#[derive(Debug, Clone)]
pub struct Milestone {
    pub term: String,
    pub pace: i64,
    pub pace_track: String,
    pub ms_nbr: i64,
    pub ms_type: String,
    pub ms_date: NaiveDate,
}

#[derive(Debug, Clone)]
pub struct MilestoneOverride {
    pub term: String,
    pub pace_track: String,
    pub student_id: String,
    pub ms_nbr: i64,
    pub ms_type: String,
    pub ms_date: NaiveDate,
}

#[derive(Debug, Clone)]
pub struct ExamAttempt {
    pub serial_nbr: i64,
    pub student_id: String,
    pub course: String,
    pub unit: i64,
    pub exam_type: String,
    pub passed: String,
    pub exam_score: Option<i64>,
    pub exam_dt: NaiveDate,
    pub finish_time: Option<i64>,
    pub is_first_passed: Option<String>,
    /// Exam version code, e.g. "171RE" for the unit 1 review of M 117.
    pub version: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HomeworkAttempt {
    pub serial_nbr: i64,
    pub student_id: String,
    pub course: String,
    pub unit: i64,
    pub passed: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaceSummaryRow {
    pub term: String,
    pub student_id: String,
    pub course: String,
    pub sect: String,
    pub i_in_progress: Option<String>,
    pub pace: i64,
    pub pace_track: String,
    pub pace_order: i64,
    pub ms_nbr: i64,
    pub ms_unit: i64,
    pub ms_date: NaiveDate,
    pub new_ms_date: Option<String>,
    pub exam_dt: NaiveDate,
    pub re_points: i64,
}

#[derive(Debug, Clone)]
pub struct PlacementCredit {
    pub student_id: String,
    pub course: String,
    pub exam_placed: String,
}
