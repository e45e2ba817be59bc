use crate::error::{GradingError, GradingResult};
use crate::model::{CourseSection, Grade, GradeThresholds, Registration};

/// Letter grade for a point total, checked A then B then C then D. Missing thresholds are
/// skipped; anything below every configured threshold is U.
pub fn classify(total: i64, thresholds: &GradeThresholds) -> Grade {
    let ladder = [
        (thresholds.a_min, Grade::A),
        (thresholds.b_min, Grade::B),
        (thresholds.c_min, Grade::C),
        (thresholds.d_min, Grade::D),
    ];
    ladder
        .iter()
        .find_map(|(min, grade)| match min {
            Some(min) if total >= *min => Some(*grade),
            _ => None,
        })
        .unwrap_or(Grade::U)
}

/// A stored F or I is kept as is. Otherwise the section's thresholds decide, and a
/// registration whose section is not configured cannot be graded.
pub fn course_grade(
    reg: &Registration,
    total: i64,
    section: Option<&CourseSection>,
) -> GradingResult<Grade> {
    if let Some(stored) = reg.stored_grade().filter(|g| g.is_terminal()) {
        return Ok(stored);
    }
    let section = section.ok_or_else(|| {
        GradingError::Configuration(format!("no grade thresholds for {}", reg.key()))
    })?;
    Ok(classify(total, &section.thresholds))
}
