use crate::error::{GradingError, GradingResult};
use crate::model::{CourseSection, PacingStructure};
use crate::store::GradingStore;
use std::collections::HashMap;

/// Term-level lookup tables, loaded once per run and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct ReferenceData {
    pub term: String,
    pacing: HashMap<String, PacingStructure>,
    sections: HashMap<(String, String), CourseSection>,
}

impl ReferenceData {
    pub fn load(store: &dyn GradingStore, term: &str) -> GradingResult<Self> {
        let pacing = store
            .pacing_structures_for_term(term)?
            .into_iter()
            .map(|p| (p.pacing_structure.clone(), p))
            .collect();
        let sections = store
            .course_sections_for_term(term)?
            .into_iter()
            .map(|s| ((s.course.clone(), s.sect.clone()), s))
            .collect();
        Ok(Self {
            term: term.to_string(),
            pacing,
            sections,
        })
    }

    pub fn section(&self, course: &str, sect: &str) -> Option<&CourseSection> {
        self.sections.get(&(course.to_string(), sect.to_string()))
    }

    pub fn pacing_for_section(&self, course: &str, sect: &str) -> Option<&PacingStructure> {
        let name = self.section(course, sect)?.pacing_structure.as_deref()?;
        self.pacing.get(name)
    }

    /// True when the section's pacing structure enforces review-exam due dates. Unknown
    /// sections count as not enforcing.
    pub fn enforces_review_deadlines(&self, course: &str, sect: &str) -> bool {
        self.pacing_for_section(course, sect)
            .map(|p| p.re_due_date_enforced)
            .unwrap_or(false)
    }

    /// Like [`Self::enforces_review_deadlines`], but a missing section row, a section
    /// without a pacing structure, or a pacing structure not defined for the term is a
    /// configuration error.
    pub fn review_deadlines_enforced(&self, course: &str, sect: &str) -> GradingResult<bool> {
        let section = self.section(course, sect).ok_or_else(|| {
            GradingError::Configuration(format!(
                "no section {} {} in {}",
                course, sect, self.term
            ))
        })?;
        let name = section.pacing_structure.as_deref().ok_or_else(|| {
            GradingError::Configuration(format!(
                "section {} {} in {} has no pacing structure",
                course, sect, self.term
            ))
        })?;
        let pacing = self.pacing.get(name).ok_or_else(|| {
            GradingError::Configuration(format!(
                "pacing structure {} not defined in {}",
                name, self.term
            ))
        })?;
        Ok(pacing.re_due_date_enforced)
    }
}
