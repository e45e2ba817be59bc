use crate::db;
use crate::model::RunMode;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const GRADING_SETTINGS_KEY: &str = "setup.grading";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingConfig {
    pub challenge_section: String,
    pub graded_courses: Vec<String>,
    pub review_milestone_type: String,
    pub default_mode: RunMode,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            challenge_section: "550".to_string(),
            graded_courses: ["M 117", "M 118", "M 124", "M 125", "M 126"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            review_milestone_type: "RE".to_string(),
            default_mode: RunMode::Debug,
        }
    }
}

impl GradingConfig {
    pub fn is_graded_course(&self, course: &str) -> bool {
        self.graded_courses.iter().any(|c| c == course)
    }

    pub fn is_challenge_section(&self, sect: &str) -> bool {
        self.challenge_section == sect
    }

    /// Applies a partial update. Unknown fields and out-of-range values are rejected
    /// without touching `self`.
    pub fn merge_patch(&mut self, patch: &serde_json::Map<String, Value>) -> Result<(), String> {
        let mut next = self.clone();
        for (k, v) in patch {
            match k.as_str() {
                "challengeSection" => {
                    next.challenge_section = parse_code(v, k, 8)?;
                }
                "gradedCourses" => {
                    let arr = v
                        .as_array()
                        .ok_or_else(|| format!("{} must be an array of strings", k))?;
                    let mut courses = Vec::with_capacity(arr.len());
                    for item in arr {
                        let course = parse_code(item, k, 16)?;
                        if !courses.contains(&course) {
                            courses.push(course);
                        }
                    }
                    next.graded_courses = courses;
                }
                "reviewMilestoneType" => {
                    next.review_milestone_type = parse_code(v, k, 4)?.to_ascii_uppercase();
                }
                "defaultMode" => {
                    let s = v.as_str().ok_or_else(|| format!("{} must be string", k))?;
                    next.default_mode = RunMode::parse(s)
                        .ok_or_else(|| "defaultMode must be one of: debug, commit".to_string())?;
                }
                _ => return Err(format!("unknown grading field: {}", k)),
            }
        }
        *self = next;
        Ok(())
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn parse_code(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.is_empty() {
        return Err(format!("{} must not be empty", key));
    }
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

pub fn load(conn: &Connection) -> anyhow::Result<GradingConfig> {
    let mut current = GradingConfig::default();
    if let Some(saved) = db::settings_get_json(conn, GRADING_SETTINGS_KEY)? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed historical values fall back to defaults field by field.
            for (k, v) in saved_obj {
                let mut one = serde_json::Map::new();
                one.insert(k.clone(), v.clone());
                if let Err(msg) = current.merge_patch(&one) {
                    tracing::warn!(field = %k, "ignoring saved grading setting: {}", msg);
                }
            }
        }
    }
    Ok(current)
}

pub fn save(conn: &Connection, config: &GradingConfig) -> anyhow::Result<()> {
    db::settings_set_json(conn, GRADING_SETTINGS_KEY, &config.to_json())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_cover_paced_courses() {
        let cfg = GradingConfig::default();
        assert!(cfg.is_graded_course("M 125"));
        assert!(!cfg.is_graded_course("M 160"));
        assert!(cfg.is_challenge_section("550"));
        assert_eq!(cfg.default_mode, RunMode::Debug);
    }

    #[test]
    fn bad_patch_leaves_config_untouched() {
        let mut cfg = GradingConfig::default();
        let patch = json!({ "challengeSection": "551", "defaultMode": "sometimes" });
        let err = cfg.merge_patch(patch.as_object().unwrap()).unwrap_err();
        assert!(err.contains("defaultMode"));
        assert_eq!(cfg.challenge_section, "550");
    }

    #[test]
    fn load_skips_malformed_saved_fields() {
        let conn = Connection::open_in_memory().unwrap();
        db::init_schema(&conn).unwrap();
        db::settings_set_json(
            &conn,
            GRADING_SETTINGS_KEY,
            &json!({ "gradedCourses": ["M 117"], "reviewMilestoneType": 7 }),
        )
        .unwrap();
        let cfg = load(&conn).unwrap();
        assert_eq!(cfg.graded_courses, vec!["M 117".to_string()]);
        assert_eq!(cfg.review_milestone_type, "RE");
    }
}
