use std::time::Instant;

use super::error::{err, error_code};
use super::handlers;
use super::types::{AppState, Request};

/// Method namespace, taken from the prefix before the first '.'. Bare names such as
/// `health` and the `workspace.*` methods belong to core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodFamily {
    Core,
    Setup,
    Grading,
    Unknown,
}

impl MethodFamily {
    pub fn of(method: &str) -> Self {
        match method.split_once('.').map(|(prefix, _)| prefix) {
            None | Some("workspace") => Self::Core,
            Some("setup") => Self::Setup,
            Some("grading") => Self::Grading,
            Some(_) => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Setup => "setup",
            Self::Grading => "grading",
            Self::Unknown => "unknown",
        }
    }
}

/// Codes caused by the request itself rather than the workspace or the pipeline.
fn is_caller_error(code: &str) -> bool {
    matches!(
        code,
        "bad_params" | "no_workspace" | "not_found" | "not_implemented"
    )
}

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    let family = MethodFamily::of(&req.method);
    let started = Instant::now();
    let handled = match family {
        MethodFamily::Core => handlers::core::try_handle(state, &req),
        MethodFamily::Setup => handlers::setup::try_handle(state, &req),
        MethodFamily::Grading => handlers::grading::try_handle(state, &req),
        MethodFamily::Unknown => None,
    };
    let resp = handled.unwrap_or_else(|| {
        err(
            &req.id,
            "not_implemented",
            format!("unknown method: {}", req.method),
            None,
        )
    });

    let elapsed_ms = started.elapsed().as_millis() as u64;
    match error_code(&resp) {
        None => tracing::debug!(
            method = %req.method,
            family = family.as_str(),
            elapsed_ms,
            "request handled"
        ),
        Some(code) if is_caller_error(code) => tracing::debug!(
            method = %req.method,
            family = family.as_str(),
            code,
            "request rejected"
        ),
        Some(code) => tracing::warn!(
            method = %req.method,
            family = family.as_str(),
            code,
            elapsed_ms,
            "request failed"
        ),
    }
    resp
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(method: &str) -> Request {
        Request {
            id: "1".into(),
            method: method.into(),
            params: json!({}),
        }
    }

    #[test]
    fn families_follow_the_method_prefix() {
        assert_eq!(MethodFamily::of("health"), MethodFamily::Core);
        assert_eq!(MethodFamily::of("workspace.select"), MethodFamily::Core);
        assert_eq!(MethodFamily::of("setup.update"), MethodFamily::Setup);
        assert_eq!(MethodFamily::of("grading.finalGrades"), MethodFamily::Grading);
        assert_eq!(MethodFamily::of("classes.list"), MethodFamily::Unknown);
    }

    #[test]
    fn unknown_methods_inside_a_family_are_not_implemented() {
        let mut state = AppState::default();
        for method in ["grading.bogus", "setup.delete", "nope.nothing"] {
            let resp = handle_request(&mut state, request(method));
            assert_eq!(error_code(&resp), Some("not_implemented"), "{}", method);
            assert_eq!(resp["id"], "1");
        }
    }

    #[test]
    fn health_answers_before_a_workspace_is_selected() {
        let mut state = AppState::default();
        let resp = handle_request(&mut state, request("health"));
        assert_eq!(resp["ok"], true);
        assert!(resp["result"]["workspacePath"].is_null());

        let stats = handle_request(&mut state, request("grading.stats"));
        assert_eq!(error_code(&stats), Some("no_workspace"));
        assert!(is_caller_error("no_workspace"));
        assert!(!is_caller_error("db_query_failed"));
    }
}
