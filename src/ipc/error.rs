use serde_json::json;

use crate::error::GradingError;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Wire form of a pipeline error. `details.kind` carries the `GradingError` code.
pub fn grading_err(id: &str, e: &GradingError) -> serde_json::Value {
    let code = match e {
        GradingError::Configuration(_) => "config_invalid",
        GradingError::Query(_) => "db_query_failed",
        GradingError::Consistency(_) => "data_inconsistent",
        GradingError::Write(_) => "db_write_failed",
    };
    err(id, code, e.to_string(), Some(json!({ "kind": e.code() })))
}

/// The `error.code` of a failed response, `None` for successes.
pub fn error_code(resp: &serde_json::Value) -> Option<&str> {
    if resp.get("ok").and_then(|v| v.as_bool()) != Some(false) {
        return None;
    }
    resp.get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_errors_keep_their_kind() {
        let resp = grading_err(
            "7",
            &GradingError::Configuration("no section M 117 002 in SP25".into()),
        );
        assert_eq!(resp["id"], "7");
        assert_eq!(error_code(&resp), Some("config_invalid"));
        assert_eq!(resp["error"]["details"]["kind"], "configuration");

        let resp = grading_err(
            "8",
            &GradingError::Query(rusqlite::Error::QueryReturnedNoRows),
        );
        assert_eq!(error_code(&resp), Some("db_query_failed"));
        assert_eq!(resp["error"]["details"]["kind"], "query");
        assert_eq!(error_code(&ok("9", json!({}))), None);
    }
}
