use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_gradingd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradingd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn grading_setup_defaults_update_and_persist() {
    let workspace = temp_dir("gradingd-setup");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let initial = request_ok(&mut stdin, &mut reader, "2", "setup.get", json!({}));
    let grading = &initial["grading"];
    assert_eq!(grading["challengeSection"], "550");
    assert_eq!(grading["reviewMilestoneType"], "RE");
    assert_eq!(grading["defaultMode"], "debug");
    assert_eq!(
        grading["gradedCourses"],
        json!(["M 117", "M 118", "M 124", "M 125", "M 126"])
    );

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "setup.update",
        json!({
            "patch": {
                "challengeSection": "551",
                "gradedCourses": ["M 117", "M 117", "M 200"],
                "reviewMilestoneType": "re",
                "defaultMode": "commit"
            }
        }),
    );
    assert_eq!(updated["grading"]["challengeSection"], "551");
    assert_eq!(updated["grading"]["gradedCourses"], json!(["M 117", "M 200"]));
    assert_eq!(updated["grading"]["reviewMilestoneType"], "RE");
    assert_eq!(updated["grading"]["defaultMode"], "commit");

    // Rejected patches leave the stored values alone.
    for (id, patch) in [
        ("4", json!({ "defaultMode": "sometimes" })),
        ("5", json!({ "challengeSection": "" })),
        ("6", json!({ "bogus": 1 })),
        ("7", json!({ "gradedCourses": "M 117" })),
    ] {
        let resp = request(
            &mut stdin,
            &mut reader,
            id,
            "setup.update",
            json!({ "patch": patch }),
        );
        assert_eq!(resp["ok"], false);
        assert_eq!(resp["error"]["code"], "bad_params");
    }
    let resp = request(&mut stdin, &mut reader, "8", "setup.update", json!({}));
    assert_eq!(resp["error"]["code"], "bad_params");

    drop(stdin);
    let _ = child.wait();

    // A fresh process reads the saved configuration back.
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let reloaded = request_ok(&mut stdin, &mut reader, "2", "setup.get", json!({}));
    assert_eq!(reloaded["grading"], updated["grading"]);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(&workspace);
}
