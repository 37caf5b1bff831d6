#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
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

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_scorebookd");
    let mut child = Command::new(exe)
        .env_remove("SCOREBOOKD_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn scorebookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn read_response(reader: &mut BufReader<ChildStdout>) -> serde_json::Value {
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response");
    serde_json::from_str(line.trim()).expect("parse response json")
}

pub fn request(
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

    let value = read_response(reader);
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request_ok(
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

/// Returns the error code of a request that is expected to fail.
pub fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .expect("error code")
        .to_string()
}

pub fn entry(work_key: &str, value: f64) -> serde_json::Value {
    json!({ "workKey": work_key, "value": value, "flag": 0 })
}

/// Every week item and composite at the given values, unflagged.
pub fn full_subject_entries(
    first_term: f64,
    second_term: f64,
    rk1: f64,
    rk2: f64,
    exam: f64,
) -> Vec<serde_json::Value> {
    let mut out = Vec::new();
    for week in 1..=15 {
        let v = if week <= 7 { first_term } else { second_term };
        for cat in ["lecture", "sro", "lab"] {
            out.push(entry(&format!("week{}_{}", week, cat), v));
        }
    }
    out.push(entry("rk1", rk1));
    out.push(entry("rk2", rk2));
    out.push(entry("exam", exam));
    out
}

/// A subject whose every total comes out at `v`.
pub fn uniform_subject_entries(v: f64) -> Vec<serde_json::Value> {
    full_subject_entries(v, v, v, v, v)
}

pub fn open_workspace(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    prefix: &str,
) -> PathBuf {
    let workspace = temp_dir(prefix);
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    workspace
}

pub fn create_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: i64,
    full_name: &str,
    group_label: &str,
) {
    let _ = request_ok(
        stdin,
        reader,
        &format!("create-{}", id),
        "students.create",
        json!({ "id": id, "fullName": full_name, "groupLabel": group_label }),
    );
}

pub fn save_subject(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    student_id: i64,
    subject: &str,
    entries: Vec<serde_json::Value>,
) -> serde_json::Value {
    let result = request_ok(
        stdin,
        reader,
        &format!("save-{}-{}", student_id, subject),
        "journal.save",
        json!({ "studentId": student_id, "subject": subject, "entries": entries }),
    );
    result.get("totals").cloned().expect("totals")
}
