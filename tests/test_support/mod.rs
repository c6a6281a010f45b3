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
    let exe = env!("CARGO_BIN_EXE_graderd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn graderd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
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

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

/// Issue a request that must succeed; returns the result payload.
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
        "expected ok for {}: {}",
        method,
        value
    );
    value.get("result").cloned().expect("result payload")
}

/// Issue a request that must fail; returns the error code.
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
        "expected error for {}: {}",
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

/// Workspace + one teacher + one student, the common fixture.
pub struct Classroom {
    pub teacher_id: String,
    pub student_id: String,
    pub student_login_code: String,
}

pub fn setup_classroom(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
) -> Classroom {
    let _ = request_ok(
        stdin,
        reader,
        "setup-ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let teacher = request_ok(
        stdin,
        reader,
        "setup-teacher",
        "setup.createTeacher",
        json!({ "name": "Mr. Kevin", "username": "kevin", "password": "password123" }),
    );
    let teacher_id = teacher
        .get("userId")
        .and_then(|v| v.as_str())
        .expect("teacher userId")
        .to_string();
    let student = request_ok(
        stdin,
        reader,
        "setup-student",
        "students.create",
        json!({ "teacherId": teacher_id, "name": "Ada Lovelace" }),
    );
    let student_id = student
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();
    let student_login_code = student
        .get("loginCode")
        .and_then(|v| v.as_str())
        .expect("loginCode")
        .to_string();
    Classroom {
        teacher_id,
        student_id,
        student_login_code,
    }
}

/// Two objective questions: Q1 multiple_choice (correct "B", 5 pts) and
/// Q2 true_false (correct "true", 5 pts). Returns (assignmentId, [q1, q2]).
pub fn create_objective_assignment(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    teacher_id: &str,
    title: &str,
) -> (String, Vec<String>) {
    let created = request_ok(
        stdin,
        reader,
        "setup-assignment",
        "assignments.create",
        json!({
            "teacherId": teacher_id,
            "title": title,
            "description": "objective-only quiz",
            "questions": [
                {
                    "kind": "multiple_choice",
                    "prompt": "Pick the second letter",
                    "choices": ["A", "B", "C", "D"],
                    "correctAnswer": "B",
                    "points": 5.0
                },
                {
                    "kind": "true_false",
                    "prompt": "Water is wet",
                    "correctAnswer": "true",
                    "points": 5.0
                }
            ]
        }),
    );
    let assignment_id = created
        .get("assignmentId")
        .and_then(|v| v.as_str())
        .expect("assignmentId")
        .to_string();
    let question_ids = created
        .get("questionIds")
        .and_then(|v| v.as_array())
        .expect("questionIds")
        .iter()
        .map(|v| v.as_str().expect("question id").to_string())
        .collect();
    (assignment_id, question_ids)
}
