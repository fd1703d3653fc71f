#![allow(dead_code)]

use chrono::{Duration, Utc};
use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub const ADMIN: &str = "admin1";
pub const HOD: &str = "hod1";
pub const FACULTY: &str = "fac1";
pub const OTHER_FACULTY: &str = "fac2";
pub const OFFERING: &str = "off-cs201";

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
    let exe = env!("CARGO_BIN_EXE_gradeflowd");
    let mut child = Command::new(exe)
        .env_remove("GRADEFLOWD_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradeflowd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn send(stdin: &mut ChildStdin, id: &str, method: &str, params: serde_json::Value) {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");
}

pub fn read_response(reader: &mut BufReader<ChildStdout>, id: &str) -> serde_json::Value {
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", id);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    send(stdin, id, method, params);
    read_response(reader, id)
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

/// Asserts a failed reply and returns its error code.
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

pub fn rfc3339_from_now(offset_minutes: i64) -> String {
    (Utc::now() + Duration::minutes(offset_minutes)).to_rfc3339()
}

pub fn status_of(result: &serde_json::Value, student_id: &str) -> String {
    result
        .get("outcomes")
        .and_then(|v| v.as_array())
        .and_then(|arr| {
            arr.iter()
                .find(|o| o.get("studentId").and_then(|v| v.as_str()) == Some(student_id))
        })
        .and_then(|o| o.get("status"))
        .and_then(|v| v.as_str())
        .unwrap_or("missing")
        .to_string()
}

pub fn code_of(result: &serde_json::Value, student_id: &str) -> Option<String> {
    result
        .get("outcomes")
        .and_then(|v| v.as_array())
        .and_then(|arr| {
            arr.iter()
                .find(|o| o.get("studentId").and_then(|v| v.as_str()) == Some(student_id))
        })
        .and_then(|o| o.get("code"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

/// One department (`cse`), an admin, an HOD, two faculty (only `fac1`
/// assigned), the given students enrolled in one 4-credit offering.
pub fn seed_directory(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    students: &[&str],
) {
    let mut n = 0;
    let mut next_id = || {
        n += 1;
        format!("seed-{}", n)
    };

    request_ok(
        stdin,
        reader,
        &next_id(),
        "directory.upsertDepartment",
        json!({ "id": "cse", "name": "Computer Science" }),
    );
    let users = [
        json!({ "id": ADMIN, "username": "admin", "role": "ADMIN" }),
        json!({
            "id": HOD,
            "username": "hod",
            "role": "FACULTY",
            "departmentId": "cse",
            "isHod": true
        }),
        json!({
            "id": FACULTY,
            "username": "faculty1",
            "role": "FACULTY",
            "departmentId": "cse"
        }),
        json!({
            "id": OTHER_FACULTY,
            "username": "faculty2",
            "role": "FACULTY",
            "departmentId": "cse"
        }),
    ];
    for user in users {
        request_ok(stdin, reader, &next_id(), "directory.upsertUser", user);
    }
    for s in students {
        request_ok(
            stdin,
            reader,
            &next_id(),
            "directory.upsertUser",
            json!({
                "id": s,
                "username": format!("user-{}", s),
                "role": "STUDENT",
                "departmentId": "cse"
            }),
        );
    }
    request_ok(
        stdin,
        reader,
        &next_id(),
        "directory.upsertCourse",
        json!({
            "id": "cs201",
            "code": "CS201",
            "title": "Data Structures",
            "credits": 4,
            "departmentId": "cse"
        }),
    );
    request_ok(
        stdin,
        reader,
        &next_id(),
        "directory.upsertOffering",
        json!({
            "id": OFFERING,
            "courseId": "cs201",
            "academicYear": "2025-26",
            "year": 2,
            "semester": 1
        }),
    );
    request_ok(
        stdin,
        reader,
        &next_id(),
        "directory.assignFaculty",
        json!({ "facultyId": FACULTY, "offeringId": OFFERING }),
    );
    for s in students {
        request_ok(
            stdin,
            reader,
            &next_id(),
            "directory.enroll",
            json!({ "studentId": s, "offeringId": OFFERING }),
        );
    }
}

/// Opens every phase's window around now, as the admin.
pub fn open_all_windows(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) {
    open_all_windows_for(stdin, reader, OFFERING);
}

pub fn open_all_windows_for(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    offering_id: &str,
) {
    for phase in ["minor1", "minor2", "mid", "end"] {
        request_ok(
            stdin,
            reader,
            &format!("window-{}-{}", offering_id, phase),
            "windows.set",
            json!({
                "actorId": ADMIN,
                "offeringId": offering_id,
                "phase": phase,
                "startTime": rfc3339_from_now(-60),
                "endTime": rfc3339_from_now(60)
            }),
        );
    }
}

/// Enters all four components for one student as the assigned faculty.
pub fn enter_scores(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    student_id: &str,
    scores: [f64; 4],
) {
    enter_scores_for(stdin, reader, OFFERING, student_id, scores);
}

pub fn enter_scores_for(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    offering_id: &str,
    student_id: &str,
    scores: [f64; 4],
) {
    for (phase, value) in ["minor1", "minor2", "mid", "end"].iter().zip(scores) {
        let result = request_ok(
            stdin,
            reader,
            &format!("enter-{}-{}-{}", offering_id, student_id, phase),
            "marks.enter",
            json!({
                "actorId": FACULTY,
                "offeringId": offering_id,
                "phase": phase,
                "entries": [{ "studentId": student_id, "value": value }]
            }),
        );
        assert_eq!(status_of(&result, student_id), "recorded", "{}", result);
    }
}
