mod test_support;

use serde_json::json;
use std::io::{BufRead, Write};
use test_support::{request, request_err, request_ok, spawn_sidecar, temp_dir};

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("gradeflow-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health.get("workspacePath").map(|v| v.is_null()).unwrap_or(false));
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "2",
            "marks.get",
            json!({ "actorId": "a", "offeringId": "o" })
        ),
        "no_workspace"
    );
    assert_eq!(
        request_err(&mut stdin, &mut reader, "3", "workspace.select", json!({})),
        "bad_params"
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "directory.upsertUser",
        json!({ "id": "admin1", "username": "admin", "role": "ADMIN" }),
    );

    // Every family answers with something other than not_implemented.
    let families = [
        ("6", "windows.list"),
        ("7", "marks.get"),
        ("8", "grades.list"),
        ("9", "grades.final"),
        ("10", "audit.list"),
    ];
    for (id, method) in families {
        let code = request_err(
            &mut stdin,
            &mut reader,
            id,
            method,
            json!({ "actorId": "admin1", "offeringId": "missing" }),
        );
        assert_eq!(code, "not_found", "{}", method);
    }
    request_ok(&mut stdin, &mut reader, "11", "policy.get", json!({ "actorId": "admin1" }));
    request_ok(&mut stdin, &mut reader, "12", "audit.verify", json!({ "actorId": "admin1" }));

    let unknown = request(&mut stdin, &mut reader, "13", "classes.list", json!({}));
    assert_eq!(
        unknown
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("not_implemented")
    );

    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read bad_json reply");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse reply");
    assert_eq!(
        value.pointer("/error/code").and_then(|v| v.as_str()),
        Some("bad_json")
    );

    drop(stdin);
    let status = child.wait().expect("wait for daemon");
    assert!(status.success());
}
