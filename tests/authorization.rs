mod test_support;

use serde_json::json;
use test_support::{
    enter_scores, open_all_windows, request_err, request_ok, seed_directory, spawn_sidecar,
    temp_dir, ADMIN, FACULTY, HOD, OFFERING, OTHER_FACULTY,
};

#[test]
fn actors_are_checked_before_any_transition() {
    let workspace = temp_dir("gradeflow-authorization");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    seed_directory(&mut stdin, &mut reader, &["s1", "s2"]);
    open_all_windows(&mut stdin, &mut reader);

    let entry = |actor: &str| {
        json!({
            "actorId": actor,
            "offeringId": OFFERING,
            "phase": "minor1",
            "entries": [{ "studentId": "s1", "value": 10 }]
        })
    };
    // Unassigned faculty, the HOD and students cannot enter marks.
    for (id, actor) in [("2", OTHER_FACULTY), ("3", HOD), ("4", "s1"), ("5", ADMIN)] {
        let code = request_err(&mut stdin, &mut reader, id, "marks.enter", entry(actor));
        assert_eq!(code, "unauthorized", "actor {}", actor);
    }
    assert_eq!(
        request_err(&mut stdin, &mut reader, "6", "marks.enter", entry("nobody")),
        "unauthorized"
    );
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "7",
            "marks.enter",
            json!({ "offeringId": OFFERING, "phase": "minor1", "entries": [] })
        ),
        "bad_params"
    );

    enter_scores(&mut stdin, &mut reader, "s1", [15.0, 15.0, 35.0, 70.0]);
    request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "marks.submit",
        json!({ "actorId": FACULTY, "offeringId": OFFERING }),
    );
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "9",
            "grades.compute",
            json!({ "actorId": OTHER_FACULTY, "offeringId": OFFERING })
        ),
        "unauthorized"
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "grades.compute",
        json!({ "actorId": FACULTY, "offeringId": OFFERING }),
    );

    // Approval and publication belong to the department's HOD only.
    for (id, method, actor) in [
        ("11", "grades.approve", FACULTY),
        ("12", "grades.approve", ADMIN),
        ("13", "grades.publish", FACULTY),
        ("14", "grades.publish", ADMIN),
    ] {
        let code = request_err(
            &mut stdin,
            &mut reader,
            id,
            method,
            json!({ "actorId": actor, "offeringId": OFFERING }),
        );
        assert_eq!(code, "unauthorized", "{} by {}", method, actor);
    }

    // Windows belong to admins and the HOD.
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "15",
            "windows.set",
            json!({
                "actorId": FACULTY,
                "offeringId": OFFERING,
                "phase": "mid",
                "startTime": "2025-01-01T00:00:00Z",
                "endTime": "2025-02-01T00:00:00Z"
            })
        ),
        "unauthorized"
    );
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "16",
            "windows.set",
            json!({
                "actorId": ADMIN,
                "offeringId": OFFERING,
                "phase": "mid",
                "startTime": "2025-02-01T00:00:00Z",
                "endTime": "2025-01-01T00:00:00Z"
            })
        ),
        "bad_params"
    );

    // Students read only their own grades; faculty read none.
    for (id, actor) in [("17", "s2"), ("18", FACULTY)] {
        let code = request_err(
            &mut stdin,
            &mut reader,
            id,
            "grades.student",
            json!({ "actorId": actor, "studentId": "s1" }),
        );
        assert_eq!(code, "unauthorized", "actor {}", actor);
    }
    request_ok(
        &mut stdin,
        &mut reader,
        "19",
        "grades.student",
        json!({ "actorId": ADMIN, "studentId": "s1" }),
    );

    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "20",
            "marks.get",
            json!({ "actorId": "s1", "offeringId": OFFERING })
        ),
        "unauthorized"
    );
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "21",
            "audit.list",
            json!({ "actorId": FACULTY, "offeringId": OFFERING })
        ),
        "unauthorized"
    );
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "22",
            "grades.list",
            json!({ "actorId": HOD, "offeringId": "missing-offering" })
        ),
        "not_found"
    );
}

#[test]
fn directory_rejects_inconsistent_facts() {
    let workspace = temp_dir("gradeflow-directory");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    seed_directory(&mut stdin, &mut reader, &["s1"]);

    let cases = [
        ("2", "directory.upsertUser", json!({ "id": "x", "username": "x", "role": "DEAN" })),
        (
            "3",
            "directory.upsertUser",
            json!({ "id": "x", "username": "x", "role": "STUDENT", "isHod": true }),
        ),
        (
            "4",
            "directory.upsertOffering",
            json!({
                "id": "o2",
                "courseId": "cs201",
                "academicYear": "2025-26",
                "year": 2,
                "semester": 3
            }),
        ),
        ("5", "directory.enroll", json!({ "studentId": FACULTY, "offeringId": OFFERING })),
        ("6", "directory.assignFaculty", json!({ "facultyId": "s1", "offeringId": OFFERING })),
    ];
    for (id, method, params) in cases {
        assert_eq!(
            request_err(&mut stdin, &mut reader, id, method, params),
            "bad_params",
            "{}",
            method
        );
    }
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "7",
            "directory.enroll",
            json!({ "studentId": "ghost", "offeringId": OFFERING })
        ),
        "not_found"
    );

    // Re-sending a fact is an update, not a duplicate.
    request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "directory.enroll",
        json!({ "studentId": "s1", "offeringId": OFFERING, "isRepeat": true }),
    );
    let sheet = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "marks.get",
        json!({ "actorId": FACULTY, "offeringId": OFFERING }),
    );
    let students = sheet
        .get("students")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("students");
    assert_eq!(students.len(), 1);
    assert_eq!(students[0].get("isRepeat").and_then(|v| v.as_bool()), Some(true));
}
