mod test_support;

use serde_json::json;
use test_support::{
    enter_scores, open_all_windows, read_response, request_ok, seed_directory, send,
    spawn_sidecar, status_of, temp_dir, FACULTY, HOD, OFFERING,
};

#[test]
fn two_daemons_submitting_the_same_offering_lock_each_record_once() {
    let workspace = temp_dir("gradeflow-concurrent-submit");

    let (_a, mut stdin_a, mut reader_a) = spawn_sidecar();
    request_ok(
        &mut stdin_a,
        &mut reader_a,
        "a1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    seed_directory(&mut stdin_a, &mut reader_a, &["s1"]);
    open_all_windows(&mut stdin_a, &mut reader_a);
    enter_scores(&mut stdin_a, &mut reader_a, "s1", [10.0, 10.0, 25.0, 50.0]);

    let (_b, mut stdin_b, mut reader_b) = spawn_sidecar();
    request_ok(
        &mut stdin_b,
        &mut reader_b,
        "b1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    // Both requests are in flight before either reply is read.
    let params = json!({ "actorId": FACULTY, "offeringId": OFFERING });
    send(&mut stdin_a, "a2", "marks.submit", params.clone());
    send(&mut stdin_b, "b2", "marks.submit", params);
    let resp_a = read_response(&mut reader_a, "a2");
    let resp_b = read_response(&mut reader_b, "b2");

    let result_a = resp_a.get("result").cloned().expect("daemon a result");
    let result_b = resp_b.get("result").cloned().expect("daemon b result");
    let mut statuses = vec![status_of(&result_a, "s1"), status_of(&result_b, "s1")];
    statuses.sort();
    assert_eq!(statuses, vec!["already_locked", "locked"]);

    let trail = request_ok(
        &mut stdin_a,
        &mut reader_a,
        "a3",
        "audit.list",
        json!({ "actorId": HOD, "offeringId": OFFERING, "studentId": "s1" }),
    );
    let locks = trail
        .get("entries")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter(|e| e.get("action").and_then(|v| v.as_str()) == Some("marks.lock"))
                .count()
        })
        .unwrap_or(0);
    assert_eq!(locks, 1);
}
