mod test_support;

use serde_json::json;
use test_support::{
    full_subject_entries, open_workspace, request_ok, save_subject, spawn_sidecar,
    uniform_subject_entries,
};

fn finals_of(result: &serde_json::Value) -> Vec<(String, f64)> {
    result
        .get("finals")
        .and_then(|v| v.as_array())
        .expect("finals")
        .iter()
        .map(|f| {
            (
                f.get("subject").and_then(|v| v.as_str()).expect("subject").to_string(),
                f.get("finalScore").and_then(|v| v.as_f64()).expect("finalScore"),
            )
        })
        .collect()
}

#[test]
fn student_without_subjects_averages_zero() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = open_workspace(&mut stdin, &mut reader, "scorebook-finals-empty");

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "student.finals",
        json!({ "studentId": 42 }),
    );
    assert!(finals_of(&result).is_empty());
    assert_eq!(result.get("average").and_then(|v| v.as_f64()), Some(0.0));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn finals_are_ordered_by_subject_and_averaged_unweighted() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = open_workspace(&mut stdin, &mut reader, "scorebook-finals-two");

    let _ = save_subject(
        &mut stdin,
        &mut reader,
        1,
        "Physics",
        full_subject_entries(80.0, 90.0, 70.0, 85.0, 75.0),
    );
    let _ = save_subject(&mut stdin, &mut reader, 1, "Art", uniform_subject_entries(60.0));

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "student.finals",
        json!({ "studentId": 1 }),
    );
    assert_eq!(
        finals_of(&result),
        vec![("Art".to_string(), 60.0), ("Physics".to_string(), 79.2)]
    );
    assert_eq!(result.get("average").and_then(|v| v.as_f64()), Some(69.6));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn preview_reads_raw_values_not_stored_totals() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = open_workspace(&mut stdin, &mut reader, "scorebook-finals-preview");

    // Raw components only, never recalculated.
    for (i, key) in ["rk1", "rk2", "exam"].iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("set-{}", i),
            "journal.setComponent",
            json!({ "studentId": 1, "subject": "Math", "workKey": key, "value": 50 }),
        );
    }
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "finals-1",
        "student.finals",
        json!({ "studentId": 1 }),
    );
    // tk1 = tk2 = 0, r1 = r2 = 20, dopusk = 20, FINAL = 12 + 20.
    assert_eq!(finals_of(&result), vec![("Math".to_string(), 32.0)]);

    // Flagging the exam without touching its value changes the stored
    // totals but not the preview.
    let _ = save_subject(
        &mut stdin,
        &mut reader,
        2,
        "Math",
        full_subject_entries(80.0, 90.0, 70.0, 85.0, 75.0),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "flag",
        "journal.setFlag",
        json!({ "studentId": 2, "subject": "Math", "workKey": "exam", "flag": 1 }),
    );
    let recalc = request_ok(
        &mut stdin,
        &mut reader,
        "recalc",
        "journal.recalc",
        json!({ "studentId": 2, "subject": "Math" }),
    );
    assert_eq!(
        recalc
            .get("totals")
            .and_then(|t| t.get("FINAL"))
            .and_then(|v| v.as_f64()),
        Some(49.2)
    );
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "finals-2",
        "student.finals",
        json!({ "studentId": 2 }),
    );
    assert_eq!(finals_of(&result), vec![("Math".to_string(), 79.2)]);

    drop(stdin);
    let _ = child.wait();
}
