use crate::aggregate;
use crate::grading::{self, ComponentInput, JournalEdit};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{calc_err, db_conn, required_i64, required_str};
use crate::ipc::types::{AppState, Request};
use crate::store::{ScoreStore, StudentDirectory};
use serde_json::json;

/// `value` may be a number, free text, or null (nothing to write).
fn component_value(req: &Request) -> Result<Option<f64>, serde_json::Value> {
    match req.params.get("value") {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => Ok(n.as_f64()),
        Some(serde_json::Value::String(s)) => Ok(Some(grading::parse_component_text(s))),
        Some(_) => Err(err(
            &req.id,
            "bad_params",
            "value must be a number, a string or null",
            None,
        )),
    }
}

/// Flags typed into the journal arrive as text too; anything unreadable is a
/// normal item.
fn flag_value(v: Option<&serde_json::Value>) -> f64 {
    match v {
        Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(serde_json::Value::String(s)) => s.trim().replace(',', ".").parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn journal_edits(req: &Request) -> Result<Vec<JournalEdit>, serde_json::Value> {
    let Some(entries) = req.params.get("entries").and_then(|v| v.as_array()) else {
        return Err(err(&req.id, "bad_params", "missing entries", None));
    };
    let mut edits = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        let Some(work_key) = entry.get("workKey").and_then(|v| v.as_str()) else {
            return Err(err(
                &req.id,
                "bad_params",
                "entry missing workKey",
                Some(json!({ "index": i })),
            ));
        };
        let value = match entry.get("value") {
            Some(serde_json::Value::Number(n)) => {
                n.as_f64().map(ComponentInput::Number).unwrap_or(ComponentInput::Missing)
            }
            Some(serde_json::Value::String(s)) => ComponentInput::Text(s.clone()),
            _ => ComponentInput::Missing,
        };
        edits.push(JournalEdit {
            work_key: work_key.to_string(),
            value,
            flag: flag_value(entry.get("flag")),
        });
    }
    Ok(edits)
}

fn handle_journal_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_i64(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subjects = match conn.list_subjects(student_id) {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };
    let student = match conn.find_student(student_id) {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };
    let subject = req
        .params
        .get("subject")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .or_else(|| subjects.first().cloned());
    let Some(subject) = subject else {
        return ok(
            &req.id,
            json!({
                "studentId": student_id,
                "student": student,
                "subjects": subjects,
                "subject": null,
                "values": {},
            }),
        );
    };

    match grading::resolve(conn, student_id, &subject) {
        Ok(view) => ok(
            &req.id,
            json!({
                "studentId": student_id,
                "student": student,
                "subjects": subjects,
                "subject": subject,
                "values": view,
            }),
        ),
        Err(e) => calc_err(req, e),
    }
}

fn handle_journal_set_component(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_i64(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject = match required_str(req, "subject") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let work_key = match required_str(req, "workKey") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let value = match component_value(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    match grading::set_component(conn, student_id, &subject, &work_key, value) {
        Ok(stored) => ok(
            &req.id,
            json!({ "workKey": work_key.trim(), "stored": stored }),
        ),
        Err(e) => calc_err(req, e),
    }
}

fn handle_journal_set_flag(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_i64(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject = match required_str(req, "subject") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let work_key = match required_str(req, "workKey") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if req.params.get("flag").map(|v| v.is_null()).unwrap_or(true) {
        return err(&req.id, "bad_params", "missing flag", None);
    }
    let flag = flag_value(req.params.get("flag"));

    match grading::set_flag(conn, student_id, &subject, &work_key, flag) {
        Ok(()) => ok(&req.id, json!({ "workKey": work_key.trim(), "flag": flag })),
        Err(e) => calc_err(req, e),
    }
}

fn handle_journal_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_i64(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject = match required_str(req, "subject") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let edits = match journal_edits(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let totals = match grading::save_journal(&*tx, &state.analytics, student_id, &subject, &edits)
    {
        Ok(t) => t,
        Err(e) => {
            let _ = tx.rollback();
            return calc_err(req, e);
        }
    };
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    // The snapshot may have been rebuilt from uncommitted rows in between.
    state.analytics.invalidate();

    ok(
        &req.id,
        json!({
            "studentId": student_id,
            "subject": subject.trim(),
            "saved": edits.len(),
            "totals": totals,
        }),
    )
}

fn handle_journal_recalc(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_i64(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject = match required_str(req, "subject") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match grading::recalc(conn, &state.analytics, student_id, &subject) {
        Ok(totals) => ok(
            &req.id,
            json!({ "studentId": student_id, "subject": subject.trim(), "totals": totals }),
        ),
        Err(e) => calc_err(req, e),
    }
}

fn handle_student_finals(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_i64(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match aggregate::student_finals(conn, student_id) {
        Ok(finals) => ok(&req.id, json!(finals)),
        Err(e) => calc_err(req, e),
    }
}

fn handle_student_journal(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_i64(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match aggregate::stored_journal(conn, student_id) {
        Ok(rows) => ok(&req.id, json!({ "studentId": student_id, "rows": rows })),
        Err(e) => calc_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "journal.open" => Some(handle_journal_open(state, req)),
        "journal.setComponent" => Some(handle_journal_set_component(state, req)),
        "journal.setFlag" => Some(handle_journal_set_flag(state, req)),
        "journal.save" => Some(handle_journal_save(state, req)),
        "journal.recalc" => Some(handle_journal_recalc(state, req)),
        "student.finals" => Some(handle_student_finals(state, req)),
        "student.journal" => Some(handle_student_journal(state, req)),
        _ => None,
    }
}
