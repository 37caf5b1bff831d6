use crate::analytics::{self, DEFAULT_RANKING_SIZE};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{calc_err, db_conn, required_i64};
use crate::ipc::types::{AppState, Request};
use crate::store::StudentDirectory;
use serde_json::json;

fn ranking_size(req: &Request) -> Result<usize, serde_json::Value> {
    match req.params.get("topN") {
        None | Some(serde_json::Value::Null) => Ok(DEFAULT_RANKING_SIZE),
        Some(v) => v
            .as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| err(&req.id, "bad_params", "topN must be a non-negative integer", None)),
    }
}

fn handle_analytics_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let n = match ranking_size(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let snapshot = match state.analytics.snapshot(conn) {
        Ok(s) => s,
        Err(e) => return calc_err(req, e),
    };
    let students = match conn.list_students() {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };
    let dashboard = analytics::dashboard(&snapshot, &students, n);
    ok(&req.id, json!(dashboard))
}

fn handle_analytics_admin(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let n = match ranking_size(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let snapshot = match state.analytics.snapshot(conn) {
        Ok(s) => s,
        Err(e) => return calc_err(req, e),
    };
    let students = match conn.list_students() {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };
    ok(&req.id, json!(analytics::admin_overview(&snapshot, &students, n)))
}

fn handle_analytics_final_average(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_i64(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let snapshot = match state.analytics.snapshot(conn) {
        Ok(s) => s,
        Err(e) => return calc_err(req, e),
    };
    let finals: Vec<serde_json::Value> = snapshot
        .final_grades(student_id)
        .into_iter()
        .map(|(subject, final_score)| json!({ "subject": subject, "finalScore": final_score }))
        .collect();
    ok(
        &req.id,
        json!({
            "studentId": student_id,
            "finalAverage": snapshot.final_average(student_id),
            "absences": snapshot.absence_count(student_id),
            "finals": finals,
        }),
    )
}

fn handle_analytics_invalidate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let was_built = state.analytics.is_built();
    state.analytics.invalidate();
    ok(&req.id, json!({ "invalidated": was_built }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "analytics.open" => Some(handle_analytics_open(state, req)),
        "analytics.admin" => Some(handle_analytics_admin(state, req)),
        "analytics.finalAverage" => Some(handle_analytics_final_average(state, req)),
        "analytics.invalidate" => Some(handle_analytics_invalidate(state, req)),
        _ => None,
    }
}
