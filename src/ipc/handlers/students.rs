use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{calc_err, db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, StudentDirectory};
use serde_json::json;

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let full_name = match required_str(req, "fullName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if full_name.trim().is_empty() {
        return err(&req.id, "bad_params", "fullName must not be empty", None);
    }
    let group_label = match required_str(req, "groupLabel") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let id = match req.params.get("id") {
        None | Some(serde_json::Value::Null) => None,
        Some(v) => match v.as_i64() {
            Some(id) => Some(id),
            None => return err(&req.id, "bad_params", "id must be an integer", None),
        },
    };

    match store::create_student(conn, id, &full_name, &group_label) {
        Ok(student) => {
            // Directory membership feeds rankings and group reports.
            state.analytics.invalidate();
            ok(&req.id, json!({ "student": student }))
        }
        Err(e) => calc_err(req, e),
    }
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "students": [] }));
    };
    match conn.list_students() {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => calc_err(req, e),
    }
}

fn handle_groups_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "groups": [] }));
    };
    match conn.list_groups() {
        Ok(groups) => ok(&req.id, json!({ "groups": groups })),
        Err(e) => calc_err(req, e),
    }
}

fn handle_groups_students(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let group_label = match required_str(req, "groupLabel") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match conn.students_in_group(group_label.trim()) {
        Ok(students) => ok(
            &req.id,
            json!({ "groupLabel": group_label.trim(), "students": students }),
        ),
        Err(e) => calc_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.create" => Some(handle_students_create(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        "groups.list" => Some(handle_groups_list(state, req)),
        "groups.students" => Some(handle_groups_students(state, req)),
        _ => None,
    }
}
