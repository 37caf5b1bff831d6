use crate::calc::CalcError;
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

/// Integer ids arrive as JSON numbers or as digit strings.
pub fn required_i64(req: &Request, key: &str) -> Result<i64, serde_json::Value> {
    let v = req.params.get(key);
    v.and_then(|v| v.as_i64())
        .or_else(|| v.and_then(|v| v.as_str()).and_then(|s| s.trim().parse().ok()))
        .ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                format!("missing or non-integer {}", key),
                None,
            )
        })
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn calc_err(req: &Request, e: CalcError) -> serde_json::Value {
    tracing::warn!(id = %req.id, method = %req.method, code = %e.code, "{}", e.message);
    err(&req.id, &e.code, e.message, e.details)
}
