use crate::batch::{BatchStatus, Language};
use crate::db;
use crate::ipc::error::{err, ok, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_batches_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let name = match required_str(&req.params, "name") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let language = Language::parse(
        req.params
            .get("language")
            .and_then(|v| v.as_str())
            .unwrap_or(""),
    );
    let status = BatchStatus::parse(
        req.params
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or("pending"),
    );
    let Some(students_raw) = req.params.get("students").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "students must be an array of names", None);
    };
    let mut students = Vec::with_capacity(students_raw.len());
    for (i, v) in students_raw.iter().enumerate() {
        match v.as_str().map(str::trim).filter(|s| !s.is_empty()) {
            Some(s) => students.push(s.to_string()),
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "student names must be non-empty strings",
                    Some(json!({ "index": i })),
                )
            }
        }
    }

    match db::batch_create(conn, name, language, &status, &students) {
        Ok(created) => ok(
            &req.id,
            json!({
                "batchId": created.batch_id,
                "studentIds": created.student_ids,
                "language": language,
                "status": status,
            }),
        ),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_batches_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let batch_id = match required_str(&req.params, "batchId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    match db::batch_get(conn, batch_id) {
        Ok(Some(batch)) => ok(
            &req.id,
            json!({
                "batch": batch,
                "statusLabel": batch.status.label(),
                "locked": batch.is_locked(),
            }),
        ),
        Ok(None) => err(
            &req.id,
            "not_found",
            "batch not found",
            Some(json!({ "batchId": batch_id })),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_batches_set_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let batch_id = match required_str(&req.params, "batchId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let status = match required_str(&req.params, "status") {
        Ok(v) => BatchStatus::parse(v),
        Err(e) => return e.response(&req.id),
    };
    match db::batch_set_status(conn, batch_id, &status) {
        Ok(true) => ok(
            &req.id,
            json!({ "status": status, "statusLabel": status.label() }),
        ),
        Ok(false) => err(
            &req.id,
            "not_found",
            "batch not found",
            Some(json!({ "batchId": batch_id })),
        ),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "batches.create" => Some(handle_batches_create(state, req)),
        "batches.get" => Some(handle_batches_get(state, req)),
        "batches.setStatus" => Some(handle_batches_set_status(state, req)),
        _ => None,
    }
}
