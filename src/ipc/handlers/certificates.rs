use super::assessment::with_workflow;
use crate::config::CertificateSetup;
use crate::ipc::error::{err, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_generate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let student_id = match required_str(&req.params, "studentId") {
        Ok(v) => v.to_string(),
        Err(e) => return e.response(&req.id),
    };
    with_workflow(state, req, |wf, backend| {
        let certificate = wf.generate_certificate(backend, &student_id)?;
        Ok(json!({ "certificate": certificate }))
    })
}

fn handle_generate_all(state: &mut AppState, req: &Request) -> serde_json::Value {
    let student_ids: Option<Vec<String>> = match req.params.get("studentIds") {
        None | Some(serde_json::Value::Null) => None,
        Some(v) => match serde_json::from_value(v.clone()) {
            Ok(ids) => Some(ids),
            Err(_) => {
                return err(&req.id, "bad_params", "studentIds must be an array of strings", None)
            }
        },
    };
    if let (Some(ids), Some(conn)) = (student_ids.as_ref(), state.db.as_ref()) {
        let limit = match CertificateSetup::load(conn) {
            Ok(setup) => setup.generate_all_limit,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if ids.len() as u64 > limit {
            return err(
                &req.id,
                "limit_exceeded",
                format!("at most {} certificates per request", limit),
                Some(json!({ "limit": limit, "requested": ids.len() })),
            );
        }
    }
    with_workflow(state, req, |wf, backend| {
        let report = wf.generate_all(backend, student_ids.as_deref())?;
        Ok(json!({
            "successCount": report.success_count(),
            "report": report,
        }))
    })
}

fn handle_approve(state: &mut AppState, req: &Request) -> serde_json::Value {
    let certificate_id = match required_str(&req.params, "certificateId") {
        Ok(v) => v.to_string(),
        Err(e) => return e.response(&req.id),
    };
    with_workflow(state, req, |wf, backend| {
        let certificate = wf.approve_certificate(backend, &certificate_id)?;
        Ok(json!({ "certificate": certificate }))
    })
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let certificate_id = match required_str(&req.params, "certificateId") {
        Ok(v) => v.to_string(),
        Err(e) => return e.response(&req.id),
    };
    with_workflow(state, req, |wf, backend| {
        let removed = wf.delete_certificate(backend, &certificate_id)?;
        Ok(json!({ "deleted": removed }))
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "certificates.generate" => Some(handle_generate(state, req)),
        "certificates.generateAll" => Some(handle_generate_all(state, req)),
        "certificates.approve" => Some(handle_approve(state, req)),
        "certificates.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
