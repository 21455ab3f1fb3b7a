use crate::backend::SqliteBackend;
use crate::config::CertificateSetup;
use crate::context::SessionContext;
use crate::db;
use crate::error::WorkflowError;
use crate::ipc::error::{err, ok, required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::workflow::AssessmentWorkflow;
use serde_json::json;
use tracing::{debug, warn};

/// Runs `f` against the open workflow for `params.batchId`, after refreshing
/// the batch from the workspace so gating sees its current status. Every
/// response, success or failure, carries the resulting view.
pub(super) fn with_workflow<F>(state: &mut AppState, req: &Request, f: F) -> serde_json::Value
where
    F: FnOnce(
        &mut AssessmentWorkflow,
        &SqliteBackend<'_>,
    ) -> Result<serde_json::Value, WorkflowError>,
{
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let batch_id = match required_str(&req.params, "batchId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let batch = match db::batch_get(conn, batch_id) {
        Ok(Some(b)) => b,
        Ok(None) => {
            return err(
                &req.id,
                "not_found",
                "batch not found",
                Some(json!({ "batchId": batch_id })),
            )
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(wf) = state.workflows.get_mut(batch_id) else {
        return err(
            &req.id,
            "not_open",
            "open the assessment first",
            Some(json!({ "batchId": batch_id })),
        );
    };
    let setup = match CertificateSetup::load(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    wf.refresh_batch(batch);
    let backend = SqliteBackend::new(conn, setup);
    match f(wf, &backend) {
        Ok(mut result) => {
            result["view"] = json!(wf.view());
            ok(&req.id, result)
        }
        Err(e) => {
            if matches!(e, WorkflowError::Refused { .. }) {
                debug!(target: "batchcertd::ipc", method = %req.method, %batch_id, "refused");
            } else {
                warn!(
                    target: "batchcertd::ipc",
                    method = %req.method,
                    %batch_id,
                    code = e.code(),
                    error = %e,
                    "request failed"
                );
            }
            err(&req.id, e.code(), e.to_string(), Some(json!({ "view": wf.view() })))
        }
    }
}

fn handle_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let batch_id = match required_str(&req.params, "batchId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let actor: SessionContext = match req
        .params
        .get("actor")
        .cloned()
        .map(serde_json::from_value)
    {
        Some(Ok(v)) => v,
        Some(Err(e)) => return err(&req.id, "bad_params", format!("invalid actor: {}", e), None),
        None => return err(&req.id, "bad_params", "missing actor", None),
    };
    let batch = match db::batch_get(conn, batch_id) {
        Ok(Some(b)) => b,
        Ok(None) => {
            return err(
                &req.id,
                "not_found",
                "batch not found",
                Some(json!({ "batchId": batch_id })),
            )
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let setup = match CertificateSetup::load(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let backend = SqliteBackend::new(conn, setup);
    let mut wf = AssessmentWorkflow::new(actor, batch);
    // A failed load still opens the batch with an empty ledger.
    let load_error = wf
        .load(&backend)
        .err()
        .map(|e| json!({ "code": e.code(), "message": e.to_string() }));
    let view = wf.view();
    state.workflows.insert(batch_id.to_string(), wf);
    ok(&req.id, json!({ "view": view, "loadError": load_error }))
}

fn handle_close(state: &mut AppState, req: &Request) -> serde_json::Value {
    let batch_id = match required_str(&req.params, "batchId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let closed = state.workflows.remove(batch_id).is_some();
    ok(&req.id, json!({ "closed": closed }))
}

fn parse_set_score(req: &Request) -> Result<(usize, String, serde_json::Value), HandlerErr> {
    let index = req
        .params
        .get("studentIndex")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| HandlerErr::bad_params("studentIndex must be a non-negative integer"))?;
    let column = required_str(&req.params, "column")?.to_string();
    let value = req
        .params
        .get("value")
        .cloned()
        .unwrap_or(serde_json::Value::Null);
    Ok((index as usize, column, value))
}

fn handle_set_score(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (index, column, value) = match parse_set_score(req) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    with_workflow(state, req, |wf, _| {
        let stored = wf.set_score(index, &column, &value)?;
        Ok(json!({ "stored": stored }))
    })
}

fn handle_set_date(state: &mut AppState, req: &Request) -> serde_json::Value {
    let date = match req.params.get("date") {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        Some(_) => return err(&req.id, "bad_params", "date must be a string or null", None),
    };
    with_workflow(state, req, |wf, _| {
        wf.set_assessment_date(date.as_deref())?;
        Ok(json!({}))
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "assessment.open" => handle_open(state, req),
        "assessment.close" => handle_close(state, req),
        "assessment.view" => with_workflow(state, req, |_, _| Ok(json!({}))),
        "assessment.beginEdit" => with_workflow(state, req, |wf, _| {
            wf.begin_edit()?;
            Ok(json!({}))
        }),
        "assessment.cancelEdit" => with_workflow(state, req, |wf, _| {
            wf.cancel_edit();
            Ok(json!({}))
        }),
        "assessment.setScore" => handle_set_score(state, req),
        "assessment.setDate" => handle_set_date(state, req),
        "assessment.save" => with_workflow(state, req, |wf, backend| {
            wf.save(backend)?;
            Ok(json!({}))
        }),
        "assessment.submit" => with_workflow(state, req, |wf, backend| {
            wf.submit(backend)?;
            Ok(json!({}))
        }),
        _ => return None,
    };
    Some(resp)
}
