use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_batchcertd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn batchcertd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err_code(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> (String, serde_json::Value) {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    let error = value.get("error").cloned().unwrap_or_else(|| json!({}));
    let code = error
        .get("code")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    (code, error)
}

#[test]
fn router_answers_core_setup_and_batch_methods() {
    let workspace = temp_dir("batchcertd-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health.get("version").and_then(|v| v.as_str()).is_some());
    assert_eq!(health.get("workspacePath"), Some(&serde_json::Value::Null));

    let (code, _) = request_err_code(
        &mut stdin,
        &mut reader,
        "2",
        "batches.get",
        json!({ "batchId": "nope" }),
    );
    assert_eq!(code, "no_workspace");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert!(workspace.join("batchcert.sqlite3").is_file());

    let setup = request_ok(&mut stdin, &mut reader, "4", "setup.get", json!({}));
    assert_eq!(
        setup.pointer("/certificates/baseUrl").and_then(|v| v.as_str()),
        Some("https://certificates.local")
    );
    assert_eq!(
        setup
            .pointer("/certificates/generateAllLimit")
            .and_then(|v| v.as_u64()),
        Some(500)
    );

    let (code, _) = request_err_code(
        &mut stdin,
        &mut reader,
        "5",
        "setup.update",
        json!({ "section": "certificates", "patch": { "baseUrl": "ftp://nope" } }),
    );
    assert_eq!(code, "bad_params");

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "batches.create",
        json!({
            "name": "JLPT N4 Evening",
            "language": "Japanese",
            "status": "started",
            "students": ["Aiko", "Ren"]
        }),
    );
    let batch_id = created
        .get("batchId")
        .and_then(|v| v.as_str())
        .expect("batchId")
        .to_string();
    assert_eq!(
        created
            .get("studentIds")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(2)
    );

    let got = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "batches.get",
        json!({ "batchId": batch_id }),
    );
    assert_eq!(
        got.get("statusLabel").and_then(|v| v.as_str()),
        Some("In Progress")
    );
    assert_eq!(got.get("locked").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        got.pointer("/batch/language").and_then(|v| v.as_str()),
        Some("japanese")
    );

    let status = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "batches.setStatus",
        json!({ "batchId": batch_id, "status": "pending" }),
    );
    assert_eq!(
        status.get("statusLabel").and_then(|v| v.as_str()),
        Some("Pending Approval")
    );

    let (code, _) = request_err_code(
        &mut stdin,
        &mut reader,
        "9",
        "assessment.view",
        json!({ "batchId": batch_id }),
    );
    assert_eq!(code, "not_open");

    let (code, _) = request_err_code(
        &mut stdin,
        &mut reader,
        "10",
        "assessment.open",
        json!({ "batchId": batch_id }),
    );
    assert_eq!(code, "bad_params");

    let (code, _) = request_err_code(&mut stdin, &mut reader, "11", "grades.compute", json!({}));
    assert_eq!(code, "not_implemented");

    let health = request_ok(&mut stdin, &mut reader, "12", "health", json!({}));
    assert_eq!(health.get("openBatches").and_then(|v| v.as_u64()), Some(0));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn malformed_json_is_reported_and_loop_continues() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    writeln!(stdin, "{{ not json").expect("write garbage");
    stdin.flush().expect("flush");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse");
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        value.pointer("/error/code").and_then(|v| v.as_str()),
        Some("bad_json")
    );

    let _ = request_ok(&mut stdin, &mut reader, "after", "health", json!({}));

    drop(stdin);
    let _ = child.wait();
}
