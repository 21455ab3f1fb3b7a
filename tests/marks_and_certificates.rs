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

fn create_batch(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    language: &str,
    students: &[&str],
) -> (String, Vec<String>) {
    let created = request_ok(
        stdin,
        reader,
        "create",
        "batches.create",
        json!({
            "name": format!("{} batch", language),
            "language": language,
            "status": "started",
            "students": students
        }),
    );
    let batch_id = created
        .get("batchId")
        .and_then(|v| v.as_str())
        .expect("batchId")
        .to_string();
    let student_ids = created
        .get("studentIds")
        .and_then(|v| v.as_array())
        .expect("studentIds")
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();
    (batch_id, student_ids)
}

fn open_as_admin(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, batch_id: &str) {
    let _ = request_ok(
        stdin,
        reader,
        "open",
        "assessment.open",
        json!({
            "batchId": batch_id,
            "actor": { "userId": "u-admin", "role": "admin" }
        }),
    );
}

#[test]
fn rejected_save_keeps_edits_and_completion_discards_them() {
    let workspace = temp_dir("batchcertd-marks-locking");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (batch_id, _) = create_batch(&mut stdin, &mut reader, "French", &["Camille", "Hugo"]);
    open_as_admin(&mut stdin, &mut reader, &batch_id);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "assessment.beginEdit",
        json!({ "batchId": batch_id }),
    );
    // Entry is permissive; the store enforces the column maximum.
    let stored = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "assessment.setScore",
        json!({
            "batchId": batch_id,
            "studentIndex": 0,
            "column": "comprehension_orale",
            "value": 30
        }),
    );
    assert_eq!(stored.get("stored").and_then(|v| v.as_u64()), Some(30));

    let (code, error) = request_err_code(
        &mut stdin,
        &mut reader,
        "4",
        "assessment.save",
        json!({ "batchId": batch_id }),
    );
    assert_eq!(code, "persistence_failed");
    let view = error.pointer("/details/view").expect("view in details");
    assert_eq!(view.get("mode").and_then(|v| v.as_str()), Some("editing"));
    assert_eq!(view.get("dirty").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(
        view.pointer("/rows/0/total").and_then(|v| v.as_u64()),
        Some(30)
    );
    assert!(view.get("notice").and_then(|v| v.as_str()).is_some());

    let cancelled = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "assessment.cancelEdit",
        json!({ "batchId": batch_id }),
    );
    let view = cancelled.get("view").expect("view");
    assert_eq!(view.get("mode").and_then(|v| v.as_str()), Some("viewing"));
    assert_eq!(view.get("dirty").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        view.pointer("/rows/0/total").and_then(|v| v.as_u64()),
        Some(0)
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "assessment.beginEdit",
        json!({ "batchId": batch_id }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "assessment.setScore",
        json!({
            "batchId": batch_id,
            "studentIndex": 1,
            "column": "production_orale",
            "value": 12
        }),
    );

    // The batch is completed elsewhere while marks are being edited.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "batches.setStatus",
        json!({ "batchId": batch_id, "status": "completed" }),
    );
    let viewed = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "assessment.view",
        json!({ "batchId": batch_id }),
    );
    let view = viewed.get("view").expect("view");
    assert_eq!(view.get("mode").and_then(|v| v.as_str()), Some("viewing"));
    assert_eq!(view.pointer("/batch/locked").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(
        view.pointer("/batch/statusLabel").and_then(|v| v.as_str()),
        Some("Completed")
    );
    assert_eq!(
        view.pointer("/rows/1/total").and_then(|v| v.as_u64()),
        Some(0)
    );
    assert!(view.get("notice").and_then(|v| v.as_str()).is_some());
    assert_eq!(view.pointer("/gate/canEdit").and_then(|v| v.as_bool()), Some(false));

    for (id, method) in [("10", "assessment.beginEdit"), ("11", "assessment.submit")] {
        let (code, _) = request_err_code(
            &mut stdin,
            &mut reader,
            id,
            method,
            json!({ "batchId": batch_id }),
        );
        assert_eq!(code, "action_refused", "{} on completed batch", method);
    }

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn generate_all_reports_partial_failures_and_respects_limit() {
    let workspace = temp_dir("batchcertd-generate-all");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "setup.update",
        json!({
            "section": "certificates",
            "patch": { "baseUrl": "https://certs.example.org/", "generateAllLimit": 2 }
        }),
    );
    assert_eq!(
        updated
            .pointer("/certificates/baseUrl")
            .and_then(|v| v.as_str()),
        Some("https://certs.example.org")
    );

    let (batch_id, student_ids) =
        create_batch(&mut stdin, &mut reader, "Japanese", &["Aiko", "Ren", "Yui"]);
    open_as_admin(&mut stdin, &mut reader, &batch_id);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "assessment.beginEdit",
        json!({ "batchId": batch_id }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "assessment.setScore",
        json!({ "batchId": batch_id, "studentIndex": 0, "column": "reading", "value": 50 }),
    );
    let scored = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "assessment.setScore",
        json!({ "batchId": batch_id, "studentIndex": 1, "column": "listening", "value": 60 }),
    );
    assert_eq!(
        scored.pointer("/view/maxTotal").and_then(|v| v.as_u64()),
        Some(180)
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "assessment.submit",
        json!({ "batchId": batch_id }),
    );

    let (code, error) = request_err_code(
        &mut stdin,
        &mut reader,
        "7",
        "certificates.generateAll",
        json!({ "batchId": batch_id, "studentIds": student_ids }),
    );
    assert_eq!(code, "limit_exceeded");
    assert_eq!(
        error.pointer("/details/limit").and_then(|v| v.as_u64()),
        Some(2)
    );

    let all = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "certificates.generateAll",
        json!({ "batchId": batch_id }),
    );
    assert_eq!(all.get("successCount").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(
        all.pointer("/report/requested").and_then(|v| v.as_u64()),
        Some(3)
    );
    assert_eq!(
        all.pointer("/report/failed/0/studentId")
            .and_then(|v| v.as_str()),
        Some(student_ids[2].as_str())
    );
    assert_eq!(
        all.pointer("/report/failed/0/code").and_then(|v| v.as_str()),
        Some("certificate_zero_total")
    );
    assert!(all
        .pointer("/view/rows/0/certificate/url")
        .and_then(|v| v.as_str())
        .expect("url")
        .starts_with("https://certs.example.org/"));
    assert_eq!(
        all.pointer("/view/certificateCount").and_then(|v| v.as_u64()),
        Some(2)
    );
    assert!(all
        .pointer("/view/notice")
        .and_then(|v| v.as_str())
        .is_some());

    // Only the student without a certificate is retried.
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "certificates.generateAll",
        json!({ "batchId": batch_id, "studentIds": null }),
    );
    assert_eq!(
        again.pointer("/report/requested").and_then(|v| v.as_u64()),
        Some(1)
    );
    assert_eq!(again.get("successCount").and_then(|v| v.as_u64()), Some(0));

    let ghost = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "certificates.generateAll",
        json!({ "batchId": batch_id, "studentIds": ["ghost"] }),
    );
    assert_eq!(
        ghost.pointer("/report/failed/0/code").and_then(|v| v.as_str()),
        Some("unknown_student")
    );

    drop(stdin);
    let _ = child.wait();
}
