use crate::backend::{FetchedStudent, MarksPayload, WireColumn};
use crate::batch::{Batch, BatchStatus, Language};
use crate::certificates::{CertificateRecord, CertificateStatus};
use crate::ledger::{columns_for, StudentMarksRecord};
use anyhow::{anyhow, bail, Context};
use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

pub const DB_FILENAME: &str = "batchcert.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILENAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS batches(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            language TEXT NOT NULL,
            status TEXT NOT NULL,
            assessment_date TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            batch_id TEXT NOT NULL,
            display_name TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            marks_status TEXT NOT NULL DEFAULT 'draft',
            FOREIGN KEY(batch_id) REFERENCES batches(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_batch_sort ON students(batch_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS marks(
            batch_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            column_key TEXT NOT NULL,
            value INTEGER NOT NULL,
            PRIMARY KEY(batch_id, student_id, column_key),
            FOREIGN KEY(batch_id) REFERENCES batches(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS certificates(
            id TEXT PRIMARY KEY,
            batch_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            url TEXT NOT NULL,
            status TEXT NOT NULL,
            generated_at TEXT NOT NULL,
            FOREIGN KEY(batch_id) REFERENCES batches(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(batch_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_certificates_batch ON certificates(batch_id)",
        [],
    )?;

    // Workspaces created before approvals were timestamped lack this column.
    ensure_certificates_approved_at(&conn)?;

    Ok(conn)
}

fn ensure_certificates_approved_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "certificates", "approved_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE certificates ADD COLUMN approved_at TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(
            serde_json::from_str(&s).with_context(|| format!("corrupt setting {}", key))?,
        )),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

pub struct CreatedBatch {
    pub batch_id: String,
    pub student_ids: Vec<String>,
}

pub fn batch_create(
    conn: &Connection,
    name: &str,
    language: Language,
    status: &BatchStatus,
    student_names: &[String],
) -> anyhow::Result<CreatedBatch> {
    let batch_id = Uuid::new_v4().to_string();
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO batches(id, name, language, status, created_at) VALUES(?, ?, ?, ?, ?)",
        (
            &batch_id,
            name,
            language.as_str(),
            status.as_str(),
            Utc::now().to_rfc3339(),
        ),
    )?;
    let mut student_ids = Vec::with_capacity(student_names.len());
    for (i, display_name) in student_names.iter().enumerate() {
        let sid = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO students(id, batch_id, display_name, sort_order) VALUES(?, ?, ?, ?)",
            (&sid, &batch_id, display_name, i as i64),
        )?;
        student_ids.push(sid);
    }
    tx.commit()?;
    Ok(CreatedBatch {
        batch_id,
        student_ids,
    })
}

pub fn batch_get(conn: &Connection, batch_id: &str) -> anyhow::Result<Option<Batch>> {
    let row = conn
        .query_row(
            "SELECT id, name, language, status FROM batches WHERE id = ?",
            [batch_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                ))
            },
        )
        .optional()?;
    Ok(row.map(|(id, name, language, status)| Batch {
        id,
        name,
        language: Language::parse(&language),
        status: BatchStatus::parse(&status),
    }))
}

pub fn batch_set_status(
    conn: &Connection,
    batch_id: &str,
    status: &BatchStatus,
) -> anyhow::Result<bool> {
    let n = conn.execute(
        "UPDATE batches SET status = ? WHERE id = ?",
        (status.as_str(), batch_id),
    )?;
    Ok(n > 0)
}

fn certificate_for_student(
    conn: &Connection,
    batch_id: &str,
    student_id: &str,
) -> anyhow::Result<Option<CertificateRecord>> {
    let row = conn
        .query_row(
            "SELECT id, url, status, generated_at FROM certificates
             WHERE batch_id = ? AND student_id = ?",
            (batch_id, student_id),
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                ))
            },
        )
        .optional()?;
    Ok(row.map(|(id, url, status, generated_at)| CertificateRecord {
        certificate_id: id,
        student_id: student_id.to_string(),
        url,
        status: CertificateStatus::parse(&status),
        generated_at,
    }))
}

/// Returns `students: None` when the batch does not exist.
pub fn marks_fetch(conn: &Connection, batch_id: &str) -> anyhow::Result<MarksPayload> {
    let Some(batch) = batch_get(conn, batch_id)? else {
        return Ok(MarksPayload::default());
    };
    let assessment_date: Option<String> = conn.query_row(
        "SELECT assessment_date FROM batches WHERE id = ?",
        [batch_id],
        |r| r.get(0),
    )?;

    let mut stmt = conn.prepare(
        "SELECT id, display_name, marks_status FROM students
         WHERE batch_id = ? ORDER BY sort_order",
    )?;
    let rows = stmt
        .query_map([batch_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut marks_stmt =
        conn.prepare("SELECT column_key, value FROM marks WHERE batch_id = ? AND student_id = ?")?;
    let mut students = Vec::with_capacity(rows.len());
    for (student_id, student_name, status) in rows {
        let scores = marks_stmt
            .query_map((batch_id, &student_id), |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|(k, v)| (k, serde_json::Value::from(v)))
            .collect::<BTreeMap<_, _>>();
        let certificate = certificate_for_student(conn, batch_id, &student_id)?;
        students.push(FetchedStudent {
            student_id,
            student_name,
            status: Some(status),
            scores,
            certificate,
        });
    }

    Ok(MarksPayload {
        students: Some(students),
        course_language: Some(batch.language.as_str().to_string()),
        language_columns: columns_for(batch.language)
            .iter()
            .map(WireColumn::from)
            .collect(),
        assessment_date,
    })
}

fn ensure_marks_open(conn: &Connection, batch_id: &str) -> anyhow::Result<Batch> {
    let batch = batch_get(conn, batch_id)?.ok_or_else(|| anyhow!("batch {} not found", batch_id))?;
    if batch.is_locked() {
        bail!("batch {} is completed; marks are locked", batch_id);
    }
    let submitted: i64 = conn.query_row(
        "SELECT COUNT(*) FROM students
         WHERE batch_id = ? AND marks_status IN ('submitted', 'approved')",
        [batch_id],
        |r| r.get(0),
    )?;
    let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM students WHERE batch_id = ?",
        [batch_id],
        |r| r.get(0),
    )?;
    if total > 0 && submitted == total {
        bail!("marks for batch {} were already submitted", batch_id);
    }
    Ok(batch)
}

/// Replaces the stored marks for every given record in one transaction.
/// Values above a column's maximum are rejected here, not in the editor.
pub fn marks_persist(
    conn: &Connection,
    batch_id: &str,
    records: &[StudentMarksRecord],
    assessment_date: Option<NaiveDate>,
) -> anyhow::Result<Vec<StudentMarksRecord>> {
    let batch = ensure_marks_open(conn, batch_id)?;
    let columns = columns_for(batch.language);

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE batches SET assessment_date = ? WHERE id = ?",
        (assessment_date.map(|d| d.format("%Y-%m-%d").to_string()), batch_id),
    )?;
    for record in records {
        let enrolled: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM students WHERE id = ? AND batch_id = ?",
                (&record.student_id, batch_id),
                |r| r.get(0),
            )
            .optional()?;
        if enrolled.is_none() {
            bail!("student {} is not enrolled in batch {}", record.student_id, batch_id);
        }
        if record.scores.language() != batch.language {
            bail!(
                "scores for student {} use {} columns, batch is {}",
                record.student_id,
                record.scores.language().as_str(),
                batch.language.as_str()
            );
        }
        for (key, value) in record.scores.values() {
            let max = columns
                .iter()
                .find(|c| c.key == key)
                .map(|c| c.max_marks)
                .unwrap_or(0);
            if value > max {
                bail!(
                    "{} score {} for student {} exceeds the maximum of {}",
                    key.as_str(),
                    value,
                    record.student_name,
                    max
                );
            }
            tx.execute(
                "INSERT INTO marks(batch_id, student_id, column_key, value) VALUES(?, ?, ?, ?)
                 ON CONFLICT(batch_id, student_id, column_key)
                 DO UPDATE SET value = excluded.value",
                (batch_id, &record.student_id, key.as_str(), i64::from(value)),
            )?;
        }
    }
    tx.commit().context("failed to commit marks")?;

    let payload = marks_fetch(conn, batch_id)?;
    Ok(payload
        .students
        .unwrap_or_default()
        .iter()
        .map(|s| StudentMarksRecord::from_fetched(batch.language, s))
        .collect())
}

pub fn marks_submit(conn: &Connection, batch_id: &str) -> anyhow::Result<usize> {
    ensure_marks_open(conn, batch_id)?;
    let n = conn.execute(
        "UPDATE students SET marks_status = 'submitted'
         WHERE batch_id = ? AND marks_status NOT IN ('submitted', 'approved')",
        [batch_id],
    )?;
    if n == 0 {
        bail!("batch {} has no students to submit", batch_id);
    }
    Ok(n)
}

pub fn certificate_insert(
    conn: &Connection,
    batch_id: &str,
    student_id: &str,
    base_url: &str,
) -> anyhow::Result<(String, String)> {
    let enrolled: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM students WHERE id = ? AND batch_id = ?",
            (student_id, batch_id),
            |r| r.get(0),
        )
        .optional()?;
    if enrolled.is_none() {
        bail!("student {} is not enrolled in batch {}", student_id, batch_id);
    }
    let id = Uuid::new_v4().to_string();
    let url = format!("{}/{}/{}.pdf", base_url.trim_end_matches('/'), batch_id, id);
    conn.execute(
        "INSERT INTO certificates(id, batch_id, student_id, url, status, generated_at)
         VALUES(?, ?, ?, ?, 'pending', ?)",
        (&id, batch_id, student_id, &url, Utc::now().to_rfc3339()),
    )
    .context("certificate already exists for this student")?;
    Ok((id, url))
}

pub fn certificate_approve(conn: &Connection, certificate_id: &str) -> anyhow::Result<()> {
    let row: Option<(String, String, String)> = conn
        .query_row(
            "SELECT batch_id, student_id, status FROM certificates WHERE id = ?",
            [certificate_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    let Some((batch_id, student_id, status)) = row else {
        bail!("certificate {} not found", certificate_id);
    };
    if CertificateStatus::parse(&status) != CertificateStatus::Pending {
        bail!("certificate {} is not pending", certificate_id);
    }
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE certificates SET status = 'completed', approved_at = ? WHERE id = ?",
        (Utc::now().to_rfc3339(), certificate_id),
    )?;
    tx.execute(
        "UPDATE students SET marks_status = 'approved'
         WHERE id = ? AND batch_id = ? AND marks_status = 'submitted'",
        (&student_id, &batch_id),
    )?;
    tx.commit()?;
    Ok(())
}

pub fn certificate_delete(conn: &Connection, certificate_id: &str) -> anyhow::Result<()> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT batch_id, student_id FROM certificates WHERE id = ?",
            [certificate_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((batch_id, student_id)) = row else {
        bail!("certificate {} not found", certificate_id);
    };
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM certificates WHERE id = ?", [certificate_id])?;
    tx.execute(
        "UPDATE students SET marks_status = 'submitted'
         WHERE id = ? AND batch_id = ? AND marks_status = 'approved'",
        (&student_id, &batch_id),
    )?;
    tx.commit()?;
    Ok(())
}
