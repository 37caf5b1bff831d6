use crate::calc::CalcError;
use crate::taxonomy::normalize_key;
use rusqlite::{Connection, ErrorCode, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreEntry {
    pub student_id: i64,
    pub subject: String,
    pub work_key: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRecord {
    pub id: i64,
    pub full_name: String,
    pub group_label: String,
}

/// Keyed record store of `(student, subject, workKey) -> value`.
///
/// Every call is a self-contained round trip; nothing here spans calls.
/// Subjects and keys are normalized before they are used as keys.
pub trait ScoreStore {
    fn list_entries(&self, student_id: i64) -> Result<Vec<ScoreEntry>, CalcError>;
    fn list_subject_entries(
        &self,
        student_id: i64,
        subject: &str,
    ) -> Result<Vec<ScoreEntry>, CalcError>;
    /// Distinct and sorted.
    fn list_subjects(&self, student_id: i64) -> Result<Vec<String>, CalcError>;
    /// Insert-or-update on the normalized triple.
    fn upsert(
        &self,
        student_id: i64,
        subject: &str,
        work_key: &str,
        value: f64,
    ) -> Result<(), CalcError>;
    fn list_all_entries(&self) -> Result<Vec<ScoreEntry>, CalcError>;
}

/// Student identity and group membership, owned elsewhere.
pub trait StudentDirectory {
    /// Enumeration order is ascending id; rankings break ties on it.
    fn list_students(&self) -> Result<Vec<StudentRecord>, CalcError>;
    fn find_student(&self, id: i64) -> Result<Option<StudentRecord>, CalcError>;
    fn list_groups(&self) -> Result<Vec<String>, CalcError>;
    fn students_in_group(&self, group_label: &str) -> Result<Vec<StudentRecord>, CalcError>;
}

fn query_err(e: rusqlite::Error) -> CalcError {
    CalcError::new("db_query_failed", e.to_string())
}

fn score_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<ScoreEntry> {
    Ok(ScoreEntry {
        student_id: r.get(0)?,
        subject: r.get::<_, Option<String>>(1)?.unwrap_or_default(),
        work_key: r.get::<_, Option<String>>(2)?.unwrap_or_default(),
        value: r.get(3)?,
    })
}

fn student_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<StudentRecord> {
    Ok(StudentRecord {
        id: r.get(0)?,
        full_name: r.get(1)?,
        group_label: r.get(2)?,
    })
}

impl ScoreStore for Connection {
    fn list_entries(&self, student_id: i64) -> Result<Vec<ScoreEntry>, CalcError> {
        let mut stmt = self
            .prepare(
                "SELECT student_id, subject, work_key, value
                 FROM scores
                 WHERE student_id = ?
                 ORDER BY subject, work_key",
            )
            .map_err(query_err)?;
        stmt.query_map([student_id], score_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(query_err)
    }

    fn list_subject_entries(
        &self,
        student_id: i64,
        subject: &str,
    ) -> Result<Vec<ScoreEntry>, CalcError> {
        let subject = normalize_key(subject);
        let mut stmt = self
            .prepare(
                "SELECT student_id, subject, work_key, value
                 FROM scores
                 WHERE student_id = ? AND subject = ?
                 ORDER BY work_key",
            )
            .map_err(query_err)?;
        stmt.query_map((student_id, &subject), score_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(query_err)
    }

    fn list_subjects(&self, student_id: i64) -> Result<Vec<String>, CalcError> {
        let mut stmt = self
            .prepare(
                "SELECT DISTINCT subject
                 FROM scores
                 WHERE student_id = ?
                 ORDER BY subject",
            )
            .map_err(query_err)?;
        stmt.query_map([student_id], |r| r.get::<_, String>(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(query_err)
    }

    fn upsert(
        &self,
        student_id: i64,
        subject: &str,
        work_key: &str,
        value: f64,
    ) -> Result<(), CalcError> {
        let subject = normalize_key(subject);
        let work_key = normalize_key(work_key);
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        self.execute(
            "INSERT INTO scores(id, student_id, subject, work_key, value, updated_at)
             VALUES(?, ?, ?, ?, ?, ?)
             ON CONFLICT(student_id, subject, work_key) DO UPDATE SET
               value = excluded.value,
               updated_at = excluded.updated_at",
            (&id, student_id, &subject, &work_key, value, &now),
        )
        .map_err(|e| {
            CalcError::new("db_insert_failed", e.to_string())
                .with_details(serde_json::json!({ "table": "scores" }))
        })?;
        Ok(())
    }

    fn list_all_entries(&self) -> Result<Vec<ScoreEntry>, CalcError> {
        let mut stmt = self
            .prepare(
                "SELECT student_id, subject, work_key, value
                 FROM scores
                 ORDER BY student_id, subject, work_key",
            )
            .map_err(query_err)?;
        stmt.query_map([], score_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(query_err)
    }
}

impl StudentDirectory for Connection {
    fn list_students(&self) -> Result<Vec<StudentRecord>, CalcError> {
        let mut stmt = self
            .prepare("SELECT id, full_name, group_label FROM students ORDER BY id")
            .map_err(query_err)?;
        stmt.query_map([], student_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(query_err)
    }

    fn find_student(&self, id: i64) -> Result<Option<StudentRecord>, CalcError> {
        self.query_row(
            "SELECT id, full_name, group_label FROM students WHERE id = ?",
            [id],
            student_row,
        )
        .optional()
        .map_err(query_err)
    }

    fn list_groups(&self) -> Result<Vec<String>, CalcError> {
        let mut stmt = self
            .prepare("SELECT DISTINCT group_label FROM students ORDER BY group_label")
            .map_err(query_err)?;
        stmt.query_map([], |r| r.get::<_, String>(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(query_err)
    }

    fn students_in_group(&self, group_label: &str) -> Result<Vec<StudentRecord>, CalcError> {
        let mut stmt = self
            .prepare(
                "SELECT id, full_name, group_label
                 FROM students
                 WHERE group_label = ?
                 ORDER BY id",
            )
            .map_err(query_err)?;
        stmt.query_map([group_label], student_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(query_err)
    }
}

/// Registers a student supplied by the directory. A colliding id surfaces as
/// `duplicate_identity` without the storage error text.
pub fn create_student(
    conn: &Connection,
    id: Option<i64>,
    full_name: &str,
    group_label: &str,
) -> Result<StudentRecord, CalcError> {
    let full_name = full_name.trim();
    let group_label = group_label.trim();
    let inserted = conn.execute(
        "INSERT INTO students(id, full_name, group_label) VALUES(?, ?, ?)",
        (id, full_name, group_label),
    );
    match inserted {
        Ok(_) => {}
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
            return Err(CalcError::new(
                "duplicate_identity",
                "a student with this identity already exists",
            )
            .with_details(serde_json::json!({ "id": id })));
        }
        Err(e) => {
            return Err(CalcError::new("db_insert_failed", e.to_string())
                .with_details(serde_json::json!({ "table": "students" })));
        }
    }
    Ok(StudentRecord {
        id: id.unwrap_or_else(|| conn.last_insert_rowid()),
        full_name: full_name.to_string(),
        group_label: group_label.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::init_schema(&conn).expect("init schema");
        conn
    }

    #[test]
    fn upsert_updates_the_same_normalized_triple() {
        let conn = conn();
        conn.upsert(1, "Math", "week1_lab", 50.0).expect("insert");
        conn.upsert(1, " Math\u{00A0}", "week1_lab ", 70.0)
            .expect("update");
        let entries = conn.list_subject_entries(1, "Math").expect("list");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].value, 70.0);
    }

    #[test]
    fn subjects_are_distinct_and_sorted() {
        let conn = conn();
        conn.upsert(1, "Physics", "rk1", 10.0).expect("upsert");
        conn.upsert(1, "Math", "rk1", 10.0).expect("upsert");
        conn.upsert(1, "Math", "rk2", 10.0).expect("upsert");
        conn.upsert(2, "Biology", "rk1", 10.0).expect("upsert");
        assert_eq!(
            conn.list_subjects(1).expect("subjects"),
            vec!["Math".to_string(), "Physics".to_string()]
        );
        assert!(conn.list_subjects(3).expect("subjects").is_empty());
        assert_eq!(conn.list_entries(1).expect("entries").len(), 3);
        assert_eq!(conn.list_all_entries().expect("all").len(), 4);
    }

    #[test]
    fn duplicate_student_id_is_reported_without_storage_detail() {
        let conn = conn();
        create_student(&conn, Some(7), "Ada Lovelace", "CS-1").expect("create");
        let err = create_student(&conn, Some(7), "Someone Else", "CS-2")
            .expect_err("duplicate must fail");
        assert_eq!(err.code, "duplicate_identity");
        assert!(!err.message.to_ascii_lowercase().contains("unique"));
    }

    #[test]
    fn directory_groups_and_members() {
        let conn = conn();
        let a = create_student(&conn, None, "A", "G2").expect("create");
        create_student(&conn, None, "B", "G1").expect("create");
        create_student(&conn, None, "C", "G2").expect("create");
        assert_eq!(
            conn.list_groups().expect("groups"),
            vec!["G1".to_string(), "G2".to_string()]
        );
        let g2 = conn.students_in_group("G2").expect("members");
        assert_eq!(g2.len(), 2);
        assert_eq!(g2[0].id, a.id);
        assert_eq!(conn.find_student(a.id).expect("find"), Some(a));
        assert_eq!(conn.find_student(999).expect("find"), None);
    }
}
