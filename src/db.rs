use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE_NAME: &str = "scorebook.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

/// Idempotent: safe on a fresh database and on every reopen.
pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id INTEGER PRIMARY KEY,
            full_name TEXT NOT NULL,
            group_label TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_group ON students(group_label)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS scores(
            id TEXT PRIMARY KEY,
            student_id INTEGER NOT NULL,
            subject TEXT NOT NULL,
            work_key TEXT NOT NULL,
            value REAL NOT NULL,
            UNIQUE(student_id, subject, work_key)
        )",
        [],
    )?;
    ensure_scores_updated_at(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_scores_student ON scores(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_scores_student_subject ON scores(student_id, subject)",
        [],
    )?;

    Ok(())
}

fn ensure_scores_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "scores", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE scores ADD COLUMN updated_at TEXT", [])?;
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
