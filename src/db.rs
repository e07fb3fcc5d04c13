use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE: &str = "examd.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.to_string_lossy()))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_offerings(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            cds_code TEXT NOT NULL,
            curriculum_code TEXT NOT NULL,
            academic_year INTEGER NOT NULL,
            year_of_study INTEGER NOT NULL,
            semester INTEGER NOT NULL,
            master_course_code TEXT,
            master_cds_code TEXT,
            master_curriculum_code TEXT,
            FOREIGN KEY(course_id) REFERENCES courses(id),
            UNIQUE(course_id, cds_code, curriculum_code, academic_year)
        )",
        [],
    )?;
    // Workspaces created before the compliance dashboard have no counter column.
    ensure_offerings_overlap_count(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_offerings_context
         ON course_offerings(cds_code, academic_year, year_of_study)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teaching_assignments(
            course_id TEXT NOT NULL,
            teacher TEXT NOT NULL,
            academic_year INTEGER NOT NULL,
            PRIMARY KEY(course_id, teacher, academic_year),
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS rooms(
            code TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            capacity INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions(
            cds_code TEXT NOT NULL,
            curriculum_code TEXT NOT NULL,
            academic_year INTEGER NOT NULL,
            kind TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            PRIMARY KEY(cds_code, curriculum_code, academic_year, kind)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS room_bookings(
            id TEXT PRIMARY KEY,
            exam_date TEXT NOT NULL,
            room TEXT NOT NULL,
            period TEXT NOT NULL,
            submission_id TEXT NOT NULL,
            UNIQUE(exam_date, room, period)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exams(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            cds_code TEXT NOT NULL,
            curriculum_code TEXT NOT NULL,
            academic_year INTEGER NOT NULL,
            exam_date TEXT NOT NULL,
            start_time TEXT NOT NULL,
            duration_minutes INTEGER NOT NULL,
            room TEXT NOT NULL,
            period TEXT NOT NULL,
            visible INTEGER NOT NULL DEFAULT 1,
            exam_type TEXT,
            teacher TEXT NOT NULL,
            session_kind TEXT,
            notes TEXT,
            booking_id TEXT,
            submission_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(booking_id) REFERENCES room_bookings(id)
        )",
        [],
    )?;
    ensure_exams_registration_columns(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exams_course ON exams(course_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exams_cds_date ON exams(cds_code, exam_date)",
        [],
    )?;

    Ok(())
}

fn ensure_offerings_overlap_count(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "course_offerings", "overlap_count")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE course_offerings ADD COLUMN overlap_count INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    Ok(())
}

fn ensure_exams_registration_columns(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "exams", "registration_start")? {
        conn.execute("ALTER TABLE exams ADD COLUMN registration_start TEXT", [])?;
    }
    if !table_has_column(conn, "exams", "registration_end")? {
        conn.execute("ALTER TABLE exams ADD COLUMN registration_end TEXT", [])?;
    }
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
        Some(text) => Ok(Some(
            serde_json::from_str(&text)
                .with_context(|| format!("malformed settings value for {}", key))?,
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
