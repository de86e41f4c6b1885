use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use std::path::{Path, PathBuf};

pub const DB_FILE_NAME: &str = "attendance.sqlite3";

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub is_active: bool,
}

pub fn db_path(workspace: &Path) -> PathBuf {
    workspace.join(DB_FILE_NAME)
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace.to_string_lossy()
        )
    })?;
    let conn = Connection::open(db_path(workspace))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id INTEGER PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions(
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL,
            device_name TEXT NOT NULL,
            token_hash TEXT NOT NULL UNIQUE,
            ip_address TEXT,
            user_agent TEXT,
            created_at TEXT NOT NULL,
            last_seen TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            age_ciphertext BLOB NOT NULL,
            level TEXT NOT NULL,
            price_pence INTEGER NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    // Workspaces created before edits were tracked have no updated_at column.
    ensure_students_updated_at(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_name ON students(name)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            id INTEGER PRIMARY KEY,
            student_id INTEGER NOT NULL,
            date TEXT NOT NULL,
            marked_by_user_id INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(marked_by_user_id) REFERENCES users(id),
            UNIQUE(student_id, date)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_date ON attendance(date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_student ON attendance(student_id)",
        [],
    )?;

    Ok(conn)
}

fn ensure_students_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE students ADD COLUMN updated_at TEXT", [])?;
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

pub fn find_user_by_username(
    conn: &Connection,
    username: &str,
) -> rusqlite::Result<Option<UserRow>> {
    conn.query_row(
        "SELECT id, username, email, password_hash, is_active
         FROM users
         WHERE username = ?",
        [username],
        |r| {
            Ok(UserRow {
                id: r.get(0)?,
                username: r.get(1)?,
                email: r.get(2)?,
                password_hash: r.get(3)?,
                is_active: r.get::<_, i64>(4)? != 0,
            })
        },
    )
    .optional()
}

pub fn create_user(
    conn: &Connection,
    username: &str,
    email: &str,
    password_hash: &str,
) -> anyhow::Result<i64> {
    let username = username.trim();
    let email = email.trim();
    if username.is_empty() || email.is_empty() {
        anyhow::bail!("username and email must not be empty");
    }
    if find_user_by_username(conn, username)?.is_some() {
        anyhow::bail!("user '{}' already exists", username);
    }
    conn.execute(
        "INSERT INTO users(username, email, password_hash, is_active, created_at)
         VALUES(?, ?, ?, 1, ?)",
        (username, email, password_hash, now_rfc3339()),
    )
    .with_context(|| format!("failed to insert user '{}'", username))?;
    Ok(conn.last_insert_rowid())
}

pub fn set_user_password(
    conn: &Connection,
    username: &str,
    password_hash: &str,
) -> anyhow::Result<()> {
    let changed = conn.execute(
        "UPDATE users SET password_hash = ? WHERE username = ?",
        (password_hash, username),
    )?;
    if changed == 0 {
        anyhow::bail!("user '{}' not found", username);
    }
    Ok(())
}
