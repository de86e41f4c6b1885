mod common;

use common::{open_db, run_cli, temp_dir};

fn student_columns(conn: &rusqlite::Connection) -> Vec<String> {
    let mut stmt = conn
        .prepare("PRAGMA table_info(students)")
        .expect("table_info");
    let cols = stmt
        .query_map([], |r| r.get::<_, String>(1))
        .expect("query columns")
        .collect::<Result<Vec<_>, _>>()
        .expect("columns");
    cols
}

#[test]
fn init_db_adds_updated_at_to_old_students_table() {
    let workspace = temp_dir("attendanced-migrate-updated-at");
    let conn = open_db(&workspace);
    conn.execute(
        "CREATE TABLE students(
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            age_ciphertext BLOB NOT NULL,
            level TEXT NOT NULL,
            price_pence INTEGER NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )
    .expect("create old students table");
    conn.execute(
        "INSERT INTO students(name, age_ciphertext, level, price_pence, created_at)
         VALUES('Old Row', x'00', 'Beginner', 2500, '2023-09-01T00:00:00Z')",
        [],
    )
    .expect("insert old row");
    assert!(!student_columns(&conn).iter().any(|c| c == "updated_at"));
    drop(conn);

    assert!(run_cli(&workspace, "init-db", &[]));
    // Running it again is a no-op.
    assert!(run_cli(&workspace, "init-db", &[]));

    let conn = open_db(&workspace);
    let cols = student_columns(&conn);
    assert_eq!(cols.iter().filter(|c| *c == "updated_at").count(), 1);
    let (name, updated_at): (String, Option<String>) = conn
        .query_row(
            "SELECT name, updated_at FROM students WHERE price_pence = 2500",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .expect("old row kept");
    assert_eq!(name, "Old Row");
    assert!(updated_at.is_none());
    drop(conn);

    let _ = std::fs::remove_dir_all(workspace);
}
