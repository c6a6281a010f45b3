use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("graderd.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            role TEXT NOT NULL CHECK (role IN ('teacher', 'student')),
            username TEXT UNIQUE,
            password_hash TEXT,
            name TEXT NOT NULL,
            login_code TEXT UNIQUE,
            created_by TEXT,
            created_at TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(created_by) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_created_by ON users(created_by)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assignments(
            id TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            created_at TEXT,
            due_date TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(teacher_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assignments_teacher ON assignments(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS questions(
            id TEXT PRIMARY KEY,
            assignment_id TEXT NOT NULL,
            kind TEXT NOT NULL CHECK (kind IN ('multiple_choice', 'true_false', 'subjective')),
            prompt TEXT NOT NULL,
            choices_json TEXT,
            correct_answer TEXT,
            points REAL NOT NULL,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(assignment_id) REFERENCES assignments(id),
            UNIQUE(assignment_id, sort_order)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_questions_assignment ON questions(assignment_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS submissions(
            id TEXT PRIMARY KEY,
            assignment_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            submitted_at TEXT,
            total_score REAL NOT NULL DEFAULT 0,
            status TEXT NOT NULL CHECK (status IN ('fully_graded', 'pending_manual', 'reopened')),
            reopened_at TEXT,
            reopened_by TEXT,
            FOREIGN KEY(assignment_id) REFERENCES assignments(id),
            FOREIGN KEY(student_id) REFERENCES users(id)
        )",
        [],
    )?;
    ensure_submissions_reopen_columns(&conn)?;
    // One live submission per (assignment, student). Reopened rows stay
    // behind as an audit trail and fall outside the index.
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_submissions_live
         ON submissions(assignment_id, student_id) WHERE status != 'reopened'",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_submissions_assignment ON submissions(assignment_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_submissions_student ON submissions(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS answers(
            id TEXT PRIMARY KEY,
            submission_id TEXT NOT NULL,
            question_id TEXT NOT NULL,
            response TEXT NOT NULL,
            is_correct INTEGER,
            awarded_points REAL,
            feedback TEXT,
            FOREIGN KEY(submission_id) REFERENCES submissions(id),
            FOREIGN KEY(question_id) REFERENCES questions(id),
            UNIQUE(submission_id, question_id)
        )",
        [],
    )?;
    ensure_answers_feedback(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_answers_submission ON answers(submission_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_answers_question ON answers(question_id)",
        [],
    )?;

    Ok(conn)
}

// Early workspaces predate the reopen feature. Add and leave NULL.
fn ensure_submissions_reopen_columns(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "submissions", "reopened_at")? {
        conn.execute("ALTER TABLE submissions ADD COLUMN reopened_at TEXT", [])?;
    }
    if !table_has_column(conn, "submissions", "reopened_by")? {
        conn.execute("ALTER TABLE submissions ADD COLUMN reopened_by TEXT", [])?;
    }
    Ok(())
}

fn ensure_answers_feedback(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "answers", "feedback")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE answers ADD COLUMN feedback TEXT", [])?;
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
