use crate::auth;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, now_rfc3339, optional_str, required_str, require_teacher};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn unique_login_code(conn: &Connection) -> Result<String, rusqlite::Error> {
    loop {
        let code = auth::new_login_code();
        let exists: Option<i64> = conn
            .query_row("SELECT 1 FROM users WHERE login_code = ?", [&code], |r| {
                r.get(0)
            })
            .optional()?;
        if exists.is_none() {
            return Ok(code);
        }
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }
    if let Err(e) = require_teacher(conn, &teacher_id) {
        return e.response(&req.id);
    }

    let login_code = match unique_login_code(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO users(id, role, name, login_code, created_by, created_at)
         VALUES(?, 'student', ?, ?, ?, ?)",
        (&student_id, &name, &login_code, &teacher_id, &now_rfc3339()),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "users" })),
        );
    }

    ok(
        &req.id,
        json!({ "studentId": student_id, "name": name, "loginCode": login_code }),
    )
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let rows = if let Some(teacher_id) = optional_str(req, "teacherId") {
        if let Err(e) = require_teacher(conn, &teacher_id) {
            return e.response(&req.id);
        }
        let mut stmt = match conn.prepare(
            "SELECT id, name, login_code, created_at, is_active
             FROM users
             WHERE created_by = ? AND role = 'student'
             ORDER BY name",
        ) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        stmt.query_map([&teacher_id], student_row_json)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    } else {
        let mut stmt = match conn.prepare(
            "SELECT id, name, login_code, created_at, is_active
             FROM users
             WHERE role = 'student' AND is_active = 1
             ORDER BY name",
        ) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        stmt.query_map([], student_row_json)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    };

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn student_row_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let id: String = row.get(0)?;
    let name: String = row.get(1)?;
    let login_code: Option<String> = row.get(2)?;
    let created_at: Option<String> = row.get(3)?;
    let is_active: i64 = row.get(4)?;
    Ok(json!({
        "studentId": id,
        "name": name,
        "loginCode": login_code,
        "createdAt": created_at,
        "isActive": is_active != 0
    }))
}

fn handle_students_deactivate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = require_teacher(conn, &teacher_id) {
        return e.response(&req.id);
    }

    let updated = match conn.execute(
        "UPDATE users SET is_active = 0
         WHERE id = ? AND created_by = ? AND role = 'student'",
        (&student_id, &teacher_id),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };

    if updated == 0 {
        let exists: Option<i64> = match conn
            .query_row(
                "SELECT 1 FROM users WHERE id = ? AND role = 'student'",
                [&student_id],
                |r| r.get(0),
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if exists.is_none() {
            return err(&req.id, "not_found", "student not found", None);
        }
        return err(
            &req.id,
            "forbidden",
            "only the creating teacher may deactivate a student",
            None,
        );
    }

    ok(&req.id, json!({ "studentId": student_id, "isActive": false }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.create" => Some(handle_students_create(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        "students.deactivate" => Some(handle_students_deactivate(state, req)),
        _ => None,
    }
}
