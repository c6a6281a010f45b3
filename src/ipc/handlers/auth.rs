use crate::auth;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, now_rfc3339, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_setup_create_teacher(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    let username = match required_str(req, "username") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    let password = match required_str(req, "password") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if name.is_empty() || username.is_empty() || password.is_empty() {
        return err(
            &req.id,
            "bad_params",
            "name, username and password must not be empty",
            None,
        );
    }

    let taken: Option<i64> = match conn
        .query_row("SELECT 1 FROM users WHERE username = ?", [&username], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if taken.is_some() {
        return err(
            &req.id,
            "validation_failed",
            "username already taken",
            Some(json!({ "field": "username" })),
        );
    }

    let user_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO users(id, role, username, password_hash, name, created_at)
         VALUES(?, 'teacher', ?, ?, ?, ?)",
        (
            &user_id,
            &username,
            &auth::hash_password(&password),
            &name,
            &now_rfc3339(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "users" })),
        );
    }

    ok(&req.id, json!({ "userId": user_id, "role": "teacher", "name": name }))
}

fn handle_teacher_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let username = match required_str(req, "username") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    let password = match required_str(req, "password") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let row: Option<(String, String, Option<String>)> = match conn
        .query_row(
            "SELECT id, name, password_hash
             FROM users
             WHERE username = ? AND role = 'teacher' AND is_active = 1",
            [&username],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Same failure for unknown username and wrong password.
    let Some((user_id, name, Some(hash))) = row else {
        return err(&req.id, "invalid_credentials", "invalid username or password", None);
    };
    if !auth::verify_password(&password, &hash) {
        return err(&req.id, "invalid_credentials", "invalid username or password", None);
    }

    ok(&req.id, json!({ "userId": user_id, "role": "teacher", "name": name }))
}

fn handle_student_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    let login_code = match required_str(req, "loginCode") {
        Ok(v) => v.trim().to_ascii_uppercase(),
        Err(e) => return e,
    };

    let row: Option<(String, String)> = match conn
        .query_row(
            "SELECT id, name
             FROM users
             WHERE LOWER(name) = LOWER(?) AND login_code = ? AND role = 'student' AND is_active = 1",
            [&name, &login_code],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let Some((user_id, name)) = row else {
        return err(&req.id, "invalid_credentials", "invalid name or login code", None);
    };

    ok(&req.id, json!({ "userId": user_id, "role": "student", "name": name }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.createTeacher" => Some(handle_setup_create_teacher(state, req)),
        "auth.teacherLogin" => Some(handle_teacher_login(state, req)),
        "auth.studentLogin" => Some(handle_student_login(state, req)),
        _ => None,
    }
}
