use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(
        code: &'static str,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .filter(|v| !v.trim().is_empty())
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Role gate: the acting user must exist, be active, and hold `role`.
/// Unknown ids are `not_found`; mismatches and deactivated users are
/// `forbidden`.
fn require_role(conn: &Connection, user_id: &str, role: &str) -> Result<(), HandlerErr> {
    let row: Option<(String, i64)> = conn
        .query_row(
            "SELECT role, is_active FROM users WHERE id = ?",
            [user_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    let Some((actual_role, is_active)) = row else {
        return Err(HandlerErr::with_details(
            "not_found",
            "user not found",
            json!({ "userId": user_id }),
        ));
    };
    if is_active == 0 || actual_role != role {
        return Err(HandlerErr::with_details(
            "forbidden",
            format!("operation requires an active {}", role),
            json!({ "userId": user_id }),
        ));
    }
    Ok(())
}

pub fn require_teacher(conn: &Connection, user_id: &str) -> Result<(), HandlerErr> {
    require_role(conn, user_id, "teacher")
}

pub fn require_student(conn: &Connection, user_id: &str) -> Result<(), HandlerErr> {
    require_role(conn, user_id, "student")
}

/// Ownership guard: the assignment must exist and belong to `teacher_id`.
/// Returns the assignment's title for payload reuse.
pub fn require_assignment_owner(
    conn: &Connection,
    assignment_id: &str,
    teacher_id: &str,
) -> Result<String, HandlerErr> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT teacher_id, title FROM assignments WHERE id = ?",
            [assignment_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    let Some((owner, title)) = row else {
        return Err(HandlerErr::with_details(
            "not_found",
            "assignment not found",
            json!({ "assignmentId": assignment_id }),
        ));
    };
    if owner != teacher_id {
        return Err(HandlerErr::with_details(
            "forbidden",
            "assignment is owned by another teacher",
            json!({ "assignmentId": assignment_id }),
        ));
    }
    Ok(title)
}
