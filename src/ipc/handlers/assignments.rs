use crate::grading::{self, QuestionKind, QuestionSpec};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, now_rfc3339, optional_str, required_str, require_assignment_owner, require_teacher,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension, Transaction};
use serde_json::json;
use uuid::Uuid;

fn parse_question_specs(req: &Request) -> Result<Vec<QuestionSpec>, serde_json::Value> {
    let Some(raw) = req.params.get("questions") else {
        return Err(err(&req.id, "bad_params", "missing questions", None));
    };
    serde_json::from_value::<Vec<QuestionSpec>>(raw.clone())
        .map_err(|e| err(&req.id, "bad_params", format!("questions: {}", e), None))
}

/// Stored encoding for one validated question. `true_false` always persists
/// the canonical pair and a normalized answer; `multiple_choice` keeps the
/// authored choice text so feedback can echo it back verbatim.
fn stored_encoding(spec: &QuestionSpec) -> (Option<String>, Option<String>) {
    match QuestionKind::parse(spec.kind.as_str()) {
        Some(QuestionKind::MultipleChoice) => {
            let choices: Vec<String> = spec
                .choices
                .as_ref()
                .map(|cs| cs.iter().map(|c| c.trim().to_string()).collect())
                .unwrap_or_default();
            let correct = spec
                .correct_answer
                .as_ref()
                .map(|c| c.trim().to_string());
            (serde_json::to_string(&choices).ok(), correct)
        }
        Some(QuestionKind::TrueFalse) => {
            let choices = serde_json::to_string(&grading::TRUE_FALSE_CHOICES).ok();
            let correct = spec
                .correct_answer
                .as_ref()
                .map(|c| grading::normalize_response(c));
            (choices, correct)
        }
        _ => (None, None),
    }
}

fn insert_questions(
    tx: &Transaction<'_>,
    assignment_id: &str,
    specs: &[QuestionSpec],
    first_sort_order: i64,
) -> Result<Vec<String>, rusqlite::Error> {
    let mut ids = Vec::with_capacity(specs.len());
    for (i, spec) in specs.iter().enumerate() {
        let question_id = Uuid::new_v4().to_string();
        let (choices_json, correct_answer) = stored_encoding(spec);
        tx.execute(
            "INSERT INTO questions(id, assignment_id, kind, prompt, choices_json, correct_answer, points, sort_order)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &question_id,
                assignment_id,
                &spec.kind,
                spec.prompt.trim(),
                &choices_json,
                &correct_answer,
                spec.points,
                first_sort_order + i as i64,
            ),
        )?;
        ids.push(question_id);
    }
    Ok(ids)
}

fn has_live_submission(conn: &Connection, assignment_id: &str) -> Result<bool, rusqlite::Error> {
    let row: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM submissions WHERE assignment_id = ? AND status != 'reopened' LIMIT 1",
            [assignment_id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(row.is_some())
}

fn handle_assignments_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let title = match required_str(req, "title") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    if title.is_empty() {
        return err(&req.id, "bad_params", "title must not be empty", None);
    }
    let description = optional_str(req, "description");
    let due_date = optional_str(req, "dueDate");
    let specs = match parse_question_specs(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = require_teacher(conn, &teacher_id) {
        return e.response(&req.id);
    }

    // Nothing persists unless the whole question set is valid.
    if let Err(e) = grading::validate_questions(&specs) {
        return err(&req.id, &e.code, e.message, e.details);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let assignment_id = Uuid::new_v4().to_string();
    if let Err(e) = tx.execute(
        "INSERT INTO assignments(id, teacher_id, title, description, created_at, due_date)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &assignment_id,
            &teacher_id,
            &title,
            &description,
            &now_rfc3339(),
            &due_date,
        ),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "assignments" })),
        );
    }

    let question_ids = match insert_questions(&tx, &assignment_id, &specs, 1) {
        Ok(v) => v,
        Err(e) => {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "questions" })),
            );
        }
    };

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    let total_points: f64 = specs.iter().map(|s| s.points).sum();
    ok(
        &req.id,
        json!({
            "assignmentId": assignment_id,
            "title": title,
            "totalPoints": total_points,
            "questionIds": question_ids
        }),
    )
}

fn handle_assignments_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let assignment_id = match required_str(req, "assignmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let header: Option<(String, String, Option<String>, Option<String>, Option<String>, i64)> =
        match conn
            .query_row(
                "SELECT teacher_id, title, description, created_at, due_date, is_active
                 FROM assignments WHERE id = ?",
                [&assignment_id],
                |r| {
                    Ok((
                        r.get(0)?,
                        r.get(1)?,
                        r.get(2)?,
                        r.get(3)?,
                        r.get(4)?,
                        r.get(5)?,
                    ))
                },
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };

    let Some((teacher_id, title, description, created_at, due_date, is_active)) = header else {
        return err(&req.id, "not_found", "assignment not found", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT id, kind, prompt, choices_json, points, sort_order
         FROM questions
         WHERE assignment_id = ?
         ORDER BY sort_order",
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Correct answers stay server-side; incorrect-answer feedback is the
    // only place they are revealed, and only after submission.
    let questions = stmt
        .query_map([&assignment_id], |r| {
            let id: String = r.get(0)?;
            let kind: String = r.get(1)?;
            let prompt: String = r.get(2)?;
            let choices_json: Option<String> = r.get(3)?;
            let points: f64 = r.get(4)?;
            let sort_order: i64 = r.get(5)?;
            let choices = choices_json
                .as_deref()
                .and_then(|c| serde_json::from_str::<serde_json::Value>(c).ok())
                .unwrap_or(serde_json::Value::Null);
            Ok(json!({
                "questionId": id,
                "kind": kind,
                "prompt": prompt,
                "choices": choices,
                "points": points,
                "sortOrder": sort_order
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    let questions = match questions {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let total_points: f64 = questions
        .iter()
        .filter_map(|q| q.get("points").and_then(|v| v.as_f64()))
        .sum();

    ok(
        &req.id,
        json!({
            "assignmentId": assignment_id,
            "teacherId": teacher_id,
            "title": title,
            "description": description,
            "createdAt": created_at,
            "dueDate": due_date,
            "isActive": is_active != 0,
            "totalPoints": total_points,
            "questions": questions
        }),
    )
}

fn handle_assignments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teacher_filter = optional_str(req, "teacherId");

    // Correlated subqueries keep the summaries join-free.
    let base = "SELECT
                  a.id,
                  a.teacher_id,
                  a.title,
                  a.created_at,
                  a.due_date,
                  a.is_active,
                  u.name AS teacher_name,
                  (SELECT COUNT(*) FROM questions q WHERE q.assignment_id = a.id) AS question_count,
                  (SELECT COALESCE(SUM(q.points), 0) FROM questions q WHERE q.assignment_id = a.id) AS total_points
                FROM assignments a
                JOIN users u ON u.id = a.teacher_id";

    let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<serde_json::Value> {
        let id: String = r.get(0)?;
        let teacher_id: String = r.get(1)?;
        let title: String = r.get(2)?;
        let created_at: Option<String> = r.get(3)?;
        let due_date: Option<String> = r.get(4)?;
        let is_active: i64 = r.get(5)?;
        let teacher_name: String = r.get(6)?;
        let question_count: i64 = r.get(7)?;
        let total_points: f64 = r.get(8)?;
        Ok(json!({
            "assignmentId": id,
            "teacherId": teacher_id,
            "teacherName": teacher_name,
            "title": title,
            "createdAt": created_at,
            "dueDate": due_date,
            "isActive": is_active != 0,
            "questionCount": question_count,
            "totalPoints": total_points
        }))
    };

    let rows = if let Some(teacher_id) = teacher_filter {
        let sql = format!("{} WHERE a.teacher_id = ? ORDER BY a.created_at DESC, a.rowid DESC", base);
        let mut stmt = match conn.prepare(&sql) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        stmt.query_map([&teacher_id], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    } else {
        let sql = format!("{} ORDER BY a.created_at DESC, a.rowid DESC", base);
        let mut stmt = match conn.prepare(&sql) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        stmt.query_map([], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    };

    match rows {
        Ok(assignments) => ok(&req.id, json!({ "assignments": assignments })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_assignments_add_questions(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let assignment_id = match required_str(req, "assignmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let specs = match parse_question_specs(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = require_teacher(conn, &teacher_id) {
        return e.response(&req.id);
    }
    if let Err(e) = require_assignment_owner(conn, &assignment_id, &teacher_id) {
        return e.response(&req.id);
    }
    if let Err(e) = grading::validate_questions(&specs) {
        return err(&req.id, &e.code, e.message, e.details);
    }

    // The frozen-set check and the inserts share one transaction so a
    // submission landing in between cannot slip through.
    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    match has_live_submission(&tx, &assignment_id) {
        Ok(true) => {
            let _ = tx.rollback();
            return err(
                &req.id,
                "immutable_after_submission",
                "question set is frozen once a submission exists",
                Some(json!({ "assignmentId": assignment_id })),
            );
        }
        Ok(false) => {}
        Err(e) => {
            let _ = tx.rollback();
            return err(&req.id, "db_query_failed", e.to_string(), None);
        }
    }

    let next_sort_order: i64 = match tx.query_row(
        "SELECT COALESCE(MAX(sort_order), 0) + 1 FROM questions WHERE assignment_id = ?",
        [&assignment_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => {
            let _ = tx.rollback();
            return err(&req.id, "db_query_failed", e.to_string(), None);
        }
    };

    let question_ids = match insert_questions(&tx, &assignment_id, &specs, next_sort_order) {
        Ok(v) => v,
        Err(e) => {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "questions" })),
            );
        }
    };

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "assignmentId": assignment_id, "questionIds": question_ids }),
    )
}

fn handle_assignments_set_active(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let assignment_id = match required_str(req, "assignmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(active) = req.params.get("active").and_then(|v| v.as_bool()) else {
        return err(&req.id, "bad_params", "missing active", None);
    };
    if let Err(e) = require_teacher(conn, &teacher_id) {
        return e.response(&req.id);
    }
    if let Err(e) = require_assignment_owner(conn, &assignment_id, &teacher_id) {
        return e.response(&req.id);
    }

    if let Err(e) = conn.execute(
        "UPDATE assignments SET is_active = ? WHERE id = ?",
        (active as i64, &assignment_id),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "assignmentId": assignment_id, "isActive": active }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "assignments.create" => Some(handle_assignments_create(state, req)),
        "assignments.get" => Some(handle_assignments_get(state, req)),
        "assignments.list" => Some(handle_assignments_list(state, req)),
        "assignments.addQuestions" => Some(handle_assignments_add_questions(state, req)),
        "assignments.setActive" => Some(handle_assignments_set_active(state, req)),
        _ => None,
    }
}
