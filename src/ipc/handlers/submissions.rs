use crate::grading::{self, GradingStatus, QuestionKind};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, now_rfc3339, optional_str, required_str, require_assignment_owner, require_student,
    require_teacher,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct QuestionRow {
    id: String,
    kind: QuestionKind,
    correct_answer: Option<String>,
    points: f64,
}

fn load_questions(conn: &Connection, assignment_id: &str) -> Result<Vec<QuestionRow>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT id, kind, correct_answer, points
         FROM questions
         WHERE assignment_id = ?
         ORDER BY sort_order",
    )?;
    let rows = stmt.query_map([assignment_id], |r| {
        let id: String = r.get(0)?;
        let kind_raw: String = r.get(1)?;
        let correct_answer: Option<String> = r.get(2)?;
        let points: f64 = r.get(3)?;
        Ok((id, kind_raw, correct_answer, points))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (id, kind_raw, correct_answer, points) = row?;
        let Some(kind) = QuestionKind::parse(&kind_raw) else {
            // CHECK constraint makes this unreachable; skip rather than poison the scan.
            continue;
        };
        out.push(QuestionRow {
            id,
            kind,
            correct_answer,
            points,
        });
    }
    Ok(out)
}

fn parse_answers(req: &Request) -> Result<HashMap<String, String>, serde_json::Value> {
    let Some(raw) = req.params.get("answers").and_then(|v| v.as_object()) else {
        return Err(err(&req.id, "bad_params", "missing answers object", None));
    };
    let mut out = HashMap::with_capacity(raw.len());
    for (question_id, value) in raw {
        let Some(response) = value.as_str() else {
            return Err(err(
                &req.id,
                "bad_params",
                "answers values must be strings",
                Some(json!({ "questionId": question_id })),
            ));
        };
        out.insert(question_id.clone(), response.to_string());
    }
    Ok(out)
}

fn handle_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let assignment_id = match required_str(req, "assignmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let answers = match parse_answers(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = require_student(conn, &student_id) {
        return e.response(&req.id);
    }

    let assignment: Option<i64> = match conn
        .query_row(
            "SELECT is_active FROM assignments WHERE id = ?",
            [&assignment_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(is_active) = assignment else {
        return err(&req.id, "not_found", "assignment not found", None);
    };
    if is_active == 0 {
        return err(
            &req.id,
            "validation_failed",
            "assignment is closed for submission",
            Some(json!({ "assignmentId": assignment_id })),
        );
    }

    let questions = match load_questions(conn, &assignment_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if questions.is_empty() {
        return err(
            &req.id,
            "validation_failed",
            "assignment has no questions",
            Some(json!({ "assignmentId": assignment_id })),
        );
    }

    // Answer keys must be a subset of the assignment's question ids;
    // unanswered questions become explicit empty responses further down.
    let known: std::collections::HashSet<&str> = questions.iter().map(|q| q.id.as_str()).collect();
    let unknown: Vec<&String> = answers.keys().filter(|k| !known.contains(k.as_str())).collect();
    if !unknown.is_empty() {
        return err(
            &req.id,
            "validation_failed",
            "answers reference questions outside this assignment",
            Some(json!({ "unknownQuestionIds": unknown })),
        );
    }

    // Duplicate check and all inserts live in one transaction; the partial
    // unique index on live submissions backstops the check.
    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let existing: Option<String> = match tx
        .query_row(
            "SELECT id FROM submissions
             WHERE assignment_id = ? AND student_id = ? AND status != 'reopened'",
            (&assignment_id, &student_id),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => {
            let _ = tx.rollback();
            return err(&req.id, "db_query_failed", e.to_string(), None);
        }
    };
    if let Some(prior) = existing {
        let _ = tx.rollback();
        return err(
            &req.id,
            "duplicate_submission",
            "student already submitted this assignment",
            Some(json!({ "submissionId": prior })),
        );
    }

    let has_subjective = questions.iter().any(|q| q.kind == QuestionKind::Subjective);
    let status = grading::initial_status(has_subjective);
    let submission_id = Uuid::new_v4().to_string();
    let submitted_at = now_rfc3339();

    let mut total_score = 0.0_f64;
    let mut max_objective = 0.0_f64;
    let mut per_question = Vec::with_capacity(questions.len());
    let mut answer_rows = Vec::with_capacity(questions.len());

    for q in &questions {
        let response = answers.get(&q.id).cloned().unwrap_or_default();
        match q.kind {
            QuestionKind::MultipleChoice | QuestionKind::TrueFalse => {
                max_objective += q.points;
                let correct = q.correct_answer.as_deref().unwrap_or_default();
                let outcome = grading::score_objective(correct, &response, q.points);
                total_score += outcome.awarded_points;
                per_question.push(json!({
                    "questionId": q.id,
                    "kind": q.kind.as_str(),
                    "points": q.points,
                    "response": response,
                    "isCorrect": outcome.is_correct,
                    "awardedPoints": outcome.awarded_points,
                    "feedback": outcome.feedback
                }));
                answer_rows.push((
                    q.id.clone(),
                    response,
                    Some(outcome.is_correct as i64),
                    Some(outcome.awarded_points),
                    outcome.feedback,
                ));
            }
            QuestionKind::Subjective => {
                per_question.push(json!({
                    "questionId": q.id,
                    "kind": q.kind.as_str(),
                    "points": q.points,
                    "response": response,
                    "isCorrect": serde_json::Value::Null,
                    "awardedPoints": serde_json::Value::Null,
                    "feedback": grading::pending_feedback()
                }));
                answer_rows.push((
                    q.id.clone(),
                    response,
                    None,
                    None,
                    grading::pending_feedback().to_string(),
                ));
            }
        }
    }

    if let Err(e) = tx.execute(
        "INSERT INTO submissions(id, assignment_id, student_id, submitted_at, total_score, status)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &submission_id,
            &assignment_id,
            &student_id,
            &submitted_at,
            total_score,
            status.as_str(),
        ),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "submissions" })),
        );
    }

    for (question_id, response, is_correct, awarded, feedback) in &answer_rows {
        let answer_id = Uuid::new_v4().to_string();
        if let Err(e) = tx.execute(
            "INSERT INTO answers(id, submission_id, question_id, response, is_correct, awarded_points, feedback)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (
                &answer_id,
                &submission_id,
                question_id,
                response,
                is_correct,
                awarded,
                feedback,
            ),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "answers" })),
            );
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    let max_score: f64 = questions.iter().map(|q| q.points).sum();
    ok(
        &req.id,
        json!({
            "submissionId": submission_id,
            "assignmentId": assignment_id,
            "studentId": student_id,
            "submittedAt": submitted_at,
            "totalScore": total_score,
            "maxObjectiveScore": max_objective,
            "maxScore": max_score,
            "status": status.as_str(),
            "perQuestion": per_question
        }),
    )
}

fn handle_grade_subjective(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let submission_id = match required_str(req, "submissionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let question_id = match required_str(req, "questionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(awarded_points) = req.params.get("awardedPoints").and_then(|v| v.as_f64()) else {
        return err(&req.id, "bad_params", "missing awardedPoints", None);
    };
    let feedback = optional_str(req, "feedback");
    if let Err(e) = require_teacher(conn, &teacher_id) {
        return e.response(&req.id);
    }

    let header: Option<(String, String, String)> = match conn
        .query_row(
            "SELECT s.assignment_id, s.status, a.teacher_id
             FROM submissions s
             JOIN assignments a ON a.id = s.assignment_id
             WHERE s.id = ?",
            [&submission_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((_assignment_id, status, owner)) = header else {
        return err(&req.id, "not_found", "submission not found", None);
    };
    if owner != teacher_id {
        return err(
            &req.id,
            "forbidden",
            "submission belongs to another teacher's assignment",
            None,
        );
    }
    if status == GradingStatus::Reopened.as_str() {
        return err(
            &req.id,
            "validation_failed",
            "reopened submissions cannot be graded",
            Some(json!({ "submissionId": submission_id })),
        );
    }

    let answer: Option<(String, String, f64)> = match conn
        .query_row(
            "SELECT ans.id, q.kind, q.points
             FROM answers ans
             JOIN questions q ON q.id = ans.question_id
             WHERE ans.submission_id = ? AND ans.question_id = ?",
            (&submission_id, &question_id),
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((answer_id, kind, points)) = answer else {
        return err(&req.id, "not_found", "answer not found for question", None);
    };
    if kind != QuestionKind::Subjective.as_str() {
        return err(
            &req.id,
            "forbidden",
            "only subjective answers are graded manually",
            Some(json!({ "questionId": question_id, "kind": kind })),
        );
    }
    if !awarded_points.is_finite() || awarded_points < 0.0 || awarded_points > points {
        return err(
            &req.id,
            "validation_failed",
            format!("awardedPoints must be between 0 and {}", points),
            Some(json!({ "awardedPoints": awarded_points, "maxPoints": points })),
        );
    }

    // Answer update, total recompute and status flip commit together.
    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Full credit counts as correct; partial credit stays incorrect.
    let is_correct = (awarded_points >= points) as i64;
    if let Err(e) = tx.execute(
        "UPDATE answers
         SET awarded_points = ?, is_correct = ?, feedback = COALESCE(?, feedback)
         WHERE id = ?",
        (awarded_points, is_correct, &feedback, &answer_id),
    ) {
        let _ = tx.rollback();
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    let total_score: f64 = match tx.query_row(
        "SELECT COALESCE(SUM(awarded_points), 0) FROM answers WHERE submission_id = ?",
        [&submission_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => {
            let _ = tx.rollback();
            return err(&req.id, "db_query_failed", e.to_string(), None);
        }
    };

    let ungraded: i64 = match tx.query_row(
        "SELECT COUNT(*)
         FROM answers ans
         JOIN questions q ON q.id = ans.question_id
         WHERE ans.submission_id = ? AND q.kind = 'subjective' AND ans.awarded_points IS NULL",
        [&submission_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => {
            let _ = tx.rollback();
            return err(&req.id, "db_query_failed", e.to_string(), None);
        }
    };

    let new_status = if ungraded == 0 {
        GradingStatus::FullyGraded
    } else {
        GradingStatus::PendingManual
    };
    if let Err(e) = tx.execute(
        "UPDATE submissions SET total_score = ?, status = ? WHERE id = ?",
        (total_score, new_status.as_str(), &submission_id),
    ) {
        let _ = tx.rollback();
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "submissionId": submission_id,
            "questionId": question_id,
            "awardedPoints": awarded_points,
            "isCorrect": is_correct != 0,
            "totalScore": total_score,
            "status": new_status.as_str(),
            "remainingUngraded": ungraded
        }),
    )
}

fn handle_submissions_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let submission_id = match required_str(req, "submissionId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let header = match conn
        .query_row(
            "SELECT s.assignment_id, s.student_id, s.submitted_at, s.total_score, s.status,
                    s.reopened_at, s.reopened_by, a.title, u.name,
                    (SELECT COALESCE(SUM(points), 0) FROM questions WHERE assignment_id = s.assignment_id)
             FROM submissions s
             JOIN assignments a ON a.id = s.assignment_id
             JOIN users u ON u.id = s.student_id
             WHERE s.id = ?",
            [&submission_id],
            |r| {
                Ok(json!({
                    "submissionId": submission_id,
                    "assignmentId": r.get::<_, String>(0)?,
                    "studentId": r.get::<_, String>(1)?,
                    "submittedAt": r.get::<_, Option<String>>(2)?,
                    "totalScore": r.get::<_, f64>(3)?,
                    "status": r.get::<_, String>(4)?,
                    "reopenedAt": r.get::<_, Option<String>>(5)?,
                    "reopenedBy": r.get::<_, Option<String>>(6)?,
                    "assignmentTitle": r.get::<_, String>(7)?,
                    "studentName": r.get::<_, String>(8)?,
                    "maxScore": r.get::<_, f64>(9)?
                }))
            },
        )
        .optional()
    {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "submission not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut stmt = match conn.prepare(
        "SELECT ans.question_id, q.prompt, q.kind, q.points, ans.response,
                ans.is_correct, ans.awarded_points, ans.feedback
         FROM answers ans
         JOIN questions q ON q.id = ans.question_id
         WHERE ans.submission_id = ?
         ORDER BY q.sort_order",
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let answers = stmt
        .query_map([&submission_id], |r| {
            let is_correct: Option<i64> = r.get(5)?;
            Ok(json!({
                "questionId": r.get::<_, String>(0)?,
                "prompt": r.get::<_, String>(1)?,
                "kind": r.get::<_, String>(2)?,
                "points": r.get::<_, f64>(3)?,
                "response": r.get::<_, String>(4)?,
                "isCorrect": is_correct.map(|v| v != 0),
                "awardedPoints": r.get::<_, Option<f64>>(6)?,
                "feedback": r.get::<_, Option<String>>(7)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match answers {
        Ok(answers) => {
            let mut payload = header;
            payload["answers"] = json!(answers);
            ok(&req.id, payload)
        }
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_list_for_assignment(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    if let Err(e) = require_teacher(conn, &teacher_id) {
        return e.response(&req.id);
    }
    if let Err(e) = require_assignment_owner(conn, &assignment_id, &teacher_id) {
        return e.response(&req.id);
    }

    let mut stmt = match conn.prepare(
        "SELECT s.id, s.student_id, u.name, s.submitted_at, s.total_score, s.status
         FROM submissions s
         JOIN users u ON u.id = s.student_id
         WHERE s.assignment_id = ? AND s.status != 'reopened'
         ORDER BY s.submitted_at, s.rowid",
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&assignment_id], |r| {
            Ok(json!({
                "submissionId": r.get::<_, String>(0)?,
                "studentId": r.get::<_, String>(1)?,
                "studentName": r.get::<_, String>(2)?,
                "submittedAt": r.get::<_, Option<String>>(3)?,
                "totalScore": r.get::<_, f64>(4)?,
                "status": r.get::<_, String>(5)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(submissions) => ok(&req.id, json!({ "submissions": submissions })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_list_for_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = require_student(conn, &student_id) {
        return e.response(&req.id);
    }

    let mut stmt = match conn.prepare(
        "SELECT s.id, s.assignment_id, a.title, t.name, s.submitted_at, s.total_score, s.status,
                (SELECT COALESCE(SUM(points), 0) FROM questions WHERE assignment_id = s.assignment_id)
         FROM submissions s
         JOIN assignments a ON a.id = s.assignment_id
         JOIN users t ON t.id = a.teacher_id
         WHERE s.student_id = ? AND s.status != 'reopened'
         ORDER BY s.submitted_at DESC, s.rowid DESC",
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&student_id], |r| {
            Ok(json!({
                "submissionId": r.get::<_, String>(0)?,
                "assignmentId": r.get::<_, String>(1)?,
                "assignmentTitle": r.get::<_, String>(2)?,
                "teacherName": r.get::<_, String>(3)?,
                "submittedAt": r.get::<_, Option<String>>(4)?,
                "totalScore": r.get::<_, f64>(5)?,
                "status": r.get::<_, String>(6)?,
                "maxScore": r.get::<_, f64>(7)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(submissions) => ok(&req.id, json!({ "submissions": submissions })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_reopen(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let submission_id = match required_str(req, "submissionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = require_teacher(conn, &teacher_id) {
        return e.response(&req.id);
    }

    let header: Option<(String, String)> = match conn
        .query_row(
            "SELECT s.status, a.teacher_id
             FROM submissions s
             JOIN assignments a ON a.id = s.assignment_id
             WHERE s.id = ?",
            [&submission_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((status, owner)) = header else {
        return err(&req.id, "not_found", "submission not found", None);
    };
    if owner != teacher_id {
        return err(
            &req.id,
            "forbidden",
            "submission belongs to another teacher's assignment",
            None,
        );
    }
    if status == GradingStatus::Reopened.as_str() {
        return err(
            &req.id,
            "validation_failed",
            "submission is already reopened",
            Some(json!({ "submissionId": submission_id })),
        );
    }

    let reopened_at = now_rfc3339();
    if let Err(e) = conn.execute(
        "UPDATE submissions SET status = 'reopened', reopened_at = ?, reopened_by = ? WHERE id = ?",
        (&reopened_at, &teacher_id, &submission_id),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "submissionId": submission_id,
            "status": GradingStatus::Reopened.as_str(),
            "reopenedAt": reopened_at,
            "reopenedBy": teacher_id
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "submissions.submit" => Some(handle_submit(state, req)),
        "submissions.gradeSubjective" => Some(handle_grade_subjective(state, req)),
        "submissions.get" => Some(handle_submissions_get(state, req)),
        "submissions.listForAssignment" => Some(handle_list_for_assignment(state, req)),
        "submissions.listForStudent" => Some(handle_list_for_student(state, req)),
        "submissions.reopen" => Some(handle_reopen(state, req)),
        _ => None,
    }
}
