use crate::grading;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, required_str, require_student, require_teacher, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;

fn handle_student_trend(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        "SELECT s.assignment_id, a.title, s.total_score, s.submitted_at, s.status,
                (SELECT COALESCE(SUM(points), 0) FROM questions WHERE assignment_id = s.assignment_id)
         FROM submissions s
         JOIN assignments a ON a.id = s.assignment_id
         WHERE s.student_id = ? AND s.status != 'reopened'
         ORDER BY s.submitted_at, s.rowid",
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&student_id], |r| {
            let assignment_id: String = r.get(0)?;
            let title: String = r.get(1)?;
            let score: f64 = r.get(2)?;
            let submitted_at: Option<String> = r.get(3)?;
            let status: String = r.get(4)?;
            let max_score: f64 = r.get(5)?;
            Ok((assignment_id, title, score, submitted_at, status, max_score))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut percents = Vec::new();
    let points = rows
        .iter()
        .map(|(assignment_id, title, score, submitted_at, status, max_score)| {
            let percent = grading::percent(*score, *max_score);
            if let Some(p) = percent {
                percents.push(p);
            }
            json!({
                "assignmentId": assignment_id,
                "title": title,
                "score": score,
                "maxScore": max_score,
                "percent": percent,
                "submittedAt": submitted_at,
                "status": status
            })
        })
        .collect::<Vec<_>>();

    let trend = json!({
        "direction": grading::trend_direction(&percents),
        "firstPercent": percents.first(),
        "lastPercent": percents.last()
    });

    ok(&req.id, json!({ "studentId": student_id, "points": points, "trend": trend }))
}

/// Statistics payload for one assignment over its live submissions.
/// Zero submissions is a defined no-data result, never an error.
fn assignment_statistics_value(
    conn: &Connection,
    assignment_id: &str,
) -> Result<serde_json::Value, HandlerErr> {
    let title: Option<String> = conn
        .query_row(
            "SELECT title FROM assignments WHERE id = ?",
            [assignment_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let Some(title) = title else {
        return Err(HandlerErr::with_details(
            "not_found",
            "assignment not found",
            json!({ "assignmentId": assignment_id }),
        ));
    };

    let mut score_stmt = conn
        .prepare(
            "SELECT total_score FROM submissions
             WHERE assignment_id = ? AND status != 'reopened'",
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let mut scores = score_stmt
        .query_map([assignment_id], |r| r.get::<_, f64>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    let submission_count = scores.len();
    if submission_count == 0 {
        return Ok(json!({
            "assignmentId": assignment_id,
            "title": title,
            "submissionCount": 0,
            "noData": true,
            "mean": serde_json::Value::Null,
            "median": serde_json::Value::Null,
            "min": serde_json::Value::Null,
            "max": serde_json::Value::Null,
            "perQuestion": []
        }));
    }

    let mean = grading::mean(&scores);
    let min = scores.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let median = grading::median(scores.as_mut_slice());

    #[derive(Default, Clone, Copy)]
    struct AnswerAgg {
        correct_count: i64,
        answered_count: i64,
        graded_count: i64,
        awarded_sum: f64,
    }

    let mut agg_stmt = conn
        .prepare(
            "SELECT ans.question_id,
                    SUM(CASE WHEN ans.is_correct = 1 THEN 1 ELSE 0 END),
                    SUM(CASE WHEN TRIM(ans.response) != '' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN ans.awarded_points IS NOT NULL THEN 1 ELSE 0 END),
                    COALESCE(SUM(ans.awarded_points), 0)
             FROM answers ans
             JOIN submissions s ON s.id = ans.submission_id
             WHERE s.assignment_id = ? AND s.status != 'reopened'
             GROUP BY ans.question_id",
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let mut agg_by_question: HashMap<String, AnswerAgg> = HashMap::new();
    let agg_rows = agg_stmt
        .query_map([assignment_id], |r| {
            let question_id: String = r.get(0)?;
            Ok((
                question_id,
                AnswerAgg {
                    correct_count: r.get(1)?,
                    answered_count: r.get(2)?,
                    graded_count: r.get(3)?,
                    awarded_sum: r.get(4)?,
                },
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    for (question_id, agg) in agg_rows {
        agg_by_question.insert(question_id, agg);
    }

    let mut q_stmt = conn
        .prepare(
            "SELECT id, kind, prompt, points
             FROM questions
             WHERE assignment_id = ?
             ORDER BY sort_order",
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let questions = q_stmt
        .query_map([assignment_id], |r| {
            let id: String = r.get(0)?;
            let kind: String = r.get(1)?;
            let prompt: String = r.get(2)?;
            let points: f64 = r.get(3)?;
            Ok((id, kind, prompt, points))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    let per_question = questions
        .into_iter()
        .map(|(id, kind, prompt, points)| {
            let agg = agg_by_question.get(&id).copied().unwrap_or_default();
            if kind == "subjective" {
                let average_awarded = if agg.graded_count > 0 {
                    Some(agg.awarded_sum / agg.graded_count as f64)
                } else {
                    None
                };
                json!({
                    "questionId": id,
                    "kind": kind,
                    "prompt": prompt,
                    "points": points,
                    "answeredCount": agg.answered_count,
                    "correctRate": serde_json::Value::Null,
                    "gradedCount": agg.graded_count,
                    "averageAwarded": average_awarded
                })
            } else {
                let correct_rate = agg.correct_count as f64 / submission_count as f64;
                json!({
                    "questionId": id,
                    "kind": kind,
                    "prompt": prompt,
                    "points": points,
                    "answeredCount": agg.answered_count,
                    "correctRate": correct_rate
                })
            }
        })
        .collect::<Vec<_>>();

    Ok(json!({
        "assignmentId": assignment_id,
        "title": title,
        "submissionCount": submission_count,
        "noData": false,
        "mean": mean,
        "median": median,
        "min": min,
        "max": max,
        "perQuestion": per_question
    }))
}

fn handle_assignment_statistics(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let assignment_id = match required_str(req, "assignmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match assignment_statistics_value(conn, &assignment_id) {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

fn handle_class_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = require_teacher(conn, &teacher_id) {
        return e.response(&req.id);
    }

    let mut stmt = match conn.prepare(
        "SELECT id FROM assignments WHERE teacher_id = ? ORDER BY created_at DESC, rowid DESC",
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let assignment_ids = match stmt
        .query_map([&teacher_id], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut assignments = Vec::with_capacity(assignment_ids.len());
    for assignment_id in &assignment_ids {
        match assignment_statistics_value(conn, assignment_id) {
            Ok(v) => assignments.push(v),
            Err(e) => return e.response(&req.id),
        }
    }

    // Cross-assignment aggregate in percent so differently sized
    // assignments weigh in on the same scale.
    let mut percent_stmt = match conn.prepare(
        "SELECT s.total_score,
                (SELECT COALESCE(SUM(points), 0) FROM questions WHERE assignment_id = s.assignment_id)
         FROM submissions s
         JOIN assignments a ON a.id = s.assignment_id
         WHERE a.teacher_id = ? AND s.status != 'reopened'",
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let score_rows = match percent_stmt
        .query_map([&teacher_id], |r| {
            Ok((r.get::<_, f64>(0)?, r.get::<_, f64>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let submission_count = score_rows.len();
    let percents: Vec<f64> = score_rows
        .iter()
        .filter_map(|(score, max)| grading::percent(*score, *max))
        .collect();
    let average_percent = grading::mean(&percents).map(grading::round1);

    ok(
        &req.id,
        json!({
            "teacherId": teacher_id,
            "assignmentCount": assignment_ids.len(),
            "submissionCount": submission_count,
            "averagePercent": average_percent,
            "assignments": assignments
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "analytics.studentTrend" => Some(handle_student_trend(state, req)),
        "analytics.assignmentStatistics" => Some(handle_assignment_statistics(state, req)),
        "analytics.classSummary" => Some(handle_class_summary(state, req)),
        _ => None,
    }
}
