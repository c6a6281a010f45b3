mod test_support;

use serde_json::json;
use test_support::{request_err, request_ok, setup_classroom, spawn_sidecar, temp_dir};

fn create_mixed_assignment(
    stdin: &mut std::process::ChildStdin,
    reader: &mut std::io::BufReader<std::process::ChildStdout>,
    teacher_id: &str,
) -> (String, String, String) {
    let created = request_ok(
        stdin,
        reader,
        "mixed-assignment",
        "assignments.create",
        json!({
            "teacherId": teacher_id,
            "title": "Essay and a warm-up",
            "questions": [
                {
                    "kind": "multiple_choice",
                    "prompt": "Pick the second letter",
                    "choices": ["A", "B", "C"],
                    "correctAnswer": "B",
                    "points": 5.0
                },
                {
                    "kind": "subjective",
                    "prompt": "Explain why the sky is blue",
                    "points": 10.0
                }
            ]
        }),
    );
    let assignment_id = created
        .get("assignmentId")
        .and_then(|v| v.as_str())
        .expect("assignmentId")
        .to_string();
    let ids = created
        .get("questionIds")
        .and_then(|v| v.as_array())
        .expect("questionIds");
    (
        assignment_id,
        ids[0].as_str().expect("q1").to_string(),
        ids[1].as_str().expect("q2").to_string(),
    )
}

#[test]
fn subjective_answers_stay_pending_until_manually_graded() {
    let workspace = temp_dir("graderd-subjective-lifecycle");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let class = setup_classroom(&mut stdin, &mut reader, &workspace);
    let (assignment_id, q_mc, q_essay) =
        create_mixed_assignment(&mut stdin, &mut reader, &class.teacher_id);

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "submissions.submit",
        json!({
            "studentId": class.student_id,
            "assignmentId": assignment_id,
            "answers": {
                q_mc.clone(): "B",
                q_essay.clone(): "Rayleigh scattering favours short wavelengths."
            }
        }),
    );
    let submission_id = result
        .get("submissionId")
        .and_then(|v| v.as_str())
        .expect("submissionId")
        .to_string();

    // Objective part is scored immediately; subjective is pending.
    assert_eq!(result.get("totalScore").and_then(|v| v.as_f64()), Some(5.0));
    assert_eq!(
        result.get("maxObjectiveScore").and_then(|v| v.as_f64()),
        Some(5.0)
    );
    assert_eq!(result.get("maxScore").and_then(|v| v.as_f64()), Some(15.0));
    assert_eq!(
        result.get("status").and_then(|v| v.as_str()),
        Some("pending_manual")
    );
    let per_question = result
        .get("perQuestion")
        .and_then(|v| v.as_array())
        .expect("perQuestion");
    assert!(per_question[1].get("isCorrect").expect("isCorrect").is_null());
    assert!(per_question[1]
        .get("awardedPoints")
        .expect("awardedPoints")
        .is_null());

    let graded = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "submissions.gradeSubjective",
        json!({
            "teacherId": class.teacher_id,
            "submissionId": submission_id,
            "questionId": q_essay,
            "awardedPoints": 8.0,
            "feedback": "Good response! Your answer shows understanding."
        }),
    );
    assert_eq!(graded.get("totalScore").and_then(|v| v.as_f64()), Some(13.0));
    assert_eq!(
        graded.get("status").and_then(|v| v.as_str()),
        Some("fully_graded")
    );
    assert_eq!(
        graded.get("remainingUngraded").and_then(|v| v.as_i64()),
        Some(0)
    );
    // Partial credit is not "correct".
    assert_eq!(graded.get("isCorrect").and_then(|v| v.as_bool()), Some(false));

    let stored = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "submissions.get",
        json!({ "submissionId": submission_id }),
    );
    assert_eq!(stored.get("totalScore").and_then(|v| v.as_f64()), Some(13.0));
    let answers = stored
        .get("answers")
        .and_then(|v| v.as_array())
        .expect("answers");
    let essay = answers
        .iter()
        .find(|a| a.get("kind").and_then(|v| v.as_str()) == Some("subjective"))
        .expect("essay answer");
    assert_eq!(essay.get("awardedPoints").and_then(|v| v.as_f64()), Some(8.0));
    assert_eq!(
        essay.get("feedback").and_then(|v| v.as_str()),
        Some("Good response! Your answer shows understanding.")
    );
}

#[test]
fn grading_guards_reject_bad_points_wrong_kind_and_foreign_teacher() {
    let workspace = temp_dir("graderd-grading-guards");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let class = setup_classroom(&mut stdin, &mut reader, &workspace);
    let (assignment_id, q_mc, q_essay) =
        create_mixed_assignment(&mut stdin, &mut reader, &class.teacher_id);

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "submissions.submit",
        json!({
            "studentId": class.student_id,
            "assignmentId": assignment_id,
            "answers": { q_mc.clone(): "A", q_essay.clone(): "Because." }
        }),
    );
    let submission_id = result
        .get("submissionId")
        .and_then(|v| v.as_str())
        .expect("submissionId")
        .to_string();

    // Points outside 0..=max.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "submissions.gradeSubjective",
        json!({
            "teacherId": class.teacher_id,
            "submissionId": submission_id,
            "questionId": q_essay.clone(),
            "awardedPoints": 11.0
        }),
    );
    assert_eq!(code, "validation_failed");

    // Objective answers are not manually gradable.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "submissions.gradeSubjective",
        json!({
            "teacherId": class.teacher_id,
            "submissionId": submission_id,
            "questionId": q_mc,
            "awardedPoints": 5.0
        }),
    );
    assert_eq!(code, "forbidden");

    // Another teacher does not own this assignment.
    let other = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "setup.createTeacher",
        json!({ "name": "Mrs. Peace", "username": "peace", "password": "password123" }),
    );
    let other_id = other
        .get("userId")
        .and_then(|v| v.as_str())
        .expect("userId")
        .to_string();
    let code = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "submissions.gradeSubjective",
        json!({
            "teacherId": other_id,
            "submissionId": submission_id,
            "questionId": q_essay.clone(),
            "awardedPoints": 10.0
        }),
    );
    assert_eq!(code, "forbidden");

    // The guarded attempts changed nothing.
    let stored = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "submissions.get",
        json!({ "submissionId": submission_id }),
    );
    assert_eq!(
        stored.get("status").and_then(|v| v.as_str()),
        Some("pending_manual")
    );
    assert_eq!(stored.get("totalScore").and_then(|v| v.as_f64()), Some(0.0));

    // Full marks flip the answer to correct and finish the submission.
    let graded = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "submissions.gradeSubjective",
        json!({
            "teacherId": class.teacher_id,
            "submissionId": submission_id,
            "questionId": q_essay,
            "awardedPoints": 10.0
        }),
    );
    assert_eq!(graded.get("isCorrect").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(
        graded.get("status").and_then(|v| v.as_str()),
        Some("fully_graded")
    );
    assert_eq!(graded.get("totalScore").and_then(|v| v.as_f64()), Some(10.0));
}
