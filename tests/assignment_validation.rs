mod test_support;

use serde_json::json;
use test_support::{request, request_err, request_ok, setup_classroom, spawn_sidecar, temp_dir};

fn assert_question_error(
    stdin: &mut std::process::ChildStdin,
    reader: &mut std::io::BufReader<std::process::ChildStdout>,
    id: &str,
    teacher_id: &str,
    question: serde_json::Value,
    expected_index: u64,
    expected_field: &str,
) {
    let value = request(
        stdin,
        reader,
        id,
        "assignments.create",
        json!({
            "teacherId": teacher_id,
            "title": "Broken quiz",
            "questions": [question]
        }),
    );
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false));
    let error = value.get("error").expect("error");
    assert_eq!(
        error.get("code").and_then(|v| v.as_str()),
        Some("validation_failed")
    );
    let details = error.get("details").expect("details");
    assert_eq!(
        details.get("questionIndex").and_then(|v| v.as_u64()),
        Some(expected_index)
    );
    assert_eq!(
        details.get("field").and_then(|v| v.as_str()),
        Some(expected_field)
    );
}

#[test]
fn malformed_questions_are_rejected_with_index_and_field() {
    let workspace = temp_dir("graderd-assignment-validation");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let class = setup_classroom(&mut stdin, &mut reader, &workspace);

    assert_question_error(
        &mut stdin,
        &mut reader,
        "1",
        &class.teacher_id,
        json!({
            "kind": "multiple_choice",
            "prompt": "One option only",
            "choices": ["A"],
            "correctAnswer": "A",
            "points": 5.0
        }),
        0,
        "choices",
    );

    assert_question_error(
        &mut stdin,
        &mut reader,
        "2",
        &class.teacher_id,
        json!({
            "kind": "multiple_choice",
            "prompt": "Answer outside choices",
            "choices": ["A", "B"],
            "correctAnswer": "C",
            "points": 5.0
        }),
        0,
        "correctAnswer",
    );

    assert_question_error(
        &mut stdin,
        &mut reader,
        "3",
        &class.teacher_id,
        json!({
            "kind": "true_false",
            "prompt": "Not canonical",
            "correctAnswer": "yes",
            "points": 5.0
        }),
        0,
        "correctAnswer",
    );

    assert_question_error(
        &mut stdin,
        &mut reader,
        "4",
        &class.teacher_id,
        json!({
            "kind": "multiple_choice",
            "prompt": "Worthless",
            "choices": ["A", "B"],
            "correctAnswer": "A",
            "points": 0.0
        }),
        0,
        "points",
    );

    assert_question_error(
        &mut stdin,
        &mut reader,
        "5",
        &class.teacher_id,
        json!({
            "kind": "subjective",
            "prompt": "Essay with an answer key",
            "correctAnswer": "chlorophyll",
            "points": 10.0
        }),
        0,
        "correctAnswer",
    );

    // A later question reports its own index.
    let value = request(
        &mut stdin,
        &mut reader,
        "6",
        "assignments.create",
        json!({
            "teacherId": class.teacher_id,
            "title": "Second question is broken",
            "questions": [
                {
                    "kind": "true_false",
                    "prompt": "Fine question",
                    "correctAnswer": "true",
                    "points": 1.0
                },
                {
                    "kind": "multiple_choice",
                    "prompt": "Duplicated choices",
                    "choices": ["A", " a "],
                    "correctAnswer": "A",
                    "points": 1.0
                }
            ]
        }),
    );
    let details = value
        .get("error")
        .and_then(|e| e.get("details"))
        .expect("details");
    assert_eq!(details.get("questionIndex").and_then(|v| v.as_u64()), Some(1));

    // All-or-nothing: none of the rejected assignments persisted.
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "assignments.list",
        json!({ "teacherId": class.teacher_id }),
    );
    assert_eq!(
        listed
            .get("assignments")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );
}

#[test]
fn empty_question_set_is_rejected() {
    let workspace = temp_dir("graderd-empty-questions");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let class = setup_classroom(&mut stdin, &mut reader, &workspace);

    let code = request_err(
        &mut stdin,
        &mut reader,
        "1",
        "assignments.create",
        json!({
            "teacherId": class.teacher_id,
            "title": "Nothing to answer",
            "questions": []
        }),
    );
    assert_eq!(code, "validation_failed");
}

#[test]
fn questions_come_back_in_authored_order() {
    let workspace = temp_dir("graderd-question-order");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let class = setup_classroom(&mut stdin, &mut reader, &workspace);

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "assignments.create",
        json!({
            "teacherId": class.teacher_id,
            "title": "Ordered quiz",
            "questions": [
                { "kind": "true_false", "prompt": "first", "correctAnswer": "true", "points": 1.0 },
                { "kind": "subjective", "prompt": "second", "points": 4.0 },
                {
                    "kind": "multiple_choice",
                    "prompt": "third",
                    "choices": ["x", "y"],
                    "correctAnswer": "y",
                    "points": 2.0
                }
            ]
        }),
    );
    let assignment_id = created
        .get("assignmentId")
        .and_then(|v| v.as_str())
        .expect("assignmentId");

    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "assignments.get",
        json!({ "assignmentId": assignment_id }),
    );
    let prompts: Vec<&str> = fetched
        .get("questions")
        .and_then(|v| v.as_array())
        .expect("questions")
        .iter()
        .map(|q| q.get("prompt").and_then(|v| v.as_str()).expect("prompt"))
        .collect();
    assert_eq!(prompts, vec!["first", "second", "third"]);
    assert_eq!(fetched.get("totalPoints").and_then(|v| v.as_f64()), Some(7.0));

    // The answer key is not part of the read model.
    let questions = fetched.get("questions").and_then(|v| v.as_array()).unwrap();
    assert!(questions.iter().all(|q| q.get("correctAnswer").is_none()));
}
