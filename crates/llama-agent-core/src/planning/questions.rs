use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One design-decision question with the user's eventual answer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanQuestion {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub selected_answer: String,
    #[serde(default)]
    pub is_custom: bool,
    #[serde(default = "default_option_index")]
    pub selected_option_index: i64,
}

fn default_option_index() -> i64 {
    -1
}

impl PlanQuestion {
    pub fn is_answered(&self) -> bool {
        !self.selected_answer.is_empty()
    }
}

/// An ordered Q&A session as shown by the interactive UI.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QaSession {
    #[serde(default)]
    pub questions: Vec<PlanQuestion>,
    #[serde(default)]
    pub current_question_index: usize,
}

impl QaSession {
    pub fn is_complete(&self) -> bool {
        !self.questions.is_empty() && self.questions.iter().all(PlanQuestion::is_answered)
    }

    pub fn answered_count(&self) -> usize {
        self.questions
            .iter()
            .filter(|question| question.is_answered())
            .count()
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn from_json(value: &Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }
}

/// Build a Q&A session from the planning agent's JSON. Accepts a
/// `{"questions": [...]}` object or a bare array; question entries may use
/// `question` for `text` and `answers` for `options`. Entries without both a
/// text and at least one option are dropped.
pub fn parse_questions_from_json(agent_output: &Value) -> QaSession {
    let questions_array = if let Some(questions) = agent_output.get("questions") {
        questions.as_array().cloned().unwrap_or_default()
    } else if let Some(array) = agent_output.as_array() {
        array.clone()
    } else {
        return QaSession::default();
    };

    let mut session = QaSession::default();
    for (index, entry) in questions_array.iter().enumerate() {
        let text = entry
            .get("text")
            .or_else(|| entry.get("question"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let options: Vec<String> = entry
            .get("options")
            .or_else(|| entry.get("answers"))
            .and_then(Value::as_array)
            .map(|options| {
                options
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        if text.is_empty() || options.is_empty() {
            continue;
        }
        session.questions.push(PlanQuestion {
            id: entry
                .get("id")
                .and_then(Value::as_i64)
                .unwrap_or(index as i64 + 1),
            text,
            options,
            selected_answer: String::new(),
            is_custom: false,
            selected_option_index: -1,
        });
    }

    session
}

/// Extract a Q&A session from raw agent output. Tries a fenced ```json
/// block first (the ```JSON spelling included), then falls back to a
/// balanced-brace scan starting at the literal `{"questions"`. Malformed
/// JSON yields an empty session; it is never fatal.
pub fn extract_questions(agent_output: &str) -> QaSession {
    let raw = fenced_json_payload(agent_output)
        .map(str::to_string)
        .or_else(|| inline_questions_payload(agent_output));

    let Some(raw) = raw else {
        return QaSession::default();
    };
    match serde_json::from_str::<Value>(&raw) {
        Ok(parsed) => parse_questions_from_json(&parsed),
        Err(_) => QaSession::default(),
    }
}

/// The plan markdown is everything before the questions payload.
pub fn extract_plan_content(agent_output: &str) -> String {
    if let Some(fence) = find_json_fence(agent_output) {
        return agent_output[..fence].to_string();
    }
    if let Some(inline) = agent_output.find("{\"questions\"") {
        return agent_output[..inline].to_string();
    }
    agent_output.to_string()
}

/// Render the user's decisions for the refinement prompt.
pub fn format_answers_for_prompt(session: &QaSession) -> String {
    let mut rendered = String::from("User's design decisions:\n\n");
    for question in &session.questions {
        rendered.push_str(&format!("Q{}: {}\n", question.id, question.text));
        rendered.push_str(&format!("Answer: {}", question.selected_answer));
        if question.is_custom {
            rendered.push_str(" (custom response)");
        }
        rendered.push_str("\n\n");
    }
    rendered
}

fn find_json_fence(content: &str) -> Option<usize> {
    content
        .find("```json")
        .or_else(|| content.find("```JSON"))
}

fn fenced_json_payload(content: &str) -> Option<&str> {
    let fence = find_json_fence(content)?;
    let mut body_start = fence + "```json".len();
    while content[body_start..].starts_with(['\n', '\r', ' ']) {
        body_start += 1;
    }
    let body_end = content[body_start..].find("```")?;
    Some(content[body_start..body_start + body_end].trim_end())
}

/// Balanced-brace scan from `{"questions"`, honoring string escapes.
fn inline_questions_payload(content: &str) -> Option<String> {
    let start = content.find("{\"questions\"")?;
    let bytes = content.as_bytes();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match byte {
            b'\\' if in_string => escape_next = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(content[start..start + offset + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fenced_block_is_preferred_and_parsed() {
        let output = "## Plan\n\nSome plan text.\n\n```json\n{\"questions\": [{\"id\": 1, \"text\": \"Which storage?\", \"options\": [\"sqlite\", \"flat files\"]}]}\n```\nTrailing notes.";
        let qa = extract_questions(output);
        assert_eq!(qa.questions.len(), 1);
        assert_eq!(qa.questions[0].text, "Which storage?");
        assert_eq!(qa.questions[0].options, vec!["sqlite", "flat files"]);

        let plan = extract_plan_content(output);
        assert!(plan.contains("Some plan text."));
        assert!(!plan.contains("questions"));
    }

    #[test]
    fn uppercase_fence_is_recognized() {
        let output = "plan\n```JSON\n{\"questions\": [{\"text\": \"Q?\", \"options\": [\"a\"]}]}\n```";
        assert_eq!(extract_questions(output).questions.len(), 1);
    }

    #[test]
    fn inline_object_is_recovered_via_balanced_brace_scan() {
        let output = r#"Here is the plan. {"questions": [{"id": 2, "text": "Escapes \"inside\" strings?", "options": ["yes {braces} too"]}]} done"#;
        let qa = extract_questions(output);
        assert_eq!(qa.questions.len(), 1);
        assert_eq!(qa.questions[0].id, 2);
        assert_eq!(qa.questions[0].options[0], "yes {braces} too");
    }

    #[test]
    fn malformed_json_yields_an_empty_session() {
        let output = "```json\n{\"questions\": [oops]\n```";
        assert!(extract_questions(output).questions.is_empty());
        assert!(extract_questions("no json at all").questions.is_empty());
    }

    #[test]
    fn alias_keys_are_accepted() {
        let parsed = parse_questions_from_json(&json!({
            "questions": [
                {"question": "Aliased text?", "answers": ["x", "y"]},
                {"text": "No options", "options": []},
            ]
        }));
        assert_eq!(parsed.questions.len(), 1);
        assert_eq!(parsed.questions[0].text, "Aliased text?");
        assert_eq!(parsed.questions[0].id, 1);
    }

    #[test]
    fn qa_session_json_roundtrip_preserves_answers() {
        let mut session = parse_questions_from_json(&json!({
            "questions": [{"id": 1, "text": "Q?", "options": ["a", "b"]}]
        }));
        session.questions[0].selected_answer = "custom thing".to_string();
        session.questions[0].is_custom = true;
        session.current_question_index = 0;

        let roundtripped = QaSession::from_json(&session.to_json());
        assert_eq!(roundtripped, session);
        assert!(roundtripped.is_complete());
    }

    #[test]
    fn completeness_requires_every_question_answered() {
        let mut session = parse_questions_from_json(&json!({
            "questions": [
                {"id": 1, "text": "Q1?", "options": ["a"]},
                {"id": 2, "text": "Q2?", "options": ["b"]},
            ]
        }));
        assert!(!session.is_complete());
        session.questions[0].selected_answer = "a".to_string();
        assert_eq!(session.answered_count(), 1);
        assert!(!session.is_complete());
        session.questions[1].selected_answer = "b".to_string();
        assert!(session.is_complete());
    }

    #[test]
    fn format_answers_marks_custom_responses() {
        let mut session = parse_questions_from_json(&json!({
            "questions": [{"id": 1, "text": "Q?", "options": ["a"]}]
        }));
        session.questions[0].selected_answer = "my own".to_string();
        session.questions[0].is_custom = true;

        let rendered = format_answers_for_prompt(&session);
        assert!(rendered.contains("Q1: Q?"));
        assert!(rendered.contains("Answer: my own (custom response)"));
    }
}
