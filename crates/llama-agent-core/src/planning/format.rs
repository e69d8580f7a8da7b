use super::questions::QaSession;
use regex::Regex;

/// Inputs for the final plan document.
#[derive(Clone, Debug, Default)]
pub struct PlanData {
    pub task_summary: String,
    pub created_at: String,
    pub version: u32,
    pub status: String,
    pub executive_summary: String,
    /// (question, answer) pairs from the Q&A session.
    pub design_decisions: Vec<(String, String)>,
    pub plan_body: String,
}

/// Render the final `plan.md`: header, metadata, design decisions, body.
pub fn generate(data: &PlanData) -> String {
    let mut plan = generate_header(
        &data.task_summary,
        &data.created_at,
        data.version,
        &data.status,
    );

    if !data.executive_summary.is_empty() {
        plan.push_str("## Executive Summary\n\n");
        plan.push_str(&data.executive_summary);
        plan.push_str("\n\n");
    }

    if !data.design_decisions.is_empty() {
        plan.push_str("## Design Decisions\n\nBased on the following user preferences:\n\n");
        for (question, answer) in &data.design_decisions {
            plan.push_str(&format!("- **{question}**: {answer}\n"));
        }
        plan.push('\n');
    }

    if !data.plan_body.is_empty() {
        plan.push_str(&data.plan_body);
        if !data.plan_body.ends_with('\n') {
            plan.push('\n');
        }
    }

    plan
}

pub fn generate_header(task_summary: &str, timestamp: &str, version: u32, status: &str) -> String {
    format!(
        "# Implementation Plan: {task_summary}\n\n## Metadata\n- Created: {timestamp}\n- Version: {version}\n- Status: {status}\n\n"
    )
}

/// Rewrite the Design Decisions section from the answered Q&A session,
/// inserting one after Metadata when the document has none yet.
pub fn update_design_decisions(markdown: &str, session: &QaSession) -> String {
    let mut decisions = String::from("## Design Decisions\n\nBased on the following user preferences:\n\n");
    for question in &session.questions {
        if !question.is_answered() {
            continue;
        }
        decisions.push_str(&format!("- **{}**: {}", question.text, question.selected_answer));
        if question.is_custom {
            decisions.push_str(" *(custom)*");
        }
        decisions.push('\n');
    }
    decisions.push('\n');

    let replaced = replace_section(markdown, "## Design Decisions", &decisions);
    if replaced != markdown {
        return replaced;
    }

    // No existing section: insert after Metadata, or append.
    if let Some(metadata) = markdown.find("## Metadata") {
        if let Some(next_section) = markdown[metadata + 1..].find("\n## ") {
            let insert_at = metadata + 1 + next_section + 1;
            return format!(
                "{}{}{}",
                &markdown[..insert_at],
                decisions,
                &markdown[insert_at..]
            );
        }
    }
    format!("{markdown}{decisions}")
}

pub fn update_status(markdown: &str, new_status: &str) -> String {
    let status_re = Regex::new(r"- Status: \w+").expect("status regex is valid");
    status_re
        .replace(markdown, format!("- Status: {new_status}"))
        .into_owned()
}

pub fn update_version(markdown: &str, new_version: u32) -> String {
    let version_re = Regex::new(r"- Version: \d+").expect("version regex is valid");
    version_re
        .replace(markdown, format!("- Version: {new_version}"))
        .into_owned()
}

/// Body of a `## `-level section, without its header line.
pub fn extract_section(markdown: &str, section_header: &str) -> String {
    let Some(start) = markdown.find(section_header) else {
        return String::new();
    };
    let content_start = markdown[start..]
        .find('\n')
        .map(|line_end| start + line_end + 1)
        .unwrap_or(markdown.len());
    let end = markdown[content_start..]
        .find("\n## ")
        .map(|offset| content_start + offset)
        .unwrap_or(markdown.len());
    markdown[content_start..end].to_string()
}

/// Replace a `## `-level section (header included) with `new_content`;
/// returns the input unchanged when the section is absent.
pub fn replace_section(markdown: &str, section_header: &str, new_content: &str) -> String {
    let Some(start) = markdown.find(section_header) else {
        return markdown.to_string();
    };
    let after_header = start + section_header.len();
    let end = markdown[after_header..]
        .find("\n## ")
        .map(|offset| after_header + offset + 1)
        .unwrap_or(markdown.len());
    format!("{}{}{}", &markdown[..start], new_content, &markdown[end..])
}
