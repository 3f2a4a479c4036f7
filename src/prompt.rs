//! Prompt builders for email, thread, and digest summaries.
//!
//! Each prompt asks for a single JSON object. `tldr` is the only field the
//! orchestrator requires; the others map onto
//! [`SummaryFields`](crate::models::SummaryFields) or are kept as extras.

use crate::models::Email;

const EMAIL_BODY_CHARS: usize = 5000;
const THREAD_BODY_CHARS: usize = 1000;
const DIGEST_MAX_THREADS: usize = 20;

/// One line of digest input: a thread and its summary.
#[derive(Debug, Clone)]
pub struct DigestItem {
    pub subject: String,
    pub email_count: i64,
    pub tldr: String,
    pub importance: String,
    pub subsystems: Vec<String>,
}

fn clip(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Display name portion of a From header: `Jane Dev <j@x>` -> `Jane Dev`.
fn display_name(sender: &str) -> &str {
    let name = sender.split('<').next().unwrap_or(sender).trim();
    let name = name.trim_matches('"');
    if name.is_empty() {
        sender.trim()
    } else {
        name
    }
}

pub fn email_prompt(email: &Email) -> String {
    format!(
        r#"Analyze this mailing-list email and provide a structured summary.

EMAIL DETAILS:
Subject: {subject}
From: {sender}

BODY:
{body}

TASK: Respond with one JSON object of this shape:
{{
    "tldr": "One sentence summary (max 150 chars)",
    "email_type": "patch|rfc|bug|discussion|announcement",
    "key_points": ["point 1", "point 2", "point 3"],
    "subsystems": ["subsystems mentioned, e.g. networking, fs, mm"],
    "importance": "critical|high|medium|low"
}}

GUIDELINES:
- Be concise and technical
- Take subsystems from subject tags and content
- For patches: what changes and why
- For bugs: severity and affected components
- Return ONLY the JSON object"#,
        subject = email.subject,
        sender = email.sender,
        body = clip(&email.body, EMAIL_BODY_CHARS),
    )
}

/// `emails` is the (possibly truncated) chronological member list;
/// `omitted` is how many members were left out.
pub fn thread_prompt(subject: &str, total_emails: usize, emails: &[Email], omitted: usize) -> String {
    let conversation: Vec<String> = emails
        .iter()
        .enumerate()
        .map(|(i, e)| {
            format!(
                "[Email {}] {} ({}):\n{}\n",
                i + 1,
                display_name(&e.sender),
                e.date,
                clip(&e.body, THREAD_BODY_CHARS)
            )
        })
        .collect();

    let note = if omitted > 0 {
        format!(
            "\nNOTE: {} of {} emails were omitted to fit the input limit; the root, patch submissions and latest replies are included.\n",
            omitted, total_emails
        )
    } else {
        String::new()
    };

    format!(
        r#"Analyze this mailing-list thread and provide a comprehensive summary.

THREAD SUBJECT: {subject}
EMAILS IN THREAD: {total_emails}
{note}
CONVERSATION:
{conversation}

TASK: Respond with one JSON object of this shape:
{{
    "tldr": "One sentence summary of the entire thread (max 200 chars)",
    "discussion_summary": "2-3 paragraph narrative of the discussion",
    "key_points": ["major point 1", "major point 2"],
    "resolution": "What was decided (or 'ongoing')",
    "action_items": ["action 1"],
    "subsystems": ["affected subsystems"],
    "key_contributors": ["main participants"],
    "importance": "critical|high|medium|low"
}}

GUIDELINES:
- Focus on technical substance and outcomes
- Separate consensus from open debate
- Note whether patches were accepted, rejected, or need revision
- Call out security concerns and breaking changes
- Return ONLY the JSON object"#,
        conversation = conversation.join("\n---\n"),
    )
}

/// `label` names the window, e.g. `daily 2024-10-18`.
pub fn digest_prompt(label: &str, items: &[DigestItem]) -> String {
    let lines: Vec<String> = items
        .iter()
        .take(DIGEST_MAX_THREADS)
        .enumerate()
        .map(|(i, item)| {
            format!(
                "{}. [{}] {} ({} emails)\n   TL;DR: {}\n   Subsystems: {}",
                i + 1,
                item.importance,
                item.subject,
                item.email_count,
                item.tldr,
                item.subsystems.join(", ")
            )
        })
        .collect();

    format!(
        r#"Generate a {label} digest for the mailing list.

THREADS ({count} total):
{threads}

TASK: Respond with one JSON object of this shape:
{{
    "tldr": "Executive summary of the period (2-3 sentences)",
    "key_points": ["most important development 1", "most important development 2"],
    "by_subsystem": {{"networking": ["brief updates"]}},
    "hot_topics": ["controversial or high-activity topics"],
    "critical_items": ["security issues, breaking changes, urgent bugs"],
    "subsystems": ["subsystems with notable activity"]
}}

GUIDELINES:
- Prioritize security issues, breaking changes, and major features
- Group related discussions by subsystem
- Make it quick to scan for maintainers
- Return ONLY the JSON object"#,
        count = items.len(),
        threads = lines.join("\n\n"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email(sender: &str, body: &str) -> Email {
        Email {
            message_id: "a@x".into(),
            subject: "[PATCH] fix".into(),
            sender: sender.into(),
            date: "2024-10-18T10:00:00Z".into(),
            in_reply_to: String::new(),
            references: Vec::new(),
            body: body.into(),
            raw_excerpt: String::new(),
        }
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name("Jane Dev <jane@x>"), "Jane Dev");
        assert_eq!(display_name("\"Dev, Jane\" <jane@x>"), "Dev, Jane");
        assert_eq!(display_name("<jane@x>"), "<jane@x>");
    }

    #[test]
    fn test_email_prompt_clips_body() {
        let prompt = email_prompt(&email("J <j@x>", &"y".repeat(EMAIL_BODY_CHARS + 50)));
        assert!(prompt.contains("Subject: [PATCH] fix"));
        assert!(!prompt.contains(&"y".repeat(EMAIL_BODY_CHARS + 1)));
    }

    #[test]
    fn test_thread_prompt_mentions_omissions() {
        let emails = vec![email("Jane <j@x>", "first"), email("Bob <b@x>", "second")];
        let prompt = thread_prompt("[PATCH] fix", 10, &emails, 8);
        assert!(prompt.contains("[Email 1] Jane"));
        assert!(prompt.contains("[Email 2] Bob"));
        assert!(prompt.contains("8 of 10 emails were omitted"));
    }

    #[test]
    fn test_digest_prompt_caps_threads() {
        let items: Vec<DigestItem> = (0..25)
            .map(|i| DigestItem {
                subject: format!("topic {}", i),
                email_count: 2,
                tldr: "t".into(),
                importance: "medium".into(),
                subsystems: vec!["mm".into()],
            })
            .collect();
        let prompt = digest_prompt("daily 2024-10-18", &items);
        assert!(prompt.contains("THREADS (25 total)"));
        assert!(prompt.contains("20. [medium] topic 19"));
        assert!(!prompt.contains("topic 20"));
    }
}
