//! Per-message RFC 822 extraction shared by the mbox and EML paths.
//!
//! Header decoding is delegated to `mailparse`, which decodes RFC 2047
//! encoded words and unfolds continuation lines. Nothing in here fails on a
//! bad header: undecodable values fall back to their raw text.

use chrono::{DateTime, SecondsFormat, Utc};
use mailparse::{MailHeaderMap, ParsedMail};
use tracing::debug;

use crate::models::Email;

/// Parse one raw message and expand it into canonical emails.
///
/// A `multipart/digest` decomposes into one email per embedded message,
/// each extracted exactly like a top-level message. Plain-text digest parts
/// become emails of their own, except the "Topics (" table of contents.
/// Anything else yields a single email. The outer `Err` means the message itself is unreadable;
/// inner errors belong to individual digest parts.
pub(crate) fn expand_message(
    raw: &[u8],
    excerpt_chars: usize,
) -> Result<Vec<Result<Email, String>>, String> {
    let mail = parse(raw)?;

    if !is_digest(&mail) {
        return Ok(vec![Ok(extract(&mail, raw, excerpt_chars))]);
    }

    let mut out = Vec::new();
    for (index, part) in mail.subparts.iter().enumerate() {
        if is_plain_text(part) {
            match part.get_body() {
                Ok(text) if is_table_of_contents(&text) => {
                    debug!(part = index, "skipping digest table of contents");
                }
                Ok(_) => out.push(Ok(extract(part, part.raw_bytes, excerpt_chars))),
                Err(e) => out.push(Err(format!("digest part {}: {}", index, e))),
            }
            continue;
        }
        if !is_embedded_message(part) {
            debug!(part = index, mimetype = %part.ctype.mimetype, "skipping non-message digest part");
            continue;
        }
        let embedded = match part.get_body_raw() {
            Ok(bytes) => bytes,
            Err(e) => {
                out.push(Err(format!("digest part {}: {}", index, e)));
                continue;
            }
        };
        match parse(&embedded) {
            Ok(sub) => out.push(Ok(extract(&sub, &embedded, excerpt_chars))),
            Err(e) => out.push(Err(format!("digest part {}: {}", index, e))),
        }
    }
    Ok(out)
}

fn parse(raw: &[u8]) -> Result<ParsedMail<'_>, String> {
    if raw.iter().all(|b| b.is_ascii_whitespace()) {
        return Err("empty message".to_string());
    }
    let mail = mailparse::parse_mail(raw).map_err(|e| e.to_string())?;
    if mail.headers.is_empty() {
        return Err("message has no headers".to_string());
    }
    Ok(mail)
}

fn is_digest(mail: &ParsedMail) -> bool {
    mail.ctype.mimetype.eq_ignore_ascii_case("multipart/digest")
}

/// Parts of a digest default to `message/rfc822` when they carry no
/// Content-Type of their own.
fn is_embedded_message(part: &ParsedMail) -> bool {
    part.headers.get_first_header("Content-Type").is_none()
        || part.ctype.mimetype.eq_ignore_ascii_case("message/rfc822")
}

/// Explicitly typed text/plain; an untyped digest part is a message.
fn is_plain_text(part: &ParsedMail) -> bool {
    part.headers.get_first_header("Content-Type").is_some()
        && part.ctype.mimetype.eq_ignore_ascii_case("text/plain")
}

/// Digest tables of contents open with a "Topics (N)" line.
fn is_table_of_contents(text: &str) -> bool {
    let head: String = text.chars().take(100).collect();
    head.contains("Topics (")
}

fn extract(mail: &ParsedMail, raw: &[u8], excerpt_chars: usize) -> Email {
    let headers = &mail.headers;
    let header = |name: &str| headers.get_first_value(name).unwrap_or_default();

    let mut body_parts = Vec::new();
    collect_plain_text(mail, &mut body_parts);

    Email {
        message_id: clean_message_id(&header("Message-ID")),
        subject: header("Subject").trim().to_string(),
        sender: header("From").trim().to_string(),
        date: normalize_date(&header("Date")),
        in_reply_to: clean_message_id(&header("In-Reply-To")),
        references: parse_references(&header("References")),
        body: body_parts.join("\n"),
        raw_excerpt: excerpt(raw, excerpt_chars),
    }
}

/// Concatenate text/plain leaves in document order.
fn collect_plain_text(part: &ParsedMail, out: &mut Vec<String>) {
    if part.subparts.is_empty() {
        if part.ctype.mimetype.eq_ignore_ascii_case("text/plain") {
            match part.get_body() {
                Ok(text) if !text.is_empty() => out.push(text),
                Ok(_) => {}
                Err(e) => debug!(error = %e, "undecodable text/plain part skipped"),
            }
        }
        return;
    }
    for sub in &part.subparts {
        collect_plain_text(sub, out);
    }
}

/// Strip whitespace and angle brackets: `<abc@host>` -> `abc@host`.
///
/// When a header carries several ids (some In-Reply-To headers do), the
/// first bracketed one wins.
pub fn clean_message_id(value: &str) -> String {
    let trimmed = value.trim();
    if let Some(first) = bracketed_ids(trimmed).into_iter().next() {
        return first;
    }
    trimmed
        .split_whitespace()
        .next()
        .unwrap_or("")
        .trim_matches(|c| c == '<' || c == '>')
        .to_string()
}

/// Parse a References header into identities, oldest first.
pub fn parse_references(value: &str) -> Vec<String> {
    let ids = bracketed_ids(value);
    if !ids.is_empty() {
        return ids;
    }
    value
        .split_whitespace()
        .map(|s| s.trim_matches(|c| c == '<' || c == '>').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn bracketed_ids(value: &str) -> Vec<String> {
    let mut ids = Vec::new();
    let mut rest = value;
    while let Some(open) = rest.find('<') {
        let after = &rest[open + 1..];
        match after.find('>') {
            Some(close) => {
                let id = after[..close].trim();
                if !id.is_empty() {
                    ids.push(id.to_string());
                }
                rest = &after[close + 1..];
            }
            None => break,
        }
    }
    ids
}

/// Convert a Date header to RFC 3339 in UTC, or return it verbatim.
///
/// Normalizing to UTC keeps lexicographic order equal to chronological
/// order, which thread bounds rely on.
pub fn normalize_date(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return to_utc_string(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return to_utc_string(dt.with_timezone(&Utc));
    }
    if let Ok(ts) = mailparse::dateparse(trimmed) {
        if let Some(dt) = DateTime::from_timestamp(ts, 0) {
            return to_utc_string(dt);
        }
    }
    raw.to_string()
}

fn to_utc_string(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// First `max_chars` characters of the raw message, lossily decoded.
pub fn excerpt(raw: &[u8], max_chars: usize) -> String {
    String::from_utf8_lossy(raw).chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_message_id() {
        assert_eq!(clean_message_id(" <abc123@kernel.org> "), "abc123@kernel.org");
        assert_eq!(clean_message_id("abc123@kernel.org"), "abc123@kernel.org");
        assert_eq!(clean_message_id(""), "");
        assert_eq!(clean_message_id("<a@x> (comment) <b@x>"), "a@x");
    }

    #[test]
    fn test_references_keep_order() {
        let refs = parse_references("<id1@example.com>\r\n <id2@example.com> <id3@example.com>");
        assert_eq!(refs, vec!["id1@example.com", "id2@example.com", "id3@example.com"]);
        assert!(parse_references("").is_empty());
    }

    #[test]
    fn test_date_normalized_to_utc() {
        assert_eq!(
            normalize_date("Fri, 18 Oct 2024 10:30:00 -0400"),
            "2024-10-18T14:30:00Z"
        );
        assert_eq!(normalize_date("2024-10-18T10:30:00+02:00"), "2024-10-18T08:30:00Z");
    }

    #[test]
    fn test_unparseable_date_kept_verbatim() {
        assert_eq!(normalize_date("n/a"), "n/a");
        assert_eq!(normalize_date(""), "");
    }

    #[test]
    fn test_encoded_word_subject_decoded() {
        let raw = b"Message-ID: <e@x>\r\nSubject: =?UTF-8?B?w6l0w6k=?= report\r\nFrom: a@x\r\n\r\nbody\r\n";
        let emails = expand_message(raw, 100).unwrap();
        let email = emails[0].as_ref().unwrap();
        assert_eq!(email.subject, "\u{e9}t\u{e9} report");
    }

    #[test]
    fn test_bad_encoded_word_does_not_fail() {
        let raw = b"Message-ID: <e@x>\r\nSubject: =?bogus-charset?Q?x?=\r\n\r\nbody\r\n";
        let emails = expand_message(raw, 100).unwrap();
        assert!(emails[0].is_ok());
    }

    #[test]
    fn test_multipart_keeps_only_plain_text_in_order() {
        let raw = concat!(
            "Message-ID: <m@x>\r\n",
            "Subject: multi\r\n",
            "Content-Type: multipart/mixed; boundary=\"b1\"\r\n",
            "\r\n",
            "--b1\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "first\r\n",
            "--b1\r\n",
            "Content-Type: text/html\r\n",
            "\r\n",
            "<p>html</p>\r\n",
            "--b1\r\n",
            "Content-Type: application/octet-stream\r\n",
            "Content-Transfer-Encoding: base64\r\n",
            "\r\n",
            "AAEC\r\n",
            "--b1\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "second\r\n",
            "--b1--\r\n",
        );
        let emails = expand_message(raw.as_bytes(), 100).unwrap();
        let body = &emails[0].as_ref().unwrap().body;
        assert!(body.contains("first"));
        assert!(body.contains("second"));
        assert!(body.find("first").unwrap() < body.find("second").unwrap());
        assert!(!body.contains("html"));
    }

    #[test]
    fn test_digest_expands_embedded_messages() {
        let raw = concat!(
            "Message-ID: <digest@x>\r\n",
            "Subject: list digest\r\n",
            "Content-Type: multipart/digest; boundary=\"d\"\r\n",
            "\r\n",
            "--d\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "Topics (2)\r\n",
            "--d\r\n",
            "\r\n",
            "Message-ID: <one@x>\r\n",
            "Subject: [PATCH] one\r\n",
            "\r\n",
            "body one\r\n",
            "--d\r\n",
            "Content-Type: message/rfc822\r\n",
            "\r\n",
            "Message-ID: <two@x>\r\n",
            "Subject: Re: [PATCH] one\r\n",
            "In-Reply-To: <one@x>\r\n",
            "\r\n",
            "body two\r\n",
            "--d--\r\n",
        );
        let emails: Vec<Email> = expand_message(raw.as_bytes(), 100)
            .unwrap()
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(emails.len(), 2);
        assert_eq!(emails[0].message_id, "one@x");
        assert_eq!(emails[1].message_id, "two@x");
        assert_eq!(emails[1].in_reply_to, "one@x");
        assert!(emails[1].body.contains("body two"));
    }

    #[test]
    fn test_digest_keeps_plain_text_parts() {
        let raw = concat!(
            "Message-ID: <digest@x>\r\n",
            "Subject: list digest\r\n",
            "Content-Type: multipart/digest; boundary=\"d\"\r\n",
            "\r\n",
            "--d\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "Today's Topics (1)\r\n",
            "  1. [PATCH] one\r\n",
            "--d\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "Administrivia: the list moves next week.\r\n",
            "--d\r\n",
            "\r\n",
            "Message-ID: <one@x>\r\n",
            "Subject: [PATCH] one\r\n",
            "\r\n",
            "body one\r\n",
            "--d--\r\n",
        );
        let emails: Vec<Email> = expand_message(raw.as_bytes(), 100)
            .unwrap()
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(emails.len(), 2);
        assert!(emails[0].message_id.is_empty());
        assert!(emails[0].body.contains("Administrivia"));
        assert!(!emails[0].raw_excerpt.is_empty());
        assert_eq!(emails[1].message_id, "one@x");
    }

    #[test]
    fn test_table_of_contents_detection() {
        assert!(is_table_of_contents("Topics (3)\n 1. foo"));
        assert!(is_table_of_contents("Today's Topics (12):\n"));
        assert!(!is_table_of_contents("Hi all, a note about Topics"));
        let late = format!("{}Topics (1)", "x".repeat(120));
        assert!(!is_table_of_contents(&late));
    }

    #[test]
    fn test_excerpt_is_bounded() {
        assert_eq!(excerpt("héllo world".as_bytes(), 5), "héllo");
    }
}
