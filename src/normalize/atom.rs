//! Atom feed handling (public-inbox style feeds).
//!
//! The feed is scanned once with `quick-xml` to validate the root element and
//! locate each `<entry>`; entries are parsed individually later. A broken
//! root is a container error. A broken or truncated entry becomes an entry
//! error, and scanning stops there because the reader cannot resynchronize
//! past malformed markup.

use std::borrow::Cow;
use std::ops::Range;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::FormatError;
use crate::models::Email;

use super::mime::{clean_message_id, excerpt, normalize_date};

/// Entry spans in document order, or the reason an entry is unusable.
pub(crate) type EntrySpan = Result<Range<usize>, String>;

pub(crate) fn scan_entries(xml: &[u8]) -> Result<Vec<EntrySpan>, FormatError> {
    let mut reader = Reader::from_reader(xml);
    let mut entries = Vec::new();
    let mut depth = 0usize;
    let mut root_seen = false;
    let mut open_entry: Option<usize> = None;

    loop {
        let before = reader.buffer_position() as usize;
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if depth == 0 {
                    check_root(&e)?;
                    root_seen = true;
                } else if depth == 1 && e.local_name().as_ref() == b"entry" {
                    open_entry = Some(before);
                }
                depth += 1;
            }
            Ok(Event::Empty(e)) => {
                if depth == 0 {
                    check_root(&e)?;
                    root_seen = true;
                    break;
                }
                if depth == 1 && e.local_name().as_ref() == b"entry" {
                    entries.push(Err("empty <entry/> element".to_string()));
                }
            }
            Ok(Event::End(e)) => {
                depth = depth.saturating_sub(1);
                if depth == 1 && e.local_name().as_ref() == b"entry" {
                    if let Some(start) = open_entry.take() {
                        entries.push(Ok(start..reader.buffer_position() as usize));
                    }
                }
                if depth == 0 {
                    break;
                }
            }
            Ok(Event::Eof) => {
                if !root_seen {
                    return Err(FormatError::Container("no XML root element".to_string()));
                }
                if open_entry.is_some() {
                    entries.push(Err("entry truncated before </entry>".to_string()));
                }
                break;
            }
            Err(e) => {
                if !root_seen {
                    return Err(FormatError::Container(e.to_string()));
                }
                if open_entry.take().is_some() {
                    entries.push(Err(format!("malformed entry XML: {}", e)));
                }
                break;
            }
            Ok(_) => {}
        }
    }

    Ok(entries)
}

fn check_root(e: &BytesStart) -> Result<(), FormatError> {
    if e.local_name().as_ref() == b"feed" {
        Ok(())
    } else {
        Err(FormatError::Container(format!(
            "root element is <{}>, expected <feed>",
            String::from_utf8_lossy(e.local_name().as_ref())
        )))
    }
}

/// Fields collected from one `<entry>`.
#[derive(Debug, Default)]
struct AtomEntry {
    id: String,
    title: String,
    updated: String,
    published: String,
    author_name: String,
    author_email: String,
    in_reply_to: String,
    content: String,
}

pub(crate) fn parse_entry(xml: &[u8], excerpt_chars: usize) -> Result<Email, String> {
    let mut reader = Reader::from_reader(xml);
    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut entry = AtomEntry::default();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                capture_reply_ref(&e, &mut entry);
                path.push(e.local_name().as_ref().to_vec());
            }
            Ok(Event::Empty(e)) => capture_reply_ref(&e, &mut entry),
            Ok(Event::End(_)) => {
                path.pop();
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .unwrap_or_else(|_| Cow::Owned(String::from_utf8_lossy(&t).into_owned()));
                append_text(&path, &text, &mut entry);
            }
            Ok(Event::CData(c)) => {
                let text = String::from_utf8_lossy(&c).into_owned();
                append_text(&path, &text, &mut entry);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("malformed entry XML: {}", e)),
            Ok(_) => {}
        }
    }

    let sender = match (entry.author_name.trim(), entry.author_email.trim()) {
        ("", email) => email.to_string(),
        (name, "") => name.to_string(),
        (name, email) => format!("{} <{}>", name, email),
    };
    let date = if entry.updated.trim().is_empty() {
        &entry.published
    } else {
        &entry.updated
    };
    let in_reply_to = strip_urn(&entry.in_reply_to);

    Ok(Email {
        message_id: strip_urn(&entry.id),
        subject: entry.title.trim().to_string(),
        sender,
        date: normalize_date(date),
        references: if in_reply_to.is_empty() {
            Vec::new()
        } else {
            vec![in_reply_to.clone()]
        },
        in_reply_to,
        body: entry.content.trim().to_string(),
        raw_excerpt: excerpt(xml, excerpt_chars).trim_start().to_string(),
    })
}

fn capture_reply_ref(e: &BytesStart, entry: &mut AtomEntry) {
    if e.local_name().as_ref() != b"in-reply-to" {
        return;
    }
    for key in ["ref", "href"] {
        if let Ok(Some(attr)) = e.try_get_attribute(key) {
            if let Ok(value) = attr.unescape_value() {
                if !value.trim().is_empty() {
                    entry.in_reply_to = value.into_owned();
                    return;
                }
            }
        }
    }
}

fn append_text(path: &[Vec<u8>], text: &str, entry: &mut AtomEntry) {
    let names: Vec<&[u8]> = path.iter().map(|n| n.as_slice()).collect();
    if names.contains(&b"content".as_slice()) {
        entry.content.push_str(text);
        return;
    }
    match names.as_slice() {
        [.., b"entry", b"id"] => entry.id.push_str(text),
        [.., b"entry", b"title"] => entry.title.push_str(text),
        [.., b"entry", b"updated"] => entry.updated.push_str(text),
        [.., b"entry", b"published"] => entry.published.push_str(text),
        [.., b"author", b"name"] => entry.author_name.push_str(text),
        [.., b"author", b"email"] => entry.author_email.push_str(text),
        _ => {}
    }
}

fn strip_urn(value: &str) -> String {
    let trimmed = value.trim();
    clean_message_id(trimmed.strip_prefix("urn:uuid:").unwrap_or(trimmed))
}
