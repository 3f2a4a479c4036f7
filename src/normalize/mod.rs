//! Multi-format message normalization.
//!
//! Turns archive bytes into canonical [`Email`] records. Three encodings are
//! supported:
//!
//! | Format | Container | Entry |
//! |--------|-----------|-------|
//! | [`ArchiveFormat::Mbox`] | `From `-separated file | one RFC 822 message (digests expand) |
//! | [`ArchiveFormat::Atom`] | `<feed>` document | one `<entry>` |
//! | [`ArchiveFormat::Eml`] | the file itself | one RFC 822 message (digests expand) |
//!
//! [`normalize`] validates the container up front and returns a
//! [`Normalized`] handle. Entries are parsed lazily by [`Normalized::iter`];
//! each call starts a fresh pass over the same entries, and passes are
//! identical, including the identities synthesized for messages without a
//! `Message-ID`.
//!
//! A malformed entry surfaces as `Err(FormatError::Entry)` in the stream and
//! the stream continues. Only an unreadable container fails [`normalize`].

mod atom;
mod eml;
mod mbox;
mod mime;

pub use mime::{clean_message_id, excerpt, normalize_date, parse_references};

use std::collections::VecDeque;
use std::ops::Range;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tracing::warn;

use crate::error::FormatError;
use crate::models::Email;

/// Input encoding of an archive payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Mbox,
    Atom,
    Eml,
}

impl ArchiveFormat {
    /// Guess the format from a file name, ignoring a trailing `.gz`.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        let name = name.strip_suffix(".gz").unwrap_or(&name);
        let ext = Path::new(name).extension()?.to_str()?;
        Self::parse(ext)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mbox" | "mbx" => Some(ArchiveFormat::Mbox),
            "atom" | "xml" => Some(ArchiveFormat::Atom),
            "eml" | "msg" | "rfc822" => Some(ArchiveFormat::Eml),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    pub raw_excerpt_chars: usize,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            raw_excerpt_chars: 1000,
        }
    }
}

#[derive(Debug, Clone)]
enum Entry {
    Span(Range<usize>),
    Broken(String),
}

/// A validated container whose entries have not been parsed yet.
#[derive(Debug)]
pub struct Normalized<'a> {
    bytes: &'a [u8],
    format: ArchiveFormat,
    entries: Vec<Entry>,
    stamp: String,
    excerpt_chars: usize,
}

/// Emails and entry errors from one full pass.
#[derive(Debug, Default)]
pub struct NormalizedBatch {
    pub emails: Vec<Email>,
    pub errors: Vec<FormatError>,
}

static RUN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Validate the container and locate its entries.
pub fn normalize<'a>(
    bytes: &'a [u8],
    format: ArchiveFormat,
    options: &NormalizeOptions,
) -> Result<Normalized<'a>, FormatError> {
    let entries = match format {
        ArchiveFormat::Mbox => mbox::split(bytes)?.into_iter().map(Entry::Span).collect(),
        ArchiveFormat::Atom => atom::scan_entries(bytes)?
            .into_iter()
            .map(|span| match span {
                Ok(range) => Entry::Span(range),
                Err(reason) => Entry::Broken(reason),
            })
            .collect(),
        ArchiveFormat::Eml => vec![Entry::Span(eml::message_span(bytes))],
    };

    let stamp = format!(
        "{}.{}",
        Utc::now().format("%Y%m%d%H%M%S"),
        RUN_COUNTER.fetch_add(1, Ordering::Relaxed)
    );

    Ok(Normalized {
        bytes,
        format,
        entries,
        stamp,
        excerpt_chars: options.raw_excerpt_chars,
    })
}

impl<'a> Normalized<'a> {
    /// Number of container entries (a digest counts once).
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Start a new lazy pass over the entries.
    pub fn iter(&self) -> Emails<'_, 'a> {
        Emails {
            source: self,
            next_entry: 0,
            synthesized: 0,
            pending: VecDeque::new(),
        }
    }

    /// Run one full pass, logging each skipped entry.
    pub fn collect_batch(&self) -> NormalizedBatch {
        let mut batch = NormalizedBatch::default();
        for item in self.iter() {
            match item {
                Ok(email) => batch.emails.push(email),
                Err(e) => {
                    warn!(format = ?self.format, error = %e, "skipping malformed entry");
                    batch.errors.push(e);
                }
            }
        }
        batch
    }

    fn expand(&self, index: usize) -> Vec<Result<Email, FormatError>> {
        let range = match &self.entries[index] {
            Entry::Span(range) => range.clone(),
            Entry::Broken(reason) => return vec![Err(FormatError::entry(index, reason.clone()))],
        };
        let slice = &self.bytes[range];

        let parsed = match self.format {
            ArchiveFormat::Atom => Ok(vec![atom::parse_entry(slice, self.excerpt_chars)]),
            ArchiveFormat::Mbox => mime::expand_message(&mbox::unescape(slice), self.excerpt_chars),
            ArchiveFormat::Eml => mime::expand_message(slice, self.excerpt_chars),
        };

        match parsed {
            Ok(items) => items
                .into_iter()
                .map(|r| r.map_err(|reason| FormatError::entry(index, reason)))
                .collect(),
            Err(reason) => vec![Err(FormatError::entry(index, reason))],
        }
    }
}

impl<'n, 'a> IntoIterator for &'n Normalized<'a> {
    type Item = Result<Email, FormatError>;
    type IntoIter = Emails<'n, 'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Lazy stream of emails from a [`Normalized`] container.
pub struct Emails<'n, 'a> {
    source: &'n Normalized<'a>,
    next_entry: usize,
    synthesized: u64,
    pending: VecDeque<Result<Email, FormatError>>,
}

impl Emails<'_, '_> {
    fn fill_identity(&mut self, mut email: Email) -> Email {
        if email.message_id.is_empty() {
            self.synthesized += 1;
            email.message_id = format!(
                "synthetic.{}.{}@list-digest.invalid",
                self.source.stamp, self.synthesized
            );
        }
        email
    }
}

impl Iterator for Emails<'_, '_> {
    type Item = Result<Email, FormatError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Some(item.map(|email| self.fill_identity(email)));
            }
            if self.next_entry >= self.source.entries.len() {
                return None;
            }
            let index = self.next_entry;
            self.next_entry += 1;
            self.pending.extend(self.source.expand(index));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MBOX: &str = "From a@x Fri Oct 18 10:00:00 2024\n\
Message-ID: <a@x>\n\
Subject: [PATCH] fix\n\
From: Alice <alice@x>\n\
Date: Fri, 18 Oct 2024 10:00:00 +0000\n\
\n\
patch body\n\
>From here on\n\
From b@x Fri Oct 18 11:00:00 2024\n\
Subject: no id here\n\
From: Bob <bob@x>\n\
\n\
reply\n\
From c@x Fri Oct 18 12:00:00 2024\n\
Subject: also missing\n\
\n\
text\n";

    #[test]
    fn test_format_from_path() {
        assert_eq!(
            ArchiveFormat::from_path(Path::new("2024-10-18.mbox.gz")),
            Some(ArchiveFormat::Mbox)
        );
        assert_eq!(
            ArchiveFormat::from_path(Path::new("new.atom")),
            Some(ArchiveFormat::Atom)
        );
        assert_eq!(
            ArchiveFormat::from_path(Path::new("msg.EML")),
            Some(ArchiveFormat::Eml)
        );
        assert_eq!(ArchiveFormat::from_path(Path::new("notes.txt")), None);
    }

    #[test]
    fn test_mbox_normalizes_and_unescapes() {
        let normalized = normalize(MBOX.as_bytes(), ArchiveFormat::Mbox, &Default::default()).unwrap();
        let batch = normalized.collect_batch();
        assert!(batch.errors.is_empty());
        assert_eq!(batch.emails.len(), 3);
        assert_eq!(batch.emails[0].message_id, "a@x");
        assert!(batch.emails[0].body.contains("From here on"));
        assert!(!batch.emails[0].body.contains(">From"));
    }

    #[test]
    fn test_synthesized_ids_unique_and_restartable() {
        let normalized = normalize(MBOX.as_bytes(), ArchiveFormat::Mbox, &Default::default()).unwrap();
        let first: Vec<String> = normalized
            .iter()
            .map(|r| r.unwrap().message_id)
            .collect();
        let second: Vec<String> = normalized
            .iter()
            .map(|r| r.unwrap().message_id)
            .collect();

        assert_eq!(first, second);
        assert!(first.iter().all(|id| !id.is_empty()));
        assert_ne!(first[1], first[2]);
        assert!(first[1].starts_with("synthetic."));
    }

    #[test]
    fn test_separate_runs_do_not_collide() {
        let one = normalize(MBOX.as_bytes(), ArchiveFormat::Mbox, &Default::default()).unwrap();
        let two = normalize(MBOX.as_bytes(), ArchiveFormat::Mbox, &Default::default()).unwrap();
        let a: Vec<String> = one.iter().map(|r| r.unwrap().message_id).collect();
        let b: Vec<String> = two.iter().map(|r| r.unwrap().message_id).collect();
        assert_ne!(a[1], b[1]);
    }

    #[test]
    fn test_bad_mbox_entry_is_skipped() {
        let mbox = "From a@x Fri Oct 18 10:00:00 2024\n\
\n\
From b@x Fri Oct 18 11:00:00 2024\n\
Message-ID: <b@x>\n\
Subject: ok\n\
\n\
fine\n";
        let normalized = normalize(mbox.as_bytes(), ArchiveFormat::Mbox, &Default::default()).unwrap();
        let batch = normalized.collect_batch();
        assert_eq!(batch.emails.len(), 1);
        assert_eq!(batch.errors.len(), 1);
        assert!(matches!(batch.errors[0], FormatError::Entry { position: 0, .. }));
    }

    #[test]
    fn test_atom_valid_plus_truncated_entry() {
        let feed = r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom">
<entry><id>urn:uuid:good</id><title>ok</title><author><name>A</name></author>
<updated>2024-10-18T10:00:00Z</updated><content>hello</content></entry>
<entry><id>urn:uuid:cut</id><title>trun"#;
        let normalized = normalize(feed.as_bytes(), ArchiveFormat::Atom, &Default::default()).unwrap();
        let batch = normalized.collect_batch();
        assert_eq!(batch.emails.len(), 1);
        assert_eq!(batch.emails[0].message_id, "good");
        assert_eq!(batch.errors.len(), 1);
    }

    #[test]
    fn test_unreadable_atom_container_is_hard_error() {
        let err = normalize(b"<html>denied</html>", ArchiveFormat::Atom, &Default::default()).unwrap_err();
        assert!(matches!(err, FormatError::Container(_)));
    }

    #[test]
    fn test_eml_single_message() {
        let raw = b"Message-ID: <only@x>\r\nSubject: hi\r\n\r\nbody\r\n";
        let normalized = normalize(raw, ArchiveFormat::Eml, &Default::default()).unwrap();
        let emails: Vec<Email> = normalized.iter().map(|r| r.unwrap()).collect();
        assert_eq!(emails.len(), 1);
        assert_eq!(emails[0].message_id, "only@x");
    }

    #[test]
    fn test_eml_digest_counts_once_and_names_plain_parts() {
        let raw = concat!(
            "Message-ID: <digest@x>\r\n",
            "Content-Type: multipart/digest; boundary=\"d\"\r\n",
            "\r\n",
            "--d\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "Topics (1)\r\n",
            "--d\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "A note from the list owner.\r\n",
            "--d\r\n",
            "\r\n",
            "Message-ID: <one@x>\r\n",
            "Subject: one\r\n",
            "\r\n",
            "body\r\n",
            "--d--\r\n",
        );
        let normalized = normalize(raw.as_bytes(), ArchiveFormat::Eml, &Default::default()).unwrap();
        assert_eq!(normalized.entry_count(), 1);
        let emails: Vec<Email> = normalized.iter().map(|r| r.unwrap()).collect();
        assert_eq!(emails.len(), 2);
        assert!(emails[0].message_id.starts_with("synthetic."));
        assert_eq!(emails[1].message_id, "one@x");
    }
}
