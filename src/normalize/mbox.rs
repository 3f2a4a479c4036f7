//! Unix mbox (mboxrd) splitting.
//!
//! Messages are separated by lines beginning with `From `. Body lines that
//! would look like a separator are stored as `>From `, with one extra `>`
//! per level of quoting; [`unescape`] reverses that.

use std::ops::Range;

use crate::error::FormatError;

const SEPARATOR: &[u8] = b"From ";

/// Byte ranges of each message body, excluding the `From ` separator line.
///
/// Anything before the first separator is ignored. A non-blank payload with
/// no separator at all is not an mbox and fails as a container error.
pub(crate) fn split(bytes: &[u8]) -> Result<Vec<Range<usize>>, FormatError> {
    let starts: Vec<usize> = line_starts(bytes)
        .filter(|&pos| bytes[pos..].starts_with(SEPARATOR))
        .collect();

    if starts.is_empty() {
        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(Vec::new());
        }
        return Err(FormatError::Container(
            "no mbox 'From ' separator found".to_string(),
        ));
    }

    let mut ranges = Vec::with_capacity(starts.len());
    for (i, &start) in starts.iter().enumerate() {
        let body_start = match bytes[start..].iter().position(|&b| b == b'\n') {
            Some(nl) => start + nl + 1,
            None => bytes.len(),
        };
        let end = starts.get(i + 1).copied().unwrap_or(bytes.len());
        ranges.push(body_start.min(end)..end);
    }
    Ok(ranges)
}

fn line_starts(bytes: &[u8]) -> impl Iterator<Item = usize> + '_ {
    std::iter::once(0).chain(
        bytes
            .iter()
            .enumerate()
            .filter_map(|(i, &b)| (b == b'\n').then_some(i + 1))
            .filter(move |&i| i < bytes.len()),
    )
}

/// Undo mboxrd quoting: `>From ` -> `From `, `>>From ` -> `>From `.
pub(crate) fn unescape(message: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(message.len());
    for line in message.split_inclusive(|&b| b == b'\n') {
        let quotes = line.iter().take_while(|&&b| b == b'>').count();
        if quotes > 0 && line[quotes..].starts_with(SEPARATOR) {
            out.extend_from_slice(&line[1..]);
        } else {
            out.extend_from_slice(line);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_two_messages() {
        let mbox = b"From a@x Mon Oct 18 10:00:00 2024\nSubject: one\n\nbody\nFrom b@x Mon Oct 18 11:00:00 2024\nSubject: two\n\nbody2\n";
        let ranges = split(mbox).unwrap();
        assert_eq!(ranges.len(), 2);
        assert!(mbox[ranges[0].clone()].starts_with(b"Subject: one"));
        assert!(mbox[ranges[1].clone()].starts_with(b"Subject: two"));
    }

    #[test]
    fn test_preamble_ignored() {
        let mbox = b"junk\nFrom a@x Mon Oct 18 10:00:00 2024\nSubject: one\n\nbody\n";
        assert_eq!(split(mbox).unwrap().len(), 1);
    }

    #[test]
    fn test_not_an_mbox() {
        assert!(matches!(
            split(b"<html>blocked</html>"),
            Err(FormatError::Container(_))
        ));
        assert!(split(b"  \n").unwrap().is_empty());
    }

    #[test]
    fn test_unescape_quoted_from() {
        let body = b"hello\n>From the start\n>>From nested\n> quoted\n";
        assert_eq!(
            unescape(body),
            b"hello\nFrom the start\n>From nested\n> quoted\n".to_vec()
        );
    }
}
