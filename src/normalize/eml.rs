//! Single-message RFC 822 files.
//!
//! Mail clients that save a message "as mbox" prefix it with a `From `
//! envelope line; that line is not a header and is dropped before parsing.

use std::ops::Range;

pub(crate) fn message_span(bytes: &[u8]) -> Range<usize> {
    if bytes.starts_with(b"From ") {
        if let Some(nl) = bytes.iter().position(|&b| b == b'\n') {
            return nl + 1..bytes.len();
        }
    }
    0..bytes.len()
}
