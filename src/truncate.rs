//! Token-budget content selection for long threads.
//!
//! Size is estimated from character count (`chars / chars_per_token`). When
//! a thread is over the model's safe input ceiling, a subset is kept:
//!
//! - the first (root) message;
//! - up to `keep_submissions` patch or RFC postings, earliest first;
//! - the last `keep_tail` messages.
//!
//! The subset is de-duplicated by identity and stays in chronological order.
//! If it is still over budget, bodies are clipped evenly. The result depends
//! only on the input, so repeated calls return identical selections.

use std::collections::{BTreeSet, HashSet};

use crate::config::LlmConfig;
use crate::models::Email;
use crate::thread::is_submission;

const CLIP_MARKER: &str = "\n[... truncated ...]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBudget {
    pub safe_input_tokens: usize,
    pub chars_per_token: usize,
    pub keep_submissions: usize,
    pub keep_tail: usize,
}

/// Result of [`TokenBudget::select`].
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub emails: Vec<Email>,
    /// Members left out entirely.
    pub omitted: usize,
    /// True when bodies were clipped.
    pub clipped: bool,
}

impl Selection {
    pub fn truncated(&self) -> bool {
        self.omitted > 0 || self.clipped
    }
}

impl TokenBudget {
    pub fn from_config(llm: &LlmConfig) -> Self {
        Self {
            safe_input_tokens: llm.safe_input_tokens,
            chars_per_token: llm.chars_per_token.max(1),
            keep_submissions: llm.keep_submissions,
            keep_tail: llm.keep_tail,
        }
    }

    pub fn estimate_tokens(&self, text: &str) -> usize {
        text.chars().count().div_ceil(self.chars_per_token.max(1))
    }

    fn email_tokens(&self, email: &Email) -> usize {
        self.estimate_tokens(&email.subject)
            + self.estimate_tokens(&email.sender)
            + self.estimate_tokens(&email.body)
    }

    pub fn total_tokens(&self, emails: &[Email]) -> usize {
        emails.iter().map(|e| self.email_tokens(e)).sum()
    }

    /// Choose what to send for `emails`, which must be in chronological order.
    pub fn select(&self, emails: &[Email]) -> Selection {
        if self.total_tokens(emails) <= self.safe_input_tokens {
            return Selection {
                emails: emails.to_vec(),
                omitted: 0,
                clipped: false,
            };
        }

        let mut keep: BTreeSet<usize> = BTreeSet::new();
        if !emails.is_empty() {
            keep.insert(0);
        }
        keep.extend(
            emails
                .iter()
                .enumerate()
                .skip(1)
                .filter(|(_, e)| is_submission(&e.subject))
                .map(|(i, _)| i)
                .take(self.keep_submissions),
        );
        keep.extend(emails.len().saturating_sub(self.keep_tail)..emails.len());

        let mut seen: HashSet<&str> = HashSet::new();
        let mut selected: Vec<Email> = keep
            .into_iter()
            .map(|i| &emails[i])
            .filter(|e| seen.insert(e.message_id.as_str()))
            .cloned()
            .collect();
        let omitted = emails.len() - selected.len();

        let mut clipped = false;
        if self.total_tokens(&selected) > self.safe_input_tokens && !selected.is_empty() {
            clipped = self.clip_bodies(&mut selected);
        }

        Selection {
            emails: selected,
            omitted,
            clipped,
        }
    }

    /// Give every body an equal share of what headers leave over.
    fn clip_bodies(&self, emails: &mut [Email]) -> bool {
        let header_tokens: usize = emails
            .iter()
            .map(|e| self.estimate_tokens(&e.subject) + self.estimate_tokens(&e.sender))
            .sum();
        let remaining = self.safe_input_tokens.saturating_sub(header_tokens);
        let per_body_chars = (remaining / emails.len()) * self.chars_per_token;
        let allowance = per_body_chars.saturating_sub(CLIP_MARKER.len());

        let mut clipped = false;
        for email in emails.iter_mut() {
            if email.body.chars().count() > per_body_chars {
                let mut body: String = email.body.chars().take(allowance).collect();
                body.push_str(CLIP_MARKER);
                email.body = body;
                clipped = true;
            }
        }
        clipped
    }
}
