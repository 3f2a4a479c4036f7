//! Thread reconstruction from reply-chain headers.
//!
//! Every email is mapped to a root by walking parent pointers over a static
//! `message_id -> Email` index built from the batch:
//!
//! 1. `in_reply_to`, if that identity is in the index;
//! 2. otherwise the first `references` entry that is in the index;
//! 3. otherwise the email is its own root.
//!
//! The result depends only on the index, never on the order emails are
//! visited, so shuffled input yields the same partition.
//!
//! # Cycles
//!
//! Broken clients occasionally produce reference loops (`A -> B -> A`). The
//! walk carries an explicit visited set; when an identity repeats, the walk
//! stops and the loop members are collapsed onto one representative: the
//! earliest member by `(date, message_id)`. Every walk that enters the loop
//! picks the same representative, so all loop members land in one thread.
//! This is a heuristic and may merge unrelated emails when headers are
//! corrupt; each occurrence is logged as a data-quality warning.
//!
//! A reply whose real root is absent from the batch becomes the root of its
//! own thread. Partial archives therefore produce synthetic roots.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use tracing::warn;

use crate::models::{Email, ThreadMeta};

/// Output of [`resolve_threads`].
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ThreadPartition {
    /// Root identity to members, members ordered by `(date, message_id)`.
    pub threads: BTreeMap<String, Vec<Email>>,
    /// Each distinct reference loop found, as a sorted list of identities.
    pub cycles: Vec<Vec<String>>,
}

/// Where a walk ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootResolution<'a> {
    pub root: &'a str,
    /// Loop members when the walk hit a cycle, sorted.
    pub cycle: Option<Vec<String>>,
}

/// Typed identity -> email map for one batch.
pub struct ThreadIndex<'a> {
    by_id: HashMap<&'a str, &'a Email>,
}

impl<'a> ThreadIndex<'a> {
    /// Index a batch. When an identity occurs twice the first occurrence wins.
    pub fn new(emails: &'a [Email]) -> Self {
        let mut by_id = HashMap::with_capacity(emails.len());
        for email in emails {
            if !email.message_id.is_empty() {
                by_id.entry(email.message_id.as_str()).or_insert(email);
            }
        }
        Self { by_id }
    }

    pub fn get(&self, message_id: &str) -> Option<&'a Email> {
        self.by_id.get(message_id).copied()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// The indexed parent of `email`, if any.
    pub fn parent_of(&self, email: &Email) -> Option<&'a Email> {
        if !email.in_reply_to.is_empty() {
            if let Some(parent) = self.get(&email.in_reply_to) {
                return Some(parent);
            }
        }
        email.references.iter().find_map(|r| self.get(r))
    }

    /// Walk parent pointers from `email` to its root.
    ///
    /// `visited` is cleared first and holds the walked identities afterwards.
    pub fn resolve_root(
        &self,
        email: &'a Email,
        visited: &mut HashSet<&'a str>,
    ) -> RootResolution<'a> {
        visited.clear();
        let mut path: Vec<&'a Email> = Vec::new();
        let mut current = email;

        loop {
            if !visited.insert(current.message_id.as_str()) {
                let start = path
                    .iter()
                    .position(|e| e.message_id == current.message_id)
                    .unwrap_or(0);
                let members = &path[start..];
                let representative = members
                    .iter()
                    .min_by(|a, b| (&a.date, &a.message_id).cmp(&(&b.date, &b.message_id)))
                    .copied()
                    .unwrap_or(current);
                let mut cycle: Vec<String> =
                    members.iter().map(|e| e.message_id.clone()).collect();
                cycle.sort();
                return RootResolution {
                    root: representative.message_id.as_str(),
                    cycle: Some(cycle),
                };
            }
            path.push(current);

            match self.parent_of(current) {
                Some(parent) => current = parent,
                None => {
                    return RootResolution {
                        root: current.message_id.as_str(),
                        cycle: None,
                    }
                }
            }
        }
    }
}

/// Partition a batch into threads.
///
/// Emails repeating an identity already seen in the batch are dropped, as
/// are emails with an empty identity.
pub fn resolve_threads(emails: &[Email]) -> ThreadPartition {
    let index = ThreadIndex::new(emails);
    let mut visited = HashSet::new();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut threads: BTreeMap<String, Vec<Email>> = BTreeMap::new();
    let mut cycles: BTreeSet<Vec<String>> = BTreeSet::new();

    for email in emails {
        if email.message_id.is_empty() || !seen.insert(email.message_id.as_str()) {
            continue;
        }
        let resolution = index.resolve_root(email, &mut visited);
        if let Some(cycle) = resolution.cycle {
            if cycles.insert(cycle.clone()) {
                warn!(
                    members = ?cycle,
                    root = resolution.root,
                    "reference cycle detected; collapsed onto earliest member"
                );
            }
        }
        threads
            .entry(resolution.root.to_string())
            .or_default()
            .push(email.clone());
    }

    for members in threads.values_mut() {
        members.sort_by(|a, b| (&a.date, &a.message_id).cmp(&(&b.date, &b.message_id)));
    }

    ThreadPartition {
        threads,
        cycles: cycles.into_iter().collect(),
    }
}

/// Aggregate fields for one thread.
///
/// Dates are compared as strings, which is chronological for the UTC
/// RFC 3339 form the normalizer emits. Empty dates are ignored.
pub fn get_thread_metadata(root_message_id: &str, members: &[Email]) -> ThreadMeta {
    let root = members
        .iter()
        .find(|e| e.message_id == root_message_id)
        .or_else(|| members.first());
    let subject = root.map(|e| e.subject.clone()).unwrap_or_default();

    let participants: HashSet<&str> = members
        .iter()
        .map(|e| e.sender.trim())
        .filter(|s| !s.is_empty())
        .collect();
    let dates = members.iter().map(|e| e.date.as_str()).filter(|d| !d.is_empty());

    ThreadMeta {
        root_message_id: root_message_id.to_string(),
        tags: extract_tags(&subject),
        subject,
        participant_count: participants.len() as i64,
        email_count: members.len() as i64,
        first_post: dates.clone().min().map(str::to_string),
        last_post: dates.max().map(str::to_string),
    }
}

/// Tokens inside square brackets, in order, without duplicates.
///
/// `"[PATCH v2 net-next] tcp: ..."` -> `["PATCH", "v2", "net-next"]`.
pub fn extract_tags(subject: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    let mut rest = subject;
    while let Some(open) = rest.find('[') {
        let after = &rest[open + 1..];
        let Some(close) = after.find(']') else { break };
        for token in after[..close].split_whitespace() {
            if !tags.iter().any(|t| t == token) {
                tags.push(token.to_string());
            }
        }
        rest = &after[close + 1..];
    }
    tags
}

/// True for a patch or RFC posting rather than a reply to one.
pub fn is_submission(subject: &str) -> bool {
    let lowered = subject.trim_start().to_ascii_lowercase();
    if lowered.starts_with("re:") || lowered.starts_with("aw:") {
        return false;
    }
    extract_tags(subject).iter().any(|t| {
        let upper = t.to_ascii_uppercase();
        upper.starts_with("PATCH") || upper == "RFC"
    })
}
