//! Inline citation marker scanning
//!
//! Generated text is fed in as it streams. Complete `[a, b, c]` markers are
//! checked against the citation keys that were actually supplied to the
//! model; a marker split across two deltas is picked up once its closing
//! bracket arrives.

use lexforge_common::CitationKey;
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Longest bracketed span still treated as a possible marker
pub const MAX_MARKER_LEN: usize = 240;

/// What the scanner saw over a whole answer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanOutcome {
    pub text: String,
    /// Supplied keys referenced by the text, first-referenced order
    pub referenced: Vec<CitationKey>,
    /// Markers that name no supplied fragment, as written
    pub mismatches: Vec<String>,
}

pub struct CitationScanner {
    /// Supplied keys by their rendered marker text, commas and all
    rendered: HashMap<String, CitationKey>,
    known: HashSet<CitationKey>,
    text: String,
    cursor: usize,
    referenced: Vec<CitationKey>,
    seen: HashSet<CitationKey>,
    mismatches: Vec<String>,
}

impl CitationScanner {
    pub fn new(known: impl IntoIterator<Item = CitationKey>) -> Self {
        let known: HashSet<CitationKey> = known.into_iter().collect();
        let rendered = known.iter().map(|key| (marker_text(key), key.clone())).collect();
        Self {
            rendered,
            known,
            text: String::new(),
            cursor: 0,
            referenced: Vec::new(),
            seen: HashSet::new(),
            mismatches: Vec::new(),
        }
    }

    /// Append a delta and inspect every marker it completes
    pub fn push(&mut self, delta: &str) {
        self.text.push_str(delta);
        self.scan();
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn referenced(&self) -> &[CitationKey] {
        &self.referenced
    }

    pub fn mismatches(&self) -> &[String] {
        &self.mismatches
    }

    /// An unclosed bracket at the end of the text is not a marker
    pub fn finish(self) -> ScanOutcome {
        ScanOutcome {
            text: self.text,
            referenced: self.referenced,
            mismatches: self.mismatches,
        }
    }

    fn scan(&mut self) {
        loop {
            let Some(offset) = self.text[self.cursor..].find('[') else {
                self.cursor = self.text.len();
                return;
            };
            let open = self.cursor + offset;
            let body_start = open + 1;
            let body = &self.text[body_start..];

            match body.find(['[', ']']) {
                None => {
                    // Wait for the closing bracket unless this cannot be a marker
                    self.cursor = if body.len() > MAX_MARKER_LEN { body_start } else { open };
                    return;
                }
                Some(end) if body.as_bytes()[end] == b'[' => {
                    self.cursor = body_start + end;
                }
                Some(end) => {
                    let inner = body[..end].to_string();
                    self.cursor = body_start + end + 1;
                    self.inspect(&inner);
                }
            }
        }
    }

    fn inspect(&mut self, inner: &str) {
        if inner.len() > MAX_MARKER_LEN {
            return;
        }
        // Parts may contain commas, so supplied keys match on their full text first
        let supplied = self.rendered.get(inner.trim()).cloned();
        let key = match supplied {
            Some(key) => key,
            // Footnotes, checkboxes and links are not three-part markers
            None => match CitationKey::parse_marker(inner) {
                Some(key) => key,
                None => return,
            },
        };

        if self.known.contains(&key) {
            if self.seen.insert(key.clone()) {
                self.referenced.push(key);
            }
        } else {
            let marker = format!("[{}]", inner);
            warn!(marker = %marker, "Answer cites a source that was not supplied");
            self.mismatches.push(marker);
        }
    }
}

/// Text between the brackets of `key`'s marker
fn marker_text(key: &CitationKey) -> String {
    format!("{}, {}, {}", key.subsection.trim(), key.source_page.trim(), key.source_file.trim())
}
