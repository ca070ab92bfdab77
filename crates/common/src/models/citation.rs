//! Canonical three-part citation key

use serde::{Deserialize, Serialize};
use std::fmt;

/// `[subsection, sourcePage, sourceFile]`
///
/// Used both as the inline marker the model emits and as the entry in the
/// final citation list.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CitationKey {
    pub subsection: String,
    pub source_page: String,
    pub source_file: String,
}

impl CitationKey {
    pub fn new(
        subsection: impl Into<String>,
        source_page: impl Into<String>,
        source_file: impl Into<String>,
    ) -> Self {
        Self {
            subsection: subsection.into(),
            source_page: source_page.into(),
            source_file: source_file.into(),
        }
    }

    /// Parse the text between `[` and `]` of an inline marker.
    ///
    /// The first two commas separate the parts; anything after the second
    /// comma belongs to the source file, which may itself contain commas.
    pub fn parse_marker(inner: &str) -> Option<Self> {
        let mut parts = inner.splitn(3, ',').map(str::trim);
        let subsection = parts.next().filter(|p| !p.is_empty())?;
        let source_page = parts.next().filter(|p| !p.is_empty())?;
        let source_file = parts.next().filter(|p| !p.is_empty())?;

        Some(Self::new(subsection, source_page, source_file))
    }

    /// Deduplication identity `(sourceFile, sourcePage, subsection)`
    pub fn identity(&self) -> (&str, &str, &str) {
        (&self.source_file, &self.source_page, &self.subsection)
    }
}

impl fmt::Display for CitationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}]", self.subsection, self.source_page, self.source_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_marker() {
        let key = CitationKey::parse_marker(" 1.1, PD3E , Practice Direction 3E").unwrap();
        assert_eq!(key, CitationKey::new("1.1", "PD3E", "Practice Direction 3E"));
        assert_eq!(key.to_string(), "[1.1, PD3E, Practice Direction 3E]");
    }

    #[test]
    fn test_parse_marker_keeps_commas_in_source_file() {
        let key = CitationKey::parse_marker("12, 12, Smith v Jones, Court of Appeal").unwrap();
        assert_eq!(key.source_file, "Smith v Jones, Court of Appeal");
    }

    #[test]
    fn test_parse_marker_rejects_short_forms() {
        assert!(CitationKey::parse_marker("1").is_none());
        assert!(CitationKey::parse_marker("15.4, CPR Part 15").is_none());
        assert!(CitationKey::parse_marker("15.4, , CPR Part 15").is_none());
    }
}
