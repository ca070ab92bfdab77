//! Source page parsing
//!
//! The only place that knows how document types encode a subsection inside
//! `sourcePage`. New formats get a new rule here.

/// Split `"<stem>-<sub>"` into `("<stem>", Some("<sub>"))`.
///
/// The suffix must start with a digit and hold only alphanumerics and dots,
/// so `"PD3E-1.1"` splits but `"Smith-v-Jones"` and `"15.4"` do not.
pub fn split_source_page(source_page: &str) -> (String, Option<String>) {
    let trimmed = source_page.trim();

    if let Some((stem, sub)) = trimmed.rsplit_once('-') {
        let stem = stem.trim();
        let sub = sub.trim();
        let sub_ok = sub.chars().next().is_some_and(|c| c.is_ascii_digit())
            && sub.chars().all(|c| c.is_alphanumeric() || c == '.');

        if !stem.is_empty() && sub_ok {
            return (stem.to_string(), Some(sub.to_string()));
        }
    }

    (trimmed.to_string(), None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_practice_direction_page() {
        assert_eq!(
            split_source_page("PD3E-1.1"),
            ("PD3E".to_string(), Some("1.1".to_string()))
        );
    }

    #[test]
    fn test_unsplittable_pages() {
        assert_eq!(split_source_page("15.4"), ("15.4".to_string(), None));
        assert_eq!(split_source_page("Smith-v-Jones"), ("Smith-v-Jones".to_string(), None));
        assert_eq!(split_source_page("-1.1"), ("-1.1".to_string(), None));
        assert_eq!(split_source_page("PD3E-"), ("PD3E-".to_string(), None));
    }

    #[test]
    fn test_last_hyphen_wins() {
        assert_eq!(
            split_source_page("PD-51Z-2"),
            ("PD-51Z".to_string(), Some("2".to_string()))
        );
    }
}
