//! Citation assembly: source page parsing and fragment normalization

mod key;
mod normalizer;

pub use key::split_source_page;
pub use normalizer::{canonicalize, dedupe, CitationNormalizer, Normalized};
