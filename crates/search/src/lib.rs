//! LexForge Search
//!
//! Typed access to the fragment index:
//! - `FragmentStore`: keyword, vector, hybrid, and semantic-ranked search
//! - Access filtering by caller group claims, evaluated by the index
//! - Filter expressions for category restrictions
//! - Reciprocal rank fusion for the in-process hybrid mode

pub mod access;
pub mod filter;
pub mod fusion;
pub mod store;

pub use access::build_filter;
pub use filter::{FilterBuilder, FilterExpression};
pub use store::{
    create_store, FragmentStore, HttpIndexClient, MemoryFragmentStore, SearchRequest, DEFAULT_TOP,
    MAX_TOP,
};
