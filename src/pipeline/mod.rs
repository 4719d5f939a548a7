//! The write and query pipelines, and the query-intelligence stage that
//! feeds the query pipeline (spec §4.3, §4.4).

pub mod query;
pub mod understanding;
pub mod write;

pub use write::{clean_content, normalize_tags};
