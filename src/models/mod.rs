//! Core data models for package search.

mod item;
mod page;
mod query;

pub use item::{DisplayMetadata, ItemKey, PackageItem};
pub use page::{ContinuationToken, ResultPage};
pub use query::Query;
