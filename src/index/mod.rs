//! Series index collaborators
//!
//! Series key to series id resolution used by the shards when building
//! cursors. Keys are opaque bytes (see [`crate::types::series_key`]).

pub mod cache;

pub use cache::{SeriesIndexCache, SeriesIndexStats};
