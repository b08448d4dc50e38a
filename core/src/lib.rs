//! Storage core of LessDB: the skiplist-backed write buffer and the reader
//! for immutable, prefix-compressed blocks.

// Public API
pub mod coding;
pub mod error;
pub mod lsm;

pub use error::{Error, Result};
