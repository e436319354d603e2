//! Database module for PostgreSQL persistence of the document tree.

mod documents;
mod pool;

pub use documents::*;
pub use pool::*;
