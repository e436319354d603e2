//! Paths into the tree store.
//!
//! The tree has three levels: `<namespace>/<collection>/<key>`. A path names
//! a whole namespace, one collection, or one document.

use std::fmt;

use tillsync_engine::validate_key;

use crate::error::{AppError, Result};

/// A parsed tree path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TreePath {
    Namespace(String),
    Collection {
        namespace: String,
        collection: String,
    },
    Document {
        namespace: String,
        collection: String,
        key: String,
    },
}

impl TreePath {
    /// Parse a slash-separated path. Leading, trailing and repeated slashes
    /// are ignored; `.` and `..` segments are refused.
    pub fn parse(raw: &str) -> Result<Self> {
        let segments: Vec<&str> = raw.split('/').filter(|s| !s.is_empty()).collect();
        if segments.iter().any(|s| *s == "." || *s == "..") {
            return Err(AppError::BadRequest(format!(
                "path '{}' contains a relative segment",
                raw
            )));
        }
        match segments.as_slice() {
            [] => Err(AppError::BadRequest("path must not be empty".into())),
            [namespace] => Ok(TreePath::Namespace(namespace.to_string())),
            [namespace, collection] => Ok(TreePath::Collection {
                namespace: namespace.to_string(),
                collection: collection.to_string(),
            }),
            [namespace, collection, key] => {
                let key = validate_key(key.to_string())?;
                Ok(TreePath::Document {
                    namespace: namespace.to_string(),
                    collection: collection.to_string(),
                    key,
                })
            }
            _ => Err(AppError::BadRequest(format!(
                "path '{}' is deeper than <namespace>/<collection>/<key>",
                raw
            ))),
        }
    }

    fn segments(&self) -> Vec<&str> {
        match self {
            TreePath::Namespace(namespace) => vec![namespace.as_str()],
            TreePath::Collection {
                namespace,
                collection,
            } => vec![namespace.as_str(), collection.as_str()],
            TreePath::Document {
                namespace,
                collection,
                key,
            } => vec![namespace.as_str(), collection.as_str(), key.as_str()],
        }
    }

    /// Check if `self` is `other` or one of its ancestors.
    pub fn contains(&self, other: &TreePath) -> bool {
        let (mine, theirs) = (self.segments(), other.segments());
        mine.len() <= theirs.len() && mine.iter().zip(&theirs).all(|(a, b)| a == b)
    }

    /// Check if a change at one path is visible from the other.
    pub fn overlaps(&self, other: &TreePath) -> bool {
        self.contains(other) || other.contains(self)
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments().join("/"))
    }
}
