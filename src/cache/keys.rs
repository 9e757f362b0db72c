//! Cache key and invalidation tag definitions.
//!
//! `CacheKey` identifies a cached query result; `Tag` labels the data a
//! result depends on so mutations can invalidate it.

use std::fmt;

use serde_json::Value;

/// Identity of a cacheable request: endpoint name plus serialized argument.
///
/// Arguments are serialized with `serde_json`, whose object maps are ordered
/// by key, so structurally equal arguments always produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    endpoint: String,
    args: String,
}

impl CacheKey {
    pub fn new(endpoint: impl Into<String>, args: &Value) -> Self {
        Self {
            endpoint: endpoint.into(),
            args: args.to_string(),
        }
    }

    /// Key for an endpoint that takes no argument.
    pub fn unit(endpoint: impl Into<String>) -> Self {
        Self::new(endpoint, &Value::Null)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn serialized_args(&self) -> &str {
        &self.args
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.endpoint, self.args)
    }
}

/// Id part of a [`Tag`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TagId {
    /// `"*"`: any id of the tag's type.
    Any,
    Id(String),
}

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("*"),
            Self::Id(id) => f.write_str(id),
        }
    }
}

/// Invalidation label. Queries provide tags, mutations invalidate them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag {
    pub kind: String,
    pub id: TagId,
}

impl Tag {
    /// Build a tag, treating an id of `"*"` as the wildcard.
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        let id = id.into();
        let id = if id == "*" { TagId::Any } else { TagId::Id(id) };
        Self {
            kind: kind.into(),
            id,
        }
    }

    pub fn any(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: TagId::Any,
        }
    }

    pub fn id(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: TagId::Id(id.into()),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.id == TagId::Any
    }

    /// Whether invalidating `self` affects entries that registered `registered`.
    ///
    /// A wildcard matches every tag of its type; a concrete id matches only the
    /// identical `(type, id)` pair.
    pub fn matches(&self, registered: &Tag) -> bool {
        if self.kind != registered.kind {
            return false;
        }
        match &self.id {
            TagId::Any => true,
            TagId::Id(_) => self.id == registered.id,
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}
