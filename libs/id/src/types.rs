//! Key definitions for all resource kinds.
//!
//! Each typed key has a unique prefix that identifies the resource kind.
//! The untyped [`UniqueId`] carries the namespace and tags shared by all of them.

use std::fmt;
use std::sync::Arc;

use crate::{define_id, IdError};

// =============================================================================
// Tags
// =============================================================================

/// An opaque grouping value attached to a key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tag {
    Text(Arc<str>),
    Int(i64),
    Bool(bool),
}

impl Tag {
    /// Parses a single tag segment from the text form.
    fn parse_segment(segment: &str) -> Self {
        match segment {
            "true" => Tag::Bool(true),
            "false" => Tag::Bool(false),
            s => s
                .parse::<i64>()
                .map(Tag::Int)
                .unwrap_or_else(|_| Tag::Text(Arc::from(s))),
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tag::Text(s) => f.write_str(s),
            Tag::Int(n) => write!(f, "{n}"),
            Tag::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for Tag {
    fn from(s: &str) -> Self {
        Tag::Text(Arc::from(s))
    }
}

impl From<String> for Tag {
    fn from(s: String) -> Self {
        Tag::Text(Arc::from(s))
    }
}

impl From<Arc<str>> for Tag {
    fn from(s: Arc<str>) -> Self {
        Tag::Text(s)
    }
}

impl From<bool> for Tag {
    fn from(b: bool) -> Self {
        Tag::Bool(b)
    }
}

macro_rules! tag_from_int {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Tag {
                fn from(n: $ty) -> Self {
                    Tag::Int(i64::from(n))
                }
            }
        )*
    };
}

tag_from_int!(i8, i16, i32, i64, u8, u16, u32);

// =============================================================================
// Untyped Key
// =============================================================================

/// A namespace plus an ordered list of tags.
///
/// Cloning is cheap: both parts live behind shared pointers.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UniqueId {
    namespace: Arc<str>,
    tags: Arc<[Tag]>,
}

impl UniqueId {
    /// Creates a key with the given namespace and no tags.
    #[must_use]
    pub fn new(namespace: impl Into<Arc<str>>) -> Self {
        Self {
            namespace: namespace.into(),
            tags: Arc::from(Vec::new()),
        }
    }

    /// Returns a copy of this key with one more tag appended.
    #[must_use]
    pub fn tag(self, tag: impl Into<Tag>) -> Self {
        self.with_tags([tag.into()])
    }

    /// Returns a copy of this key with the given tags appended.
    #[must_use]
    pub fn with_tags<I, T>(self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Tag>,
    {
        let mut all: Vec<Tag> = self.tags.to_vec();
        all.extend(tags.into_iter().map(Into::into));
        Self {
            namespace: self.namespace,
            tags: Arc::from(all),
        }
    }

    /// Returns the namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the tags in declaration order.
    #[must_use]
    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    /// Returns true if any of this key's tags is in `tags`.
    #[must_use]
    pub fn has_any_tag(&self, tags: &[Tag]) -> bool {
        self.tags.iter().any(|t| tags.contains(t))
    }

    /// Parses the part of the text form after the kind prefix.
    pub fn parse_body(s: &str) -> Result<Self, IdError> {
        let mut segments = s.split('/');
        let namespace = segments.next().unwrap_or_default();

        if namespace.is_empty() || namespace.contains(char::is_whitespace) {
            return Err(IdError::InvalidNamespace(namespace.to_string()));
        }

        let mut tags = Vec::new();
        for (position, segment) in segments.enumerate() {
            if segment.is_empty() {
                return Err(IdError::EmptyTag(position));
            }
            tags.push(Tag::parse_segment(segment));
        }

        Ok(Self {
            namespace: Arc::from(namespace),
            tags: Arc::from(tags),
        })
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.namespace)?;
        for tag in self.tags.iter() {
            write!(f, "/{tag}")?;
        }
        Ok(())
    }
}

// =============================================================================
// Typed Keys
// =============================================================================

define_id!(QueryId, "query");
define_id!(InfiniteQueryId, "infinite");
define_id!(MutationId, "mutation");
define_id!(SubscriptionId, "subscription");

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_query_id_display() {
        let id = QueryId::new("todo").tag(42).tag("open").tag(true);
        assert_eq!(id.to_string(), "query:todo/42/open/true");
    }

    #[test]
    fn test_query_id_parse() {
        let parsed: QueryId = "query:todo/42/open".parse().unwrap();
        assert_eq!(parsed, QueryId::new("todo").tag(42).tag("open"));
        assert_eq!(parsed.namespace(), "todo");
        assert_eq!(parsed.tags(), &[Tag::Int(42), Tag::from("open")]);
    }

    #[test]
    fn test_equality_covers_tags() {
        let a = QueryId::new("todo").tag(1);
        let b = QueryId::new("todo").tag(2);
        let c = QueryId::new("todo").tag(1);
        assert_ne!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn test_tag_order_matters() {
        let a = UniqueId::new("feed").tag("a").tag("b");
        let b = UniqueId::new("feed").tag("b").tag("a");
        assert_ne!(a, b);
    }

    #[test]
    fn test_invalid_prefix() {
        let result: Result<QueryId, _> = "mutation:todo".parse();
        assert!(matches!(
            result.unwrap_err(),
            IdError::InvalidPrefix { expected: "query", .. }
        ));
    }

    #[test]
    fn test_missing_separator() {
        let result: Result<MutationId, _> = "mutation-todo".parse();
        assert!(matches!(result.unwrap_err(), IdError::MissingSeparator));
    }

    #[test]
    fn test_empty() {
        let result: Result<SubscriptionId, _> = "".parse();
        assert!(result.unwrap_err().is_empty());
    }

    #[test]
    fn test_empty_tag_segment() {
        let result: Result<QueryId, _> = "query:todo//1".parse();
        assert_eq!(result.unwrap_err(), IdError::EmptyTag(0));
    }

    #[test]
    fn test_invalid_namespace() {
        let result: Result<QueryId, _> = "query:/1".parse();
        assert!(matches!(result.unwrap_err(), IdError::InvalidNamespace(_)));
    }

    #[test]
    fn test_has_any_tag() {
        let id = UniqueId::new("todo").with_tags(["inbox", "starred"]);
        assert!(id.has_any_tag(&[Tag::from("starred"), Tag::Int(7)]));
        assert!(!id.has_any_tag(&[Tag::from("archive")]));
        assert!(!id.has_any_tag(&[]));
    }

    #[test]
    fn test_all_prefixes_unique() {
        let prefixes = [
            QueryId::PREFIX,
            InfiniteQueryId::PREFIX,
            MutationId::PREFIX,
            SubscriptionId::PREFIX,
        ];
        let unique: std::collections::HashSet<_> = prefixes.iter().collect();
        assert_eq!(prefixes.len(), unique.len(), "Duplicate key prefixes found!");
    }

    proptest! {
        #[test]
        fn prop_text_form_roundtrip(
            namespace in "[a-z][a-z0-9-]{0,12}",
            words in proptest::collection::vec("[a-z]{1,8}", 0..4),
            numbers in proptest::collection::vec(any::<i64>(), 0..3),
        ) {
            prop_assume!(!words.iter().any(|w| w == "true" || w == "false"));
            let id = InfiniteQueryId::new(namespace.as_str())
                .with_tags(words.iter().map(String::as_str))
                .with_tags(numbers.iter().copied());
            let parsed: InfiniteQueryId = id.to_string().parse().unwrap();
            prop_assert_eq!(parsed, id);
        }
    }
}
