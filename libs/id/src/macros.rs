//! Macros for defining typed key types.

/// Macro to define a typed key for one resource kind.
///
/// This generates a newtype wrapper around [`UniqueId`](crate::UniqueId) with:
/// - A `PREFIX` constant used by the text form
/// - `new()` plus `tag()`/`with_tags()` builders
/// - `parse()` from the text form
/// - `Display` and `FromStr` implementations
/// - `Ord`, `Hash`, and other standard traits
///
/// # Example
///
/// ```ignore
/// define_id!(QueryId, "query");
///
/// let id = QueryId::new("todo").tag(42);
/// let parsed: QueryId = "query:todo/42".parse()?;
/// assert_eq!(id, parsed);
/// ```
#[macro_export]
macro_rules! define_id {
    ($name:ident, $prefix:literal) => {
        /// A typed key for this resource kind.
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name($crate::UniqueId);

        impl $name {
            /// The prefix for this key type.
            pub const PREFIX: &'static str = $prefix;

            /// Creates a key with the given namespace and no tags.
            #[must_use]
            pub fn new(namespace: impl Into<std::sync::Arc<str>>) -> Self {
                Self($crate::UniqueId::new(namespace))
            }

            /// Wraps an untyped key.
            #[must_use]
            pub const fn from_unique(id: $crate::UniqueId) -> Self {
                Self(id)
            }

            /// Returns a copy of this key with one more tag appended.
            #[must_use]
            pub fn tag(self, tag: impl Into<$crate::Tag>) -> Self {
                Self(self.0.tag(tag))
            }

            /// Returns a copy of this key with the given tags appended.
            #[must_use]
            pub fn with_tags<I, T>(self, tags: I) -> Self
            where
                I: IntoIterator<Item = T>,
                T: Into<$crate::Tag>,
            {
                Self(self.0.with_tags(tags))
            }

            /// Returns the untyped key.
            #[must_use]
            pub const fn unique(&self) -> &$crate::UniqueId {
                &self.0
            }

            /// Returns the namespace.
            #[must_use]
            pub fn namespace(&self) -> &str {
                self.0.namespace()
            }

            /// Returns the tags in declaration order.
            #[must_use]
            pub fn tags(&self) -> &[$crate::Tag] {
                self.0.tags()
            }

            /// Parses a key from its text form.
            ///
            /// The string must be in the format `{prefix}:{namespace}[/{tag}]*`.
            pub fn parse(s: &str) -> Result<Self, $crate::IdError> {
                if s.is_empty() {
                    return Err($crate::IdError::Empty);
                }

                let Some((prefix, rest)) = s.split_once(':') else {
                    return Err($crate::IdError::MissingSeparator);
                };

                if prefix != Self::PREFIX {
                    return Err($crate::IdError::InvalidPrefix {
                        expected: Self::PREFIX,
                        actual: prefix.to_string(),
                    });
                }

                $crate::UniqueId::parse_body(rest).map(Self)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}:{}", Self::PREFIX, self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl AsRef<$crate::UniqueId> for $name {
            fn as_ref(&self) -> &$crate::UniqueId {
                &self.0
            }
        }

        impl From<$name> for $crate::UniqueId {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}
