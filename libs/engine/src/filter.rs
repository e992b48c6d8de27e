//! Filters selecting resources for batch operations.

use std::fmt;
use std::sync::Arc;

use brook_id::{Tag, UniqueId};
use brook_model::{QueryView, SubscriptionView};

/// Which store a filter looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterScope {
    /// Resources with a running actor.
    Active,
    /// Resources frozen in the cache.
    Inactive,
    #[default]
    Both,
}

impl FilterScope {
    pub fn includes_active(self) -> bool {
        matches!(self, FilterScope::Active | FilterScope::Both)
    }

    pub fn includes_inactive(self) -> bool {
        matches!(self, FilterScope::Inactive | FilterScope::Both)
    }
}

/// Predicate over the last known model of a resource.
pub type ViewPredicate<V> = Arc<dyn Fn(&UniqueId, &V) -> bool + Send + Sync>;

/// Selects resources by scope, tags and an optional predicate.
///
/// An empty filter matches everything in both stores.
pub struct Filter<V: ?Sized> {
    pub scope: FilterScope,

    /// Match ids carrying at least one of these tags.
    pub tags: Option<Vec<Tag>>,

    pub predicate: Option<ViewPredicate<V>>,
}

/// Filter over queries and infinite queries.
pub type QueryFilter = Filter<dyn QueryView>;

/// Filter over subscriptions.
pub type SubscriptionFilter = Filter<dyn SubscriptionView>;

impl<V: ?Sized> Filter<V> {
    pub fn new() -> Self {
        Self {
            scope: FilterScope::Both,
            tags: None,
            predicate: None,
        }
    }

    pub fn active() -> Self {
        Self::new().with_scope(FilterScope::Active)
    }

    pub fn inactive() -> Self {
        Self::new().with_scope(FilterScope::Inactive)
    }

    pub fn with_scope(mut self, scope: FilterScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Tag>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&UniqueId, &V) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Returns true if `id` with model `view` passes the tag and predicate
    /// checks. Scope is checked by the caller.
    pub fn matches(&self, id: &UniqueId, view: &V) -> bool {
        if let Some(tags) = &self.tags {
            if !id.has_any_tag(tags) {
                return false;
            }
        }
        self.predicate.as_ref().is_none_or(|p| p(id, view))
    }
}

impl<V: ?Sized> Default for Filter<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: ?Sized> Clone for Filter<V> {
    fn clone(&self) -> Self {
        Self {
            scope: self.scope,
            tags: self.tags.clone(),
            predicate: self.predicate.clone(),
        }
    }
}

impl<V: ?Sized> fmt::Debug for Filter<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter")
            .field("scope", &self.scope)
            .field("tags", &self.tags)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brook_model::{QueryModel, ResourceView};

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = QueryFilter::new();
        let model = QueryModel::<u8>::default();
        assert!(filter.matches(&UniqueId::new("todo"), &model));
        assert!(filter.scope.includes_active());
        assert!(filter.scope.includes_inactive());
    }

    #[test]
    fn test_tags_match_on_any_intersection() {
        let filter = QueryFilter::new().with_tags(["a", "b"]);
        let model = QueryModel::<u8>::default();
        assert!(filter.matches(&UniqueId::new("todo").tag("b").tag("c"), &model));
        assert!(!filter.matches(&UniqueId::new("todo").tag("c"), &model));
        assert!(!filter.matches(&UniqueId::new("todo"), &model));
    }

    #[test]
    fn test_predicate_sees_model() {
        let filter = QueryFilter::active().with_predicate(|_, view| view.is_pending());
        let model = QueryModel::<u8>::default();
        assert!(filter.matches(&UniqueId::new("todo"), &model));
        assert!(!filter.scope.includes_inactive());
    }
}
