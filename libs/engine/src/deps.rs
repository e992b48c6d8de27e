//! Dependency bag handed to user callables.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::anyhow;

/// A type-keyed set of shared values.
///
/// Built once when the client is constructed and passed by reference to
/// every fetch, mutate and subscribe call, so keys can reach API clients
/// and other collaborators without globals.
#[derive(Clone, Default)]
pub struct Dependencies {
    values: Arc<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl Dependencies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the bag with `value` added, replacing any value of
    /// the same type.
    #[must_use]
    pub fn with<T: Any + Send + Sync>(self, value: T) -> Self {
        let mut values = (*self.values).clone();
        values.insert(TypeId::of::<T>(), Arc::new(value));
        Self {
            values: Arc::new(values),
        }
    }

    /// Returns the value of type `T`, if present.
    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    /// Returns the value of type `T` or an error naming the missing type.
    pub fn require<T: Any + Send + Sync>(&self) -> anyhow::Result<&T> {
        self.get::<T>()
            .ok_or_else(|| anyhow!("missing dependency: {}", std::any::type_name::<T>()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependencies")
            .field("len", &self.values.len())
            .finish()
    }
}
