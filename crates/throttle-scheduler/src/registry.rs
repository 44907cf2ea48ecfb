//! Category registry.
//!
//! The registry is immutable once built. Reloading swaps in a whole new
//! snapshot; decisions keep the `Arc` they captured when they started.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use throttle_core::{Category, CategoryId, Error, Result};
use tracing::info;

/// A snapshot of all category definitions.
#[derive(Debug, Clone, Default)]
pub struct CategoryRegistry {
    categories: Vec<Category>,
    index: HashMap<CategoryId, usize>,
}

impl CategoryRegistry {
    /// Build a registry. Category ids must be unique.
    pub fn new(categories: Vec<Category>) -> Result<Self> {
        let mut index = HashMap::with_capacity(categories.len());
        for (position, category) in categories.iter().enumerate() {
            if index.insert(category.id.clone(), position).is_some() {
                return Err(Error::Conflict(format!(
                    "duplicate category id '{}'",
                    category.id
                )));
            }
        }
        Ok(Self { categories, index })
    }

    pub fn lookup(&self, id: &CategoryId) -> Option<&Category> {
        self.index.get(id).map(|&position| &self.categories[position])
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

/// Handle to the current registry snapshot, shared between the gate and
/// whoever reloads configuration.
#[derive(Debug, Clone, Default)]
pub struct SharedRegistry {
    current: Arc<RwLock<Arc<CategoryRegistry>>>,
}

impl SharedRegistry {
    pub fn new(registry: CategoryRegistry) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(registry))),
        }
    }

    /// The snapshot in effect right now.
    pub fn snapshot(&self) -> Arc<CategoryRegistry> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the whole registry. Snapshots already taken are unaffected.
    pub fn replace(&self, registry: CategoryRegistry) {
        let categories = registry.len();
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(registry);
        info!(categories, "Reloaded throttle categories");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let registry = CategoryRegistry::new(vec![
            Category::new("A").with_max_total(2),
            Category::new("B"),
        ])
        .unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.lookup(&CategoryId::new("A")).unwrap().max_total,
            Some(2)
        );
        assert!(registry.lookup(&CategoryId::new("missing")).is_none());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let result = CategoryRegistry::new(vec![Category::new("A"), Category::new("A")]);
        assert!(matches!(result, Err(Error::Conflict(_))));
    }

    #[test]
    fn test_snapshot_survives_replace() {
        let shared = SharedRegistry::new(
            CategoryRegistry::new(vec![Category::new("A").with_max_total(1)]).unwrap(),
        );
        let before = shared.snapshot();

        shared.replace(CategoryRegistry::new(vec![Category::new("A").with_max_total(5)]).unwrap());

        let id = CategoryId::new("A");
        assert_eq!(before.lookup(&id).unwrap().max_total, Some(1));
        assert_eq!(shared.snapshot().lookup(&id).unwrap().max_total, Some(5));
    }
}
