use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::core::brick::Brick;
use crate::core::error::PipelineError;

/// In-memory index of bricks by identifier.
///
/// The registry stores what it is given; schemas are only checked by the reducer when a
/// brick is invoked. Cloning shares the same index.
#[derive(Clone, Default)]
pub struct BrickRegistry {
    bricks: Arc<RwLock<HashMap<String, Arc<Brick>>>>,
}

impl BrickRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers bricks. Re-registering an id replaces the previous entry.
    pub fn register(&self, bricks: impl IntoIterator<Item = Brick>) {
        let mut index = self.bricks.write().unwrap_or_else(PoisonError::into_inner);
        for brick in bricks {
            if let Some(previous) = index.get(brick.id()) {
                if previous.version() != brick.version() {
                    log::debug!(
                        "Replacing brick {} version {} with version {}",
                        brick.id(),
                        previous.version(),
                        brick.version()
                    );
                }
            }
            index.insert(brick.id().to_string(), Arc::new(brick));
        }
    }

    pub fn lookup(&self, id: &str) -> Result<Arc<Brick>, PipelineError> {
        self.bricks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| PipelineError::NotFound { id: id.to_string() })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.bricks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.bricks.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .bricks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}
