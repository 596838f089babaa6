use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Per-operator state table. Each operator's value sits behind its own
/// async mutex, held for the whole handling of one event; operators never
/// contend with each other.
pub struct OperatorRegistry<T> {
    entries: DashMap<String, Arc<Mutex<T>>>,
}

impl<T> Default for OperatorRegistry<T> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<T> OperatorRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, operator: &str) -> Option<Arc<Mutex<T>>> {
        self.entries.get(operator).map(|entry| entry.value().clone())
    }

    pub fn get_or_create(&self, operator: &str, create: impl FnOnce() -> T) -> Arc<Mutex<T>> {
        self.entries
            .entry(operator.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(create())))
            .value()
            .clone()
    }

    /// Replaces whatever the operator had; the old value is dropped.
    pub fn insert(&self, operator: &str, value: T) -> Arc<Mutex<T>> {
        let slot = Arc::new(Mutex::new(value));
        self.entries.insert(operator.to_string(), slot.clone());
        slot
    }

    pub fn remove(&self, operator: &str) -> bool {
        self.entries.remove(operator).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
