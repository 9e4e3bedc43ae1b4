//! Shared, atomically swappable definition table handle

use crate::definitions::table::DefinitionTable;
use std::sync::{Arc, RwLock};

/// Cloneable handle to the current definition table
///
/// Readers take an `Arc` snapshot and decode against it without holding the
/// lock. A reload replaces the whole table; entries are never mutated in
/// place, so a decode in flight keeps seeing the table it started with.
#[derive(Debug, Clone, Default)]
pub struct SharedTable {
    current: Arc<RwLock<Arc<DefinitionTable>>>,
}

impl SharedTable {
    pub fn new(table: DefinitionTable) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(table))),
        }
    }

    /// Current table
    pub fn snapshot(&self) -> Arc<DefinitionTable> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Install a new table, returning the previous one
    pub fn swap(&self, table: DefinitionTable) -> Arc<DefinitionTable> {
        let next = Arc::new(table);
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        log::info!("Swapping definition table ({} definitions)", next.len());
        std::mem::replace(&mut *guard, next)
    }
}

impl From<DefinitionTable> for SharedTable {
    fn from(table: DefinitionTable) -> Self {
        Self::new(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::table::MessageDefinition;
    use std::thread;

    #[test]
    fn test_snapshot_survives_swap() {
        let shared = SharedTable::new(
            vec![MessageDefinition::new(65267, "John Deere", 28, 8)]
                .into_iter()
                .collect(),
        );

        let before = shared.snapshot();
        let previous = shared.swap(DefinitionTable::new());

        assert_eq!(before.len(), 1);
        assert_eq!(previous.len(), 1);
        assert!(shared.snapshot().is_empty());
    }

    #[test]
    fn test_concurrent_readers() {
        let shared = SharedTable::new(
            vec![MessageDefinition::new(65267, "John Deere", 28, 8)]
                .into_iter()
                .collect(),
        );

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let shared = shared.clone();
                thread::spawn(move || shared.snapshot().len())
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 1);
        }
    }
}
