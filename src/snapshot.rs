//! Shared, swappable handle on the current table.
//!
//! Readers take an `Arc` and keep querying it even while a reload installs
//! a replacement, so a query never observes a half-loaded table.

use std::sync::Arc;

use anyhow::Result;
use arc_swap::ArcSwap;
use tracing::info;

use crate::table::RecordTable;

#[derive(Debug)]
pub struct SnapshotStore {
    current: ArcSwap<RecordTable>,
}

impl SnapshotStore {
    pub fn new(table: RecordTable) -> Self {
        Self {
            current: ArcSwap::from_pointee(table),
        }
    }

    /// The snapshot in effect right now.
    pub fn load(&self) -> Arc<RecordTable> {
        self.current.load_full()
    }

    /// Installs `table` and hands back the snapshot it replaced.
    pub fn replace(&self, table: RecordTable) -> Arc<RecordTable> {
        let next = Arc::new(table);
        let rows = next.len();
        let previous = self.current.swap(next);
        info!(previous_rows = previous.len(), rows, "Snapshot replaced");
        previous
    }

    /// Builds a fresh table with `load` and swaps it in. On failure the
    /// current snapshot stays in place.
    pub fn reload(&self, load: impl FnOnce() -> Result<RecordTable>) -> Result<Arc<RecordTable>> {
        self.replace(load()?);
        Ok(self.load())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{Gender, GradeRecord};
    use chrono::NaiveDate;

    #[test]
    fn test_load_returns_current_snapshot() {
        let store = SnapshotStore::new(create_table(2));
        assert_eq!(store.load().len(), 2);
    }

    #[test]
    fn test_replace_keeps_old_readers_consistent() {
        let store = SnapshotStore::new(create_table(2));
        let before = store.load();

        let previous = store.replace(create_table(5));

        assert_eq!(before.len(), 2);
        assert_eq!(previous.len(), 2);
        assert!(Arc::ptr_eq(&before, &previous));
        assert_eq!(store.load().len(), 5);
    }

    #[test]
    fn test_reload_swaps_on_success_only() {
        let store = SnapshotStore::new(create_table(2));

        let reloaded = store.reload(|| Ok(create_table(4))).unwrap();
        assert_eq!(reloaded.len(), 4);

        assert!(store.reload(|| anyhow::bail!("unreadable file")).is_err());
        assert_eq!(store.load().len(), 4);
    }

    #[test]
    fn test_concurrent_readers_see_whole_tables() {
        let store = Arc::new(SnapshotStore::new(create_table(3)));
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    (0..100)
                        .map(|_| store.load().len())
                        .all(|n| n == 3 || n == 7)
                })
            })
            .collect();
        store.replace(create_table(7));

        for reader in readers {
            assert!(reader.join().unwrap());
        }
    }

    // Helper functions for tests
    fn create_table(rows: usize) -> RecordTable {
        let records = (0..rows)
            .map(|i| GradeRecord {
                student_id: format!("S{i}"),
                last_name: "DOSSOU".to_string(),
                first_name: "Yao".to_string(),
                gender: Some(Gender::Male),
                birth_date: None,
                department: None,
                program: None,
                level: None,
                course_code: None,
                teacher: None,
                score: Some(10.0),
            })
            .collect();
        RecordTable::new(records, NaiveDate::from_ymd_opt(2025, 9, 1).unwrap())
    }
}
