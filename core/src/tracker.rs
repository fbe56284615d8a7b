use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use crate::db::Database;
use crate::grid::Progress;

/// How often an open list re-writes check states that failed to save.
pub const AUTOSAVE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ItemState {
    checked: bool,
    dirty: bool,
}

/// Checked state of one open list. Every change is written through at once;
/// writes that fail stay dirty until a later `flush` succeeds. Last write wins.
#[derive(Debug, Clone)]
pub struct ListTracker {
    list_id: i64,
    items: BTreeMap<i64, ItemState>,
}

impl ListTracker {
    pub fn load(db: &Database, list_id: i64) -> Result<Self> {
        db.get_shopping_list(list_id)?;
        let items = db
            .get_list_items(list_id)?
            .into_iter()
            .map(|item| {
                (
                    item.id,
                    ItemState {
                        checked: item.is_checked,
                        dirty: false,
                    },
                )
            })
            .collect();
        Ok(Self { list_id, items })
    }

    #[must_use]
    pub fn list_id(&self) -> i64 {
        self.list_id
    }

    #[must_use]
    pub fn is_checked(&self, item_id: i64) -> Option<bool> {
        self.items.get(&item_id).map(|s| s.checked)
    }

    #[must_use]
    pub fn dirty_count(&self) -> usize {
        self.items.values().filter(|s| s.dirty).count()
    }

    #[must_use]
    pub fn progress(&self) -> Progress {
        let checked = self.items.values().filter(|s| s.checked).count();
        Progress::from_counts(checked, self.items.len())
    }

    /// Flip one item and write it. Returns the new state. On a failed write the
    /// new state is kept and retried by the next `flush`. An item deleted from
    /// the store in the meantime is dropped from the tracker.
    pub fn toggle(&mut self, db: &Database, item_id: i64) -> Result<bool> {
        let state = self
            .items
            .get_mut(&item_id)
            .with_context(|| format!("Item {item_id} is not on list {}", self.list_id))?;
        state.checked = !state.checked;
        let checked = state.checked;
        match db.set_item_checked(item_id, checked) {
            Ok(true) => {
                state.dirty = false;
                Ok(checked)
            }
            Ok(false) => {
                self.items.remove(&item_id);
                info!(list_id = self.list_id, item_id, "dropped deleted item");
                bail!("Item {item_id} is no longer on list {}", self.list_id)
            }
            Err(e) => {
                state.dirty = true;
                warn!(list_id = self.list_id, item_id, "failed to save item state: {e:#}");
                Err(e.context("Failed to save item state"))
            }
        }
    }

    /// Check or clear every item in one write.
    pub fn set_all(&mut self, db: &Database, checked: bool) -> Result<()> {
        for state in self.items.values_mut() {
            state.checked = checked;
        }
        match db.set_all_items_checked(self.list_id, checked) {
            Ok(_) => {
                for state in self.items.values_mut() {
                    state.dirty = false;
                }
                Ok(())
            }
            Err(e) => {
                for state in self.items.values_mut() {
                    state.dirty = true;
                }
                warn!(list_id = self.list_id, "failed to save list state: {e:#}");
                Err(e.context("Failed to save item state"))
            }
        }
    }

    /// Write every dirty item. Items that fail again stay dirty; the first
    /// error is returned after all have been attempted. Items deleted from
    /// the store are dropped rather than retried.
    pub fn flush(&mut self, db: &Database) -> Result<usize> {
        let mut written = 0;
        let mut first_error = None;
        let mut gone = Vec::new();
        for (item_id, state) in self.items.iter_mut().filter(|(_, s)| s.dirty) {
            match db.set_item_checked(*item_id, state.checked) {
                Ok(true) => {
                    state.dirty = false;
                    written += 1;
                }
                Ok(false) => gone.push(*item_id),
                Err(e) => {
                    warn!(list_id = self.list_id, item_id, "autosave failed: {e:#}");
                    first_error.get_or_insert(e);
                }
            }
        }
        for item_id in &gone {
            self.items.remove(item_id);
        }
        if !gone.is_empty() {
            info!(list_id = self.list_id, dropped = gone.len(), "dropped deleted items");
        }
        if written > 0 {
            debug!(list_id = self.list_id, written, "autosaved list");
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(written),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewListItem;

    fn seeded() -> (Database, i64, Vec<i64>) {
        let db = Database::open_in_memory().unwrap();
        let list = db.insert_shopping_list("Weekly").unwrap();
        let ids = ["Milk", "Bread", "Eggs"]
            .iter()
            .map(|name| {
                db.insert_list_item(
                    list.id,
                    &NewListItem {
                        item_name: (*name).to_string(),
                        sector_id: None,
                        quantity: None,
                    },
                )
                .unwrap()
                .id
            })
            .collect();
        (db, list.id, ids)
    }

    #[test]
    fn test_toggle_writes_through() {
        let (db, list_id, ids) = seeded();
        let mut tracker = ListTracker::load(&db, list_id).unwrap();
        assert!(tracker.toggle(&db, ids[0]).unwrap());
        assert!(db.get_list_items(list_id).unwrap()[0].is_checked);
        assert_eq!(tracker.dirty_count(), 0);

        assert!(!tracker.toggle(&db, ids[0]).unwrap());
        assert!(!db.get_list_items(list_id).unwrap()[0].is_checked);
    }

    #[test]
    fn test_toggle_unknown_item() {
        let (db, list_id, _) = seeded();
        let mut tracker = ListTracker::load(&db, list_id).unwrap();
        assert!(tracker.toggle(&db, 9999).is_err());
        assert_eq!(tracker.dirty_count(), 0);
    }

    /// Makes every item write fail until the trigger is dropped.
    const FAIL_ITEM_WRITES: &str = "CREATE TRIGGER fail_item_write BEFORE UPDATE ON shopping_list_items
         BEGIN SELECT RAISE(ABORT, 'disk unavailable'); END;";

    #[test]
    fn test_failed_write_stays_dirty() {
        let (db, list_id, ids) = seeded();
        let mut tracker = ListTracker::load(&db, list_id).unwrap();
        db.execute_batch(FAIL_ITEM_WRITES).unwrap();

        assert!(tracker.toggle(&db, ids[1]).is_err());
        assert_eq!(tracker.is_checked(ids[1]), Some(true));
        assert_eq!(tracker.dirty_count(), 1);
        assert!(tracker.flush(&db).is_err());
        assert_eq!(tracker.dirty_count(), 1);

        db.execute_batch("DROP TRIGGER fail_item_write").unwrap();
        assert_eq!(tracker.flush(&db).unwrap(), 1);
        assert_eq!(tracker.dirty_count(), 0);
        assert!(db.get_list_items(list_id).unwrap()[1].is_checked);
    }

    #[test]
    fn test_toggle_deleted_item_drops_it() {
        let (db, list_id, ids) = seeded();
        let mut tracker = ListTracker::load(&db, list_id).unwrap();
        db.delete_list_items(list_id).unwrap();

        assert!(tracker.toggle(&db, ids[0]).is_err());
        assert_eq!(tracker.is_checked(ids[0]), None);
        assert_eq!(tracker.dirty_count(), 0);
    }

    #[test]
    fn test_flush_drops_items_deleted_out_of_band() {
        let (db, list_id, ids) = seeded();
        let mut tracker = ListTracker::load(&db, list_id).unwrap();
        db.execute_batch(FAIL_ITEM_WRITES).unwrap();
        assert!(tracker.toggle(&db, ids[0]).is_err());
        assert!(tracker.toggle(&db, ids[2]).is_err());
        assert_eq!(tracker.dirty_count(), 2);

        db.execute_batch("DROP TRIGGER fail_item_write").unwrap();
        db.delete_list_items(list_id).unwrap();
        assert_eq!(tracker.flush(&db).unwrap(), 0);
        assert_eq!(tracker.dirty_count(), 0);
        assert_eq!(tracker.is_checked(ids[0]), None);
        assert_eq!(tracker.progress().total, 1);
        // nothing left to retry on the next tick
        assert_eq!(tracker.flush(&db).unwrap(), 0);
    }

    #[test]
    fn test_flush_writes_dirty_items() {
        let (db, list_id, ids) = seeded();
        let mut tracker = ListTracker::load(&db, list_id).unwrap();
        let state = tracker.items.get_mut(&ids[2]).unwrap();
        state.checked = true;
        state.dirty = true;

        assert_eq!(tracker.flush(&db).unwrap(), 1);
        assert_eq!(tracker.dirty_count(), 0);
        assert!(db.get_list_items(list_id).unwrap()[2].is_checked);
        assert_eq!(tracker.flush(&db).unwrap(), 0);
    }

    #[test]
    fn test_set_all_and_progress() {
        let (db, list_id, _) = seeded();
        let mut tracker = ListTracker::load(&db, list_id).unwrap();
        tracker.set_all(&db, true).unwrap();
        assert_eq!(tracker.progress().percent, 100);
        assert!(db.get_list_items(list_id).unwrap().iter().all(|i| i.is_checked));
        tracker.set_all(&db, false).unwrap();
        assert_eq!(tracker.progress().checked, 0);
    }

    #[test]
    fn test_load_missing_list() {
        let db = Database::open_in_memory().unwrap();
        assert!(ListTracker::load(&db, 42).is_err());
    }
}
