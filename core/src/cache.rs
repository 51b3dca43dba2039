use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::NaiveDate;

use crate::models::WeekView;
use crate::week::WeekType;

/// Each (user, week type) slot carries an epoch that every invalidation bumps. A reader
/// takes the epoch before loading and hands it back to `put`, which refuses the view if
/// the slot was invalidated in between.
pub trait WeekCache: Send + Sync {
    /// The cached view, if it was rendered for the week starting `monday`.
    fn get(&self, user_id: &str, week_type: WeekType, monday: NaiveDate) -> Option<WeekView>;

    fn epoch(&self, user_id: &str, week_type: WeekType) -> u64;

    /// Store `view` unless the slot moved past `epoch`. Returns whether it was stored.
    fn put(&self, user_id: &str, week_type: WeekType, epoch: u64, view: WeekView) -> bool;

    fn invalidate(&self, user_id: &str, week_type: WeekType) -> anyhow::Result<()>;
}

#[derive(Default)]
struct Slot {
    epoch: u64,
    view: Option<WeekView>,
}

#[derive(Default)]
pub struct InMemoryWeekCache {
    slots: Mutex<HashMap<(String, WeekType), Slot>>,
}

impl InMemoryWeekCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl WeekCache for InMemoryWeekCache {
    fn get(&self, user_id: &str, week_type: WeekType, monday: NaiveDate) -> Option<WeekView> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .get(&(user_id.to_string(), week_type))
            .and_then(|slot| slot.view.as_ref())
            .filter(|view| view.week_start_date == monday)
            .cloned()
    }

    fn epoch(&self, user_id: &str, week_type: WeekType) -> u64 {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .get(&(user_id.to_string(), week_type))
            .map_or(0, |slot| slot.epoch)
    }

    fn put(&self, user_id: &str, week_type: WeekType, epoch: u64, view: WeekView) -> bool {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = slots.entry((user_id.to_string(), week_type)).or_default();
        if slot.epoch != epoch {
            return false;
        }
        slot.view = Some(view);
        true
    }

    fn invalidate(&self, user_id: &str, week_type: WeekType) -> anyhow::Result<()> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = slots.entry((user_id.to_string(), week_type)).or_default();
        slot.epoch += 1;
        slot.view = None;
        Ok(())
    }
}

/// Drop the cached view of the week starting `monday`, if it is this or next week as
/// seen from `today`. Failures are logged.
pub fn invalidate_week(cache: &dyn WeekCache, user_id: &str, monday: NaiveDate, today: NaiveDate) {
    let Some(week_type) = WeekType::classify(monday, today) else {
        tracing::debug!(%monday, "Week is neither this nor next; nothing cached");
        return;
    };
    match cache.invalidate(user_id, week_type) {
        Ok(()) => tracing::debug!(week_type = %week_type, "Invalidated cached week"),
        Err(e) => {
            tracing::warn!(week_type = %week_type, error = %format!("{e:#}"), "Failed to invalidate cached week");
        }
    }
}
