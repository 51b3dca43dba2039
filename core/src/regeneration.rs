use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::db::{Database, WeekDeletion};
use crate::week::WeekInfo;

/// Delete the week's plan row and meal records. Failures are logged, not returned:
/// a stale row left behind makes the following plan insert fail instead.
pub fn clear_week(db: &Database, user_id: &str, week: &WeekInfo) -> Option<WeekDeletion> {
    match db.delete_week(user_id, week.week_year, week.week_number, week.week_start_date) {
        Ok(deleted) => {
            tracing::info!(
                plans = deleted.plans,
                meal_records = deleted.meal_records,
                "Cleared week for regeneration"
            );
            Some(deleted)
        }
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Failed to clear week before regeneration");
            None
        }
    }
}

type WeekKey = (String, i32, u32);

/// One async lock per (user, ISO week), so regenerations of the same week run one
/// after the other within this process.
#[derive(Default)]
pub struct RegenerationLocks {
    locks: Mutex<HashMap<WeekKey, Arc<AsyncMutex<()>>>>,
}

impl RegenerationLocks {
    pub async fn acquire(&self, user_id: &str, week: &WeekInfo) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // Entries only the map still references are idle.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            let key = (user_id.to_string(), week.week_year, week.week_number);
            Arc::clone(locks.entry(key).or_default())
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::NaiveDate;

    use crate::week::week_info;

    fn week(d: u32) -> WeekInfo {
        week_info(NaiveDate::from_ymd_opt(2025, 1, d).unwrap())
    }

    #[test]
    fn test_clear_week_reports_deleted_rows() {
        let db = Database::open_in_memory().unwrap();
        let deleted = clear_week(&db, "nobody", &week(6)).unwrap();
        assert_eq!(deleted, WeekDeletion::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_week_is_serialized() {
        let locks = RegenerationLocks::default();
        let guard = locks.acquire("u1", &week(6)).await;

        let blocked = tokio::time::timeout(Duration::from_millis(50), locks.acquire("u1", &week(7))).await;
        assert!(blocked.is_err(), "same ISO week must wait");

        let other_week = tokio::time::timeout(Duration::from_millis(50), locks.acquire("u1", &week(13))).await;
        assert!(other_week.is_ok());
        let other_user = tokio::time::timeout(Duration::from_millis(50), locks.acquire("u2", &week(6))).await;
        assert!(other_user.is_ok());

        drop(guard);
        let again = tokio::time::timeout(Duration::from_millis(50), locks.acquire("u1", &week(6))).await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn test_idle_locks_are_pruned() {
        let locks = RegenerationLocks::default();
        drop(locks.acquire("u1", &week(6)).await);
        drop(locks.acquire("u1", &week(13)).await);
        // the second acquire pruned the first entry
        assert_eq!(locks.len(), 1);
    }
}
