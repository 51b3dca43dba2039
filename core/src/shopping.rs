use crate::db::Database;
use crate::error::DietError;
use crate::models::ShoppingListEntry;

/// Store the Composer's shopping list under `weekly_plan_id` as given; no merging.
/// Failure is logged and reported as zero rows.
pub fn persist(db: &Database, weekly_plan_id: &str, items: &[ShoppingListEntry]) -> usize {
    if items.is_empty() {
        return 0;
    }
    match db.insert_shopping_items(weekly_plan_id, items) {
        Ok(count) => {
            tracing::info!(items = count, "Stored shopping list");
            count
        }
        Err(cause) => {
            let err = DietError::SecondaryPersistenceFailure {
                artifact: "shopping list",
                cause,
            };
            tracing::error!(error = %err, "Continuing without shopping list");
            0
        }
    }
}
