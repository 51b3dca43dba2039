use crate::db::Database;
use crate::error::DietError;
use crate::models::{CompositionSummary, DailyMealRecord, ExclusionSet, MealType};
use crate::week::WeekInfo;

/// Bucket every rice, side and soup title found in the records' composition summaries.
/// Snack records also contribute their own title.
#[must_use]
pub fn collect_exclusions(records: &[DailyMealRecord]) -> ExclusionSet {
    let mut exclusions = ExclusionSet::default();
    for record in records {
        let summary = match CompositionSummary::from_stored(&record.composition_summary) {
            Ok(summary) => summary,
            Err(e) => {
                tracing::warn!(
                    record_id = record.id,
                    plan_date = %record.plan_date,
                    meal_type = %record.meal_type,
                    error = %format!("{e:#}"),
                    "Skipping record with unreadable composition summary"
                );
                continue;
            }
        };
        exclusions.rice.extend(summary.rice);
        exclusions.side.extend(summary.sides);
        exclusions.soup.extend(summary.soup);
        if record.meal_type == MealType::Snack {
            let title = record.recipe_title.trim();
            if !title.is_empty() {
                exclusions.snack.insert(title.to_string());
            }
        }
    }
    exclusions
}

/// Exclusions for the user's week. A failed read yields an empty set.
pub fn scan_week(db: &Database, user_id: &str, week: &WeekInfo) -> ExclusionSet {
    match db.get_meal_records(user_id, week.week_start_date) {
        Ok(records) => {
            let exclusions = collect_exclusions(&records);
            tracing::debug!(
                records = records.len(),
                excluded = exclusions.len(),
                "Scanned existing week"
            );
            exclusions
        }
        Err(e) => {
            let err = DietError::ReadFailed(e);
            tracing::warn!(error = %err, "History scan failed; generating without exclusions");
            ExclusionSet::default()
        }
    }
}
