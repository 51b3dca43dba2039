//! Per-day nutrition totals: stored verbatim at generation, checked and if needed
//! recomputed when a week is read.
//!
//! A stored set is trusted only when it has one row per weekday and every day reaches
//! [`MIN_DAILY_CALORIES`]. Otherwise totals are rebuilt from the meal records. Meals below
//! [`SUSPICIOUS_MEAL_CALORIES`] are re-priced from the recipe catalog by dish title, and
//! the catalog figure is used only when it is higher. Nothing computed here is written back.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;

use crate::db::{Database, SharedDatabase, lock};
use crate::error::DietError;
use crate::models::{CompositionSummary, DailyMealRecord, NutritionDailyStat};
use crate::retry::{RetryPolicy, retry_with_backoff};
use crate::week::WeekInfo;

pub const MIN_DAILY_CALORIES: f64 = 1000.0;
pub const SUSPICIOUS_MEAL_CALORIES: f64 = 200.0;

/// Looks up recipe calories by exact title.
#[async_trait]
pub trait RecipeCatalog: Send + Sync {
    async fn calories_by_title(&self, titles: &[String]) -> anyhow::Result<HashMap<String, f64>>;
}

/// The `recipes` table of the local database.
pub struct DatabaseCatalog {
    db: SharedDatabase,
    policy: RetryPolicy,
}

impl DatabaseCatalog {
    #[must_use]
    pub fn new(db: SharedDatabase, policy: RetryPolicy) -> Self {
        Self { db, policy }
    }
}

#[async_trait]
impl RecipeCatalog for DatabaseCatalog {
    async fn calories_by_title(&self, titles: &[String]) -> anyhow::Result<HashMap<String, f64>> {
        retry_with_backoff("recipe_catalog", &self.policy, || {
            let result = lock(&self.db).calories_by_titles(titles);
            std::future::ready(result)
        })
        .await
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub stats: Vec<NutritionDailyStat>,
    /// True when `stats` were rebuilt rather than taken from storage.
    pub reconciled: bool,
}

#[must_use]
pub fn stats_are_usable(stats: &[NutritionDailyStat]) -> bool {
    stats.len() == 7 && stats.iter().all(|s| s.total_calories >= MIN_DAILY_CALORIES)
}

/// Stored stats if usable, else totals rebuilt from `records`.
pub async fn reconcile(
    stored: Vec<NutritionDailyStat>,
    records: &[DailyMealRecord],
    week: &WeekInfo,
    catalog: &dyn RecipeCatalog,
) -> Reconciliation {
    if stats_are_usable(&stored) {
        return Reconciliation {
            stats: stored,
            reconciled: false,
        };
    }
    tracing::info!(
        stored_days = stored.len(),
        records = records.len(),
        "Stored nutrition stats are incomplete; recomputing from meal records"
    );

    let mut days: Vec<NutritionDailyStat> = week
        .dates()
        .into_iter()
        .zip(1..)
        .map(|(date, day_of_week)| NutritionDailyStat::empty(day_of_week, date))
        .collect();

    // Items of each low-calorie meal, by record index.
    let suspicious: HashMap<usize, Vec<String>> = records
        .iter()
        .enumerate()
        .filter(|(_, r)| r.nutrition.calories < SUSPICIOUS_MEAL_CALORIES)
        .filter_map(|(i, r)| {
            let summary = CompositionSummary::from_stored(&r.composition_summary).ok()?;
            (!summary.items.is_empty()).then_some((i, summary.items))
        })
        .collect();

    let titles: Vec<String> = suspicious
        .values()
        .flatten()
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let catalog_calories = if titles.is_empty() {
        HashMap::new()
    } else {
        match catalog.calories_by_title(&titles).await {
            Ok(found) => found,
            Err(e) => {
                let err = DietError::RecipeLookupFailure(e);
                tracing::warn!(error = %err, "Keeping stored meal calories");
                HashMap::new()
            }
        }
    };

    for (i, record) in records.iter().enumerate() {
        let Some(day) = days.iter_mut().find(|d| d.date == record.plan_date) else {
            continue;
        };
        let mut nutrition = record.nutrition;
        if let Some(items) = suspicious.get(&i) {
            let recomputed: f64 = items
                .iter()
                .filter_map(|title| catalog_calories.get(title))
                .sum();
            if recomputed > nutrition.calories {
                tracing::debug!(
                    record_id = record.id,
                    stored = nutrition.calories,
                    recomputed,
                    "Raised meal calories from recipe catalog"
                );
                nutrition.calories = recomputed;
            }
        }
        day.add_meal(&nutrition);
    }

    Reconciliation {
        stats: days,
        reconciled: true,
    }
}

/// Store the generation-time stats as given. Failure is logged and reported as zero rows.
pub fn persist_generated(db: &Database, weekly_plan_id: &str, stats: &[NutritionDailyStat]) -> usize {
    if stats.is_empty() {
        return 0;
    }
    match db.insert_nutrition_stats(weekly_plan_id, stats) {
        Ok(count) => {
            tracing::info!(days = count, "Stored nutrition stats");
            count
        }
        Err(cause) => {
            let err = DietError::SecondaryPersistenceFailure {
                artifact: "nutrition stats",
                cause,
            };
            tracing::error!(error = %err, "Continuing without nutrition stats");
            0
        }
    }
}
