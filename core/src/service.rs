use std::sync::Arc;
use std::time::Instant;

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::cache::{InMemoryWeekCache, WeekCache, invalidate_week};
use crate::composer::{ComposeRequest, Composer, DiversityLevel};
use crate::db::{SharedDatabase, lock};
use crate::error::{DietError, Result};
use crate::history::scan_week;
use crate::models::{NewWeeklyDietPlan, ShoppingListItem, User};
use crate::reader::{WeekRead, read_week};
use crate::reconciler::{DatabaseCatalog, RecipeCatalog, persist_generated};
use crate::regeneration::{RegenerationLocks, clear_week};
use crate::retry::{RetryPolicy, retry_with_backoff};
use crate::week::{self, WeekInfo, WeekToken, WeekType};
use crate::{materializer, shopping};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    /// Any day of the wanted week; wins over `week_type`.
    pub week_start_date: Option<String>,
    /// `this` or `next`.
    pub week_type: Option<String>,
    pub avoid_recent_recipes: Option<bool>,
    pub diversity_level: Option<DiversityLevel>,
}

impl GenerateRequest {
    fn week_token(&self) -> &str {
        self.week_start_date
            .as_deref()
            .or(self.week_type.as_deref())
            .unwrap_or("this")
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationSummary {
    pub weekly_plan_id: String,
    pub week_start_date: NaiveDate,
    pub week_year: i32,
    pub week_number: u32,
    pub total_recipes: i64,
    pub generation_time_ms: i64,
}

/// Generation and read pipelines over one database and one Composer.
pub struct WeeklyDietService {
    db: SharedDatabase,
    composer: Arc<dyn Composer>,
    catalog: Arc<dyn RecipeCatalog>,
    cache: Arc<dyn WeekCache>,
    locks: RegenerationLocks,
    retry: RetryPolicy,
}

impl WeeklyDietService {
    pub fn new(db: SharedDatabase, composer: Arc<dyn Composer>) -> Self {
        let retry = RetryPolicy::default();
        Self {
            catalog: Arc::new(DatabaseCatalog::new(Arc::clone(&db), retry.clone())),
            cache: Arc::new(InMemoryWeekCache::new()),
            db,
            composer,
            locks: RegenerationLocks::default(),
            retry,
        }
    }

    #[must_use]
    pub fn with_catalog(mut self, catalog: Arc<dyn RecipeCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn WeekCache>) -> Self {
        self.cache = cache;
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn database(&self) -> &SharedDatabase {
        &self.db
    }

    fn find_user(&self, auth_id: &str) -> Result<Option<User>> {
        lock(&self.db)
            .get_user_by_auth_id(auth_id)
            .map_err(DietError::UserLookupFailed)
    }

    fn find_or_create_user(&self, auth_id: &str) -> Result<User> {
        if let Some(user) = self.find_user(auth_id)? {
            return Ok(user);
        }
        let user = lock(&self.db)
            .create_user(auth_id)
            .map_err(DietError::UserCreateFailed)?;
        tracing::info!(user_id = %user.id, "Created user");
        Ok(user)
    }

    /// Regenerate a week: scan what it held, clear it, compose a new one and store it.
    ///
    /// Only the plan row is required to succeed once the Composer has answered; meal
    /// records, shopping list and stats failures are logged and left out.
    #[tracing::instrument(skip(self, request), fields(week = %request.week_token()))]
    pub async fn generate_week(&self, auth_id: &str, request: &GenerateRequest) -> Result<GenerationSummary> {
        let started = Instant::now();
        let today = Local::now().date_naive();
        let week = week::resolve(request.week_token().parse()?, today)?;

        let user = self.find_or_create_user(auth_id)?;
        let (profile, family_members) = {
            let db = lock(&self.db);
            let profile = db
                .get_health_profile(&user.id)
                .map_err(DietError::UserLookupFailed)?
                .ok_or(DietError::ProfileMissing)?;
            let members = db
                .list_family_members(&user.id)
                .map_err(DietError::UserLookupFailed)?;
            (profile, members)
        };

        let _guard = self.locks.acquire(&user.id, &week).await;
        tracing::info!(
            user_id = %user.id,
            iso_week = %week.iso_token(),
            week_start = %week.week_start_date,
            "Generating weekly plan"
        );

        let exclusions = scan_week(&lock(&self.db), &user.id, &week);
        clear_week(&lock(&self.db), &user.id, &week);

        let compose_request = ComposeRequest {
            user_id: user.id.clone(),
            week_start_date: week.week_start_date,
            health_profile: profile.profile,
            family_members,
            avoid_recent_recipes: request.avoid_recent_recipes.unwrap_or(true),
            diversity_level: request.diversity_level.unwrap_or_default(),
            existing_used_by_category: exclusions,
        };
        let output = retry_with_backoff("composer", &self.retry, || {
            self.composer.compose(&compose_request)
        })
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Composer failed");
            DietError::ComposerFailure(e)
        })?;
        warn_on_identity_mismatch(&output.metadata, &week);

        let records = materializer::materialize(&user.id, &week, &output);
        let total_recipes = if output.metadata.total_recipes_count > 0 {
            output.metadata.total_recipes_count
        } else {
            i64::try_from(records.len()).unwrap_or(i64::MAX)
        };
        let generation_time_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

        let plan = {
            let db = lock(&self.db);
            let plan = db
                .insert_weekly_plan(&NewWeeklyDietPlan {
                    user_id: user.id.clone(),
                    week_start_date: week.week_start_date,
                    week_year: week.week_year,
                    week_number: week.week_number,
                    is_family: output.metadata.is_family,
                    total_recipes_count: total_recipes,
                    generation_duration_ms: generation_time_ms,
                })
                .map_err(DietError::PrimaryPersistenceFailure)?;
            materializer::persist(&db, &records);
            shopping::persist(&db, &plan.id, &output.shopping_list);
            persist_generated(&db, &plan.id, &output.nutrition_stats);
            plan
        };

        invalidate_week(self.cache.as_ref(), &user.id, week.week_start_date, today);
        tracing::info!(
            weekly_plan_id = %plan.id,
            total_recipes,
            generation_time_ms,
            "Weekly plan stored"
        );

        Ok(GenerationSummary {
            weekly_plan_id: plan.id,
            week_start_date: week.week_start_date,
            week_year: week.week_year,
            week_number: week.week_number,
            total_recipes,
            generation_time_ms,
        })
    }

    /// Read a stored week. Unknown users read as a missing week.
    #[tracing::instrument(skip(self))]
    pub async fn read_week(&self, auth_id: &str, token: &str) -> Result<WeekRead> {
        let parsed: WeekToken = token.parse()?;
        let today = Local::now().date_naive();
        let week = week::resolve(parsed, today)?;

        let Some(user) = self.find_user(auth_id)? else {
            return Ok(WeekRead::Missing(week));
        };

        let week_type = match parsed {
            WeekToken::This => Some(WeekType::This),
            WeekToken::Next => Some(WeekType::Next),
            WeekToken::Date(_) | WeekToken::Iso { .. } => None,
        };
        if let Some(week_type) = week_type {
            if let Some(view) = self.cache.get(&user.id, week_type, week.week_start_date) {
                tracing::debug!(week_type = %week_type, "Serving cached week");
                return Ok(WeekRead::Found(Box::new(view)));
            }
        }

        // Taken before loading, so a regeneration that lands mid-read voids the fill.
        let epoch = week_type.map(|week_type| self.cache.epoch(&user.id, week_type));
        let read = read_week(&self.db, self.catalog.as_ref(), &user.id, &week).await?;
        if let (Some(week_type), Some(epoch), WeekRead::Found(view)) = (week_type, epoch, &read) {
            if !self.cache.put(&user.id, week_type, epoch, view.as_ref().clone()) {
                tracing::debug!(week_type = %week_type, "Week changed during read; not caching");
            }
        }
        Ok(read)
    }

    /// Mark a shopping-list item of one of the user's plans bought or not.
    #[tracing::instrument(skip(self))]
    pub fn set_item_purchased(&self, auth_id: &str, item_id: i64, is_purchased: bool) -> Result<ShoppingListItem> {
        let not_found = || DietError::NotFound(format!("Shopping list item {item_id} not found"));
        let user = self.find_user(auth_id)?.ok_or_else(not_found)?;
        let item = lock(&self.db)
            .set_shopping_item_purchased(&user.id, item_id, is_purchased)
            .map_err(DietError::ReadFailed)?
            .ok_or_else(not_found)?;
        for week_type in [WeekType::This, WeekType::Next] {
            if let Err(e) = self.cache.invalidate(&user.id, week_type) {
                tracing::warn!(error = %format!("{e:#}"), "Failed to invalidate cached week");
            }
        }
        Ok(item)
    }
}

fn warn_on_identity_mismatch(metadata: &crate::composer::PlanMetadata, week: &WeekInfo) {
    let mismatched = metadata.week_start_date.is_some_and(|d| d != week.week_start_date)
        || metadata.week_year.is_some_and(|y| y != week.week_year)
        || metadata.week_number.is_some_and(|n| n != week.week_number);
    if mismatched {
        tracing::warn!(
            composer_week_start = ?metadata.week_start_date,
            composer_week_year = ?metadata.week_year,
            composer_week_number = ?metadata.week_number,
            "Composer reported a different week; storing under the requested week"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::Notify;
    use serde_json::{Value, json};

    use crate::composer::ComposerOutput;
    use crate::db::Database;
    use crate::error::ComposerError;
    use crate::models::MealType;

    /// Answers with a full week of single-recipe meals, numbering titles per call.
    struct MockComposer {
        calls: AtomicUsize,
        fail_with: Option<u16>,
        requests: Mutex<Vec<ComposeRequest>>,
        persisted: bool,
        /// Also plan the Monday after the requested week.
        spill_into_next_week: bool,
        with_stats: bool,
    }

    impl MockComposer {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_with: None,
                requests: Mutex::new(Vec::new()),
                persisted: false,
                spill_into_next_week: false,
                with_stats: true,
            }
        }
    }

    #[async_trait]
    impl Composer for MockComposer {
        async fn compose(&self, request: &ComposeRequest) -> std::result::Result<ComposerOutput, ComposerError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.requests.lock().unwrap().push(request.clone());
            if let Some(status) = self.fail_with {
                return Err(ComposerError::Status {
                    status,
                    body: "composer says no".into(),
                });
            }
            let week = week::week_info(request.week_start_date);
            let mut plans = serde_json::Map::new();
            let mut stats = Vec::new();
            for (date, day) in week.dates().into_iter().zip(1..) {
                let slot = |meal: &str, calories: u32| {
                    json!({
                        "recipe": { "id": format!("{meal}-{day}"), "title": format!("{meal} {day} v{call}") },
                        "nutrition": { "calories": calories }
                    })
                };
                plans.insert(
                    date.to_string(),
                    json!({
                        "breakfast": slot("breakfast", 400),
                        "lunch": {
                            "rice": { "id": format!("rice-{day}"), "title": format!("Rice {day} v{call}") },
                            "sides": [{ "title": format!("Side {day} v{call}") }],
                            "totalNutrition": { "total_calories": 650 }
                        },
                        "dinner": slot("dinner", 700),
                        "snack": slot("snack", 150),
                    }),
                );
                stats.push(json!({ "dayOfWeek": day, "date": date, "totalCalories": 1900, "mealCount": 4 }));
            }
            if self.spill_into_next_week {
                let next_monday = week.week_start_date + chrono::Days::new(7);
                plans.insert(
                    next_monday.to_string(),
                    json!({ "dinner": { "recipe": { "title": format!("Overflow v{call}") } } }),
                );
            }
            if !self.with_stats {
                stats.clear();
            }
            let output: Value = json!({
                "metadata": { "isFamily": false, "totalRecipesCount": 28, "generationDurationMs": 5 },
                "dailyPlans": plans,
                "shoppingList": [{ "ingredientName": "Rice", "totalQuantity": 1.5, "unit": "kg",
                                   "category": "grain", "recipesUsing": [] }],
                "nutritionStats": stats,
                "dailyPlansPersisted": self.persisted,
            });
            Ok(serde_json::from_value(output).unwrap())
        }
    }

    fn service(composer: Arc<MockComposer>) -> WeeklyDietService {
        let db = Database::open_in_memory().unwrap();
        WeeklyDietService::new(Arc::new(Mutex::new(db)), composer).with_retry_policy(RetryPolicy {
            max_attempts: 2,
            initial_backoff: std::time::Duration::from_millis(1),
            ..RetryPolicy::default()
        })
    }

    fn with_profile(service: &WeeklyDietService, auth_id: &str) -> String {
        let db = lock(service.database());
        let user = db.create_user(auth_id).unwrap();
        db.upsert_health_profile(&user.id, &json!({ "goal": "maintain", "calories": 2000 }))
            .unwrap();
        user.id
    }

    #[tokio::test]
    async fn test_generate_this_week_from_scratch() {
        let composer = Arc::new(MockComposer::new());
        let service = service(Arc::clone(&composer));
        let user_id = with_profile(&service, "auth-1");

        let summary = service
            .generate_week("auth-1", &GenerateRequest::default())
            .await
            .unwrap();
        let this_week = week::week_info(week::this_monday());
        assert_eq!(summary.week_start_date, this_week.week_start_date);
        assert_eq!(summary.week_year, this_week.week_year);
        assert_eq!(summary.week_number, this_week.week_number);
        assert_eq!(summary.total_recipes, 28);

        let db = lock(service.database());
        let records = db.get_meal_records(&user_id, this_week.week_start_date).unwrap();
        let dates: std::collections::BTreeSet<_> = records.iter().map(|r| r.plan_date).collect();
        assert_eq!(dates.len(), 7);
        assert_eq!(records.len(), 28);
        assert_eq!(db.get_nutrition_stats(&summary.weekly_plan_id).unwrap().len(), 7);
        assert_eq!(db.get_shopping_list(&summary.weekly_plan_id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_regenerating_replaces_the_week() {
        let composer = Arc::new(MockComposer::new());
        let service = service(Arc::clone(&composer));
        let user_id = with_profile(&service, "auth-1");
        let request = GenerateRequest {
            week_start_date: Some("2025-01-06".into()),
            ..Default::default()
        };

        let first = service.generate_week("auth-1", &request).await.unwrap();
        let second = service.generate_week("auth-1", &request).await.unwrap();
        assert_ne!(first.weekly_plan_id, second.weekly_plan_id);
        assert_eq!(second.week_number, 2);

        let monday = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap();
        {
            let db = lock(service.database());
            assert_eq!(db.count_weekly_plans(&user_id, 2025, 2).unwrap(), 1);
            let records = db.get_meal_records(&user_id, monday).unwrap();
            assert_eq!(records.len(), 28);
            assert!(records.iter().all(|r| r.recipe_title.ends_with("v2")));
            assert!(db.get_shopping_list(&first.weekly_plan_id).unwrap().is_empty());
        }

        // the second call was told what the first one used
        let requests = composer.requests.lock().unwrap();
        assert!(requests[0].existing_used_by_category.is_empty());
        let used = &requests[1].existing_used_by_category;
        assert!(used.rice.contains("Rice 1 v1"));
        assert!(used.side.contains("Side 7 v1"));
        assert!(used.snack.contains("snack 3 v1"));
    }

    #[tokio::test]
    async fn test_explicit_date_snaps_to_monday() {
        let service = service(Arc::new(MockComposer::new()));
        with_profile(&service, "auth-1");
        let summary = service
            .generate_week(
                "auth-1",
                &GenerateRequest {
                    week_start_date: Some("2025-01-01".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(summary.week_start_date, NaiveDate::from_ymd_opt(2024, 12, 30).unwrap());
        assert_eq!((summary.week_year, summary.week_number), (2025, 1));
    }

    #[tokio::test]
    async fn test_missing_profile() {
        let composer = Arc::new(MockComposer::new());
        let service = service(Arc::clone(&composer));
        let err = service
            .generate_week("new-user", &GenerateRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DietError::ProfileMissing));
        // the user was still created
        assert!(lock(service.database()).get_user_by_auth_id("new-user").unwrap().is_some());
        assert_eq!(composer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_week_token() {
        let service = service(Arc::new(MockComposer::new()));
        let err = service
            .generate_week(
                "auth-1",
                &GenerateRequest {
                    week_type: Some("later".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DietError::InvalidWeekToken(_)));
    }

    #[tokio::test]
    async fn test_composer_failure_writes_no_plan() {
        let mut composer = MockComposer::new();
        composer.fail_with = Some(400);
        let composer = Arc::new(composer);
        let service = service(Arc::clone(&composer));
        let user_id = with_profile(&service, "auth-1");
        let request = GenerateRequest {
            week_start_date: Some("2025-01-06".into()),
            ..Default::default()
        };

        let err = service.generate_week("auth-1", &request).await.unwrap_err();
        assert!(matches!(
            err,
            DietError::ComposerFailure(ComposerError::Status { status: 400, .. })
        ));
        assert_eq!(composer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(lock(service.database()).count_weekly_plans(&user_id, 2025, 2).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_composer_server_errors_are_retried() {
        let mut composer = MockComposer::new();
        composer.fail_with = Some(503);
        let composer = Arc::new(composer);
        let service = service(Arc::clone(&composer));
        with_profile(&service, "auth-1");
        let err = service
            .generate_week("auth-1", &GenerateRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DietError::ComposerFailure(_)));
        assert_eq!(composer.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_daily_plans_persisted_skips_records() {
        let mut composer = MockComposer::new();
        composer.persisted = true;
        let service = service(Arc::new(composer));
        let user_id = with_profile(&service, "auth-1");
        let summary = service
            .generate_week("auth-1", &GenerateRequest::default())
            .await
            .unwrap();
        let db = lock(service.database());
        assert!(db.get_meal_records(&user_id, summary.week_start_date).unwrap().is_empty());
        assert_eq!(db.get_nutrition_stats(&summary.weekly_plan_id).unwrap().len(), 7);
    }

    #[tokio::test]
    async fn test_read_missing_week() {
        let service = service(Arc::new(MockComposer::new()));
        with_profile(&service, "auth-1");
        let read = service.read_week("auth-1", "2025-W01").await.unwrap();
        let WeekRead::Missing(week) = read else {
            panic!("expected a missing week");
        };
        assert_eq!(week.week_start_date, NaiveDate::from_ymd_opt(2024, 12, 30).unwrap());
        assert!(matches!(
            service.read_week("stranger", "this").await.unwrap(),
            WeekRead::Missing(_)
        ));
    }

    #[tokio::test]
    async fn test_read_uses_cache_until_regenerated() {
        let service = service(Arc::new(MockComposer::new()));
        with_profile(&service, "auth-1");
        service
            .generate_week("auth-1", &GenerateRequest::default())
            .await
            .unwrap();

        let WeekRead::Found(first) = service.read_week("auth-1", "this").await.unwrap() else {
            panic!("expected a stored week");
        };
        assert!(!first.nutrition_reconciled);
        let WeekRead::Found(cached) = service.read_week("auth-1", "this").await.unwrap() else {
            panic!("expected a stored week");
        };
        assert_eq!(cached.metadata.id, first.metadata.id);

        let regenerated = service
            .generate_week("auth-1", &GenerateRequest::default())
            .await
            .unwrap();
        let WeekRead::Found(fresh) = service.read_week("auth-1", "this").await.unwrap() else {
            panic!("expected a stored week");
        };
        assert_eq!(fresh.metadata.id, regenerated.weekly_plan_id);
    }

    #[tokio::test]
    async fn test_set_item_purchased() {
        let service = service(Arc::new(MockComposer::new()));
        with_profile(&service, "auth-1");
        with_profile(&service, "auth-2");
        let summary = service
            .generate_week("auth-1", &GenerateRequest::default())
            .await
            .unwrap();
        let item_id = lock(service.database())
            .get_shopping_list(&summary.weekly_plan_id)
            .unwrap()[0]
            .id;

        let item = service.set_item_purchased("auth-1", item_id, true).unwrap();
        assert!(item.is_purchased);
        assert!(matches!(
            service.set_item_purchased("auth-2", item_id, false),
            Err(DietError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_low_stats_are_reconciled_on_read() {
        struct FixedCatalog;

        #[async_trait]
        impl RecipeCatalog for FixedCatalog {
            async fn calories_by_title(&self, titles: &[String]) -> anyhow::Result<HashMap<String, f64>> {
                Ok(titles.iter().map(|t| (t.clone(), 250.0)).collect())
            }
        }

        let service = service(Arc::new(MockComposer::new())).with_catalog(Arc::new(FixedCatalog));
        let user_id = with_profile(&service, "auth-1");
        let summary = service
            .generate_week(
                "auth-1",
                &GenerateRequest {
                    week_start_date: Some("2025-01-06".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        // drop one stored day so the set is no longer complete
        {
            let db = lock(service.database());
            let stats: Vec<_> = db
                .get_nutrition_stats(&summary.weekly_plan_id)
                .unwrap()
                .into_iter()
                .take(6)
                .collect();
            db.delete_week(&user_id, 2025, 2, summary.week_start_date).unwrap();
            let plan = db
                .insert_weekly_plan(&NewWeeklyDietPlan {
                    user_id: user_id.clone(),
                    week_start_date: summary.week_start_date,
                    week_year: 2025,
                    week_number: 2,
                    is_family: false,
                    total_recipes_count: 1,
                    generation_duration_ms: 1,
                })
                .unwrap();
            db.insert_nutrition_stats(&plan.id, &stats).unwrap();
            db.insert_meal_records(&[crate::models::NewDailyMealRecord {
                user_id: user_id.clone(),
                plan_date: summary.week_start_date,
                meal_type: MealType::Snack,
                family_member_id: None,
                recipe_id: None,
                recipe_title: "Yogurt".into(),
                recipe_description: None,
                nutrition: crate::models::Nutrition {
                    calories: 90.0,
                    ..Default::default()
                },
                composition_summary: crate::models::CompositionSummary {
                    items: vec!["Yogurt".into()],
                    ..Default::default()
                },
                is_unified: false,
            }])
            .unwrap();
        }

        let WeekRead::Found(view) = service.read_week("auth-1", "2025-W02").await.unwrap() else {
            panic!("expected a stored week");
        };
        assert!(view.nutrition_reconciled);
        assert!((view.nutrition_stats[0].total_calories - 250.0).abs() < f64::EPSILON);
        assert_eq!(view.daily_plans.len(), 1);
        assert!(view.daily_plans[&summary.week_start_date].snack.is_some());
    }

    #[tokio::test]
    async fn test_days_past_the_week_do_not_break_regeneration() {
        let mut composer = MockComposer::new();
        composer.spill_into_next_week = true;
        let service = service(Arc::new(composer));
        let user_id = with_profile(&service, "auth-1");
        let request = GenerateRequest {
            week_start_date: Some("2025-01-06".into()),
            ..Default::default()
        };

        service.generate_week("auth-1", &request).await.unwrap();
        service.generate_week("auth-1", &request).await.unwrap();

        let db = lock(service.database());
        let records = db
            .get_meal_records(&user_id, NaiveDate::from_ymd_opt(2025, 1, 6).unwrap())
            .unwrap();
        assert_eq!(records.len(), 28);
        assert!(records.iter().all(|r| r.recipe_title.ends_with("v2")));
        let next_week = db
            .get_meal_records(&user_id, NaiveDate::from_ymd_opt(2025, 1, 13).unwrap())
            .unwrap();
        assert!(next_week.is_empty());
    }

    /// Holds the first lookup until released; later lookups answer at once.
    struct GatedCatalog {
        calls: AtomicUsize,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl RecipeCatalog for GatedCatalog {
        async fn calories_by_title(&self, _titles: &[String]) -> anyhow::Result<HashMap<String, f64>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                self.entered.notify_one();
                self.release.notified().await;
            }
            Ok(HashMap::new())
        }
    }

    #[tokio::test]
    async fn test_read_overlapping_regeneration_is_not_cached() {
        let mut composer = MockComposer::new();
        // no stored stats, so every read goes through the catalog
        composer.with_stats = false;
        let catalog = Arc::new(GatedCatalog {
            calls: AtomicUsize::new(0),
            entered: Notify::new(),
            release: Notify::new(),
        });
        let service = service(Arc::new(composer)).with_catalog(catalog.clone());
        with_profile(&service, "auth-1");
        let first = service
            .generate_week("auth-1", &GenerateRequest::default())
            .await
            .unwrap();

        let (stale, second) = tokio::join!(service.read_week("auth-1", "this"), async {
            catalog.entered.notified().await;
            let second = service
                .generate_week("auth-1", &GenerateRequest::default())
                .await
                .unwrap();
            catalog.release.notify_one();
            second
        });
        let WeekRead::Found(stale) = stale.unwrap() else {
            panic!("expected a stored week");
        };
        assert_eq!(stale.metadata.id, first.weekly_plan_id);

        let WeekRead::Found(served) = service.read_week("auth-1", "this").await.unwrap() else {
            panic!("expected a stored week");
        };
        assert_eq!(served.metadata.id, second.weekly_plan_id);
        let dinner = served.daily_plans.values().next().unwrap().dinner.as_ref().unwrap();
        assert!(dinner.recipe_title.ends_with("v2"));
    }
}
