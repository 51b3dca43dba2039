use crate::db::{SharedDatabase, lock};
use crate::error::{DietError, Result};
use crate::models::{DayMeals, WeekView};
use crate::reconciler::{RecipeCatalog, reconcile};
use crate::week::WeekInfo;

#[derive(Debug, Clone)]
pub enum WeekRead {
    Found(Box<WeekView>),
    /// No plan is stored for the week.
    Missing(WeekInfo),
}

/// Load a stored week with its meals, shopping list and nutrition totals. Anomalous
/// totals are recomputed for the response only.
pub async fn read_week(
    db: &SharedDatabase,
    catalog: &dyn RecipeCatalog,
    user_id: &str,
    week: &WeekInfo,
) -> Result<WeekRead> {
    let (plan, records, shopping_list, stored_stats) = {
        let db = lock(db);
        let Some(plan) = db
            .get_weekly_plan(user_id, week.week_year, week.week_number)
            .map_err(DietError::ReadFailed)?
        else {
            return Ok(WeekRead::Missing(*week));
        };
        let records = db
            .get_meal_records(user_id, week.week_start_date)
            .map_err(DietError::ReadFailed)?;
        let shopping_list = db.get_shopping_list(&plan.id).map_err(DietError::ReadFailed)?;
        let stats = db.get_nutrition_stats(&plan.id).map_err(DietError::ReadFailed)?;
        (plan, records, shopping_list, stats)
    };

    let reconciliation = reconcile(stored_stats, &records, week, catalog).await;

    Ok(WeekRead::Found(Box::new(WeekView {
        metadata: plan,
        daily_plans: DayMeals::group(records),
        shopping_list,
        nutrition_stats: reconciliation.stats,
        nutrition_reconciled: reconciliation.reconciled,
        week_start_date: week.week_start_date,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::NaiveDate;

    use crate::db::Database;
    use crate::models::{
        CompositionSummary, MealType, NewDailyMealRecord, NewWeeklyDietPlan, Nutrition,
        NutritionDailyStat,
    };
    use crate::week::week_info;

    struct EmptyCatalog;

    #[async_trait]
    impl RecipeCatalog for EmptyCatalog {
        async fn calories_by_title(&self, _titles: &[String]) -> anyhow::Result<HashMap<String, f64>> {
            Ok(HashMap::new())
        }
    }

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 6).unwrap()
    }

    fn seeded(stats: &[NutritionDailyStat]) -> (SharedDatabase, String) {
        let db = Database::open_in_memory().unwrap();
        let user = db.create_user("auth-1").unwrap();
        let plan = db
            .insert_weekly_plan(&NewWeeklyDietPlan {
                user_id: user.id.clone(),
                week_start_date: monday(),
                week_year: 2025,
                week_number: 2,
                is_family: false,
                total_recipes_count: 1,
                generation_duration_ms: 10,
            })
            .unwrap();
        db.insert_meal_records(&[NewDailyMealRecord {
            user_id: user.id.clone(),
            plan_date: monday(),
            meal_type: MealType::Dinner,
            family_member_id: None,
            recipe_id: None,
            recipe_title: "Kimchi stew".into(),
            recipe_description: None,
            nutrition: Nutrition {
                calories: 640.0,
                ..Default::default()
            },
            composition_summary: CompositionSummary {
                items: vec!["Kimchi stew".into()],
                ..Default::default()
            },
            is_unified: false,
        }])
        .unwrap();
        db.insert_nutrition_stats(&plan.id, stats).unwrap();
        (Arc::new(Mutex::new(db)), user.id)
    }

    #[tokio::test]
    async fn test_missing_week() {
        let (db, user_id) = seeded(&[]);
        let week = week_info(NaiveDate::from_ymd_opt(2024, 12, 30).unwrap());
        let read = read_week(&db, &EmptyCatalog, &user_id, &week).await.unwrap();
        let WeekRead::Missing(info) = read else {
            panic!("expected a missing week");
        };
        assert_eq!(info.iso_token(), "2025-W01");
    }

    #[tokio::test]
    async fn test_found_week_is_reconciled_without_writing() {
        let stats = vec![NutritionDailyStat {
            total_calories: 300.0,
            ..NutritionDailyStat::empty(1, monday())
        }];
        let (db, user_id) = seeded(&stats);
        let read = read_week(&db, &EmptyCatalog, &user_id, &week_info(monday()))
            .await
            .unwrap();
        let WeekRead::Found(view) = read else {
            panic!("expected a stored week");
        };
        assert!(view.nutrition_reconciled);
        assert_eq!(view.nutrition_stats.len(), 7);
        assert!((view.nutrition_stats[0].total_calories - 640.0).abs() < f64::EPSILON);
        assert_eq!(
            view.daily_plans[&monday()].dinner.as_ref().unwrap().recipe_title,
            "Kimchi stew"
        );

        // storage still holds the single original row
        let plan_id = view.metadata.id.clone();
        let stored = lock(&db).get_nutrition_stats(&plan_id).unwrap();
        assert_eq!(stored, stats);
    }
}
