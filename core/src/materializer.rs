use crate::composer::{ComposerOutput, Dish, MealComposition, MealSlot, SingleRecipe};
use crate::db::Database;
use crate::error::DietError;
use crate::models::{CompositionSummary, MealType, NewDailyMealRecord};
use crate::week::WeekInfo;

const TITLE_SEPARATOR: &str = " · ";

/// One record per filled slot, in date then meal order. Slots the Composer already
/// stored are skipped, and nothing is produced when it stored the whole week.
/// Days outside `week` are dropped; `clear_week` would never remove them.
#[must_use]
pub fn materialize(user_id: &str, week: &WeekInfo, output: &ComposerOutput) -> Vec<NewDailyMealRecord> {
    if output.daily_plans_persisted {
        return Vec::new();
    }
    let week_dates = week.dates();
    let is_unified = output.metadata.is_family;
    let mut records = Vec::new();
    for (date, day) in &output.daily_plans {
        if !week_dates.contains(date) {
            tracing::warn!(
                plan_date = %date,
                week_start = %week.week_start_date,
                "Composer returned a day outside the requested week; skipping it"
            );
            continue;
        }
        for (meal_type, slot) in day.slots() {
            let (recipe_id, recipe_title, recipe_description, nutrition, summary) = match slot {
                MealSlot::AlreadyPersisted => continue,
                MealSlot::Composition(meal) => {
                    let (title, summary) = composition_title(meal, meal_type);
                    (composition_recipe_id(meal), title, meal.description.clone(), meal.nutrition, summary)
                }
                MealSlot::Single(recipe) => {
                    let (title, summary) = single_title(recipe, meal_type);
                    (recipe.id.clone(), title, recipe.description.clone(), recipe.nutrition, summary)
                }
            };
            records.push(NewDailyMealRecord {
                user_id: user_id.to_string(),
                plan_date: *date,
                meal_type,
                family_member_id: None,
                recipe_id,
                recipe_title,
                recipe_description,
                nutrition,
                composition_summary: summary,
                is_unified,
            });
        }
    }
    records
}

fn composition_title(meal: &MealComposition, meal_type: MealType) -> (String, CompositionSummary) {
    let title_of = |dish: &Option<Dish>| -> Vec<String> {
        dish.iter().filter_map(|d| d.title.clone()).collect()
    };
    let rice = title_of(&meal.rice);
    let sides: Vec<String> = meal.sides.iter().filter_map(|d| d.title.clone()).collect();
    let soup = title_of(&meal.soup);

    let items = if meal.items.is_empty() {
        rice.iter().chain(&sides).chain(&soup).cloned().collect()
    } else {
        meal.items.clone()
    };
    let title = if items.is_empty() {
        meal_type.fallback_title().to_string()
    } else {
        items.join(TITLE_SEPARATOR)
    };
    let summary = CompositionSummary {
        items,
        rice,
        sides,
        soup,
        snack: Vec::new(),
    };
    (title, summary)
}

/// Rice first, then the first side that has an id, then the soup.
fn composition_recipe_id(meal: &MealComposition) -> Option<String> {
    meal.rice
        .as_ref()
        .and_then(|d| d.id.clone())
        .or_else(|| meal.sides.iter().find_map(|d| d.id.clone()))
        .or_else(|| meal.soup.as_ref().and_then(|d| d.id.clone()))
}

fn single_title(recipe: &SingleRecipe, meal_type: MealType) -> (String, CompositionSummary) {
    let title = recipe
        .title
        .clone()
        .unwrap_or_else(|| meal_type.fallback_title().to_string());
    let snack = if meal_type == MealType::Snack {
        vec![title.clone()]
    } else {
        Vec::new()
    };
    let summary = CompositionSummary {
        items: vec![title.clone()],
        snack,
        ..Default::default()
    };
    (title, summary)
}

/// Store the records in one batch. Failure is logged and reported as zero rows.
pub fn persist(db: &Database, records: &[NewDailyMealRecord]) -> usize {
    if records.is_empty() {
        return 0;
    }
    match db.insert_meal_records(records) {
        Ok(count) => {
            tracing::info!(records = count, "Stored daily meal records");
            count
        }
        Err(cause) => {
            let err = DietError::SecondaryPersistenceFailure {
                artifact: "daily meal records",
                cause,
            };
            tracing::error!(error = %err, "Continuing without daily meal records");
            0
        }
    }
}
