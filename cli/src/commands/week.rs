use anyhow::Result;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use dietweek_core::db::{SharedDatabase, lock};
use dietweek_core::models::{DailyMealRecord, WeekView};
use dietweek_core::reader::{WeekRead, read_week};
use dietweek_core::reconciler::DatabaseCatalog;
use dietweek_core::retry::RetryPolicy;
use dietweek_core::service::{GenerateRequest, WeeklyDietService};
use dietweek_core::week;

use super::helpers::{no_neg_zero, truncate};

#[derive(Tabled)]
struct MealRow {
    #[tabled(rename = "Date")]
    date: String,
    #[tabled(rename = "Meal")]
    meal: String,
    #[tabled(rename = "Recipe")]
    recipe: String,
    #[tabled(rename = "kcal")]
    calories: String,
}

#[derive(Tabled)]
struct DayRow {
    #[tabled(rename = "Date")]
    date: String,
    #[tabled(rename = "Meals")]
    meals: u32,
    #[tabled(rename = "kcal")]
    calories: String,
    #[tabled(rename = "Carbs")]
    carbs: String,
    #[tabled(rename = "Protein")]
    protein: String,
    #[tabled(rename = "Fat")]
    fat: String,
}

fn meal_row(record: &DailyMealRecord) -> MealRow {
    let meal = match &record.family_member_id {
        Some(member) => format!("{} ({})", record.meal_type, truncate(member, 8)),
        None => record.meal_type.to_string(),
    };
    MealRow {
        date: record.plan_date.format("%a %m-%d").to_string(),
        meal,
        recipe: truncate(&record.recipe_title, 40),
        calories: format!("{:.0}", no_neg_zero(record.nutrition.calories)),
    }
}

fn meal_rows(view: &WeekView) -> Vec<MealRow> {
    view.daily_plans
        .values()
        .flat_map(|day| {
            [&day.breakfast, &day.lunch, &day.dinner, &day.snack]
                .into_iter()
                .flatten()
                .chain(day.members.iter())
        })
        .map(meal_row)
        .collect()
}

fn day_rows(view: &WeekView) -> Vec<DayRow> {
    view.nutrition_stats
        .iter()
        .map(|s| DayRow {
            date: s.date.format("%a %m-%d").to_string(),
            meals: s.meal_count,
            calories: format!("{:.0}", no_neg_zero(s.total_calories)),
            carbs: format!("{:.1}g", no_neg_zero(s.total_carbohydrates)),
            protein: format!("{:.1}g", no_neg_zero(s.total_protein)),
            fat: format!("{:.1}g", no_neg_zero(s.total_fat)),
        })
        .collect()
}

fn print_week(view: &WeekView) {
    let plan = &view.metadata;
    println!(
        "Week {}-W{:02} (from {}){}",
        plan.week_year,
        plan.week_number,
        view.week_start_date,
        if plan.is_family { ", family plan" } else { "" }
    );

    let meals = Table::new(meal_rows(view))
        .with(Style::rounded())
        .with(Modify::new(Columns::new(3..4)).with(Alignment::right()))
        .to_string();
    println!("{meals}");

    println!(
        "\nNutrition{}",
        if view.nutrition_reconciled { " (recomputed from meals)" } else { "" }
    );
    let days = Table::new(day_rows(view))
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..6)).with(Alignment::right()))
        .to_string();
    println!("{days}");

    if !view.shopping_list.is_empty() {
        println!("\nShopping list:");
        for item in &view.shopping_list {
            let mark = if item.is_purchased { "x" } else { " " };
            println!(
                "  [{mark}] {} {} {} (#{})",
                item.ingredient_name, item.total_quantity, item.unit, item.id
            );
        }
    }
}

pub(crate) async fn cmd_week_show(db: &SharedDatabase, auth_id: &str, token: &str, json: bool) -> Result<()> {
    let week = week::resolve_token(token)?;
    let user = lock(db).get_user_by_auth_id(auth_id)?;

    let read = match user {
        Some(user) => {
            let catalog = DatabaseCatalog::new(db.clone(), RetryPolicy::default());
            read_week(db, &catalog, &user.id, &week).await?
        }
        None => WeekRead::Missing(week),
    };

    match read {
        WeekRead::Found(view) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&view)?);
            } else {
                print_week(&view);
            }
        }
        WeekRead::Missing(info) => {
            if json {
                println!(
                    "{}",
                    serde_json::json!({
                        "exists": false,
                        "weekStartDate": info.week_start_date,
                        "weekYear": info.week_year,
                        "weekNumber": info.week_number,
                    })
                );
            } else {
                eprintln!(
                    "No weekly plan for {} (from {}). Use `dietweek week generate {auth_id}` to create one.",
                    info.iso_token(),
                    info.week_start_date
                );
            }
        }
    }
    Ok(())
}

pub(crate) async fn cmd_week_generate(
    service: &WeeklyDietService,
    auth_id: &str,
    request: &GenerateRequest,
    json: bool,
) -> Result<()> {
    let summary = service.generate_week(auth_id, request).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "Generated week {}-W{:02} (from {}): {} recipes in {} ms.",
            summary.week_year,
            summary.week_number,
            summary.week_start_date,
            summary.total_recipes,
            summary.generation_time_ms
        );
        println!("Plan id: {}", summary.weekly_plan_id);
    }
    Ok(())
}
