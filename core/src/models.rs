use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MealType {
    Breakfast,
    Lunch,
    Dinner,
    Snack,
}

impl MealType {
    pub const ALL: [MealType; 4] = [
        MealType::Breakfast,
        MealType::Lunch,
        MealType::Dinner,
        MealType::Snack,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MealType::Breakfast => "breakfast",
            MealType::Lunch => "lunch",
            MealType::Dinner => "dinner",
            MealType::Snack => "snack",
        }
    }

    /// Title used when a single-recipe slot arrives without one.
    #[must_use]
    pub fn fallback_title(self) -> &'static str {
        match self {
            MealType::Breakfast => "Breakfast",
            MealType::Lunch => "Lunch",
            MealType::Dinner => "Dinner",
            MealType::Snack => "Snack",
        }
    }
}

impl fmt::Display for MealType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MealType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.to_lowercase();
        MealType::ALL
            .into_iter()
            .find(|m| m.as_str() == lower)
            .with_context(|| {
                format!("Invalid meal type '{s}'. Must be one of: breakfast, lunch, dinner, snack")
            })
    }
}

// --- Nutrition ---

const CALORIE_KEYS: &[&str] = &["calories", "total_calories", "totalCalories"];
const CARB_KEYS: &[&str] = &["carbs", "carbs_g", "carbsG", "carbohydrates"];
const PROTEIN_KEYS: &[&str] = &["protein", "protein_g", "proteinG"];
const FAT_KEYS: &[&str] = &["fat", "fat_g", "fatG"];
const SODIUM_KEYS: &[&str] = &["sodium", "sodium_mg", "sodiumMg"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Nutrition {
    pub calories: f64,
    pub carbs_g: f64,
    pub protein_g: f64,
    pub fat_g: f64,
    pub sodium_mg: f64,
}

impl Nutrition {
    /// Read nutrition from an object whose producers disagree on key names
    /// (`calories` vs `total_calories`, `carbs` vs `carbs_g`, ...).
    /// Missing or non-numeric values become 0.
    #[must_use]
    pub fn from_loose(value: &Value) -> Self {
        Self {
            calories: loose_number(value, CALORIE_KEYS),
            carbs_g: loose_number(value, CARB_KEYS),
            protein_g: loose_number(value, PROTEIN_KEYS),
            fat_g: loose_number(value, FAT_KEYS),
            sodium_mg: loose_number(value, SODIUM_KEYS),
        }
    }
}

fn loose_number(value: &Value, keys: &[&str]) -> f64 {
    keys.iter()
        .filter_map(|key| value.get(*key))
        .find_map(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        })
        .filter(|n| n.is_finite())
        .unwrap_or(0.0)
}

// --- Composition summary ---

/// Dish titles that make up one stored meal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompositionSummary {
    #[serde(default, deserialize_with = "lenient_titles")]
    pub items: Vec<String>,
    #[serde(default, deserialize_with = "lenient_titles", skip_serializing_if = "Vec::is_empty")]
    pub rice: Vec<String>,
    #[serde(default, deserialize_with = "lenient_titles", skip_serializing_if = "Vec::is_empty")]
    pub sides: Vec<String>,
    #[serde(default, deserialize_with = "lenient_titles", skip_serializing_if = "Vec::is_empty")]
    pub soup: Vec<String>,
    #[serde(default, deserialize_with = "lenient_titles", skip_serializing_if = "Vec::is_empty")]
    pub snack: Vec<String>,
}

impl CompositionSummary {
    /// Decode a stored summary. Older rows hold the summary JSON-encoded a second
    /// time, so a string value is unwrapped once before decoding.
    pub fn from_stored(value: &Value) -> Result<Self> {
        match value {
            Value::String(inner) => {
                let parsed: Value = serde_json::from_str(inner)
                    .context("composition summary is not valid JSON")?;
                if parsed.is_string() {
                    bail!("composition summary is encoded more than twice");
                }
                Self::from_stored(&parsed)
            }
            Value::Object(_) => serde_json::from_value(value.clone())
                .context("composition summary has an unexpected shape"),
            Value::Null => bail!("composition summary is missing"),
            other => bail!("composition summary must be an object, got {other}"),
        }
    }
}

/// Accept null, a single title, or an array; keep only non-empty strings.
fn lenient_titles<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let titles = match value {
        Value::String(s) => vec![s],
        Value::Array(values) => values
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };
    Ok(titles
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect())
}

/// An explicit `null` reads as the field's default.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// --- Users & profiles ---

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub auth_id: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthProfile {
    pub user_id: String,
    pub profile: Value,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FamilyMember {
    pub id: String,
    #[serde(skip_serializing)]
    pub user_id: String,
    pub name: String,
    pub profile: Value,
}

// --- Recipe catalog ---

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogRecipe {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub nutrition: Nutrition,
}

#[derive(Debug, Clone)]
pub struct NewCatalogRecipe {
    pub id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub nutrition: Nutrition,
}

impl NewCatalogRecipe {
    /// Build from one entry of a catalog import file.
    pub fn from_value(value: &Value) -> Result<Self> {
        let title = value
            .get("title")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .context("catalog recipe is missing a title")?
            .to_string();
        let text = |key: &str| {
            value
                .get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let nutrition = value
            .get("nutrition")
            .map_or_else(|| Nutrition::from_loose(value), Nutrition::from_loose);
        Ok(Self {
            id: value.get("id").and_then(id_from_value),
            title,
            description: text("description"),
            category: text("category"),
            nutrition,
        })
    }
}

/// Recipe ids arrive as strings or integers depending on the producer.
#[must_use]
pub fn id_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// --- Weekly plan artifacts ---

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyDietPlan {
    pub id: String,
    #[serde(skip_serializing)]
    pub user_id: String,
    pub week_start_date: NaiveDate,
    pub week_year: i32,
    pub week_number: u32,
    pub is_family: bool,
    pub total_recipes_count: i64,
    pub generation_duration_ms: i64,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewWeeklyDietPlan {
    pub user_id: String,
    pub week_start_date: NaiveDate,
    pub week_year: i32,
    pub week_number: u32,
    pub is_family: bool,
    pub total_recipes_count: i64,
    pub generation_duration_ms: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyMealRecord {
    pub id: i64,
    #[serde(skip_serializing)]
    pub user_id: String,
    pub plan_date: NaiveDate,
    pub meal_type: MealType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family_member_id: Option<String>,
    pub recipe_id: Option<String>,
    pub recipe_title: String,
    pub recipe_description: Option<String>,
    pub nutrition: Nutrition,
    /// Stored summary exactly as decoded from the row; see [`CompositionSummary::from_stored`].
    pub composition_summary: Value,
    pub is_unified: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewDailyMealRecord {
    pub user_id: String,
    pub plan_date: NaiveDate,
    pub meal_type: MealType,
    pub family_member_id: Option<String>,
    pub recipe_id: Option<String>,
    pub recipe_title: String,
    pub recipe_description: Option<String>,
    pub nutrition: Nutrition,
    pub composition_summary: CompositionSummary,
    pub is_unified: bool,
}

/// One shopping-list line as the Composer hands it over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShoppingListEntry {
    pub ingredient_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub total_quantity: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub unit: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub category: String,
    #[serde(default, deserialize_with = "lenient_titles")]
    pub recipes_using: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShoppingListItem {
    pub id: i64,
    pub weekly_plan_id: String,
    pub ingredient_name: String,
    pub total_quantity: f64,
    pub unit: String,
    pub category: String,
    pub recipes_using: Vec<String>,
    pub is_purchased: bool,
}

/// Per-day nutrition totals. `day_of_week` runs 1 (Monday) to 7 (Sunday).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NutritionDailyStat {
    pub day_of_week: u32,
    pub date: NaiveDate,
    #[serde(default)]
    pub total_calories: f64,
    #[serde(default)]
    pub total_carbohydrates: f64,
    #[serde(default)]
    pub total_protein: f64,
    #[serde(default)]
    pub total_fat: f64,
    #[serde(default)]
    pub total_sodium: f64,
    #[serde(default)]
    pub meal_count: u32,
}

impl NutritionDailyStat {
    #[must_use]
    pub fn empty(day_of_week: u32, date: NaiveDate) -> Self {
        Self {
            day_of_week,
            date,
            total_calories: 0.0,
            total_carbohydrates: 0.0,
            total_protein: 0.0,
            total_fat: 0.0,
            total_sodium: 0.0,
            meal_count: 0,
        }
    }

    pub fn add_meal(&mut self, nutrition: &Nutrition) {
        self.total_calories += nutrition.calories;
        self.total_carbohydrates += nutrition.carbs_g;
        self.total_protein += nutrition.protein_g;
        self.total_fat += nutrition.fat_g;
        self.total_sodium += nutrition.sodium_mg;
        self.meal_count += 1;
    }
}

/// Dish titles already used in the target week, per category. Sent to the
/// Composer so a regenerated week does not repeat them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionSet {
    pub rice: BTreeSet<String>,
    pub side: BTreeSet<String>,
    pub soup: BTreeSet<String>,
    pub snack: BTreeSet<String>,
}

impl ExclusionSet {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rice.is_empty() && self.side.is_empty() && self.soup.is_empty() && self.snack.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rice.len() + self.side.len() + self.soup.len() + self.snack.len()
    }
}

// --- Read view ---

/// Meals of one day, keyed the way clients render them.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DayMeals {
    pub breakfast: Option<DailyMealRecord>,
    pub lunch: Option<DailyMealRecord>,
    pub dinner: Option<DailyMealRecord>,
    pub snack: Option<DailyMealRecord>,
    /// Member-specific meals, when a family week stores them separately.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<DailyMealRecord>,
}

impl DayMeals {
    fn slot_mut(&mut self, meal_type: MealType) -> &mut Option<DailyMealRecord> {
        match meal_type {
            MealType::Breakfast => &mut self.breakfast,
            MealType::Lunch => &mut self.lunch,
            MealType::Dinner => &mut self.dinner,
            MealType::Snack => &mut self.snack,
        }
    }

    /// Group records by date; the shared (member-less) record fills each slot.
    #[must_use]
    pub fn group(records: Vec<DailyMealRecord>) -> BTreeMap<NaiveDate, DayMeals> {
        let mut days: BTreeMap<NaiveDate, DayMeals> = BTreeMap::new();
        for record in records {
            let day = days.entry(record.plan_date).or_default();
            let slot = day.slot_mut(record.meal_type);
            if record.family_member_id.is_none() && slot.is_none() {
                *slot = Some(record);
            } else {
                day.members.push(record);
            }
        }
        days
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeekView {
    pub metadata: WeeklyDietPlan,
    pub daily_plans: BTreeMap<NaiveDate, DayMeals>,
    pub shopping_list: Vec<ShoppingListItem>,
    pub nutrition_stats: Vec<NutritionDailyStat>,
    /// True when the stored stats were anomalous and `nutrition_stats` was recomputed.
    pub nutrition_reconciled: bool,
    pub week_start_date: NaiveDate,
}
