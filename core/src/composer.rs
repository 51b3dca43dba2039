use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ComposerError;
use crate::models::{
    ExclusionSet, FamilyMember, MealType, Nutrition, NutritionDailyStat, ShoppingListEntry,
    id_from_value,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiversityLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl FromStr for DiversityLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => anyhow::bail!("Invalid diversity level '{s}'. Must be one of: low, medium, high"),
        }
    }
}

impl fmt::Display for DiversityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposeRequest {
    pub user_id: String,
    pub week_start_date: NaiveDate,
    pub health_profile: Value,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub family_members: Vec<FamilyMember>,
    pub avoid_recent_recipes: bool,
    pub diversity_level: DiversityLevel,
    pub existing_used_by_category: ExclusionSet,
}

#[async_trait]
pub trait Composer: Send + Sync {
    async fn compose(&self, request: &ComposeRequest) -> Result<ComposerOutput, ComposerError>;
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlanMetadata {
    pub week_start_date: Option<NaiveDate>,
    pub week_year: Option<i32>,
    pub week_number: Option<u32>,
    pub is_family: bool,
    pub total_recipes_count: i64,
    pub generation_duration_ms: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ComposerOutput {
    pub metadata: PlanMetadata,
    pub daily_plans: BTreeMap<NaiveDate, DayPlan>,
    pub shopping_list: Vec<ShoppingListEntry>,
    pub nutrition_stats: Vec<NutritionDailyStat>,
    /// The Composer already wrote the daily records itself.
    pub daily_plans_persisted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DayPlan {
    pub breakfast: Option<MealSlot>,
    pub lunch: Option<MealSlot>,
    pub dinner: Option<MealSlot>,
    pub snack: Option<MealSlot>,
}

impl DayPlan {
    pub fn slots(&self) -> impl Iterator<Item = (MealType, &MealSlot)> {
        [
            (MealType::Breakfast, self.breakfast.as_ref()),
            (MealType::Lunch, self.lunch.as_ref()),
            (MealType::Dinner, self.dinner.as_ref()),
            (MealType::Snack, self.snack.as_ref()),
        ]
        .into_iter()
        .filter_map(|(meal_type, slot)| slot.map(|s| (meal_type, s)))
    }
}

/// A meal slot as the Composer returns it. The shape is decided once, here.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "Value")]
pub enum MealSlot {
    Composition(MealComposition),
    Single(SingleRecipe),
    AlreadyPersisted,
}

impl From<Value> for MealSlot {
    fn from(value: Value) -> Self {
        if value.get("alreadyPersisted").and_then(Value::as_bool) == Some(true) {
            return MealSlot::AlreadyPersisted;
        }
        if value.get("totalNutrition").is_some() && value.get("sides").is_some() {
            return MealSlot::Composition(MealComposition::from_value(&value));
        }
        MealSlot::Single(SingleRecipe::from_value(&value))
    }
}

/// A catalog dish referenced from a composition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dish {
    pub id: Option<String>,
    pub title: Option<String>,
}

impl Dish {
    fn from_value(value: &Value) -> Option<Self> {
        if !value.is_object() {
            return None;
        }
        let dish = Self {
            id: value.get("id").and_then(id_from_value),
            title: non_empty_str(value.get("title")),
        };
        (dish.id.is_some() || dish.title.is_some()).then_some(dish)
    }
}

/// A meal assembled from rice, side dishes and a soup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MealComposition {
    pub rice: Option<Dish>,
    pub sides: Vec<Dish>,
    pub soup: Option<Dish>,
    /// `compositionSummary.items` as sent, if any.
    pub items: Vec<String>,
    pub description: Option<String>,
    pub nutrition: Nutrition,
}

impl MealComposition {
    fn from_value(value: &Value) -> Self {
        let sides = value
            .get("sides")
            .and_then(Value::as_array)
            .map(|sides| sides.iter().filter_map(Dish::from_value).collect())
            .unwrap_or_default();
        let items = value
            .pointer("/compositionSummary/items")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| non_empty_str(Some(item)))
                    .collect()
            })
            .unwrap_or_default();
        Self {
            rice: value.get("rice").and_then(Dish::from_value),
            sides,
            soup: value.get("soup").and_then(Dish::from_value),
            items,
            description: non_empty_str(value.get("description")),
            nutrition: value
                .get("totalNutrition")
                .map(Nutrition::from_loose)
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SingleRecipe {
    pub id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub nutrition: Nutrition,
}

impl SingleRecipe {
    fn from_value(value: &Value) -> Self {
        let recipe = value.get("recipe").unwrap_or(&Value::Null);
        // Slot-level nutrition wins over the recipe's own.
        let nutrition = value
            .get("nutrition")
            .filter(|n| n.is_object())
            .or_else(|| recipe.get("nutrition"))
            .map(Nutrition::from_loose)
            .unwrap_or_default();
        Self {
            id: recipe.get("id").and_then(id_from_value),
            title: non_empty_str(recipe.get("title")),
            description: non_empty_str(recipe.get("description")),
            nutrition,
        }
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
