use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use chrono::{Days, Local, NaiveDate};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use serde_json::Value;
use uuid::Uuid;

use crate::models::{
    CatalogRecipe, DailyMealRecord, FamilyMember, HealthProfile, MealType, NewCatalogRecipe,
    NewDailyMealRecord, NewWeeklyDietPlan, Nutrition, NutritionDailyStat, ShoppingListEntry,
    ShoppingListItem, User, WeeklyDietPlan,
};

/// The database as the server shares it between requests.
pub type SharedDatabase = Arc<Mutex<Database>>;

/// Lock a shared database, recovering the guard if a previous holder panicked.
/// Never hold the guard across an `.await`.
pub fn lock(db: &SharedDatabase) -> MutexGuard<'_, Database> {
    db.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Database {
    conn: Connection,
}

/// Rows removed when a week is cleared for regeneration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WeekDeletion {
    pub plans: usize,
    pub meal_records: usize,
}

impl ToSql for MealType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for MealType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: anyhow::Error| FromSqlError::Other(e.into()))
    }
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS users (
                    id TEXT PRIMARY KEY,
                    auth_id TEXT NOT NULL UNIQUE,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS health_profiles (
                    user_id TEXT PRIMARY KEY REFERENCES users(id),
                    profile TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS family_members (
                    id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL REFERENCES users(id),
                    name TEXT NOT NULL,
                    profile TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS recipes (
                    id TEXT PRIMARY KEY,
                    title TEXT NOT NULL,
                    description TEXT,
                    category TEXT,
                    calories REAL NOT NULL DEFAULT 0,
                    carbs_g REAL NOT NULL DEFAULT 0,
                    protein_g REAL NOT NULL DEFAULT 0,
                    fat_g REAL NOT NULL DEFAULT 0,
                    sodium_mg REAL NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS weekly_diet_plans (
                    id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL REFERENCES users(id),
                    week_start_date TEXT NOT NULL,
                    week_year INTEGER NOT NULL,
                    week_number INTEGER NOT NULL,
                    is_family INTEGER NOT NULL DEFAULT 0,
                    total_recipes_count INTEGER NOT NULL DEFAULT 0,
                    generation_duration_ms INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS daily_meal_records (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id TEXT NOT NULL REFERENCES users(id),
                    plan_date TEXT NOT NULL,
                    meal_type TEXT NOT NULL,
                    family_member_id TEXT,
                    recipe_id TEXT,
                    recipe_title TEXT NOT NULL,
                    recipe_description TEXT,
                    calories REAL NOT NULL DEFAULT 0,
                    carbs_g REAL NOT NULL DEFAULT 0,
                    protein_g REAL NOT NULL DEFAULT 0,
                    fat_g REAL NOT NULL DEFAULT 0,
                    sodium_mg REAL NOT NULL DEFAULT 0,
                    composition_summary TEXT,
                    is_unified INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS shopping_list_items (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    weekly_plan_id TEXT NOT NULL REFERENCES weekly_diet_plans(id) ON DELETE CASCADE,
                    ingredient_name TEXT NOT NULL,
                    total_quantity REAL NOT NULL DEFAULT 0,
                    unit TEXT NOT NULL DEFAULT '',
                    category TEXT NOT NULL DEFAULT '',
                    recipes_using TEXT NOT NULL DEFAULT '[]',
                    is_purchased INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS nutrition_daily_stats (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    weekly_plan_id TEXT NOT NULL REFERENCES weekly_diet_plans(id) ON DELETE CASCADE,
                    day_of_week INTEGER NOT NULL CHECK (day_of_week BETWEEN 1 AND 7),
                    date TEXT NOT NULL,
                    total_calories REAL NOT NULL DEFAULT 0,
                    total_carbohydrates REAL NOT NULL DEFAULT 0,
                    total_protein REAL NOT NULL DEFAULT 0,
                    total_fat REAL NOT NULL DEFAULT 0,
                    total_sodium REAL NOT NULL DEFAULT 0,
                    meal_count INTEGER NOT NULL DEFAULT 0
                );

                CREATE UNIQUE INDEX IF NOT EXISTS idx_weekly_plans_user_week
                    ON weekly_diet_plans(user_id, week_year, week_number);
                CREATE UNIQUE INDEX IF NOT EXISTS idx_meal_records_slot
                    ON daily_meal_records(user_id, plan_date, meal_type, COALESCE(family_member_id, ''));
                CREATE INDEX IF NOT EXISTS idx_family_members_user ON family_members(user_id);
                CREATE INDEX IF NOT EXISTS idx_recipes_title ON recipes(title);
                CREATE INDEX IF NOT EXISTS idx_shopping_items_plan ON shopping_list_items(weekly_plan_id);
                CREATE INDEX IF NOT EXISTS idx_nutrition_stats_plan ON nutrition_daily_stats(weekly_plan_id);

                PRAGMA user_version = 1;",
            )?;
        }

        Ok(())
    }

    // --- Users ---

    fn user_from_row(row: &rusqlite::Row) -> rusqlite::Result<User> {
        Ok(User {
            id: row.get(0)?,
            auth_id: row.get(1)?,
            created_at: row.get(2)?,
        })
    }

    pub fn get_user_by_auth_id(&self, auth_id: &str) -> Result<Option<User>> {
        self.conn
            .query_row(
                "SELECT id, auth_id, created_at FROM users WHERE auth_id = ?1",
                params![auth_id],
                Self::user_from_row,
            )
            .optional()
            .context("Failed to query user")
    }

    /// Create the user for `auth_id`. If it already exists the existing row is returned.
    pub fn create_user(&self, auth_id: &str) -> Result<User> {
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "INSERT OR IGNORE INTO users (id, auth_id, created_at) VALUES (?1, ?2, ?3)",
            params![Uuid::new_v4().to_string(), auth_id, now],
        )?;
        self.get_user_by_auth_id(auth_id)?
            .context("User missing after insert")
    }

    // --- Health profiles & family ---

    pub fn get_health_profile(&self, user_id: &str) -> Result<Option<HealthProfile>> {
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT profile, updated_at FROM health_profiles WHERE user_id = ?1",
                params![user_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        row.map(|(profile, updated_at)| -> Result<HealthProfile> {
            Ok(HealthProfile {
                user_id: user_id.to_string(),
                profile: serde_json::from_str(&profile).context("Stored health profile is not JSON")?,
                updated_at,
            })
        })
        .transpose()
    }

    pub fn upsert_health_profile(&self, user_id: &str, profile: &Value) -> Result<HealthProfile> {
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO health_profiles (user_id, profile, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET profile = excluded.profile, updated_at = excluded.updated_at",
            params![user_id, profile.to_string(), now],
        )?;
        Ok(HealthProfile {
            user_id: user_id.to_string(),
            profile: profile.clone(),
            updated_at: now,
        })
    }

    pub fn list_family_members(&self, user_id: &str) -> Result<Vec<FamilyMember>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, name, profile FROM family_members WHERE user_id = ?1 ORDER BY created_at, name",
        )?;
        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(id, user_id, name, profile)| -> Result<FamilyMember> {
                Ok(FamilyMember {
                    id,
                    user_id,
                    name,
                    profile: serde_json::from_str(&profile)
                        .context("Stored family member profile is not JSON")?,
                })
            })
            .collect()
    }

    pub fn add_family_member(&self, user_id: &str, name: &str, profile: &Value) -> Result<FamilyMember> {
        let id = Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO family_members (id, user_id, name, profile, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, user_id, name, profile.to_string(), Local::now().to_rfc3339()],
        )?;
        Ok(FamilyMember {
            id,
            user_id: user_id.to_string(),
            name: name.to_string(),
            profile: profile.clone(),
        })
    }

    // --- Recipe catalog ---

    fn catalog_recipe_from_row(row: &rusqlite::Row) -> rusqlite::Result<CatalogRecipe> {
        Ok(CatalogRecipe {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            category: row.get(3)?,
            nutrition: Nutrition {
                calories: row.get(4)?,
                carbs_g: row.get(5)?,
                protein_g: row.get(6)?,
                fat_g: row.get(7)?,
                sodium_mg: row.get(8)?,
            },
        })
    }

    fn insert_catalog_recipe_on(conn: &Connection, recipe: &NewCatalogRecipe) -> Result<String> {
        let id = recipe
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        conn.execute(
            "INSERT INTO recipes (id, title, description, category, calories, carbs_g, protein_g, fat_g, sodium_mg, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                category = excluded.category,
                calories = excluded.calories,
                carbs_g = excluded.carbs_g,
                protein_g = excluded.protein_g,
                fat_g = excluded.fat_g,
                sodium_mg = excluded.sodium_mg",
            params![
                id,
                recipe.title,
                recipe.description,
                recipe.category,
                recipe.nutrition.calories,
                recipe.nutrition.carbs_g,
                recipe.nutrition.protein_g,
                recipe.nutrition.fat_g,
                recipe.nutrition.sodium_mg,
                Local::now().to_rfc3339(),
            ],
        )?;
        Ok(id)
    }

    /// Insert or update a catalog recipe, keyed by its id.
    pub fn upsert_catalog_recipe(&self, recipe: &NewCatalogRecipe) -> Result<CatalogRecipe> {
        let id = Self::insert_catalog_recipe_on(&self.conn, recipe)?;
        self.get_catalog_recipe(&id)
    }

    /// Import many catalog recipes at once; all or nothing.
    pub fn import_catalog(&self, recipes: &[NewCatalogRecipe]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        for recipe in recipes {
            Self::insert_catalog_recipe_on(&tx, recipe)
                .with_context(|| format!("Failed to import recipe '{}'", recipe.title))?;
        }
        tx.commit()?;
        Ok(recipes.len())
    }

    pub fn get_catalog_recipe(&self, id: &str) -> Result<CatalogRecipe> {
        self.conn
            .query_row(
                "SELECT id, title, description, category, calories, carbs_g, protein_g, fat_g, sodium_mg
                 FROM recipes WHERE id = ?1",
                params![id],
                Self::catalog_recipe_from_row,
            )
            .context("Recipe not found")
    }

    pub fn count_catalog_recipes(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM recipes", [], |row| row.get(0))?)
    }

    /// Calories per recipe title, exact match, in a single query.
    /// When several recipes share a title the oldest one wins.
    pub fn calories_by_titles(&self, titles: &[String]) -> Result<HashMap<String, f64>> {
        if titles.is_empty() {
            return Ok(HashMap::new());
        }
        let placeholders = vec!["?"; titles.len()].join(", ");
        let sql = format!(
            "SELECT title, calories FROM recipes WHERE title IN ({placeholders})
             ORDER BY created_at DESC, id DESC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(titles.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        // Later inserts overwrite earlier ones, so walking newest-first leaves the oldest.
        Ok(rows.into_iter().collect())
    }

    // --- Weekly plans ---

    fn weekly_plan_from_row(row: &rusqlite::Row) -> rusqlite::Result<WeeklyDietPlan> {
        Ok(WeeklyDietPlan {
            id: row.get(0)?,
            user_id: row.get(1)?,
            week_start_date: row.get(2)?,
            week_year: row.get(3)?,
            week_number: row.get(4)?,
            is_family: row.get(5)?,
            total_recipes_count: row.get(6)?,
            generation_duration_ms: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    pub fn get_weekly_plan(&self, user_id: &str, week_year: i32, week_number: u32) -> Result<Option<WeeklyDietPlan>> {
        self.conn
            .query_row(
                "SELECT id, user_id, week_start_date, week_year, week_number, is_family,
                        total_recipes_count, generation_duration_ms, created_at
                 FROM weekly_diet_plans
                 WHERE user_id = ?1 AND week_year = ?2 AND week_number = ?3",
                params![user_id, week_year, week_number],
                Self::weekly_plan_from_row,
            )
            .optional()
            .context("Failed to query weekly plan")
    }

    pub fn count_weekly_plans(&self, user_id: &str, week_year: i32, week_number: u32) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM weekly_diet_plans WHERE user_id = ?1 AND week_year = ?2 AND week_number = ?3",
            params![user_id, week_year, week_number],
            |row| row.get(0),
        )?)
    }

    /// Fails if a plan already exists for the same user and ISO week.
    pub fn insert_weekly_plan(&self, plan: &NewWeeklyDietPlan) -> Result<WeeklyDietPlan> {
        let id = Uuid::new_v4().to_string();
        let now = Local::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO weekly_diet_plans (id, user_id, week_start_date, week_year, week_number,
                    is_family, total_recipes_count, generation_duration_ms, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    id,
                    plan.user_id,
                    plan.week_start_date,
                    plan.week_year,
                    plan.week_number,
                    plan.is_family,
                    plan.total_recipes_count,
                    plan.generation_duration_ms,
                    now,
                ],
            )
            .with_context(|| {
                format!(
                    "Failed to insert weekly plan for {}-W{:02}",
                    plan.week_year, plan.week_number
                )
            })?;
        Ok(WeeklyDietPlan {
            id,
            user_id: plan.user_id.clone(),
            week_start_date: plan.week_start_date,
            week_year: plan.week_year,
            week_number: plan.week_number,
            is_family: plan.is_family,
            total_recipes_count: plan.total_recipes_count,
            generation_duration_ms: plan.generation_duration_ms,
            created_at: now,
        })
    }

    /// Remove a week's plan row (with its shopping list and stats) and every meal record
    /// dated inside the week, in one transaction.
    pub fn delete_week(
        &self,
        user_id: &str,
        week_year: i32,
        week_number: u32,
        week_start: NaiveDate,
    ) -> Result<WeekDeletion> {
        let week_end = week_end(week_start)?;
        let tx = self.conn.unchecked_transaction()?;
        let plan_filter = "SELECT id FROM weekly_diet_plans WHERE user_id = ?1 AND week_year = ?2 AND week_number = ?3";
        tx.execute(
            &format!("DELETE FROM shopping_list_items WHERE weekly_plan_id IN ({plan_filter})"),
            params![user_id, week_year, week_number],
        )?;
        tx.execute(
            &format!("DELETE FROM nutrition_daily_stats WHERE weekly_plan_id IN ({plan_filter})"),
            params![user_id, week_year, week_number],
        )?;
        let plans = tx.execute(
            "DELETE FROM weekly_diet_plans WHERE user_id = ?1 AND week_year = ?2 AND week_number = ?3",
            params![user_id, week_year, week_number],
        )?;
        let meal_records = tx.execute(
            "DELETE FROM daily_meal_records WHERE user_id = ?1 AND plan_date BETWEEN ?2 AND ?3",
            params![user_id, week_start, week_end],
        )?;
        tx.commit()?;
        Ok(WeekDeletion {
            plans,
            meal_records,
        })
    }

    // --- Daily meal records ---

    // Expects columns:
    // 0: id, 1: user_id, 2: plan_date, 3: meal_type, 4: family_member_id,
    // 5: recipe_id, 6: recipe_title, 7: recipe_description,
    // 8-12: calories, carbs_g, protein_g, fat_g, sodium_mg,
    // 13: composition_summary, 14: is_unified
    fn meal_record_from_row(row: &rusqlite::Row) -> rusqlite::Result<DailyMealRecord> {
        let summary: Option<String> = row.get(13)?;
        // Undecodable text is handed on as-is; readers decide how to treat it.
        let composition_summary = summary.map_or(Value::Null, |raw| {
            serde_json::from_str(&raw).unwrap_or(Value::String(raw))
        });
        Ok(DailyMealRecord {
            id: row.get(0)?,
            user_id: row.get(1)?,
            plan_date: row.get(2)?,
            meal_type: row.get(3)?,
            family_member_id: row.get(4)?,
            recipe_id: row.get(5)?,
            recipe_title: row.get(6)?,
            recipe_description: row.get(7)?,
            nutrition: Nutrition {
                calories: row.get(8)?,
                carbs_g: row.get(9)?,
                protein_g: row.get(10)?,
                fat_g: row.get(11)?,
                sodium_mg: row.get(12)?,
            },
            composition_summary,
            is_unified: row.get(14)?,
        })
    }

    /// Every record of `user_id` dated within the week starting `week_start`, any meal
    /// type and any family member.
    pub fn get_meal_records(&self, user_id: &str, week_start: NaiveDate) -> Result<Vec<DailyMealRecord>> {
        let week_end = week_end(week_start)?;
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, plan_date, meal_type, family_member_id, recipe_id, recipe_title,
                    recipe_description, calories, carbs_g, protein_g, fat_g, sodium_mg,
                    composition_summary, is_unified
             FROM daily_meal_records
             WHERE user_id = ?1 AND plan_date BETWEEN ?2 AND ?3
             ORDER BY plan_date,
                CASE meal_type WHEN 'breakfast' THEN 1 WHEN 'lunch' THEN 2 WHEN 'dinner' THEN 3 ELSE 4 END,
                family_member_id",
        )?;
        let records = stmt
            .query_map(params![user_id, week_start, week_end], Self::meal_record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Insert all records in one transaction; a conflict on any slot rolls back the batch.
    pub fn insert_meal_records(&self, records: &[NewDailyMealRecord]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO daily_meal_records (user_id, plan_date, meal_type, family_member_id,
                    recipe_id, recipe_title, recipe_description, calories, carbs_g, protein_g,
                    fat_g, sodium_mg, composition_summary, is_unified, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            )?;
            let now = Local::now().to_rfc3339();
            for record in records {
                let summary = serde_json::to_string(&record.composition_summary)
                    .context("Failed to encode composition summary")?;
                stmt.execute(params![
                    record.user_id,
                    record.plan_date,
                    record.meal_type,
                    record.family_member_id,
                    record.recipe_id,
                    record.recipe_title,
                    record.recipe_description,
                    record.nutrition.calories,
                    record.nutrition.carbs_g,
                    record.nutrition.protein_g,
                    record.nutrition.fat_g,
                    record.nutrition.sodium_mg,
                    summary,
                    record.is_unified,
                    now,
                ])
                .with_context(|| {
                    format!(
                        "Failed to insert {} record for {}",
                        record.meal_type, record.plan_date
                    )
                })?;
            }
        }
        tx.commit()?;
        Ok(records.len())
    }

    // --- Shopping list ---

    fn shopping_item_from_row(row: &rusqlite::Row) -> rusqlite::Result<ShoppingListItem> {
        let recipes_using: String = row.get(6)?;
        Ok(ShoppingListItem {
            id: row.get(0)?,
            weekly_plan_id: row.get(1)?,
            ingredient_name: row.get(2)?,
            total_quantity: row.get(3)?,
            unit: row.get(4)?,
            category: row.get(5)?,
            recipes_using: serde_json::from_str(&recipes_using).unwrap_or_default(),
            is_purchased: row.get(7)?,
        })
    }

    pub fn insert_shopping_items(&self, weekly_plan_id: &str, items: &[ShoppingListEntry]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO shopping_list_items (weekly_plan_id, ingredient_name, total_quantity,
                    unit, category, recipes_using, is_purchased)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
            )?;
            for item in items {
                let recipes_using = serde_json::to_string(&item.recipes_using)?;
                stmt.execute(params![
                    weekly_plan_id,
                    item.ingredient_name,
                    item.total_quantity,
                    item.unit,
                    item.category,
                    recipes_using,
                ])?;
            }
        }
        tx.commit()?;
        Ok(items.len())
    }

    pub fn get_shopping_list(&self, weekly_plan_id: &str) -> Result<Vec<ShoppingListItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, weekly_plan_id, ingredient_name, total_quantity, unit, category,
                    recipes_using, is_purchased
             FROM shopping_list_items WHERE weekly_plan_id = ?1 ORDER BY category, ingredient_name",
        )?;
        let items = stmt
            .query_map(params![weekly_plan_id], Self::shopping_item_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    /// Mark an item bought or not. Returns `None` if the item does not exist or belongs
    /// to another user's plan.
    pub fn set_shopping_item_purchased(
        &self,
        user_id: &str,
        item_id: i64,
        is_purchased: bool,
    ) -> Result<Option<ShoppingListItem>> {
        let updated = self.conn.execute(
            "UPDATE shopping_list_items SET is_purchased = ?1
             WHERE id = ?2 AND weekly_plan_id IN (SELECT id FROM weekly_diet_plans WHERE user_id = ?3)",
            params![is_purchased, item_id, user_id],
        )?;
        if updated == 0 {
            return Ok(None);
        }
        self.conn
            .query_row(
                "SELECT id, weekly_plan_id, ingredient_name, total_quantity, unit, category,
                        recipes_using, is_purchased
                 FROM shopping_list_items WHERE id = ?1",
                params![item_id],
                Self::shopping_item_from_row,
            )
            .optional()
            .context("Failed to load shopping list item")
    }

    // --- Nutrition stats ---

    pub fn insert_nutrition_stats(&self, weekly_plan_id: &str, stats: &[NutritionDailyStat]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO nutrition_daily_stats (weekly_plan_id, day_of_week, date, total_calories,
                    total_carbohydrates, total_protein, total_fat, total_sodium, meal_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for stat in stats {
                stmt.execute(params![
                    weekly_plan_id,
                    stat.day_of_week,
                    stat.date,
                    stat.total_calories,
                    stat.total_carbohydrates,
                    stat.total_protein,
                    stat.total_fat,
                    stat.total_sodium,
                    stat.meal_count,
                ])?;
            }
        }
        tx.commit()?;
        Ok(stats.len())
    }

    pub fn get_nutrition_stats(&self, weekly_plan_id: &str) -> Result<Vec<NutritionDailyStat>> {
        let mut stmt = self.conn.prepare(
            "SELECT day_of_week, date, total_calories, total_carbohydrates, total_protein,
                    total_fat, total_sodium, meal_count
             FROM nutrition_daily_stats WHERE weekly_plan_id = ?1 ORDER BY day_of_week",
        )?;
        let stats = stmt
            .query_map(params![weekly_plan_id], |row| {
                Ok(NutritionDailyStat {
                    day_of_week: row.get(0)?,
                    date: row.get(1)?,
                    total_calories: row.get(2)?,
                    total_carbohydrates: row.get(3)?,
                    total_protein: row.get(4)?,
                    total_fat: row.get(5)?,
                    total_sodium: row.get(6)?,
                    meal_count: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(stats)
    }
}

fn week_end(week_start: NaiveDate) -> Result<NaiveDate> {
    week_start
        .checked_add_days(Days::new(6))
        .context("Week end is out of range")
}
