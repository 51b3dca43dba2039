use anyhow::{Result, bail};
use serde_json::Value;
use std::path::Path;

use dietweek_core::db::Database;
use dietweek_core::models::NewCatalogRecipe;

use super::helpers::read_json_file;

struct ParsedCatalog {
    recipes: Vec<NewCatalogRecipe>,
    skipped: usize,
}

/// Accepts a bare array of recipes or an object with a `recipes` array.
fn parse_catalog(doc: &Value) -> Result<ParsedCatalog> {
    let entries = match doc {
        Value::Array(entries) => entries,
        Value::Object(map) => match map.get("recipes") {
            Some(Value::Array(entries)) => entries,
            _ => bail!("Catalog object has no 'recipes' array"),
        },
        _ => bail!("Catalog must be a JSON array of recipes"),
    };

    let mut recipes = Vec::with_capacity(entries.len());
    let mut skipped = 0;
    for (index, entry) in entries.iter().enumerate() {
        match NewCatalogRecipe::from_value(entry) {
            Ok(recipe) => recipes.push(recipe),
            Err(e) => {
                tracing::warn!(index, error = %format!("{e:#}"), "Skipping catalog entry");
                skipped += 1;
            }
        }
    }
    Ok(ParsedCatalog { recipes, skipped })
}

pub(crate) fn cmd_catalog_import(db: &Database, path: &Path, dry_run: bool, json: bool) -> Result<()> {
    let parsed = parse_catalog(&read_json_file(path)?)?;
    if parsed.recipes.is_empty() {
        bail!("No importable recipes found in {}", path.display());
    }

    let imported = if dry_run {
        0
    } else {
        db.import_catalog(&parsed.recipes)?
    };
    let total = db.count_catalog_recipes()?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "dry_run": dry_run,
                "recipes_parsed": parsed.recipes.len(),
                "recipes_skipped": parsed.skipped,
                "recipes_imported": imported,
                "catalog_size": total,
            })
        );
    } else if dry_run {
        println!("Dry run: no changes made.\n");
        println!("  Recipes parsed:  {}", parsed.recipes.len());
        println!("  Recipes skipped: {}", parsed.skipped);
    } else {
        println!("Import complete.\n");
        println!("  Recipes imported: {imported}");
        println!("  Recipes skipped:  {}", parsed.skipped);
        println!("  Catalog size:     {total}");
    }
    Ok(())
}
