use anyhow::{Context, Result};
use serde_json::Value;
use std::path::Path;

use dietweek_core::db::Database;
use dietweek_core::models::User;

/// Read and parse a JSON document from disk.
pub(crate) fn read_json_file(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to open file: {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid JSON in {}", path.display()))
}

pub(crate) fn find_or_create_user(db: &Database, auth_id: &str) -> Result<User> {
    if let Some(user) = db.get_user_by_auth_id(auth_id)? {
        return Ok(user);
    }
    db.create_user(auth_id)
}

pub(crate) fn no_neg_zero(v: f64) -> f64 {
    if v == 0.0 { 0.0 } else { v }
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}
