use anyhow::{Result, bail};
use serde_json::Value;
use std::path::Path;

use dietweek_core::db::Database;

use super::helpers::{find_or_create_user, read_json_file};

pub(crate) fn cmd_profile_set(db: &Database, auth_id: &str, path: &Path, json: bool) -> Result<()> {
    let profile = read_json_file(path)?;
    if !profile.is_object() {
        bail!("Health profile must be a JSON object");
    }
    let user = find_or_create_user(db, auth_id)?;
    let stored = db.upsert_health_profile(&user.id, &profile)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stored)?);
    } else {
        println!("Health profile saved for {auth_id} (user {}).", user.id);
    }
    Ok(())
}

pub(crate) fn cmd_profile_show(db: &Database, auth_id: &str, json: bool) -> Result<()> {
    let Some(user) = db.get_user_by_auth_id(auth_id)? else {
        bail!("Unknown user '{auth_id}'");
    };
    let profile = db.get_health_profile(&user.id)?;
    let members = db.list_family_members(&user.id)?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "userId": user.id,
                "healthProfile": profile.as_ref().map(|p| &p.profile),
                "familyMembers": members,
            }))?
        );
        return Ok(());
    }

    match profile {
        Some(p) => println!("{}", serde_json::to_string_pretty(&p.profile)?),
        None => eprintln!("No health profile. Use `dietweek profile set {auth_id} <file.json>`."),
    }
    if !members.is_empty() {
        println!("\nFamily members:");
        for member in &members {
            println!("  {} ({})", member.name, member.id);
        }
    }
    Ok(())
}

pub(crate) fn cmd_family_add(
    db: &Database,
    auth_id: &str,
    name: &str,
    path: Option<&Path>,
    json: bool,
) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        bail!("Family member name must not be empty");
    }
    let profile = match path {
        Some(path) => read_json_file(path)?,
        None => Value::Object(serde_json::Map::new()),
    };
    let user = find_or_create_user(db, auth_id)?;
    let member = db.add_family_member(&user.id, name, &profile)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&member)?);
    } else {
        println!("Added family member {} ({}).", member.name, member.id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_set_creates_user() {
        let db = Database::open_in_memory().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("profile.json");
        std::fs::write(&path, r#"{"goal":"lose","calories":1800}"#).unwrap();

        cmd_profile_set(&db, "auth-1", &path, true).unwrap();

        let user = db.get_user_by_auth_id("auth-1").unwrap().unwrap();
        let profile = db.get_health_profile(&user.id).unwrap().unwrap();
        assert_eq!(profile.profile["calories"], 1800);
    }

    #[test]
    fn test_profile_set_rejects_non_object() {
        let db = Database::open_in_memory().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("profile.json");
        std::fs::write(&path, "[1, 2]").unwrap();

        assert!(cmd_profile_set(&db, "auth-1", &path, false).is_err());
        assert!(db.get_user_by_auth_id("auth-1").unwrap().is_none());
    }

    #[test]
    fn test_family_add() {
        let db = Database::open_in_memory().unwrap();
        cmd_family_add(&db, "auth-1", " Minji ", None, false).unwrap();
        assert!(cmd_family_add(&db, "auth-1", "  ", None, false).is_err());

        let user = db.get_user_by_auth_id("auth-1").unwrap().unwrap();
        let members = db.list_family_members(&user.id).unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].name, "Minji");
    }

    #[test]
    fn test_profile_show_unknown_user() {
        let db = Database::open_in_memory().unwrap();
        assert!(cmd_profile_show(&db, "nobody", false).is_err());
    }
}
