use anyhow::Result;

use trolley_core::db::Database;
use trolley_core::models::NewStaple;

use super::helpers::{
    confirm, exit_not_found, print_json, print_staple_table, resolve_sector, resolve_staple,
};

pub(crate) fn cmd_staple_list(db: &Database, json: bool) -> Result<()> {
    let staples = db.list_staples()?;
    if json {
        return print_json(&staples);
    }
    if staples.is_empty() {
        println!("No staples yet. Add one with `trolley staple add <name> --sector <sector>`.");
        return Ok(());
    }
    print_staple_table(&staples);
    Ok(())
}

pub(crate) fn cmd_staple_add(
    db: &Database,
    name: &str,
    sector: &str,
    is_default: bool,
    json: bool,
) -> Result<()> {
    let sector = resolve_sector(db, sector)?;
    let staple = db.create_staple(&NewStaple {
        name: name.to_string(),
        sector_id: Some(sector.id),
        is_default,
    })?;
    if json {
        return print_json(&staple);
    }
    println!(
        "Added staple '{}' in {}{}",
        staple.name,
        staple.sector_label(),
        if staple.is_default { " (selected by default)" } else { "" }
    );
    Ok(())
}

pub(crate) fn cmd_staple_edit(
    db: &Database,
    staple: &str,
    name: Option<String>,
    sector: Option<&str>,
    is_default: Option<bool>,
    json: bool,
) -> Result<()> {
    let existing = resolve_staple(db, staple)?;
    let sector_id = match sector {
        Some(s) => Some(resolve_sector(db, s)?.id),
        None => existing.sector_id,
    };
    let updated = db.update_staple(
        existing.id,
        &NewStaple {
            name: name.unwrap_or(existing.name),
            sector_id,
            is_default: is_default.unwrap_or(existing.is_default),
        },
    )?;
    if json {
        return print_json(&updated);
    }
    println!("Updated staple '{}'", updated.name);
    Ok(())
}

pub(crate) fn cmd_staple_delete(db: &Database, staple: &str, yes: bool, json: bool) -> Result<()> {
    let existing = resolve_staple(db, staple)?;
    if !confirm(&format!("Delete staple '{}'?", existing.name), yes)? {
        eprintln!("Cancelled");
        return Ok(());
    }
    if !db.delete_staple(existing.id)? {
        exit_not_found(&format!("Staple {} not found", existing.id), json);
    }
    if json {
        println!("{}", serde_json::json!({ "deleted": existing.id }));
    } else {
        println!("Deleted staple '{}'", existing.name);
    }
    Ok(())
}
