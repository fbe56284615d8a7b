use anyhow::Result;

use trolley_core::db::Database;

use super::helpers::{confirm, exit_not_found, print_json, print_sector_table, resolve_sector};

pub(crate) fn cmd_sector_list(db: &Database, json: bool) -> Result<()> {
    let sectors = db.list_sectors()?;
    if json {
        return print_json(&sectors);
    }
    if sectors.is_empty() {
        println!("No sectors. Add one with `trolley sector add <name>`.");
        return Ok(());
    }
    print_sector_table(&sectors);
    Ok(())
}

pub(crate) fn cmd_sector_add(db: &Database, name: &str, json: bool) -> Result<()> {
    let sector = db.add_sector(name)?;
    if json {
        return print_json(&sector);
    }
    println!(
        "Added sector '{}' (id {}) at row {}, column {}",
        sector.name, sector.id, sector.grid_row, sector.grid_column
    );
    Ok(())
}

pub(crate) fn cmd_sector_rename(db: &Database, sector: &str, name: &str, json: bool) -> Result<()> {
    let existing = resolve_sector(db, sector)?;
    let renamed = db.rename_sector(existing.id, name)?;
    if json {
        return print_json(&renamed);
    }
    println!("Renamed '{}' to '{}'", existing.name, renamed.name);
    Ok(())
}

/// `position` is 1-based as shown in `sector list`.
pub(crate) fn cmd_sector_move(db: &Database, sector: &str, position: usize, json: bool) -> Result<()> {
    let existing = resolve_sector(db, sector)?;
    let sectors = db.move_sector(existing.id, position.saturating_sub(1))?;
    if json {
        return print_json(&sectors);
    }
    print_sector_table(&sectors);
    Ok(())
}

pub(crate) fn cmd_sector_delete(db: &Database, sector: &str, yes: bool, json: bool) -> Result<()> {
    let existing = resolve_sector(db, sector)?;
    if !confirm(
        &format!(
            "Delete sector '{}'? Items in it will show under Other",
            existing.name
        ),
        yes,
    )? {
        eprintln!("Cancelled");
        return Ok(());
    }
    if !db.delete_sector(existing.id)? {
        exit_not_found(&format!("Sector {} not found", existing.id), json);
    }
    if json {
        println!("{}", serde_json::json!({ "deleted": existing.id }));
    } else {
        println!("Deleted sector '{}'", existing.name);
    }
    Ok(())
}
