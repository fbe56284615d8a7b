use anyhow::Result;
use chrono::DateTime;
use tabled::{Table, Tabled, settings::Style};

use trolley_core::db::Database;

use super::helpers::{confirm, exit_not_found, print_json, truncate};

/// `2026-10-19 14:05` from a stored RFC 3339 timestamp.
fn short_timestamp(ts: &str) -> String {
    DateTime::parse_from_rfc3339(ts).map_or_else(
        |_| ts.to_string(),
        |dt| dt.format("%Y-%m-%d %H:%M").to_string(),
    )
}

pub(crate) fn cmd_history_list(db: &Database, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct HistoryRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Created")]
        created: String,
        #[tabled(rename = "Items")]
        items: String,
        #[tabled(rename = "Completed")]
        completed: String,
    }

    let lists = db.list_shopping_lists()?;
    if json {
        return print_json(&lists);
    }
    if lists.is_empty() {
        println!("No saved shopping lists.");
        return Ok(());
    }

    let mut rows = Vec::with_capacity(lists.len());
    for list in &lists {
        let items = db.get_list_items(list.id)?;
        let checked = items.iter().filter(|i| i.is_checked).count();
        rows.push(HistoryRow {
            id: list.id,
            name: truncate(&list.name, 40),
            created: short_timestamp(&list.created_at),
            items: format!("{checked}/{}", items.len()),
            completed: list
                .completed_at
                .as_deref()
                .map(short_timestamp)
                .unwrap_or_default(),
        });
    }
    println!("{}", Table::new(&rows).with(Style::rounded()));
    Ok(())
}

pub(crate) fn cmd_history_complete(db: &Database, list: i64, json: bool) -> Result<()> {
    let completed = db.complete_shopping_list(list)?;
    if json {
        return print_json(&completed);
    }
    println!("Marked '{}' as completed", completed.name);
    Ok(())
}

pub(crate) fn cmd_history_delete(db: &Database, list: i64, yes: bool, json: bool) -> Result<()> {
    let existing = db.get_shopping_list(list)?;
    if !confirm(&format!("Delete shopping list '{}'?", existing.name), yes)? {
        eprintln!("Cancelled");
        return Ok(());
    }
    if !db.delete_shopping_list(list)? {
        exit_not_found(&format!("Shopping list {list} not found"), json);
    }
    if json {
        println!("{}", serde_json::json!({ "deleted": list }));
    } else {
        println!("Deleted shopping list '{}'", existing.name);
    }
    Ok(())
}
