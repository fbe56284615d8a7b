use anyhow::{Result, bail};
use serde::Serialize;

use trolley_core::builder::{self, GeneratedItem, GeneratedList};
use trolley_core::db::Database;
use trolley_core::grid::{self, GridCell, Progress};
use trolley_core::models::ListSelection;
use trolley_core::share;
use trolley_core::tracker::ListTracker;

use super::helpers::{exit_not_found, print_json, resolve_recipe, resolve_staple};

/// Resolve recipe/staple arguments (ids or names). With no staples given, the
/// default staples are selected unless `no_defaults` is set.
fn build_selection(
    db: &Database,
    recipes: &[String],
    staples: &[String],
    no_defaults: bool,
) -> Result<ListSelection> {
    let recipe_ids = recipes
        .iter()
        .map(|r| resolve_recipe(db, r).map(|r| r.id))
        .collect::<Result<Vec<_>>>()?;
    let staple_ids = if staples.is_empty() && !no_defaults {
        db.default_staple_ids()?
    } else {
        staples
            .iter()
            .map(|s| resolve_staple(db, s).map(|s| s.id))
            .collect::<Result<Vec<_>>>()?
    };
    Ok(ListSelection::new(recipe_ids, staple_ids))
}

/// An explicit list id, or the most recent list.
fn resolve_list_id(db: &Database, list: Option<i64>, json: bool) -> Result<i64> {
    if let Some(id) = list {
        return Ok(id);
    }
    match db.list_shopping_lists()?.first() {
        Some(latest) => Ok(latest.id),
        None => exit_not_found("No shopping lists yet. Create one with `trolley list generate`", json),
    }
}

fn find_item<'a>(list: &'a GeneratedList, item: &str) -> Result<&'a GeneratedItem> {
    if let Ok(id) = item.trim().parse::<i64>() {
        if let Some(found) = list.items.iter().find(|i| i.id == id) {
            return Ok(found);
        }
    }
    let wanted = item.trim().to_lowercase();
    match list.items.iter().find(|i| i.name.to_lowercase() == wanted) {
        Some(found) => Ok(found),
        None => bail!("No item '{item}' on list '{}'", list.name),
    }
}

#[derive(Serialize)]
struct ListView<'a> {
    #[serde(flatten)]
    list: &'a GeneratedList,
    progress: Progress,
    grid: Vec<GridCell>,
}

fn print_list(db: &Database, list: &GeneratedList, json: bool) -> Result<()> {
    let sectors = db.list_sectors()?;
    let cells = grid::layout(&sectors, list);
    let progress = Progress::of(&list.items);
    if json {
        return print_json(&ListView {
            list,
            progress,
            grid: cells,
        });
    }

    let status = if list.completed_at.is_some() { " (completed)" } else { "" };
    println!("{} (id {}){status}", list.name, list.id);
    println!(
        "{} of {} items checked ({}%)\n",
        progress.checked, progress.total, progress.percent
    );
    for row in grid::rows(&cells) {
        for cell in row {
            println!("📍 {}", cell.sector);
            if cell.is_empty() {
                println!("   No items in this section");
            }
            for item in &cell.items {
                let mark = if item.is_checked { "x" } else { " " };
                match item.quantity.as_deref() {
                    Some(q) => println!("   [{mark}] {} ({q})  #{}", item.name, item.id),
                    None => println!("   [{mark}] {}  #{}", item.name, item.id),
                }
            }
        }
        println!();
    }
    Ok(())
}

pub(crate) fn cmd_list_generate(
    db: &Database,
    recipes: &[String],
    staples: &[String],
    no_defaults: bool,
    name: Option<&str>,
    json: bool,
) -> Result<()> {
    let selection = build_selection(db, recipes, staples, no_defaults)?;
    let list = builder::generate_list(db, &selection, name)?;
    print_list(db, &list, json)
}

pub(crate) fn cmd_list_update(
    db: &Database,
    list: i64,
    recipes: &[String],
    staples: &[String],
    no_defaults: bool,
    json: bool,
) -> Result<()> {
    let selection = build_selection(db, recipes, staples, no_defaults)?;
    let list = builder::update_list(db, list, &selection)?;
    print_list(db, &list, json)
}

pub(crate) fn cmd_list_show(db: &Database, list: Option<i64>, json: bool) -> Result<()> {
    let id = resolve_list_id(db, list, json)?;
    let list = builder::load_list(db, id)?;
    print_list(db, &list, json)
}

pub(crate) fn cmd_list_check(db: &Database, list: Option<i64>, item: &str, json: bool) -> Result<()> {
    let id = resolve_list_id(db, list, json)?;
    let loaded = builder::load_list(db, id)?;
    let target = find_item(&loaded, item)?;

    let mut tracker = ListTracker::load(db, id)?;
    let checked = tracker.toggle(db, target.id)?;
    let progress = tracker.progress();
    if json {
        println!(
            "{}",
            serde_json::json!({ "item_id": target.id, "is_checked": checked, "progress": progress })
        );
    } else {
        let verb = if checked { "Checked" } else { "Unchecked" };
        println!(
            "{verb} '{}' ({} of {} done)",
            target.name, progress.checked, progress.total
        );
    }
    Ok(())
}

pub(crate) fn cmd_list_set_all(db: &Database, list: Option<i64>, checked: bool, json: bool) -> Result<()> {
    let id = resolve_list_id(db, list, json)?;
    let mut tracker = ListTracker::load(db, id)?;
    tracker.set_all(db, checked)?;
    let progress = tracker.progress();
    if json {
        println!("{}", serde_json::json!({ "list_id": id, "progress": progress }));
    } else if checked {
        println!("Checked all {} items", progress.total);
    } else {
        println!("Cleared all {} items", progress.total);
    }
    Ok(())
}

pub(crate) fn cmd_list_rename(db: &Database, list: i64, name: &str, json: bool) -> Result<()> {
    let renamed = db.rename_shopping_list(list, name)?;
    if json {
        return print_json(&renamed);
    }
    println!("Renamed list {} to '{}'", renamed.id, renamed.name);
    Ok(())
}

#[derive(Serialize)]
struct ShareOutput {
    text: String,
    whatsapp: String,
    email: String,
}

pub(crate) fn cmd_list_share(db: &Database, list: Option<i64>, json: bool) -> Result<()> {
    let id = resolve_list_id(db, list, json)?;
    let list = builder::load_list(db, id)?;
    let cells = grid::layout(&db.list_sectors()?, &list);
    let text = share::render_text(Some(&list.name), &cells);
    let output = ShareOutput {
        whatsapp: share::whatsapp_link(&text),
        email: share::mailto_link(Some(&list.name), &text),
        text,
    };
    if json {
        return print_json(&output);
    }
    print!("{}", output.text);
    println!("WhatsApp: {}", output.whatsapp);
    println!("Email:    {}", output.email);
    Ok(())
}
