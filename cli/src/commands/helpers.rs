use anyhow::{Context, Result, bail};
use serde::Serialize;
use std::io::{self, BufRead, Write};
use std::path::Path;
use tabled::{Table, Tabled, settings::Style};

use trolley_core::db::Database;
use trolley_core::models::{Recipe, Sector, Staple};

/// Ask before a destructive action unless `--yes` was given.
pub(crate) fn confirm(prompt: &str, yes: bool) -> Result<bool> {
    if yes {
        return Ok(true);
    }
    eprint!("{prompt} [y/N]: ");
    io::stderr().flush()?;
    let stdin = io::stdin();
    let line = stdin.lock().lines().next().context("No input")??;
    Ok(is_yes(&line))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

/// Resolve a sector given as an id or a (case-insensitive) name.
pub(crate) fn resolve_sector(db: &Database, sector: &str) -> Result<Sector> {
    if let Ok(id) = sector.trim().parse::<i64>() {
        return db.get_sector(id);
    }
    match db.find_sector_by_name(sector)? {
        Some(s) => Ok(s),
        None => bail!("No sector named '{sector}'. See `trolley sector list`"),
    }
}

/// Resolve a recipe given as an id or an exact name.
pub(crate) fn resolve_recipe(db: &Database, recipe: &str) -> Result<Recipe> {
    if let Ok(id) = recipe.trim().parse::<i64>() {
        return db.get_recipe(id);
    }
    match db.get_recipe_by_name(recipe.trim())? {
        Some(r) => Ok(r),
        None => bail!("No recipe named '{recipe}'"),
    }
}

/// Resolve a staple given as an id or an exact name.
pub(crate) fn resolve_staple(db: &Database, staple: &str) -> Result<Staple> {
    if let Ok(id) = staple.trim().parse::<i64>() {
        return db.get_staple(id);
    }
    match db.get_staple_by_name(staple.trim())? {
        Some(s) => Ok(s),
        None => bail!("No staple named '{staple}'"),
    }
}

/// Parse `NAME[=QTY[:UNIT]]`, e.g. `Eggs=3`, `Flour=200:g`.
pub(crate) fn parse_ingredient_spec(spec: &str) -> Result<(String, Option<String>, Option<String>)> {
    let (name, amount) = match spec.split_once('=') {
        Some((name, amount)) => (name.trim(), Some(amount.trim())),
        None => (spec.trim(), None),
    };
    if name.is_empty() {
        bail!("Invalid ingredient '{spec}'. Use NAME, NAME=QTY or NAME=QTY:UNIT");
    }
    let (quantity, unit) = match amount {
        None | Some("") => (None, None),
        Some(amount) => match amount.split_once(':') {
            Some((q, u)) => (Some(q.trim().to_string()), Some(u.trim().to_string())),
            None => (Some(amount.to_string()), None),
        },
    };
    Ok((name.to_string(), quantity, unit))
}

pub(crate) fn read_input(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub(crate) fn print_sector_table(sectors: &[Sector]) {
    #[derive(Tabled)]
    struct SectorRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "#")]
        order: i64,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Grid")]
        grid: String,
    }

    let rows: Vec<SectorRow> = sectors
        .iter()
        .map(|s| SectorRow {
            id: s.id,
            order: s.display_order,
            name: truncate(&s.name, 30),
            grid: format!("{},{}", s.grid_row, s.grid_column),
        })
        .collect();
    println!("{}", Table::new(&rows).with(Style::rounded()));
}

pub(crate) fn print_recipe_table(recipes: &[&Recipe]) {
    #[derive(Tabled)]
    struct RecipeRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Ingredients")]
        ingredients: usize,
        #[tabled(rename = "Image")]
        image: String,
    }

    let rows: Vec<RecipeRow> = recipes
        .iter()
        .map(|r| RecipeRow {
            id: r.id,
            name: truncate(&r.name, 35),
            ingredients: r.ingredients.len(),
            image: if r.image_url.is_some() { "yes" } else { "" }.to_string(),
        })
        .collect();
    println!("{}", Table::new(&rows).with(Style::rounded()));
}

pub(crate) fn print_staple_table(staples: &[Staple]) {
    #[derive(Tabled)]
    struct StapleRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Sector")]
        sector: String,
        #[tabled(rename = "Default")]
        default: String,
    }

    let rows: Vec<StapleRow> = staples
        .iter()
        .map(|s| StapleRow {
            id: s.id,
            name: truncate(&s.name, 30),
            sector: truncate(s.sector_label(), 25),
            default: if s.is_default { "✓" } else { "" }.to_string(),
        })
        .collect();
    println!("{}", Table::new(&rows).with(Style::rounded()));
}

/// Report a missing entity and exit with status 2.
pub(crate) fn exit_not_found(message: &str, json: bool) -> ! {
    if json {
        println!("{}", json_error(message));
    } else {
        eprintln!("{message}");
    }
    std::process::exit(2);
}

pub(crate) fn json_error(message: &str) -> String {
    #[derive(Serialize)]
    struct CliError<'a> {
        error: &'a str,
    }
    serde_json::to_string(&CliError { error: message })
        .unwrap_or_else(|_| format!("{{\"error\":\"{message}\"}}"))
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}
