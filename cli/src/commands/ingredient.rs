use anyhow::Result;
use tabled::{Table, Tabled, settings::Style};

use trolley_core::db::Database;

use super::helpers::{print_json, truncate};

pub(crate) fn cmd_ingredient_list(db: &Database, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct IngredientRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Sector")]
        sector: String,
    }

    let ingredients = db.list_ingredients()?;
    if json {
        return print_json(&ingredients);
    }
    if ingredients.is_empty() {
        println!("No ingredients yet. They are created when you add recipes.");
        return Ok(());
    }
    let rows: Vec<IngredientRow> = ingredients
        .iter()
        .map(|i| IngredientRow {
            id: i.id,
            name: truncate(&i.name, 35),
            sector: truncate(i.sector_label(), 25),
        })
        .collect();
    println!("{}", Table::new(&rows).with(Style::rounded()));
    Ok(())
}
