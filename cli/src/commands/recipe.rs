use anyhow::Result;
use tabled::{Table, Tabled, settings::Style};

use trolley_core::db::Database;
use trolley_core::models::{NewRecipe, NewRecipeIngredient, Recipe};

use super::helpers::{
    confirm, exit_not_found, parse_ingredient_spec, print_json, print_recipe_table,
    resolve_recipe, resolve_sector, truncate,
};

/// Turn `NAME[=QTY[:UNIT]]` specs into recipe lines, creating unknown
/// ingredients in `sector` (or no sector).
fn build_ingredients(
    db: &Database,
    specs: &[String],
    sector: Option<&str>,
) -> Result<Vec<NewRecipeIngredient>> {
    let sector_id = sector.map(|s| resolve_sector(db, s)).transpose()?.map(|s| s.id);
    let mut lines = Vec::with_capacity(specs.len());
    for spec in specs {
        let (name, quantity, unit) = parse_ingredient_spec(spec)?;
        let ingredient = db.get_or_create_ingredient(&name, sector_id)?;
        lines.push(NewRecipeIngredient {
            ingredient_id: ingredient.id,
            quantity,
            unit,
        });
    }
    Ok(lines)
}

pub(crate) fn cmd_recipe_list(db: &Database, ingredients: &[String], json: bool) -> Result<()> {
    let recipes = db.list_recipes()?;
    let matching: Vec<&Recipe> = recipes
        .iter()
        .filter(|r| r.contains_all_ingredients(ingredients))
        .collect();

    if json {
        return print_json(&matching);
    }
    if matching.is_empty() {
        if ingredients.is_empty() {
            println!("No recipes yet. Add one with `trolley recipe add <name>`.");
        } else {
            println!("No recipes use all of: {}", ingredients.join(", "));
        }
        return Ok(());
    }
    print_recipe_table(&matching);
    Ok(())
}

pub(crate) fn cmd_recipe_show(db: &Database, recipe: &str, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct LineRow {
        #[tabled(rename = "Ingredient")]
        name: String,
        #[tabled(rename = "Quantity")]
        quantity: String,
        #[tabled(rename = "Sector")]
        sector: String,
    }

    let recipe = resolve_recipe(db, recipe)?;
    if json {
        return print_json(&recipe);
    }

    println!("{} (id {})", recipe.name, recipe.id);
    if let Some(ref url) = recipe.image_url {
        println!("  Image: {url}");
    }
    if recipe.ingredients.is_empty() {
        println!("  No ingredients");
    } else {
        let rows: Vec<LineRow> = recipe
            .ingredients
            .iter()
            .map(|ri| LineRow {
                name: truncate(&ri.ingredient_name, 35),
                quantity: format!(
                    "{}{}",
                    ri.quantity.as_deref().unwrap_or(""),
                    ri.unit.as_deref().unwrap_or("")
                ),
                sector: truncate(ri.sector_label(), 25),
            })
            .collect();
        println!("{}", Table::new(&rows).with(Style::rounded()));
    }
    if let Some(ref instructions) = recipe.instructions {
        println!("\n{instructions}");
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn cmd_recipe_add(
    db: &Database,
    name: &str,
    image_url: Option<String>,
    instructions: Option<String>,
    ingredients: &[String],
    sector: Option<&str>,
    json: bool,
) -> Result<()> {
    let lines = build_ingredients(db, ingredients, sector)?;
    let recipe = db.create_recipe(&NewRecipe {
        name: name.to_string(),
        image_url,
        instructions,
        ingredients: lines,
    })?;
    if json {
        return print_json(&recipe);
    }
    println!(
        "Created recipe '{}' (id {}) with {} ingredient(s)",
        recipe.name,
        recipe.id,
        recipe.ingredients.len()
    );
    Ok(())
}

/// Fields left as `None` keep their stored value. Giving any ingredient replaces
/// the whole ingredient list.
#[allow(clippy::too_many_arguments)]
pub(crate) fn cmd_recipe_edit(
    db: &Database,
    recipe: &str,
    name: Option<String>,
    image_url: Option<String>,
    instructions: Option<String>,
    ingredients: &[String],
    sector: Option<&str>,
    json: bool,
) -> Result<()> {
    let existing = resolve_recipe(db, recipe)?;
    let lines = if ingredients.is_empty() {
        existing
            .ingredients
            .iter()
            .map(|ri| NewRecipeIngredient {
                ingredient_id: ri.ingredient_id,
                quantity: ri.quantity.clone(),
                unit: ri.unit.clone(),
            })
            .collect()
    } else {
        build_ingredients(db, ingredients, sector)?
    };

    let updated = db.update_recipe(
        existing.id,
        &NewRecipe {
            name: name.unwrap_or(existing.name),
            image_url: image_url.or(existing.image_url),
            instructions: instructions.or(existing.instructions),
            ingredients: lines,
        },
    )?;
    if json {
        return print_json(&updated);
    }
    println!("Updated recipe '{}' (id {})", updated.name, updated.id);
    Ok(())
}

pub(crate) fn cmd_recipe_delete(db: &Database, recipe: &str, yes: bool, json: bool) -> Result<()> {
    let existing = resolve_recipe(db, recipe)?;
    if !confirm(&format!("Delete recipe '{}'?", existing.name), yes)? {
        eprintln!("Cancelled");
        return Ok(());
    }
    if !db.delete_recipe(existing.id)? {
        exit_not_found(&format!("Recipe {} not found", existing.id), json);
    }
    if json {
        println!("{}", serde_json::json!({ "deleted": existing.id }));
    } else {
        println!("Deleted recipe '{}'", existing.name);
    }
    Ok(())
}
