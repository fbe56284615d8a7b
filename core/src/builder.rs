use std::collections::HashMap;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::db::Database;
use crate::models::{
    ListSelection, NewListItem, OTHER_SECTOR, Recipe, STAPLE_SOURCE, ShoppingList,
    ShoppingListItem, Staple,
};

/// One requirement line before consolidation: a recipe ingredient or a staple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
    pub name: String,
    pub sector_id: Option<i64>,
    pub sector_name: String,
    pub quantity: Option<String>,
    pub unit: Option<String>,
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl Requirement {
    /// Build the annotation for a line, or `None` when it has neither quantity nor source.
    /// A unit is only kept alongside a quantity.
    fn from_line(line: &RawLine) -> Option<Self> {
        let quantity = line.quantity.clone().filter(|q| !q.is_empty());
        let source = line.source.clone().filter(|s| !s.is_empty());
        if quantity.is_none() && source.is_none() {
            return None;
        }
        let unit = quantity
            .as_ref()
            .map(|_| line.unit.clone().unwrap_or_default());
        Some(Self {
            quantity,
            unit,
            source,
        })
    }

    /// `"<qty><unit> (<source>)"`, dropping whichever half is missing.
    #[must_use]
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(quantity) = &self.quantity {
            parts.push(format!("{quantity}{}", self.unit.as_deref().unwrap_or("")));
        }
        if let Some(source) = &self.source {
            parts.push(format!("({source})"));
        }
        parts.join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidatedItem {
    pub name: String,
    pub sector_id: Option<i64>,
    pub sector_name: String,
    pub requirements: Vec<Requirement>,
}

impl ConsolidatedItem {
    /// The free-text quantity column stored on the list item.
    #[must_use]
    pub fn quantity_summary(&self) -> Option<String> {
        format_requirements(&self.requirements)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedItem {
    pub id: i64,
    pub name: String,
    pub sector_id: Option<i64>,
    pub sector_name: String,
    pub quantity: Option<String>,
    pub is_checked: bool,
}

impl From<ShoppingListItem> for GeneratedItem {
    fn from(item: ShoppingListItem) -> Self {
        Self {
            id: item.id,
            name: item.item_name,
            sector_id: item.sector_id,
            sector_name: item
                .sector_name
                .unwrap_or_else(|| OTHER_SECTOR.to_string()),
            quantity: item.quantity,
            is_checked: item.is_checked,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectorGroup<T> {
    pub sector: String,
    pub items: Vec<T>,
}

/// A persisted list in display shape: items with ids, grouped by sector,
/// plus the selection that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedList {
    pub id: i64,
    pub name: String,
    pub created_at: String,
    pub completed_at: Option<String>,
    pub items: Vec<GeneratedItem>,
    pub grouped: Vec<SectorGroup<GeneratedItem>>,
    pub recipe_ids: Vec<i64>,
    pub staple_ids: Vec<i64>,
}

impl GeneratedList {
    #[must_use]
    pub fn checked_count(&self) -> usize {
        self.items.iter().filter(|i| i.is_checked).count()
    }
}

/// `Shopping List - 19 Oct 2026, 14:05`
#[must_use]
pub fn default_list_name(now: &DateTime<Local>) -> String {
    format!("Shopping List - {}", now.format("%-d %b %Y, %H:%M"))
}

/// Expand the selected recipes and staples into raw lines, in catalog order.
/// Ids in the selection that are not in the catalog are ignored.
#[must_use]
pub fn expand(recipes: &[Recipe], staples: &[Staple], selection: &ListSelection) -> Vec<RawLine> {
    let mut lines = Vec::new();
    for recipe in recipes
        .iter()
        .filter(|r| selection.recipe_ids.contains(&r.id))
    {
        for ri in &recipe.ingredients {
            lines.push(RawLine {
                name: ri.ingredient_name.clone(),
                sector_id: ri.sector_id,
                sector_name: ri.sector_label().to_string(),
                quantity: ri.quantity.clone(),
                unit: ri.unit.clone(),
                source: Some(recipe.name.clone()),
            });
        }
    }
    for staple in staples
        .iter()
        .filter(|s| selection.staple_ids.contains(&s.id))
    {
        lines.push(RawLine {
            name: staple.name.clone(),
            sector_id: staple.sector_id,
            sector_name: staple.sector_label().to_string(),
            quantity: None,
            unit: None,
            source: Some(STAPLE_SOURCE.to_string()),
        });
    }
    lines
}

fn consolidation_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Merge lines that share a trimmed, case-insensitive name. The first line of a
/// group fixes the item's display name and sector; later lines only add distinct
/// requirements. Output keeps first-seen order.
#[must_use]
pub fn consolidate(lines: &[RawLine]) -> Vec<ConsolidatedItem> {
    let mut items: Vec<ConsolidatedItem> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for line in lines {
        let key = consolidation_key(&line.name);
        let slot = *index.entry(key).or_insert_with(|| {
            items.push(ConsolidatedItem {
                name: line.name.trim().to_string(),
                sector_id: line.sector_id,
                sector_name: line.sector_name.clone(),
                requirements: Vec::new(),
            });
            items.len() - 1
        });

        if let Some(req) = Requirement::from_line(line) {
            let item = &mut items[slot];
            if !item.requirements.contains(&req) {
                item.requirements.push(req);
            }
        }
    }
    items
}

/// Partition items by sector name, keeping first-seen sector and item order.
pub fn group_by_sector<T: Clone>(
    items: &[T],
    sector_of: impl Fn(&T) -> &str,
) -> Vec<SectorGroup<T>> {
    let mut groups: Vec<SectorGroup<T>> = Vec::new();
    for item in items {
        let sector = sector_of(item);
        match groups.iter_mut().find(|g| g.sector == sector) {
            Some(group) => group.items.push(item.clone()),
            None => groups.push(SectorGroup {
                sector: sector.to_string(),
                items: vec![item.clone()],
            }),
        }
    }
    groups
}

/// Join requirement descriptions with `", "`; `None` when nothing is left.
#[must_use]
pub fn format_requirements(requirements: &[Requirement]) -> Option<String> {
    let joined = requirements
        .iter()
        .map(Requirement::describe)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(", ");
    if joined.is_empty() { None } else { Some(joined) }
}

fn consolidate_selection(db: &Database, selection: &ListSelection) -> Result<Vec<ConsolidatedItem>> {
    if selection.is_empty() {
        bail!("Select at least one recipe or staple");
    }
    let recipes = db.list_recipes()?;
    let staples = db.list_staples()?;
    Ok(consolidate(&expand(&recipes, &staples, selection)))
}

fn write_items(db: &Database, list_id: i64, items: &[ConsolidatedItem]) -> Result<Vec<GeneratedItem>> {
    let mut written = Vec::with_capacity(items.len());
    for item in items {
        let quantity = item.quantity_summary();
        let row = db
            .insert_list_item(
                list_id,
                &NewListItem {
                    item_name: item.name.clone(),
                    sector_id: item.sector_id,
                    quantity: quantity.clone(),
                },
            )
            .context("Failed to save shopping list")?;
        written.push(GeneratedItem {
            id: row.id,
            name: item.name.clone(),
            sector_id: item.sector_id,
            sector_name: item.sector_name.clone(),
            quantity,
            is_checked: false,
        });
    }
    Ok(written)
}

/// Join rows only let a list be reselected later; failures are tolerated.
fn write_links(db: &Database, list_id: i64, recipe_ids: &[i64], staple_ids: &[i64]) {
    if let Err(e) = db.insert_list_recipe_links(list_id, recipe_ids) {
        warn!(list_id, "failed to record recipes for shopping list: {e:#}");
    }
    if let Err(e) = db.insert_list_staple_links(list_id, staple_ids) {
        warn!(list_id, "failed to record staples for shopping list: {e:#}");
    }
}

fn assemble(
    list: ShoppingList,
    items: Vec<GeneratedItem>,
    recipe_ids: Vec<i64>,
    staple_ids: Vec<i64>,
) -> GeneratedList {
    let grouped = group_by_sector(&items, |i| i.sector_name.as_str());
    GeneratedList {
        id: list.id,
        name: list.name,
        created_at: list.created_at,
        completed_at: list.completed_at,
        items,
        grouped,
        recipe_ids,
        staple_ids,
    }
}

/// Consolidate the selection and persist it as a new list.
pub fn generate_list(
    db: &Database,
    selection: &ListSelection,
    name: Option<&str>,
) -> Result<GeneratedList> {
    let consolidated = consolidate_selection(db, selection)?;
    let name = match name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(n) => n.to_string(),
        None => default_list_name(&Local::now()),
    };

    let list = db
        .insert_shopping_list(&name)
        .context("Failed to save shopping list")?;
    let items = write_items(db, list.id, &consolidated)?;

    let recipe_ids: Vec<i64> = selection.recipe_ids.iter().copied().collect();
    let staple_ids: Vec<i64> = selection.staple_ids.iter().copied().collect();
    write_links(db, list.id, &recipe_ids, &staple_ids);

    info!(list_id = list.id, items = items.len(), "generated shopping list");
    Ok(assemble(list, items, recipe_ids, staple_ids))
}

/// Rebuild an existing list in place from a new selection. Check state is reset.
pub fn update_list(db: &Database, list_id: i64, selection: &ListSelection) -> Result<GeneratedList> {
    let list = db.get_shopping_list(list_id)?;
    let consolidated = consolidate_selection(db, selection)?;

    db.delete_list_items(list_id)
        .context("Failed to update shopping list")?;
    let items = write_items(db, list_id, &consolidated)?;

    if let Err(e) = db.delete_list_links(list_id) {
        warn!(list_id, "failed to clear previous selection: {e:#}");
    }
    let recipe_ids: Vec<i64> = selection.recipe_ids.iter().copied().collect();
    let staple_ids: Vec<i64> = selection.staple_ids.iter().copied().collect();
    write_links(db, list_id, &recipe_ids, &staple_ids);

    info!(list_id, items = items.len(), "updated shopping list");
    Ok(assemble(list, items, recipe_ids, staple_ids))
}

/// Read a stored list back into the shape `generate_list` returns.
pub fn load_list(db: &Database, list_id: i64) -> Result<GeneratedList> {
    let list = db.get_shopping_list(list_id)?;
    let items: Vec<GeneratedItem> = db
        .get_list_items(list_id)?
        .into_iter()
        .map(GeneratedItem::from)
        .collect();
    let recipe_ids = db.get_list_recipe_ids(list_id)?;
    let staple_ids = db.get_list_staple_ids(list_id)?;
    Ok(assemble(list, items, recipe_ids, staple_ids))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewRecipe, NewRecipeIngredient, NewStaple};
    use chrono::TimeZone;

    fn line(name: &str, sector: &str, qty: Option<&str>, unit: Option<&str>, source: &str) -> RawLine {
        RawLine {
            name: name.to_string(),
            sector_id: None,
            sector_name: sector.to_string(),
            quantity: qty.map(str::to_string),
            unit: unit.map(str::to_string),
            source: Some(source.to_string()),
        }
    }

    fn sector(db: &Database, name: &str) -> i64 {
        db.find_sector_by_name(name).unwrap().unwrap().id
    }

    fn recipe(db: &Database, name: &str, lines: &[(i64, Option<&str>, Option<&str>)]) -> i64 {
        db.create_recipe(&NewRecipe {
            name: name.to_string(),
            ingredients: lines
                .iter()
                .map(|(id, q, u)| NewRecipeIngredient {
                    ingredient_id: *id,
                    quantity: q.map(str::to_string),
                    unit: u.map(str::to_string),
                })
                .collect(),
            ..NewRecipe::default()
        })
        .unwrap()
        .id
    }

    #[test]
    fn test_default_list_name() {
        let when = Local.with_ymd_and_hms(2026, 3, 7, 9, 5, 0).unwrap();
        assert_eq!(default_list_name(&when), "Shopping List - 7 Mar 2026, 09:05");
    }

    #[test]
    fn test_consolidate_merges_case_and_whitespace() {
        let lines = vec![
            line("Tomato Sauce", "Pantry", Some("400"), Some("ml"), "Bolognese"),
            line(" tomato sauce ", "Pantry", Some("200"), Some("ml"), "Lasagne"),
            line("Tomatoes", "Produce", None, None, "Salad"),
        ];
        let items = consolidate(&lines);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].name, "Tomato Sauce");
        assert_eq!(
            items[0].quantity_summary().as_deref(),
            Some("400ml (Bolognese), 200ml (Lasagne)")
        );
        // plurals are distinct
        assert_eq!(items[1].name, "Tomatoes");
    }

    #[test]
    fn test_consolidate_skips_duplicate_requirements() {
        let lines = vec![
            line("Milk", "Dairy", None, None, "Staple"),
            line("milk", "Dairy", None, None, "Staple"),
            line("Milk", "Dairy", Some("1"), Some("l"), "Pancakes"),
            line("MILK", "Dairy", Some("1"), Some("l"), "Pancakes"),
        ];
        let items = consolidate(&lines);
        assert_eq!(items.len(), 1);
        let reqs = &items[0].requirements;
        assert_eq!(reqs.len(), 2);
        for (i, a) in reqs.iter().enumerate() {
            for b in &reqs[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_requirement_unit_needs_quantity() {
        let req = Requirement::from_line(&line("Salt", "Pantry", None, Some("g"), "Soup")).unwrap();
        assert_eq!(req.unit, None);
        assert_eq!(req.describe(), "(Soup)");

        let req = Requirement::from_line(&line("Eggs", "Dairy", Some("2"), None, "Cake")).unwrap();
        assert_eq!(req.unit.as_deref(), Some(""));
        assert_eq!(req.describe(), "2 (Cake)");
    }

    #[test]
    fn test_line_without_quantity_or_source_is_bare() {
        let mut bare = line("Water", "Other", None, None, "");
        bare.source = None;
        let items = consolidate(&[bare]);
        assert!(items[0].requirements.is_empty());
        assert_eq!(items[0].quantity_summary(), None);
    }

    #[test]
    fn test_group_by_sector_is_a_partition_in_insertion_order() {
        let lines = vec![
            line("Milk", "Dairy & Eggs", None, None, "Staple"),
            line("Apples", "Fresh Produce", None, None, "Staple"),
            line("Cheese", "Dairy & Eggs", None, None, "Staple"),
            line("Foil", OTHER_SECTOR, None, None, "Staple"),
        ];
        let items = consolidate(&lines);
        let groups = group_by_sector(&items, |i| i.sector_name.as_str());
        let sectors: Vec<&str> = groups.iter().map(|g| g.sector.as_str()).collect();
        assert_eq!(sectors, vec!["Dairy & Eggs", "Fresh Produce", "Other"]);

        let mut names: Vec<&str> = groups
            .iter()
            .flat_map(|g| g.items.iter().map(|i| i.name.as_str()))
            .collect();
        names.sort_unstable();
        assert_eq!(names, vec!["Apples", "Cheese", "Foil", "Milk"]);
    }

    #[test]
    fn test_eggs_from_two_recipes_consolidate_once() {
        let db = Database::open_in_memory().unwrap();
        let dairy = sector(&db, "Dairy & Eggs");
        let eggs = db.create_ingredient("Eggs", Some(dairy)).unwrap();
        let a = recipe(&db, "A", &[(eggs.id, Some("2"), Some(" units"))]);
        let b = recipe(&db, "B", &[(eggs.id, Some("3"), Some(" units"))]);

        let list = generate_list(&db, &ListSelection::new([a, b], []), Some("Eggs")).unwrap();
        assert_eq!(list.items.len(), 1);
        assert_eq!(list.items[0].quantity.as_deref(), Some("2 units (A), 3 units (B)"));
        assert_eq!(list.grouped.len(), 1);
        assert_eq!(list.grouped[0].sector, "Dairy & Eggs");
        assert_eq!(list.recipe_ids, vec![a, b]);

        let stored = db.get_list_items(list.id).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, list.items[0].id);
    }

    #[test]
    fn test_generate_list_with_staples_and_dangling_sector() {
        let db = Database::open_in_memory().unwrap();
        let frozen = sector(&db, "Frozen Foods");
        let peas = db
            .create_staple(&NewStaple {
                name: "Peas".to_string(),
                sector_id: Some(frozen),
                is_default: true,
            })
            .unwrap();
        db.delete_sector(frozen).unwrap();

        let list = generate_list(&db, &ListSelection::new([], [peas.id]), None).unwrap();
        assert!(list.name.starts_with("Shopping List - "));
        assert_eq!(list.items[0].quantity.as_deref(), Some("(Staple)"));
        assert_eq!(list.grouped[0].sector, OTHER_SECTOR);
        assert_eq!(list.items[0].sector_id, Some(frozen));
    }

    #[test]
    fn test_generate_list_rejects_empty_selection() {
        let db = Database::open_in_memory().unwrap();
        assert!(generate_list(&db, &ListSelection::default(), None).is_err());
        assert!(db.list_shopping_lists().unwrap().is_empty());
    }

    #[test]
    fn test_update_list_rewrites_items_and_links() {
        let db = Database::open_in_memory().unwrap();
        let flour = db.create_ingredient("Flour", None).unwrap();
        let sugar = db.create_ingredient("Sugar", None).unwrap();
        let cake = recipe(&db, "Cake", &[(flour.id, Some("200"), Some("g"))]);
        let jam = recipe(&db, "Jam", &[(sugar.id, Some("1"), Some("kg"))]);

        let list = generate_list(&db, &ListSelection::new([cake], []), Some("Baking")).unwrap();
        db.set_item_checked(list.items[0].id, true).unwrap();

        let updated = update_list(&db, list.id, &ListSelection::new([jam], [])).unwrap();
        assert_eq!(updated.id, list.id);
        assert_eq!(updated.name, "Baking");
        assert_eq!(updated.items.len(), 1);
        assert_eq!(updated.items[0].name, "Sugar");
        assert!(!updated.items[0].is_checked);
        assert_eq!(db.get_list_recipe_ids(list.id).unwrap(), vec![jam]);
        assert_eq!(db.list_shopping_lists().unwrap().len(), 1);

        assert!(update_list(&db, 9999, &ListSelection::new([jam], [])).is_err());
    }

    #[test]
    fn test_load_list_round_trips_generated_shape() {
        let db = Database::open_in_memory().unwrap();
        let produce = sector(&db, "Fresh Produce");
        let onion = db.create_ingredient("Onion", Some(produce)).unwrap();
        let soup = recipe(&db, "Soup", &[(onion.id, Some("2"), None)]);
        let bread = db
            .create_staple(&NewStaple {
                name: "Bread".to_string(),
                sector_id: None,
                is_default: false,
            })
            .unwrap();

        let generated =
            generate_list(&db, &ListSelection::new([soup], [bread.id]), Some("Soup night")).unwrap();
        db.set_item_checked(generated.items[1].id, true).unwrap();

        let loaded = load_list(&db, generated.id).unwrap();
        assert_eq!(loaded.name, "Soup night");
        assert_eq!(loaded.recipe_ids, vec![soup]);
        assert_eq!(loaded.staple_ids, vec![bread.id]);
        assert_eq!(loaded.grouped.len(), 2);
        assert_eq!(loaded.grouped[1].sector, OTHER_SECTOR);
        assert_eq!(loaded.checked_count(), 1);
        assert_eq!(loaded.items[0].quantity.as_deref(), Some("2 (Soup)"));
    }
}
