use std::collections::BTreeSet;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// Bucket used for anything whose sector cannot be resolved.
pub const OTHER_SECTOR: &str = "Other";

/// Requirement source recorded for staple lines.
pub const STAPLE_SOURCE: &str = "Staple";

/// Width of the sector display grid.
pub const GRID_COLUMNS: i64 = 3;

/// Sectors seeded into a fresh database, in display order (2×3 grid).
pub const DEFAULT_SECTORS: &[&str] = &[
    "Fresh Produce",
    "Meat & Seafood",
    "Dairy & Eggs",
    "Bakery & Bread",
    "Pantry & Canned Goods",
    "Frozen Foods",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sector {
    pub id: i64,
    pub name: String,
    pub display_order: i64,
    pub grid_row: i64,
    pub grid_column: i64,
}

/// Grid position (row, column), both 1-based, for the sector at `index` in display order.
#[must_use]
pub fn grid_slot(index: i64) -> (i64, i64) {
    (index / GRID_COLUMNS + 1, index % GRID_COLUMNS + 1)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ingredient {
    pub id: i64,
    pub name: String,
    pub sector_id: Option<i64>,
    // Joined fields for display
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sector_name: Option<String>,
    pub created_at: String,
}

impl Ingredient {
    #[must_use]
    pub fn sector_label(&self) -> &str {
        self.sector_name.as_deref().unwrap_or(OTHER_SECTOR)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeIngredient {
    pub id: i64,
    pub recipe_id: i64,
    pub ingredient_id: i64,
    pub quantity: Option<String>,
    pub unit: Option<String>,
    // Joined fields for display
    pub ingredient_name: String,
    pub sector_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sector_name: Option<String>,
}

impl RecipeIngredient {
    #[must_use]
    pub fn sector_label(&self) -> &str {
        self.sector_name.as_deref().unwrap_or(OTHER_SECTOR)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    pub id: i64,
    pub name: String,
    pub image_url: Option<String>,
    pub instructions: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub ingredients: Vec<RecipeIngredient>,
}

impl Recipe {
    /// True when the recipe uses every ingredient named in `names` (exact match).
    #[must_use]
    pub fn contains_all_ingredients(&self, names: &[String]) -> bool {
        names
            .iter()
            .all(|name| self.ingredients.iter().any(|ri| &ri.ingredient_name == name))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewRecipeIngredient {
    pub ingredient_id: i64,
    #[serde(default)]
    pub quantity: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewRecipe {
    pub name: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub ingredients: Vec<NewRecipeIngredient>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Staple {
    pub id: i64,
    pub name: String,
    pub sector_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sector_name: Option<String>,
    pub is_default: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl Staple {
    #[must_use]
    pub fn sector_label(&self) -> &str {
        self.sector_name.as_deref().unwrap_or(OTHER_SECTOR)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStaple {
    pub name: String,
    pub sector_id: Option<i64>,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShoppingList {
    pub id: i64,
    pub name: String,
    pub created_at: String,
    pub completed_at: Option<String>,
}

impl ShoppingList {
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShoppingListItem {
    pub id: i64,
    pub shopping_list_id: i64,
    pub item_name: String,
    pub sector_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sector_name: Option<String>,
    pub quantity: Option<String>,
    pub is_checked: bool,
}

#[derive(Debug, Clone)]
pub struct NewListItem {
    pub item_name: String,
    pub sector_id: Option<i64>,
    pub quantity: Option<String>,
}

/// The recipe and staple ids a list is built from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListSelection {
    #[serde(default)]
    pub recipe_ids: BTreeSet<i64>,
    #[serde(default)]
    pub staple_ids: BTreeSet<i64>,
}

impl ListSelection {
    #[must_use]
    pub fn new(
        recipe_ids: impl IntoIterator<Item = i64>,
        staple_ids: impl IntoIterator<Item = i64>,
    ) -> Self {
        Self {
            recipe_ids: recipe_ids.into_iter().collect(),
            staple_ids: staple_ids.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.recipe_ids.is_empty() && self.staple_ids.is_empty()
    }
}

/// Counts reported by a bulk CSV import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub imported: usize,
    pub updated: usize,
}

impl ImportSummary {
    /// Human-readable outcome, e.g. `Recipes: 2 new, 1 updated`.
    #[must_use]
    pub fn message(&self, kind: &str) -> String {
        let mut parts = Vec::new();
        if self.imported > 0 {
            parts.push(format!("{} new", self.imported));
        }
        if self.updated > 0 {
            parts.push(format!("{} updated", self.updated));
        }
        if parts.is_empty() {
            parts.push("No changes needed".to_string());
        }
        format!("{kind}: {}", parts.join(", "))
    }
}

/// Trim a required name, rejecting blanks. `kind` names the entity in the error.
pub fn validate_name(kind: &str, name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        bail!("Please enter a {kind} name");
    }
    Ok(trimmed.to_string())
}

/// Map blank optional text to `None`, trimming anything else.
#[must_use]
pub fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// `"true"` in any case is true; everything else is false.
#[must_use]
pub fn parse_bool_flag(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}
