use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::Local;
use rusqlite::{Connection, OptionalExtension, params};

use crate::models::{
    DEFAULT_SECTORS, Ingredient, NewListItem, NewRecipe, NewRecipeIngredient, NewStaple, Recipe,
    RecipeIngredient, Sector, ShoppingList, ShoppingListItem, Staple, grid_slot, non_empty,
    validate_name,
};

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            // Sector references are plain integers: deleting a sector leaves them dangling
            // and readers fall back to the "Other" bucket.
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS sectors (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    display_order INTEGER NOT NULL,
                    grid_row INTEGER NOT NULL,
                    grid_column INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS ingredients (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    sector_id INTEGER,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS recipes (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    image_url TEXT,
                    instructions TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS recipe_ingredients (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    recipe_id INTEGER NOT NULL REFERENCES recipes(id) ON DELETE CASCADE,
                    ingredient_id INTEGER NOT NULL REFERENCES ingredients(id),
                    quantity TEXT,
                    unit TEXT
                );

                CREATE TABLE IF NOT EXISTS staples (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    sector_id INTEGER,
                    is_default INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS shopping_lists (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    completed_at TEXT
                );

                CREATE TABLE IF NOT EXISTS shopping_list_items (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    shopping_list_id INTEGER NOT NULL REFERENCES shopping_lists(id) ON DELETE CASCADE,
                    item_name TEXT NOT NULL,
                    sector_id INTEGER,
                    quantity TEXT,
                    is_checked INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS shopping_list_recipes (
                    shopping_list_id INTEGER NOT NULL,
                    recipe_id INTEGER NOT NULL,
                    PRIMARY KEY (shopping_list_id, recipe_id)
                );

                CREATE TABLE IF NOT EXISTS shopping_list_staples (
                    shopping_list_id INTEGER NOT NULL,
                    staple_id INTEGER NOT NULL,
                    PRIMARY KEY (shopping_list_id, staple_id)
                );

                CREATE INDEX IF NOT EXISTS idx_sectors_order ON sectors(display_order);
                CREATE INDEX IF NOT EXISTS idx_ingredients_name ON ingredients(name);
                CREATE INDEX IF NOT EXISTS idx_recipes_name ON recipes(name);
                CREATE INDEX IF NOT EXISTS idx_recipe_ingredients_recipe ON recipe_ingredients(recipe_id);
                CREATE INDEX IF NOT EXISTS idx_staples_name ON staples(name);
                CREATE INDEX IF NOT EXISTS idx_list_items_list ON shopping_list_items(shopping_list_id);
                CREATE INDEX IF NOT EXISTS idx_lists_created ON shopping_lists(created_at);",
            )?;

            for (index, name) in DEFAULT_SECTORS.iter().enumerate() {
                let index = index as i64;
                let (row, column) = grid_slot(index);
                self.conn.execute(
                    "INSERT INTO sectors (name, display_order, grid_row, grid_column)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![name, index + 1, row, column],
                )?;
            }

            self.conn.execute_batch("PRAGMA user_version = 1;")?;
        }

        Ok(())
    }

    // --- Row mappers ---

    fn sector_from_row(row: &rusqlite::Row) -> rusqlite::Result<Sector> {
        Ok(Sector {
            id: row.get(0)?,
            name: row.get(1)?,
            display_order: row.get(2)?,
            grid_row: row.get(3)?,
            grid_column: row.get(4)?,
        })
    }

    fn ingredient_from_row(row: &rusqlite::Row) -> rusqlite::Result<Ingredient> {
        Ok(Ingredient {
            id: row.get(0)?,
            name: row.get(1)?,
            sector_id: row.get(2)?,
            sector_name: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    fn staple_from_row(row: &rusqlite::Row) -> rusqlite::Result<Staple> {
        Ok(Staple {
            id: row.get(0)?,
            name: row.get(1)?,
            sector_id: row.get(2)?,
            sector_name: row.get(3)?,
            is_default: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn list_from_row(row: &rusqlite::Row) -> rusqlite::Result<ShoppingList> {
        Ok(ShoppingList {
            id: row.get(0)?,
            name: row.get(1)?,
            created_at: row.get(2)?,
            completed_at: row.get(3)?,
        })
    }

    fn list_item_from_row(row: &rusqlite::Row) -> rusqlite::Result<ShoppingListItem> {
        Ok(ShoppingListItem {
            id: row.get(0)?,
            shopping_list_id: row.get(1)?,
            item_name: row.get(2)?,
            sector_id: row.get(3)?,
            sector_name: row.get(4)?,
            quantity: row.get(5)?,
            is_checked: row.get(6)?,
        })
    }

    // --- Sectors ---

    pub fn list_sectors(&self) -> Result<Vec<Sector>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, display_order, grid_row, grid_column
             FROM sectors ORDER BY display_order, id",
        )?;
        let sectors = stmt
            .query_map([], Self::sector_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sectors)
    }

    pub fn get_sector(&self, id: i64) -> Result<Sector> {
        self.conn
            .query_row(
                "SELECT id, name, display_order, grid_row, grid_column FROM sectors WHERE id = ?1",
                params![id],
                Self::sector_from_row,
            )
            .with_context(|| format!("Sector {id} not found"))
    }

    pub fn find_sector_by_name(&self, name: &str) -> Result<Option<Sector>> {
        let sector = self
            .conn
            .query_row(
                "SELECT id, name, display_order, grid_row, grid_column
                 FROM sectors WHERE LOWER(name) = LOWER(?1) ORDER BY display_order LIMIT 1",
                params![name.trim()],
                Self::sector_from_row,
            )
            .optional()?;
        Ok(sector)
    }

    /// Append a sector after the current last one, in the next free grid slot.
    pub fn add_sector(&self, name: &str) -> Result<Sector> {
        let name = validate_name("sector", name)?;
        let (max_order, count): (i64, i64) = self.conn.query_row(
            "SELECT COALESCE(MAX(display_order), 0), COUNT(*) FROM sectors",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let (grid_row, grid_column) = grid_slot(count);
        self.conn
            .execute(
                "INSERT INTO sectors (name, display_order, grid_row, grid_column)
                 VALUES (?1, ?2, ?3, ?4)",
                params![name, max_order + 1, grid_row, grid_column],
            )
            .context("Failed to add sector")?;
        Ok(Sector {
            id: self.conn.last_insert_rowid(),
            name,
            display_order: max_order + 1,
            grid_row,
            grid_column,
        })
    }

    /// Look a sector up by name, creating it when no sector matches.
    pub fn resolve_sector(&self, name: &str) -> Result<Sector> {
        if let Some(sector) = self.find_sector_by_name(name)? {
            return Ok(sector);
        }
        self.add_sector(name)
    }

    pub fn rename_sector(&self, id: i64, name: &str) -> Result<Sector> {
        let name = validate_name("sector", name)?;
        let rows = self.conn.execute(
            "UPDATE sectors SET name = ?1 WHERE id = ?2",
            params![name, id],
        )?;
        if rows == 0 {
            bail!("Sector {id} not found");
        }
        self.get_sector(id)
    }

    pub fn delete_sector(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM sectors WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    /// Move a sector to `position` (0-based, clamped) and renumber every sector's
    /// display order and grid slot from its new index.
    pub fn move_sector(&self, id: i64, position: usize) -> Result<Vec<Sector>> {
        let mut sectors = self.list_sectors()?;
        let from = sectors
            .iter()
            .position(|s| s.id == id)
            .with_context(|| format!("Sector {id} not found"))?;
        let moved = sectors.remove(from);
        let to = position.min(sectors.len());
        sectors.insert(to, moved);

        for (index, sector) in sectors.iter_mut().enumerate() {
            let index = index as i64;
            let (grid_row, grid_column) = grid_slot(index);
            sector.display_order = index + 1;
            sector.grid_row = grid_row;
            sector.grid_column = grid_column;
            self.conn.execute(
                "UPDATE sectors SET display_order = ?1, grid_row = ?2, grid_column = ?3
                 WHERE id = ?4",
                params![sector.display_order, grid_row, grid_column, sector.id],
            )?;
        }
        Ok(sectors)
    }

    // --- Ingredients ---

    pub fn list_ingredients(&self) -> Result<Vec<Ingredient>> {
        let mut stmt = self.conn.prepare(
            "SELECT i.id, i.name, i.sector_id, s.name, i.created_at
             FROM ingredients i LEFT JOIN sectors s ON i.sector_id = s.id
             ORDER BY i.name, i.id",
        )?;
        let ingredients = stmt
            .query_map([], Self::ingredient_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ingredients)
    }

    pub fn get_ingredient(&self, id: i64) -> Result<Ingredient> {
        self.conn
            .query_row(
                "SELECT i.id, i.name, i.sector_id, s.name, i.created_at
                 FROM ingredients i LEFT JOIN sectors s ON i.sector_id = s.id
                 WHERE i.id = ?1",
                params![id],
                Self::ingredient_from_row,
            )
            .with_context(|| format!("Ingredient {id} not found"))
    }

    /// Ingredients are global and matched by case-insensitive name.
    pub fn find_ingredient_by_name(&self, name: &str) -> Result<Option<Ingredient>> {
        let ingredient = self
            .conn
            .query_row(
                "SELECT i.id, i.name, i.sector_id, s.name, i.created_at
                 FROM ingredients i LEFT JOIN sectors s ON i.sector_id = s.id
                 WHERE LOWER(i.name) = LOWER(?1) ORDER BY i.id LIMIT 1",
                params![name.trim()],
                Self::ingredient_from_row,
            )
            .optional()?;
        Ok(ingredient)
    }

    pub fn create_ingredient(&self, name: &str, sector_id: Option<i64>) -> Result<Ingredient> {
        let name = validate_name("ingredient", name)?;
        let now = Local::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO ingredients (name, sector_id, created_at) VALUES (?1, ?2, ?3)",
                params![name, sector_id, now],
            )
            .with_context(|| format!("Failed to create ingredient '{name}'"))?;
        self.get_ingredient(self.conn.last_insert_rowid())
    }

    /// Reuse an existing ingredient by name (its sector is left alone) or create it.
    pub fn get_or_create_ingredient(&self, name: &str, sector_id: Option<i64>) -> Result<Ingredient> {
        match self.find_ingredient_by_name(name)? {
            Some(existing) => Ok(existing),
            None => self.create_ingredient(name, sector_id),
        }
    }

    pub fn set_ingredient_sector(&self, id: i64, sector_id: Option<i64>) -> Result<()> {
        self.conn
            .execute(
                "UPDATE ingredients SET sector_id = ?1 WHERE id = ?2",
                params![sector_id, id],
            )
            .with_context(|| format!("Failed to update sector of ingredient {id}"))?;
        Ok(())
    }

    // --- Recipes ---

    pub fn create_recipe(&self, recipe: &NewRecipe) -> Result<Recipe> {
        let name = validate_name("recipe", &recipe.name)?;
        let now = Local::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO recipes (name, image_url, instructions, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    name,
                    non_empty(recipe.image_url.as_deref()),
                    non_empty(recipe.instructions.as_deref()),
                    now,
                    now
                ],
            )
            .context("Failed to save recipe")?;
        let id = self.conn.last_insert_rowid();
        self.insert_recipe_ingredients(id, &recipe.ingredients)?;
        self.get_recipe(id)
    }

    /// Update name/image/instructions and rewrite the ingredient rows wholesale.
    pub fn update_recipe(&self, id: i64, recipe: &NewRecipe) -> Result<Recipe> {
        let name = validate_name("recipe", &recipe.name)?;
        let now = Local::now().to_rfc3339();
        let rows = self
            .conn
            .execute(
                "UPDATE recipes SET name = ?1, image_url = ?2, instructions = ?3, updated_at = ?4
                 WHERE id = ?5",
                params![
                    name,
                    non_empty(recipe.image_url.as_deref()),
                    non_empty(recipe.instructions.as_deref()),
                    now,
                    id
                ],
            )
            .context("Failed to save recipe")?;
        if rows == 0 {
            bail!("Recipe {id} not found");
        }
        self.replace_recipe_ingredients(id, &recipe.ingredients)?;
        self.get_recipe(id)
    }

    pub fn set_recipe_details(
        &self,
        id: i64,
        image_url: Option<&str>,
        instructions: Option<&str>,
    ) -> Result<()> {
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "UPDATE recipes SET image_url = ?1, instructions = ?2, updated_at = ?3 WHERE id = ?4",
            params![non_empty(image_url), non_empty(instructions), now, id],
        )?;
        Ok(())
    }

    pub fn replace_recipe_ingredients(
        &self,
        recipe_id: i64,
        ingredients: &[NewRecipeIngredient],
    ) -> Result<()> {
        self.conn.execute(
            "DELETE FROM recipe_ingredients WHERE recipe_id = ?1",
            params![recipe_id],
        )?;
        self.insert_recipe_ingredients(recipe_id, ingredients)
    }

    fn insert_recipe_ingredients(
        &self,
        recipe_id: i64,
        ingredients: &[NewRecipeIngredient],
    ) -> Result<()> {
        for ing in ingredients {
            self.conn
                .execute(
                    "INSERT INTO recipe_ingredients (recipe_id, ingredient_id, quantity, unit)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        recipe_id,
                        ing.ingredient_id,
                        non_empty(ing.quantity.as_deref()),
                        non_empty(ing.unit.as_deref())
                    ],
                )
                .context("Failed to add recipe ingredient")?;
        }
        Ok(())
    }

    pub fn get_recipe_ingredients(&self, recipe_id: i64) -> Result<Vec<RecipeIngredient>> {
        let mut stmt = self.conn.prepare(
            "SELECT ri.id, ri.recipe_id, ri.ingredient_id, ri.quantity, ri.unit,
                    i.name, i.sector_id, s.name
             FROM recipe_ingredients ri
             JOIN ingredients i ON ri.ingredient_id = i.id
             LEFT JOIN sectors s ON i.sector_id = s.id
             WHERE ri.recipe_id = ?1
             ORDER BY ri.id",
        )?;
        let ingredients = stmt
            .query_map(params![recipe_id], |row| {
                Ok(RecipeIngredient {
                    id: row.get(0)?,
                    recipe_id: row.get(1)?,
                    ingredient_id: row.get(2)?,
                    quantity: row.get(3)?,
                    unit: row.get(4)?,
                    ingredient_name: row.get(5)?,
                    sector_id: row.get(6)?,
                    sector_name: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ingredients)
    }

    pub fn get_recipe(&self, id: i64) -> Result<Recipe> {
        let mut recipe = self
            .conn
            .query_row(
                "SELECT id, name, image_url, instructions, created_at, updated_at
                 FROM recipes WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Recipe {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        image_url: row.get(2)?,
                        instructions: row.get(3)?,
                        created_at: row.get(4)?,
                        updated_at: row.get(5)?,
                        ingredients: Vec::new(),
                    })
                },
            )
            .with_context(|| format!("Recipe {id} not found"))?;
        recipe.ingredients = self.get_recipe_ingredients(id)?;
        Ok(recipe)
    }

    /// Exact-name lookup, as used by CSV import matching.
    pub fn get_recipe_by_name(&self, name: &str) -> Result<Option<Recipe>> {
        let id: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM recipes WHERE name = ?1 ORDER BY id LIMIT 1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        id.map(|id| self.get_recipe(id)).transpose()
    }

    pub fn list_recipes(&self) -> Result<Vec<Recipe>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM recipes ORDER BY name, id")?;
        let ids: Vec<i64> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        let mut recipes = Vec::with_capacity(ids.len());
        for id in ids {
            recipes.push(self.get_recipe(id)?);
        }
        Ok(recipes)
    }

    /// Sorted distinct ingredient names used by any recipe.
    pub fn recipe_ingredient_names(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT i.name FROM recipe_ingredients ri
             JOIN ingredients i ON ri.ingredient_id = i.id
             ORDER BY i.name",
        )?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    pub fn delete_recipe(&self, id: i64) -> Result<bool> {
        self.conn.execute(
            "DELETE FROM recipe_ingredients WHERE recipe_id = ?1",
            params![id],
        )?;
        self.conn.execute(
            "DELETE FROM shopping_list_recipes WHERE recipe_id = ?1",
            params![id],
        )?;
        let rows = self
            .conn
            .execute("DELETE FROM recipes WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // --- Staples ---

    const STAPLE_COLUMNS: &'static str =
        "st.id, st.name, st.sector_id, s.name, st.is_default, st.created_at, st.updated_at
         FROM staples st LEFT JOIN sectors s ON st.sector_id = s.id";

    pub fn list_staples(&self) -> Result<Vec<Staple>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} ORDER BY st.name, st.id",
            Self::STAPLE_COLUMNS
        ))?;
        let staples = stmt
            .query_map([], Self::staple_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(staples)
    }

    pub fn get_staple(&self, id: i64) -> Result<Staple> {
        self.conn
            .query_row(
                &format!("SELECT {} WHERE st.id = ?1", Self::STAPLE_COLUMNS),
                params![id],
                Self::staple_from_row,
            )
            .with_context(|| format!("Staple {id} not found"))
    }

    pub fn get_staple_by_name(&self, name: &str) -> Result<Option<Staple>> {
        let staple = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} WHERE st.name = ?1 ORDER BY st.id LIMIT 1",
                    Self::STAPLE_COLUMNS
                ),
                params![name],
                Self::staple_from_row,
            )
            .optional()?;
        Ok(staple)
    }

    pub fn create_staple(&self, staple: &NewStaple) -> Result<Staple> {
        let name = validate_name("staple", &staple.name)?;
        let now = Local::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO staples (name, sector_id, is_default, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![name, staple.sector_id, staple.is_default, now, now],
            )
            .context("Failed to save staple")?;
        self.get_staple(self.conn.last_insert_rowid())
    }

    pub fn update_staple(&self, id: i64, staple: &NewStaple) -> Result<Staple> {
        let name = validate_name("staple", &staple.name)?;
        let now = Local::now().to_rfc3339();
        let rows = self
            .conn
            .execute(
                "UPDATE staples SET name = ?1, sector_id = ?2, is_default = ?3, updated_at = ?4
                 WHERE id = ?5",
                params![name, staple.sector_id, staple.is_default, now, id],
            )
            .context("Failed to save staple")?;
        if rows == 0 {
            bail!("Staple {id} not found");
        }
        self.get_staple(id)
    }

    pub fn delete_staple(&self, id: i64) -> Result<bool> {
        self.conn.execute(
            "DELETE FROM shopping_list_staples WHERE staple_id = ?1",
            params![id],
        )?;
        let rows = self
            .conn
            .execute("DELETE FROM staples WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    /// Ids of staples pre-selected when a new list is started.
    pub fn default_staple_ids(&self) -> Result<Vec<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM staples WHERE is_default = 1 ORDER BY name, id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    // --- Shopping lists ---

    pub fn insert_shopping_list(&self, name: &str) -> Result<ShoppingList> {
        let name = validate_name("shopping list", name)?;
        let now = Local::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO shopping_lists (name, created_at, completed_at) VALUES (?1, ?2, NULL)",
                params![name, now],
            )
            .context("Failed to save shopping list")?;
        Ok(ShoppingList {
            id: self.conn.last_insert_rowid(),
            name,
            created_at: now,
            completed_at: None,
        })
    }

    pub fn get_shopping_list(&self, id: i64) -> Result<ShoppingList> {
        self.conn
            .query_row(
                "SELECT id, name, created_at, completed_at FROM shopping_lists WHERE id = ?1",
                params![id],
                Self::list_from_row,
            )
            .with_context(|| format!("Shopping list {id} not found"))
    }

    /// History, newest first.
    pub fn list_shopping_lists(&self) -> Result<Vec<ShoppingList>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, created_at, completed_at FROM shopping_lists
             ORDER BY created_at DESC, id DESC",
        )?;
        let lists = stmt
            .query_map([], Self::list_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(lists)
    }

    pub fn rename_shopping_list(&self, id: i64, name: &str) -> Result<ShoppingList> {
        let name = validate_name("shopping list", name)?;
        let rows = self.conn.execute(
            "UPDATE shopping_lists SET name = ?1 WHERE id = ?2",
            params![name, id],
        )?;
        if rows == 0 {
            bail!("Shopping list {id} not found");
        }
        self.get_shopping_list(id)
    }

    pub fn complete_shopping_list(&self, id: i64) -> Result<ShoppingList> {
        let now = Local::now().to_rfc3339();
        let rows = self.conn.execute(
            "UPDATE shopping_lists SET completed_at = ?1 WHERE id = ?2",
            params![now, id],
        )?;
        if rows == 0 {
            bail!("Shopping list {id} not found");
        }
        self.get_shopping_list(id)
    }

    pub fn delete_shopping_list(&self, id: i64) -> Result<bool> {
        self.delete_list_items(id)?;
        self.delete_list_links(id)?;
        let rows = self
            .conn
            .execute("DELETE FROM shopping_lists WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    pub fn insert_list_item(&self, list_id: i64, item: &NewListItem) -> Result<ShoppingListItem> {
        self.conn
            .execute(
                "INSERT INTO shopping_list_items (shopping_list_id, item_name, sector_id, quantity, is_checked)
                 VALUES (?1, ?2, ?3, ?4, 0)",
                params![list_id, item.item_name, item.sector_id, item.quantity],
            )
            .with_context(|| format!("Failed to save item '{}'", item.item_name))?;
        let id = self.conn.last_insert_rowid();
        self.conn
            .query_row(
                "SELECT li.id, li.shopping_list_id, li.item_name, li.sector_id, s.name, li.quantity, li.is_checked
                 FROM shopping_list_items li LEFT JOIN sectors s ON li.sector_id = s.id
                 WHERE li.id = ?1",
                params![id],
                Self::list_item_from_row,
            )
            .context("Failed to read back saved item")
    }

    pub fn get_list_items(&self, list_id: i64) -> Result<Vec<ShoppingListItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT li.id, li.shopping_list_id, li.item_name, li.sector_id, s.name, li.quantity, li.is_checked
             FROM shopping_list_items li LEFT JOIN sectors s ON li.sector_id = s.id
             WHERE li.shopping_list_id = ?1
             ORDER BY li.id",
        )?;
        let items = stmt
            .query_map(params![list_id], Self::list_item_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    pub fn delete_list_items(&self, list_id: i64) -> Result<usize> {
        let rows = self.conn.execute(
            "DELETE FROM shopping_list_items WHERE shopping_list_id = ?1",
            params![list_id],
        )?;
        Ok(rows)
    }

    /// Returns false when the item no longer exists.
    pub fn set_item_checked(&self, item_id: i64, checked: bool) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE shopping_list_items SET is_checked = ?1 WHERE id = ?2",
            params![checked, item_id],
        )?;
        Ok(rows > 0)
    }

    pub fn set_all_items_checked(&self, list_id: i64, checked: bool) -> Result<usize> {
        let rows = self.conn.execute(
            "UPDATE shopping_list_items SET is_checked = ?1 WHERE shopping_list_id = ?2",
            params![checked, list_id],
        )?;
        Ok(rows)
    }

    pub fn insert_list_recipe_links(&self, list_id: i64, recipe_ids: &[i64]) -> Result<()> {
        for recipe_id in recipe_ids {
            self.conn.execute(
                "INSERT OR IGNORE INTO shopping_list_recipes (shopping_list_id, recipe_id) VALUES (?1, ?2)",
                params![list_id, recipe_id],
            )?;
        }
        Ok(())
    }

    pub fn insert_list_staple_links(&self, list_id: i64, staple_ids: &[i64]) -> Result<()> {
        for staple_id in staple_ids {
            self.conn.execute(
                "INSERT OR IGNORE INTO shopping_list_staples (shopping_list_id, staple_id) VALUES (?1, ?2)",
                params![list_id, staple_id],
            )?;
        }
        Ok(())
    }

    pub fn delete_list_links(&self, list_id: i64) -> Result<()> {
        self.conn.execute(
            "DELETE FROM shopping_list_recipes WHERE shopping_list_id = ?1",
            params![list_id],
        )?;
        self.conn.execute(
            "DELETE FROM shopping_list_staples WHERE shopping_list_id = ?1",
            params![list_id],
        )?;
        Ok(())
    }

    pub fn get_list_recipe_ids(&self, list_id: i64) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT recipe_id FROM shopping_list_recipes WHERE shopping_list_id = ?1 ORDER BY recipe_id",
        )?;
        let ids = stmt
            .query_map(params![list_id], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    pub fn get_list_staple_ids(&self, list_id: i64) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT staple_id FROM shopping_list_staples WHERE shopping_list_id = ?1 ORDER BY staple_id",
        )?;
        let ids = stmt
            .query_map(params![list_id], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sector_id(db: &Database, name: &str) -> i64 {
        db.find_sector_by_name(name).unwrap().unwrap().id
    }

    #[test]
    fn test_fresh_database_seeds_default_sectors() {
        let db = Database::open_in_memory().unwrap();
        let sectors = db.list_sectors().unwrap();
        let names: Vec<&str> = sectors.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, DEFAULT_SECTORS);
        assert_eq!((sectors[0].grid_row, sectors[0].grid_column), (1, 1));
        assert_eq!((sectors[5].grid_row, sectors[5].grid_column), (2, 3));
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trolley.db");
        {
            let db = Database::open(&path).unwrap();
            db.add_sector("Drinks").unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(db.list_sectors().unwrap().len(), DEFAULT_SECTORS.len() + 1);
    }

    #[test]
    fn test_add_sector_takes_next_grid_slot() {
        let db = Database::open_in_memory().unwrap();
        let drinks = db.add_sector("  Drinks ").unwrap();
        assert_eq!(drinks.name, "Drinks");
        assert_eq!(drinks.display_order, 7);
        assert_eq!((drinks.grid_row, drinks.grid_column), (3, 1));
        assert!(db.add_sector("   ").is_err());
    }

    #[test]
    fn test_rename_sector_is_visible_through_joins() {
        let db = Database::open_in_memory().unwrap();
        let dairy = sector_id(&db, "Dairy & Eggs");
        let staple = db
            .create_staple(&NewStaple {
                name: "Milk".to_string(),
                sector_id: Some(dairy),
                is_default: true,
            })
            .unwrap();
        db.rename_sector(dairy, "Dairy").unwrap();
        let fetched = db.get_staple(staple.id).unwrap();
        assert_eq!(fetched.sector_name.as_deref(), Some("Dairy"));
        assert!(db.rename_sector(9999, "Nope").is_err());
    }

    #[test]
    fn test_delete_sector_leaves_dangling_reference() {
        let db = Database::open_in_memory().unwrap();
        let frozen = sector_id(&db, "Frozen Foods");
        let peas = db.create_ingredient("Peas", Some(frozen)).unwrap();
        assert!(db.delete_sector(frozen).unwrap());
        let peas = db.get_ingredient(peas.id).unwrap();
        assert_eq!(peas.sector_id, Some(frozen));
        assert_eq!(peas.sector_name, None);
        assert_eq!(peas.sector_label(), "Other");
        assert!(!db.delete_sector(frozen).unwrap());
    }

    #[test]
    fn test_move_sector_renumbers_grid() {
        let db = Database::open_in_memory().unwrap();
        let frozen = sector_id(&db, "Frozen Foods");
        let sectors = db.move_sector(frozen, 0).unwrap();
        assert_eq!(sectors[0].name, "Frozen Foods");
        assert_eq!(sectors[1].name, "Fresh Produce");

        let stored = db.list_sectors().unwrap();
        assert_eq!(stored[0].id, frozen);
        assert_eq!((stored[0].display_order, stored[0].grid_row, stored[0].grid_column), (1, 1, 1));
        assert_eq!(stored[3].name, "Dairy & Eggs");
        assert_eq!((stored[3].grid_row, stored[3].grid_column), (2, 1));
    }

    #[test]
    fn test_move_sector_clamps_position() {
        let db = Database::open_in_memory().unwrap();
        let produce = sector_id(&db, "Fresh Produce");
        let sectors = db.move_sector(produce, 100).unwrap();
        assert_eq!(sectors.last().unwrap().id, produce);
        assert!(db.move_sector(9999, 0).is_err());
    }

    #[test]
    fn test_resolve_sector_matches_case_insensitively_or_creates() {
        let db = Database::open_in_memory().unwrap();
        let dairy = db.resolve_sector("dairy & eggs").unwrap();
        assert_eq!(dairy.name, "Dairy & Eggs");
        let other = db.resolve_sector("Other").unwrap();
        assert_eq!(other.display_order, 7);
        assert_eq!(db.resolve_sector("OTHER").unwrap().id, other.id);
    }

    #[test]
    fn test_ingredient_lookup_is_case_insensitive() {
        let db = Database::open_in_memory().unwrap();
        let produce = sector_id(&db, "Fresh Produce");
        let onion = db.create_ingredient("Onion", Some(produce)).unwrap();
        let again = db.get_or_create_ingredient("  onion ", None).unwrap();
        assert_eq!(again.id, onion.id);
        assert_eq!(again.sector_id, Some(produce));
        assert_eq!(db.list_ingredients().unwrap().len(), 1);
    }

    #[test]
    fn test_create_and_update_recipe_replaces_ingredients() {
        let db = Database::open_in_memory().unwrap();
        let meat = sector_id(&db, "Meat & Seafood");
        let beef = db.create_ingredient("Beef Mince", Some(meat)).unwrap();
        let pasta = db.create_ingredient("Spaghetti", None).unwrap();

        let recipe = db
            .create_recipe(&NewRecipe {
                name: "Bolognese".to_string(),
                image_url: Some(String::new()),
                instructions: Some("Simmer".to_string()),
                ingredients: vec![
                    NewRecipeIngredient {
                        ingredient_id: beef.id,
                        quantity: Some("500".to_string()),
                        unit: Some("g".to_string()),
                    },
                    NewRecipeIngredient {
                        ingredient_id: pasta.id,
                        quantity: None,
                        unit: None,
                    },
                ],
            })
            .unwrap();
        assert_eq!(recipe.image_url, None);
        assert_eq!(recipe.instructions.as_deref(), Some("Simmer"));
        assert_eq!(recipe.ingredients.len(), 2);
        assert_eq!(recipe.ingredients[0].sector_name.as_deref(), Some("Meat & Seafood"));
        assert_eq!(recipe.ingredients[1].sector_label(), "Other");

        let updated = db
            .update_recipe(
                recipe.id,
                &NewRecipe {
                    name: "Spag Bol".to_string(),
                    image_url: None,
                    instructions: None,
                    ingredients: vec![NewRecipeIngredient {
                        ingredient_id: pasta.id,
                        quantity: Some("400".to_string()),
                        unit: Some("g".to_string()),
                    }],
                },
            )
            .unwrap();
        assert_eq!(updated.name, "Spag Bol");
        assert_eq!(updated.ingredients.len(), 1);
        assert_eq!(updated.ingredients[0].ingredient_name, "Spaghetti");
    }

    #[test]
    fn test_create_recipe_requires_name() {
        let db = Database::open_in_memory().unwrap();
        let err = db.create_recipe(&NewRecipe::default()).unwrap_err();
        assert_eq!(err.to_string(), "Please enter a recipe name");
        assert!(db.list_recipes().unwrap().is_empty());
    }

    #[test]
    fn test_list_recipes_ordered_by_name() {
        let db = Database::open_in_memory().unwrap();
        for name in ["Tacos", "Curry", "Lasagne"] {
            db.create_recipe(&NewRecipe {
                name: name.to_string(),
                ..NewRecipe::default()
            })
            .unwrap();
        }
        let names: Vec<String> = db.list_recipes().unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["Curry", "Lasagne", "Tacos"]);
    }

    #[test]
    fn test_get_recipe_by_name_is_exact() {
        let db = Database::open_in_memory().unwrap();
        db.create_recipe(&NewRecipe {
            name: "Curry".to_string(),
            ..NewRecipe::default()
        })
        .unwrap();
        assert!(db.get_recipe_by_name("Curry").unwrap().is_some());
        assert!(db.get_recipe_by_name("curry").unwrap().is_none());
    }

    #[test]
    fn test_delete_recipe_removes_ingredient_rows() {
        let db = Database::open_in_memory().unwrap();
        let rice = db.create_ingredient("Rice", None).unwrap();
        let recipe = db
            .create_recipe(&NewRecipe {
                name: "Risotto".to_string(),
                ingredients: vec![NewRecipeIngredient {
                    ingredient_id: rice.id,
                    ..NewRecipeIngredient::default()
                }],
                ..NewRecipe::default()
            })
            .unwrap();
        assert!(db.delete_recipe(recipe.id).unwrap());
        assert!(db.get_recipe_ingredients(recipe.id).unwrap().is_empty());
        assert!(db.get_recipe(recipe.id).is_err());
        // the ingredient itself is global and stays
        assert!(db.get_ingredient(rice.id).is_ok());
        assert!(db.recipe_ingredient_names().unwrap().is_empty());
    }

    #[test]
    fn test_staple_crud_and_defaults() {
        let db = Database::open_in_memory().unwrap();
        let bakery = sector_id(&db, "Bakery & Bread");
        let bread = db
            .create_staple(&NewStaple {
                name: " Bread ".to_string(),
                sector_id: Some(bakery),
                is_default: true,
            })
            .unwrap();
        let butter = db
            .create_staple(&NewStaple {
                name: "Butter".to_string(),
                sector_id: None,
                is_default: false,
            })
            .unwrap();
        assert_eq!(bread.name, "Bread");
        assert_eq!(db.default_staple_ids().unwrap(), vec![bread.id]);

        db.update_staple(
            butter.id,
            &NewStaple {
                name: "Butter".to_string(),
                sector_id: Some(bakery),
                is_default: true,
            },
        )
        .unwrap();
        assert_eq!(db.default_staple_ids().unwrap().len(), 2);
        assert!(db.get_staple_by_name("Butter").unwrap().unwrap().is_default);

        assert!(db.delete_staple(bread.id).unwrap());
        assert_eq!(db.list_staples().unwrap().len(), 1);
    }

    #[test]
    fn test_shopping_list_lifecycle() {
        let db = Database::open_in_memory().unwrap();
        let dairy = sector_id(&db, "Dairy & Eggs");
        let list = db.insert_shopping_list("Weekly Shop").unwrap();
        let eggs = db
            .insert_list_item(
                list.id,
                &NewListItem {
                    item_name: "Eggs".to_string(),
                    sector_id: Some(dairy),
                    quantity: Some("6 (Staple)".to_string()),
                },
            )
            .unwrap();
        assert_eq!(eggs.sector_name.as_deref(), Some("Dairy & Eggs"));
        assert!(!eggs.is_checked);

        assert!(db.set_item_checked(eggs.id, true).unwrap());
        assert!(db.get_list_items(list.id).unwrap()[0].is_checked);
        assert!(!db.set_item_checked(9999, true).unwrap());

        db.insert_list_recipe_links(list.id, &[4, 2, 4]).unwrap();
        db.insert_list_staple_links(list.id, &[7]).unwrap();
        assert_eq!(db.get_list_recipe_ids(list.id).unwrap(), vec![2, 4]);
        assert_eq!(db.get_list_staple_ids(list.id).unwrap(), vec![7]);

        let renamed = db.rename_shopping_list(list.id, "Party").unwrap();
        assert_eq!(renamed.name, "Party");
        let done = db.complete_shopping_list(list.id).unwrap();
        assert!(done.is_completed());

        assert!(db.delete_shopping_list(list.id).unwrap());
        assert!(db.get_list_items(list.id).unwrap().is_empty());
        assert!(db.get_list_recipe_ids(list.id).unwrap().is_empty());
        assert!(db.get_shopping_list(list.id).is_err());
    }

    #[test]
    fn test_history_newest_first() {
        let db = Database::open_in_memory().unwrap();
        let first = db.insert_shopping_list("First").unwrap();
        let second = db.insert_shopping_list("Second").unwrap();
        let history = db.list_shopping_lists().unwrap();
        assert_eq!(history.len(), 2);
        // Same-timestamp ties fall back to id order
        assert!(history.iter().position(|l| l.id == second.id) <= history.iter().position(|l| l.id == first.id));
    }

    #[test]
    fn test_set_all_items_checked() {
        let db = Database::open_in_memory().unwrap();
        let list = db.insert_shopping_list("Weekly").unwrap();
        for name in ["Milk", "Bread"] {
            db.insert_list_item(
                list.id,
                &NewListItem {
                    item_name: name.to_string(),
                    sector_id: None,
                    quantity: None,
                },
            )
            .unwrap();
        }
        assert_eq!(db.set_all_items_checked(list.id, true).unwrap(), 2);
        assert!(db.get_list_items(list.id).unwrap().iter().all(|i| i.is_checked));
        db.set_all_items_checked(list.id, false).unwrap();
        assert!(db.get_list_items(list.id).unwrap().iter().all(|i| !i.is_checked));
    }
}
