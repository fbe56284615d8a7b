//! Bulk CSV import and export of recipes and staples.
//!
//! One record per `\n`-separated line; blank lines are dropped. Lines are
//! split by a quote-toggling scan, so a quoted field cannot span lines.
//! Rows are written with the `csv` crate.

use std::collections::HashMap;

use anyhow::{Result, anyhow, bail};
use chrono::NaiveDate;
use tracing::info;

use crate::db::Database;
use crate::models::{
    ImportSummary, NewRecipe, NewRecipeIngredient, NewStaple, OTHER_SECTOR, Recipe, non_empty,
    parse_bool_flag,
};

pub const RECIPE_HEADER: &str =
    "recipe_name,recipe_image_url,recipe_instructions,ingredient_name,ingredient_sector,quantity,unit";
pub const LEGACY_RECIPE_HEADER: &str = "name,ingredients,sector,quantity,unit,instructions,image_url";
pub const STAPLE_HEADER: &str = "name,sector,is_default";

/// Split one line into fields. Fields are returned untrimmed.
///
/// A `"` toggles quoting wherever it appears, so `ab"c,d"e` is one field
/// `abc,de`. Inside quotes `""` is a literal quote. Every other character,
/// `\r` included, belongs to the current field.
#[must_use]
pub fn parse_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

/// One output line. A field is quoted only if it contains a comma, quote, or newline.
pub fn encode_row(fields: &[&str]) -> Result<String> {
    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Necessary)
        .from_writer(Vec::new());
    writer.write_record(fields)?;
    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow!("Failed to encode CSV row: {e}"))?;
    let line = String::from_utf8(bytes)?;
    Ok(line.strip_suffix("\r\n").unwrap_or(&line).to_string())
}

/// A parsed CSV document: lower-cased header plus data rows.
#[derive(Debug, Clone)]
pub struct CsvTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl CsvTable {
    pub fn parse(text: &str) -> Result<Self> {
        let lines: Vec<&str> = text
            .split('\n')
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        if lines.len() < 2 {
            bail!("CSV file is empty or has no data rows");
        }
        let headers = parse_line(lines[0])
            .into_iter()
            .map(|h| h.trim().to_lowercase())
            .collect();
        let rows = lines[1..].iter().copied().map(parse_line).collect();
        Ok(Self { headers, rows })
    }

    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.headers.iter().any(|h| h == name)
    }

    pub fn column(&self, name: &str) -> Result<usize> {
        match self.headers.iter().position(|h| h == name) {
            Some(idx) => Ok(idx),
            None => bail!("Missing required column: {name}"),
        }
    }

    #[must_use]
    pub fn optional_column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    #[must_use]
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }
}

/// Trimmed cell value; missing trailing cells and absent columns read as empty.
fn cell(row: &[String], idx: Option<usize>) -> &str {
    idx.and_then(|i| row.get(i)).map_or("", |v| v.trim())
}

struct RecipeColumns {
    name: usize,
    ingredient: usize,
    sector: usize,
    quantity: Option<usize>,
    unit: Option<usize>,
    image_url: Option<usize>,
    instructions: Option<usize>,
}

impl RecipeColumns {
    /// Export layout, or the legacy bulk-upload layout when only `name` is present.
    fn locate(table: &CsvTable) -> Result<Self> {
        if table.has_column("name") && !table.has_column("recipe_name") {
            return Ok(Self {
                name: table.column("name")?,
                ingredient: table.column("ingredients")?,
                sector: table.column("sector")?,
                quantity: table.optional_column("quantity"),
                unit: table.optional_column("unit"),
                image_url: table.optional_column("image_url"),
                instructions: table.optional_column("instructions"),
            });
        }
        Ok(Self {
            name: table.column("recipe_name")?,
            ingredient: table.column("ingredient_name")?,
            sector: table.column("ingredient_sector")?,
            quantity: table.optional_column("quantity"),
            unit: table.optional_column("unit"),
            image_url: table.optional_column("recipe_image_url"),
            instructions: table.optional_column("recipe_instructions"),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ImportedLine {
    name: String,
    sector: String,
    quantity: Option<String>,
    unit: Option<String>,
}

#[derive(Debug, Clone)]
struct ImportedRecipe {
    name: String,
    image_url: Option<String>,
    instructions: Option<String>,
    lines: Vec<ImportedLine>,
}

/// Group rows by recipe name in first-seen order. The first row of a recipe
/// supplies its image and instructions.
fn group_recipe_rows(table: &CsvTable, cols: &RecipeColumns) -> Vec<ImportedRecipe> {
    let mut recipes: Vec<ImportedRecipe> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for row in table.rows() {
        let name = cell(row, Some(cols.name));
        if name.is_empty() {
            continue;
        }
        let slot = *index.entry(name.to_string()).or_insert_with(|| {
            recipes.push(ImportedRecipe {
                name: name.to_string(),
                image_url: non_empty(Some(cell(row, cols.image_url))),
                instructions: non_empty(Some(cell(row, cols.instructions))),
                lines: Vec::new(),
            });
            recipes.len() - 1
        });

        let ingredient = cell(row, Some(cols.ingredient));
        if ingredient.is_empty() {
            continue;
        }
        let sector = match cell(row, Some(cols.sector)) {
            "" => OTHER_SECTOR,
            s => s,
        };
        recipes[slot].lines.push(ImportedLine {
            name: ingredient.to_string(),
            sector: sector.to_string(),
            quantity: non_empty(Some(cell(row, cols.quantity))),
            unit: non_empty(Some(cell(row, cols.unit))),
        });
    }
    recipes
}

fn line_key(name: &str, sector: &str, quantity: Option<&str>, unit: Option<&str>) -> String {
    format!(
        "{}|{}|{}|{}",
        name.to_lowercase(),
        sector,
        quantity.unwrap_or(""),
        unit.unwrap_or("")
    )
}

/// Canonical sector name for comparison: the stored spelling when the sector
/// exists, the CSV text otherwise. Never writes.
fn canonical_sector(db: &Database, name: &str) -> Result<String> {
    Ok(db
        .find_sector_by_name(name)?
        .map_or_else(|| name.to_string(), |s| s.name))
}

fn ingredients_match(db: &Database, existing: &Recipe, lines: &[ImportedLine]) -> Result<bool> {
    let mut stored: Vec<String> = existing
        .ingredients
        .iter()
        .map(|ri| {
            line_key(
                &ri.ingredient_name,
                ri.sector_label(),
                ri.quantity.as_deref(),
                ri.unit.as_deref(),
            )
        })
        .collect();
    let mut incoming = Vec::with_capacity(lines.len());
    for line in lines {
        let sector = canonical_sector(db, &line.sector)?;
        incoming.push(line_key(
            &line.name,
            &sector,
            line.quantity.as_deref(),
            line.unit.as_deref(),
        ));
    }
    stored.sort();
    incoming.sort();
    Ok(stored == incoming)
}

/// Find or create each ingredient, moving existing ones to the CSV sector.
fn resolve_lines(db: &Database, lines: &[ImportedLine]) -> Result<Vec<NewRecipeIngredient>> {
    let mut resolved = Vec::with_capacity(lines.len());
    for line in lines {
        let sector = db.resolve_sector(&line.sector)?;
        let ingredient = match db.find_ingredient_by_name(&line.name)? {
            Some(existing) => {
                if existing.sector_id != Some(sector.id) {
                    db.set_ingredient_sector(existing.id, Some(sector.id))?;
                }
                existing
            }
            None => db.create_ingredient(&line.name, Some(sector.id))?,
        };
        resolved.push(NewRecipeIngredient {
            ingredient_id: ingredient.id,
            quantity: line.quantity.clone(),
            unit: line.unit.clone(),
        });
    }
    Ok(resolved)
}

/// Import recipes, writing only what differs from the store.
pub fn import_recipes(db: &Database, text: &str) -> Result<ImportSummary> {
    let table = CsvTable::parse(text)?;
    let cols = RecipeColumns::locate(&table)?;
    let recipes = group_recipe_rows(&table, &cols);

    let mut summary = ImportSummary::default();
    for recipe in &recipes {
        if let Some(existing) = db.get_recipe_by_name(&recipe.name)? {
            let mut changed = false;
            if existing.image_url != recipe.image_url || existing.instructions != recipe.instructions
            {
                db.set_recipe_details(
                    existing.id,
                    recipe.image_url.as_deref(),
                    recipe.instructions.as_deref(),
                )?;
                changed = true;
            }
            if !ingredients_match(db, &existing, &recipe.lines)? {
                let ingredients = resolve_lines(db, &recipe.lines)?;
                db.replace_recipe_ingredients(existing.id, &ingredients)?;
                changed = true;
            }
            if changed {
                summary.updated += 1;
            }
            continue;
        }

        let ingredients = resolve_lines(db, &recipe.lines)?;
        db.create_recipe(&NewRecipe {
            name: recipe.name.clone(),
            image_url: recipe.image_url.clone(),
            instructions: recipe.instructions.clone(),
            ingredients,
        })?;
        summary.imported += 1;
    }

    info!(imported = summary.imported, updated = summary.updated, "imported recipes");
    Ok(summary)
}

/// Import staples, matched by exact name.
pub fn import_staples(db: &Database, text: &str) -> Result<ImportSummary> {
    let table = CsvTable::parse(text)?;
    let name_col = table.column("name")?;
    let sector_col = table.column("sector")?;
    let default_col = table.optional_column("is_default");

    let mut summary = ImportSummary::default();
    for row in table.rows() {
        let name = cell(row, Some(name_col));
        let sector_name = cell(row, Some(sector_col));
        if name.is_empty() || sector_name.is_empty() {
            continue;
        }
        let is_default = parse_bool_flag(cell(row, default_col));
        let sector = db.resolve_sector(sector_name)?;
        let staple = NewStaple {
            name: name.to_string(),
            sector_id: Some(sector.id),
            is_default,
        };

        match db.get_staple_by_name(name)? {
            Some(existing) => {
                if existing.sector_id != Some(sector.id) || existing.is_default != is_default {
                    db.update_staple(existing.id, &staple)?;
                    summary.updated += 1;
                }
            }
            None => {
                db.create_staple(&staple)?;
                summary.imported += 1;
            }
        }
    }

    info!(imported = summary.imported, updated = summary.updated, "imported staples");
    Ok(summary)
}

/// One row per recipe ingredient; recipes without ingredients get one row with
/// the ingredient columns blank.
pub fn export_recipes(db: &Database) -> Result<String> {
    let mut lines = vec![RECIPE_HEADER.to_string()];
    for recipe in db.list_recipes()? {
        let image = recipe.image_url.as_deref().unwrap_or("");
        let instructions = recipe.instructions.as_deref().unwrap_or("");
        if recipe.ingredients.is_empty() {
            lines.push(encode_row(&[&recipe.name, image, instructions, "", "", "", ""])?);
            continue;
        }
        for ri in &recipe.ingredients {
            lines.push(encode_row(&[
                &recipe.name,
                image,
                instructions,
                &ri.ingredient_name,
                ri.sector_label(),
                ri.quantity.as_deref().unwrap_or(""),
                ri.unit.as_deref().unwrap_or(""),
            ])?);
        }
    }
    Ok(lines.join("\n"))
}

pub fn export_staples(db: &Database) -> Result<String> {
    let mut lines = vec![STAPLE_HEADER.to_string()];
    for staple in db.list_staples()? {
        lines.push(encode_row(&[
            &staple.name,
            staple.sector_label(),
            if staple.is_default { "true" } else { "false" },
        ])?);
    }
    Ok(lines.join("\n"))
}

/// `recipes-export-2026-10-19.csv`
#[must_use]
pub fn export_filename(kind: &str, date: NaiveDate) -> String {
    format!("{kind}-export-{}.csv", date.format("%Y-%m-%d"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line_quotes_and_escapes() {
        assert_eq!(parse_line("a,b,c"), vec!["a", "b", "c"]);
        assert_eq!(
            parse_line(r#"Milk,"Dairy & Eggs",true"#),
            vec!["Milk", "Dairy & Eggs", "true"]
        );
        assert_eq!(parse_line(r#""say ""hi""",x"#), vec![r#"say "hi""#, "x"]);
        assert_eq!(parse_line(r#""a,b",,"#), vec!["a,b", "", ""]);
        assert_eq!(parse_line(""), vec![""]);
    }

    #[test]
    fn test_parse_line_keeps_whitespace() {
        assert_eq!(parse_line(" a , b"), vec![" a ", " b"]);
    }

    #[test]
    fn test_parse_line_quote_toggles_mid_field() {
        assert_eq!(parse_line("ab\"c,d\"e,f"), vec!["abc,de", "f"]);
        // "" outside quotes opens and closes an empty quoted run
        assert_eq!(parse_line(r#"x""y,z"#), vec!["xy", "z"]);
        assert_eq!(parse_line(r#"a,"",b"#), vec!["a", "", "b"]);
    }

    #[test]
    fn test_parse_line_unterminated_quote_takes_rest_of_line() {
        assert_eq!(parse_line(r#"Milk,"Dairy, Eggs,true"#), vec!["Milk", "Dairy, Eggs,true"]);
    }

    #[test]
    fn test_parse_line_keeps_bare_carriage_return() {
        assert_eq!(parse_line("Milk\rx,Dairy,true"), vec!["Milk\rx", "Dairy", "true"]);
    }

    #[test]
    fn test_import_staples_row_with_inner_carriage_return_is_not_truncated() {
        let db = Database::open_in_memory().unwrap();
        let summary = import_staples(&db, "name,sector,is_default\nOat\rMilk,Dairy & Eggs,true\n").unwrap();
        assert_eq!(summary.imported, 1);
        let staple = db.get_staple_by_name("Oat\rMilk").unwrap().unwrap();
        assert_eq!(staple.sector_label(), "Dairy & Eggs");
        assert!(staple.is_default);
    }

    #[test]
    fn test_encode_row_quotes_only_when_needed() {
        assert_eq!(
            encode_row(&["plain", "a,b", "6\" pan", "line\nbreak", ""]).unwrap(),
            "plain,\"a,b\",\"6\"\" pan\",\"line\nbreak\","
        );
    }

    #[test]
    fn test_encode_then_parse_restores_field() {
        let original = "Stir, then say \"done\"\nServe";
        let encoded = encode_row(&[original, "x"]).unwrap();
        // a single physical line keeps the embedded newline
        assert_eq!(parse_line(&encoded), vec![original, "x"]);
    }

    #[test]
    fn test_table_requires_data_rows() {
        let err = CsvTable::parse("name,sector,is_default\n\n").unwrap_err();
        assert_eq!(err.to_string(), "CSV file is empty or has no data rows");
        assert!(CsvTable::parse("").is_err());
    }

    #[test]
    fn test_table_header_is_case_insensitive() {
        let table = CsvTable::parse("Name, Sector\r\nMilk,Dairy\r\n").unwrap();
        assert_eq!(table.column("sector").unwrap(), 1);
        assert_eq!(table.rows()[0], vec!["Milk", "Dairy"]);
        let err = table.column("is_default").unwrap_err();
        assert_eq!(err.to_string(), "Missing required column: is_default");
    }

    #[test]
    fn test_import_staple_example() {
        let db = Database::open_in_memory().unwrap();
        let summary = import_staples(&db, "name,sector,is_default\nMilk,\"Dairy & Eggs\",true\n").unwrap();
        assert_eq!(summary, ImportSummary { imported: 1, updated: 0 });

        let staples = db.list_staples().unwrap();
        assert_eq!(staples.len(), 1);
        assert_eq!(staples[0].name, "Milk");
        assert_eq!(staples[0].sector_label(), "Dairy & Eggs");
        assert!(staples[0].is_default);
    }

    #[test]
    fn test_reimport_unchanged_staples_is_a_no_op() {
        let db = Database::open_in_memory().unwrap();
        let csv = "name,sector,is_default\nMilk,Dairy & Eggs,true\nFoil,Household,false\n";
        import_staples(&db, csv).unwrap();
        let second = import_staples(&db, csv).unwrap();
        assert_eq!(second, ImportSummary::default());
        assert_eq!(second.message("Staples"), "Staples: No changes needed");
    }

    #[test]
    fn test_import_staples_updates_changed_rows_and_skips_blanks() {
        let db = Database::open_in_memory().unwrap();
        import_staples(&db, "name,sector,is_default\nMilk,Dairy & Eggs,true\n").unwrap();
        let summary = import_staples(
            &db,
            "name,sector,is_default\nMilk,Dairy & Eggs,false\n,Dairy & Eggs,true\nBread,,true\n",
        )
        .unwrap();
        assert_eq!(summary, ImportSummary { imported: 0, updated: 1 });
        assert!(!db.get_staple_by_name("Milk").unwrap().unwrap().is_default);
        assert_eq!(db.list_staples().unwrap().len(), 1);
    }

    #[test]
    fn test_import_staples_missing_column_writes_nothing() {
        let db = Database::open_in_memory().unwrap();
        let sectors_before = db.list_sectors().unwrap().len();
        let err = import_staples(&db, "name,is_default\nMilk,true\n").unwrap_err();
        assert_eq!(err.to_string(), "Missing required column: sector");
        assert!(db.list_staples().unwrap().is_empty());
        assert_eq!(db.list_sectors().unwrap().len(), sectors_before);
    }

    const RECIPES: &str = "recipe_name,recipe_image_url,recipe_instructions,ingredient_name,ingredient_sector,quantity,unit
Bolognese,,\"Brown the mince, add sauce\",Beef Mince,Meat & Seafood,500,g
Bolognese,,,Spaghetti,Pantry & Canned Goods,400,g
Bolognese,,,Tomato Sauce,Pantry & Canned Goods,400,ml
Toast,https://example.com/toast.jpg,,,,,
";

    #[test]
    fn test_import_recipes_creates_recipes_and_ingredients() {
        let db = Database::open_in_memory().unwrap();
        let summary = import_recipes(&db, RECIPES).unwrap();
        assert_eq!(summary, ImportSummary { imported: 2, updated: 0 });

        let bolognese = db.get_recipe_by_name("Bolognese").unwrap().unwrap();
        assert_eq!(bolognese.instructions.as_deref(), Some("Brown the mince, add sauce"));
        assert_eq!(bolognese.ingredients.len(), 3);
        assert_eq!(bolognese.ingredients[0].sector_label(), "Meat & Seafood");
        assert_eq!(bolognese.ingredients[2].unit.as_deref(), Some("ml"));

        let toast = db.get_recipe_by_name("Toast").unwrap().unwrap();
        assert!(toast.ingredients.is_empty());
        assert_eq!(toast.image_url.as_deref(), Some("https://example.com/toast.jpg"));
    }

    #[test]
    fn test_reimport_unchanged_recipes_performs_no_writes() {
        let db = Database::open_in_memory().unwrap();
        import_recipes(&db, RECIPES).unwrap();
        let before = db.get_recipe_by_name("Bolognese").unwrap().unwrap();

        let second = import_recipes(&db, RECIPES).unwrap();
        assert_eq!(second, ImportSummary::default());

        let after = db.get_recipe_by_name("Bolognese").unwrap().unwrap();
        assert_eq!(after.updated_at, before.updated_at);
        let ids_before: Vec<i64> = before.ingredients.iter().map(|ri| ri.id).collect();
        let ids_after: Vec<i64> = after.ingredients.iter().map(|ri| ri.id).collect();
        assert_eq!(ids_before, ids_after);
    }

    #[test]
    fn test_reimport_changed_quantity_replaces_ingredients() {
        let db = Database::open_in_memory().unwrap();
        import_recipes(&db, RECIPES).unwrap();
        let changed = RECIPES.replace("Spaghetti,Pantry & Canned Goods,400,g", "Spaghetti,Pantry & Canned Goods,500,g");
        let summary = import_recipes(&db, &changed).unwrap();
        assert_eq!(summary, ImportSummary { imported: 0, updated: 1 });
        let bolognese = db.get_recipe_by_name("Bolognese").unwrap().unwrap();
        let spaghetti = bolognese
            .ingredients
            .iter()
            .find(|ri| ri.ingredient_name == "Spaghetti")
            .unwrap();
        assert_eq!(spaghetti.quantity.as_deref(), Some("500"));
    }

    #[test]
    fn test_import_moves_ingredient_to_csv_sector() {
        let db = Database::open_in_memory().unwrap();
        let onion = db.create_ingredient("Onion", None).unwrap();
        import_recipes(
            &db,
            "recipe_name,ingredient_name,ingredient_sector\nSoup,onion,Fresh Produce\nSoup,Stock,\n",
        )
        .unwrap();
        let onion = db.get_ingredient(onion.id).unwrap();
        assert_eq!(onion.sector_label(), "Fresh Produce");
        let soup = db.get_recipe_by_name("Soup").unwrap().unwrap();
        assert_eq!(soup.ingredients[0].ingredient_id, onion.id);
        // blank sector lands in an "Other" sector created on demand
        assert_eq!(soup.ingredients[1].sector_label(), "Other");
        assert!(db.find_sector_by_name("Other").unwrap().is_some());
    }

    #[test]
    fn test_import_recipes_accepts_legacy_header() {
        let db = Database::open_in_memory().unwrap();
        let csv = format!(
            "{LEGACY_RECIPE_HEADER}
\"Spaghetti Bolognese\",\"Ground Beef\",\"Meat & Seafood\",500,g,\"Cook pasta...\",
\"Spaghetti Bolognese\",\"Spaghetti\",\"Pantry & Canned Goods\",400,g,,
"
        );
        let summary = import_recipes(&db, &csv).unwrap();
        assert_eq!(summary.imported, 1);
        let recipe = db.get_recipe_by_name("Spaghetti Bolognese").unwrap().unwrap();
        assert_eq!(recipe.instructions.as_deref(), Some("Cook pasta..."));
        assert_eq!(recipe.ingredients.len(), 2);
    }

    #[test]
    fn test_import_recipes_missing_column_writes_nothing() {
        let db = Database::open_in_memory().unwrap();
        let err = import_recipes(&db, "recipe_name,ingredient_name\nSoup,Onion\n").unwrap_err();
        assert_eq!(err.to_string(), "Missing required column: ingredient_sector");
        assert!(db.list_recipes().unwrap().is_empty());
        assert!(db.list_ingredients().unwrap().is_empty());
    }

    #[test]
    fn test_export_recipes_round_trips_through_import() {
        let db = Database::open_in_memory().unwrap();
        import_recipes(&db, RECIPES).unwrap();
        let exported = export_recipes(&db).unwrap();
        assert!(exported.starts_with(RECIPE_HEADER));
        assert!(exported.contains("\"Brown the mince, add sauce\""));
        assert!(exported.ends_with("Toast,https://example.com/toast.jpg,,,,,"));

        let fresh = Database::open_in_memory().unwrap();
        assert_eq!(import_recipes(&fresh, &exported).unwrap().imported, 2);
        assert_eq!(import_recipes(&db, &exported).unwrap(), ImportSummary::default());
    }

    #[test]
    fn test_export_staples() {
        let db = Database::open_in_memory().unwrap();
        import_staples(&db, "name,sector,is_default\nMilk,Dairy & Eggs,true\nBread,Bakery & Bread,\n").unwrap();
        assert_eq!(
            export_staples(&db).unwrap(),
            "name,sector,is_default\nBread,Bakery & Bread,false\nMilk,Dairy & Eggs,true"
        );
    }

    #[test]
    fn test_export_filename() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        assert_eq!(export_filename("staples", date), "staples-export-2026-10-19.csv");
    }
}
