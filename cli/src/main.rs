mod commands;
mod config;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

use crate::commands::{
    BulkKind, cmd_export, cmd_history_complete, cmd_history_delete, cmd_history_list,
    cmd_import, cmd_ingredient_list, cmd_list_check, cmd_list_generate, cmd_list_rename,
    cmd_list_set_all, cmd_list_share, cmd_list_show, cmd_list_update, cmd_recipe_add,
    cmd_recipe_delete, cmd_recipe_edit, cmd_recipe_list, cmd_recipe_show, cmd_sector_add,
    cmd_sector_delete, cmd_sector_list, cmd_sector_move, cmd_sector_rename, cmd_staple_add,
    cmd_staple_delete, cmd_staple_edit, cmd_staple_list,
};
use crate::config::Config;
use trolley_core::db::Database;

#[derive(Parser)]
#[command(
    name = "trolley",
    version,
    about = "Plan meals and build sector-sorted shopping lists",
    long_about = "\n\n  ┌─┐  trolley\n  └┬┘  recipes in, one tidy shopping list out.\n   ○○\n"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage store sectors (aisles) and their grid layout
    Sector {
        #[command(subcommand)]
        command: SectorCommands,
    },
    /// Browse ingredients
    Ingredient {
        #[command(subcommand)]
        command: IngredientCommands,
    },
    /// Manage recipes
    Recipe {
        #[command(subcommand)]
        command: RecipeCommands,
    },
    /// Manage staple items bought regardless of recipes
    Staple {
        #[command(subcommand)]
        command: StapleCommands,
    },
    /// Build, view and tick off shopping lists
    List {
        #[command(subcommand)]
        command: ListCommands,
    },
    /// Saved shopping lists
    History {
        #[command(subcommand)]
        command: HistoryCommands,
    },
    /// Import recipes or staples from CSV
    Import {
        /// What the file contains
        #[arg(value_enum)]
        kind: BulkKind,
        /// Path to the CSV file
        file: PathBuf,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Export recipes or staples to CSV
    Export {
        /// What to export
        #[arg(value_enum)]
        kind: BulkKind,
        /// Output file ("-" for stdout, default: <kind>-export-<date>.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Start the REST API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
        /// Disable API key authentication (for development/testing)
        #[arg(long)]
        no_auth: bool,
    },
}

#[derive(Subcommand)]
enum SectorCommands {
    /// List sectors in display order
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add a sector at the next grid slot
    Add {
        /// Sector name
        name: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Rename a sector
    Rename {
        /// Sector id or name
        sector: String,
        /// New name
        name: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Move a sector to a new position (1 = first)
    Move {
        /// Sector id or name
        sector: String,
        /// New position
        position: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a sector (its items fall back to Other)
    Delete {
        /// Sector id or name
        sector: String,
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum IngredientCommands {
    /// List all ingredients with their sector
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum RecipeCommands {
    /// List recipes, optionally only those using every given ingredient
    List {
        /// Ingredient the recipe must contain (repeatable)
        #[arg(short, long = "ingredient")]
        ingredients: Vec<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a recipe
    Show {
        /// Recipe id or name
        recipe: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add a recipe
    Add {
        /// Recipe name
        name: String,
        /// Image URL
        #[arg(long)]
        image: Option<String>,
        /// Cooking instructions
        #[arg(long)]
        instructions: Option<String>,
        /// Ingredient as NAME, NAME=QTY or NAME=QTY:UNIT (repeatable)
        #[arg(short, long = "ingredient")]
        ingredients: Vec<String>,
        /// Sector for ingredients not seen before
        #[arg(long)]
        sector: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Edit a recipe; any --ingredient replaces the full ingredient list
    Edit {
        /// Recipe id or name
        recipe: String,
        /// New name
        #[arg(long)]
        name: Option<String>,
        /// Image URL
        #[arg(long)]
        image: Option<String>,
        /// Cooking instructions
        #[arg(long)]
        instructions: Option<String>,
        /// Ingredient as NAME, NAME=QTY or NAME=QTY:UNIT (repeatable)
        #[arg(short, long = "ingredient")]
        ingredients: Vec<String>,
        /// Sector for ingredients not seen before
        #[arg(long)]
        sector: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a recipe
    Delete {
        /// Recipe id or name
        recipe: String,
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum StapleCommands {
    /// List staples
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add a staple
    Add {
        /// Staple name
        name: String,
        /// Sector id or name
        #[arg(short, long)]
        sector: String,
        /// Select this staple by default for new lists
        #[arg(long)]
        default: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Edit a staple
    Edit {
        /// Staple id or name
        staple: String,
        /// New name
        #[arg(long)]
        name: Option<String>,
        /// Sector id or name
        #[arg(short, long)]
        sector: Option<String>,
        /// Select by default (true/false)
        #[arg(long)]
        default: Option<bool>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a staple
    Delete {
        /// Staple id or name
        staple: String,
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ListCommands {
    /// Generate a new list from recipes and staples
    Generate {
        /// Recipe id or name (repeatable)
        #[arg(short, long = "recipe")]
        recipes: Vec<String>,
        /// Staple id or name (repeatable, default: staples marked default)
        #[arg(short, long = "staple")]
        staples: Vec<String>,
        /// Do not pre-select default staples
        #[arg(long)]
        no_default_staples: bool,
        /// List name (default: "Shopping List - <date>")
        #[arg(short, long)]
        name: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Rebuild an existing list from a new selection
    Update {
        /// List id
        list: i64,
        /// Recipe id or name (repeatable)
        #[arg(short, long = "recipe")]
        recipes: Vec<String>,
        /// Staple id or name (repeatable, default: staples marked default)
        #[arg(short, long = "staple")]
        staples: Vec<String>,
        /// Do not pre-select default staples
        #[arg(long)]
        no_default_staples: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a list in sector grid order (default: most recent)
    Show {
        /// List id
        list: Option<i64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Toggle an item's checked state
    Check {
        /// Item id or name
        item: String,
        /// List id (default: most recent)
        #[arg(short, long)]
        list: Option<i64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check every item
    CheckAll {
        /// List id (default: most recent)
        list: Option<i64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Uncheck every item
    Clear {
        /// List id (default: most recent)
        list: Option<i64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Rename a list
    Rename {
        /// List id
        list: i64,
        /// New name
        name: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the list as shareable text with WhatsApp and email links
    Share {
        /// List id (default: most recent)
        list: Option<i64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum HistoryCommands {
    /// Show saved lists, newest first
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Mark a list as completed
    Complete {
        /// List id
        list: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a list
    Delete {
        /// List id
        list: i64,
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// `RUST_LOG` wins; otherwise `default` for our crates.
fn init_tracing(default: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let default_filter = if matches!(cli.command, Commands::Serve { .. }) {
        "info"
    } else {
        "warn"
    };
    init_tracing(default_filter);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

#[allow(clippy::too_many_lines)]
async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let db = Database::open(&config.db_path)?;

    match cli.command {
        Commands::Sector { command } => match command {
            SectorCommands::List { json } => cmd_sector_list(&db, json),
            SectorCommands::Add { name, json } => cmd_sector_add(&db, &name, json),
            SectorCommands::Rename { sector, name, json } => {
                cmd_sector_rename(&db, &sector, &name, json)
            }
            SectorCommands::Move {
                sector,
                position,
                json,
            } => cmd_sector_move(&db, &sector, position, json),
            SectorCommands::Delete { sector, yes, json } => {
                cmd_sector_delete(&db, &sector, yes, json)
            }
        },
        Commands::Ingredient { command } => match command {
            IngredientCommands::List { json } => cmd_ingredient_list(&db, json),
        },
        Commands::Recipe { command } => match command {
            RecipeCommands::List { ingredients, json } => cmd_recipe_list(&db, &ingredients, json),
            RecipeCommands::Show { recipe, json } => cmd_recipe_show(&db, &recipe, json),
            RecipeCommands::Add {
                name,
                image,
                instructions,
                ingredients,
                sector,
                json,
            } => cmd_recipe_add(
                &db,
                &name,
                image,
                instructions,
                &ingredients,
                sector.as_deref(),
                json,
            ),
            RecipeCommands::Edit {
                recipe,
                name,
                image,
                instructions,
                ingredients,
                sector,
                json,
            } => cmd_recipe_edit(
                &db,
                &recipe,
                name,
                image,
                instructions,
                &ingredients,
                sector.as_deref(),
                json,
            ),
            RecipeCommands::Delete { recipe, yes, json } => {
                cmd_recipe_delete(&db, &recipe, yes, json)
            }
        },
        Commands::Staple { command } => match command {
            StapleCommands::List { json } => cmd_staple_list(&db, json),
            StapleCommands::Add {
                name,
                sector,
                default,
                json,
            } => cmd_staple_add(&db, &name, &sector, default, json),
            StapleCommands::Edit {
                staple,
                name,
                sector,
                default,
                json,
            } => cmd_staple_edit(&db, &staple, name, sector.as_deref(), default, json),
            StapleCommands::Delete { staple, yes, json } => {
                cmd_staple_delete(&db, &staple, yes, json)
            }
        },
        Commands::List { command } => match command {
            ListCommands::Generate {
                recipes,
                staples,
                no_default_staples,
                name,
                json,
            } => cmd_list_generate(
                &db,
                &recipes,
                &staples,
                no_default_staples,
                name.as_deref(),
                json,
            ),
            ListCommands::Update {
                list,
                recipes,
                staples,
                no_default_staples,
                json,
            } => cmd_list_update(&db, list, &recipes, &staples, no_default_staples, json),
            ListCommands::Show { list, json } => cmd_list_show(&db, list, json),
            ListCommands::Check { item, list, json } => cmd_list_check(&db, list, &item, json),
            ListCommands::CheckAll { list, json } => cmd_list_set_all(&db, list, true, json),
            ListCommands::Clear { list, json } => cmd_list_set_all(&db, list, false, json),
            ListCommands::Rename { list, name, json } => cmd_list_rename(&db, list, &name, json),
            ListCommands::Share { list, json } => cmd_list_share(&db, list, json),
        },
        Commands::History { command } => match command {
            HistoryCommands::List { json } => cmd_history_list(&db, json),
            HistoryCommands::Complete { list, json } => cmd_history_complete(&db, list, json),
            HistoryCommands::Delete { list, yes, json } => {
                cmd_history_delete(&db, list, yes, json)
            }
        },
        Commands::Import { kind, file, json } => cmd_import(&db, kind, &file, json),
        Commands::Export { kind, output, json } => cmd_export(&db, kind, output, json),
        Commands::Serve {
            port,
            bind,
            no_auth,
        } => {
            let (api_key, new_api_key) = if no_auth {
                (None, false)
            } else {
                let (key, new) = config.load_or_create_api_key()?;
                (Some(key), new)
            };
            server::start_server(db, port, &bind, api_key, new_api_key).await
        }
    }
}
