use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;

use trolley_core::bulk;
use trolley_core::db::Database;

use super::helpers::read_input;

#[derive(Clone, Copy, PartialEq, Eq, Debug, clap::ValueEnum)]
pub(crate) enum BulkKind {
    Recipes,
    Staples,
}

impl BulkKind {
    fn label(self) -> &'static str {
        match self {
            Self::Recipes => "Recipes",
            Self::Staples => "Staples",
        }
    }

    fn file_stem(self) -> &'static str {
        match self {
            Self::Recipes => "recipes",
            Self::Staples => "staples",
        }
    }
}

pub(crate) fn cmd_import(db: &Database, kind: BulkKind, file: &Path, json: bool) -> Result<()> {
    let text = read_input(file)?;
    let summary = match kind {
        BulkKind::Recipes => bulk::import_recipes(db, &text),
        BulkKind::Staples => bulk::import_staples(db, &text),
    }
    .with_context(|| format!("Failed to import {}", kind.file_stem()))?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "imported": summary.imported,
                "updated": summary.updated,
                "message": summary.message(kind.label()),
            })
        );
    } else {
        println!("{}", summary.message(kind.label()));
    }
    Ok(())
}

/// Write the export to `output`, `-` for stdout, or the dated default filename.
pub(crate) fn cmd_export(
    db: &Database,
    kind: BulkKind,
    output: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let csv = match kind {
        BulkKind::Recipes => bulk::export_recipes(db)?,
        BulkKind::Staples => bulk::export_staples(db)?,
    };
    let rows = csv.lines().count().saturating_sub(1);

    if output.as_deref() == Some(Path::new("-")) {
        println!("{csv}");
        return Ok(());
    }
    let path = output.unwrap_or_else(|| {
        PathBuf::from(bulk::export_filename(
            kind.file_stem(),
            Local::now().date_naive(),
        ))
    });
    write_export(&path, &csv)?;

    if json {
        println!(
            "{}",
            serde_json::json!({ "path": path.display().to_string(), "rows": rows })
        );
    } else {
        println!("Exported {rows} {} row(s) to {}", kind.file_stem(), path.display());
    }
    Ok(())
}

fn write_export(path: &Path, csv: &str) -> Result<()> {
    std::fs::write(path, csv).with_context(|| format!("Failed to write {}", path.display()))
}
