use serde::{Deserialize, Serialize};

use crate::builder::{GeneratedItem, GeneratedList};
use crate::models::{OTHER_SECTOR, Sector};

/// One sector slot of the display grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridCell {
    pub sector: String,
    pub grid_row: i64,
    pub grid_column: i64,
    pub items: Vec<GeneratedItem>,
}

impl GridCell {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub checked: usize,
    pub total: usize,
    pub percent: u32,
}

impl Progress {
    #[must_use]
    pub fn of(items: &[GeneratedItem]) -> Self {
        let checked = items.iter().filter(|i| i.is_checked).count();
        Self::from_counts(checked, items.len())
    }

    #[must_use]
    pub fn from_counts(checked: usize, total: usize) -> Self {
        let percent = if total == 0 {
            0
        } else {
            (checked as f64 * 100.0 / total as f64).round() as u32
        };
        Self {
            checked,
            total,
            percent,
        }
    }
}

/// Place the list's sector groups on the sector grid, in (row, column) order.
/// Every sector gets a cell even when empty. Groups naming no known sector are
/// collected into the "Other" cell, appended below the grid if no sector has
/// that name.
#[must_use]
pub fn layout(sectors: &[Sector], list: &GeneratedList) -> Vec<GridCell> {
    let mut ordered: Vec<&Sector> = sectors.iter().collect();
    ordered.sort_by_key(|s| (s.grid_row, s.grid_column, s.display_order));

    let mut cells: Vec<GridCell> = ordered
        .iter()
        .map(|s| GridCell {
            sector: s.name.clone(),
            grid_row: s.grid_row,
            grid_column: s.grid_column,
            items: Vec::new(),
        })
        .collect();

    let mut leftovers = Vec::new();
    for group in &list.grouped {
        match cells.iter_mut().find(|c| c.sector == group.sector) {
            Some(cell) => cell.items.extend(group.items.iter().cloned()),
            None => leftovers.extend(group.items.iter().cloned()),
        }
    }

    if !leftovers.is_empty() {
        if let Some(other) = cells.iter_mut().find(|c| c.sector == OTHER_SECTOR) {
            other.items.extend(leftovers);
        } else {
            let next_row = cells.iter().map(|c| c.grid_row).max().unwrap_or(0) + 1;
            cells.push(GridCell {
                sector: OTHER_SECTOR.to_string(),
                grid_row: next_row,
                grid_column: 1,
                items: leftovers,
            });
        }
    }
    cells
}

/// Split cells into display rows by `grid_row`.
#[must_use]
pub fn rows(cells: &[GridCell]) -> Vec<Vec<&GridCell>> {
    let mut rows: Vec<Vec<&GridCell>> = Vec::new();
    for cell in cells {
        match rows.last_mut() {
            Some(row) if row[0].grid_row == cell.grid_row => row.push(cell),
            _ => rows.push(vec![cell]),
        }
    }
    rows
}
