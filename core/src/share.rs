use std::fmt::Write;

use crate::grid::GridCell;

pub const DEFAULT_SUBJECT: &str = "Shopping List";

/// Plain-text checklist of the non-empty cells, in grid order.
#[must_use]
pub fn render_text(name: Option<&str>, cells: &[GridCell]) -> String {
    let mut text = String::from("🛒 Shopping List");
    if let Some(name) = name.filter(|n| !n.trim().is_empty()) {
        let _ = write!(text, " - {name}");
    }
    text.push_str("\n\n");

    for cell in cells.iter().filter(|c| !c.is_empty()) {
        let _ = writeln!(text, "📍 {}", cell.sector);
        for item in &cell.items {
            match item.quantity.as_deref().filter(|q| !q.is_empty()) {
                Some(quantity) => {
                    let _ = writeln!(text, "  ☐ {} ({quantity})", item.name);
                }
                None => {
                    let _ = writeln!(text, "  ☐ {}", item.name);
                }
            }
        }
        text.push('\n');
    }
    text
}

#[must_use]
pub fn whatsapp_link(text: &str) -> String {
    format!("https://wa.me/?text={}", urlencoding::encode(text))
}

#[must_use]
pub fn mailto_link(subject: Option<&str>, body: &str) -> String {
    let subject = subject
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(DEFAULT_SUBJECT);
    format!(
        "mailto:?subject={}&body={}",
        urlencoding::encode(subject),
        urlencoding::encode(body)
    )
}
