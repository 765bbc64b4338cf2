//! Plain-text rendering of mutation reports and listings.

use std::fmt::Write;

use crate::models::{CallbackData, Category, MutationReport, SelectableAction};
use crate::pager::{Listing, Page};

/// Text shown for a listing with no patterns.
pub const NO_RESULTS: &str = "No results";

/// Render a mutation report as labelled lines.
pub fn render_report(report: &MutationReport) -> String {
    let mut text = format!("Status: {}\n", report.status.as_str());

    if let Some(category) = report.category {
        let _ = writeln!(text, "Category: {}", category.display_name());
    }
    if let Some(pattern) = &report.pattern {
        let _ = writeln!(text, "Pattern: {}", pattern);
    }
    if let Some(reason) = &report.reason {
        let _ = writeln!(text, "Reason: {}", reason);
    }
    if !report.conflicts.is_empty() {
        text.push_str("Conflicts:\n");
        for conflict in &report.conflicts {
            let _ = writeln!(text, "  - {}", conflict);
        }
    }
    if !report.replaced.is_empty() {
        text.push_str("Replaced:\n");
        for old in &report.replaced {
            let _ = writeln!(text, "  - {}", old);
        }
    }
    if let Some(token) = &report.token {
        let _ = writeln!(text, "Token: {}", token);
    }

    text.trim_end().to_string()
}

/// Render one listing page. Returns the text and the total page count.
pub fn render_listing(category: Category, listing: &Listing<String>) -> (String, usize) {
    let mut text = format!("Category: {}\n", category.display_name());

    match listing {
        Listing::Empty => text.push_str(NO_RESULTS),
        Listing::Page(page) => {
            let _ = writeln!(
                text,
                "Page {}/{} ({} patterns)\n",
                page.page, page.page_count, page.total
            );
            for pattern in &page.items {
                let _ = writeln!(text, "{}", pattern);
            }
        }
    }

    (text.trim_end().to_string(), listing.page_count())
}

/// Navigation actions for a multi-page listing; none for a single page.
pub fn listing_actions(category: Category, page: &Page<String>) -> Vec<SelectableAction> {
    if page.page_count <= 1 {
        return Vec::new();
    }

    let goto = |label: String, target: usize| {
        SelectableAction::new(
            label,
            CallbackData::new(
                "list",
                Some(category.as_str()),
                Some(serde_json::json!(target)),
            ),
        )
    };

    let mut actions = Vec::new();
    if page.has_previous() {
        actions.push(goto("<<".to_string(), page.page - 1));
    }
    actions.push(SelectableAction::new(
        format!("Page {}", page.page),
        CallbackData::new("none", None, None),
    ));
    if page.has_next() {
        actions.push(goto(">>".to_string(), page.page + 1));
    }
    actions
}
