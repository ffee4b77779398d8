use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::registry::SiteAdapter;

/// Cell texts of one matched row, in column order.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct RawRow {
    pub cells: Vec<String>,
}

impl RawRow {
    pub fn new<I, S>(cells: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cells: cells.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardRecord {
    /// Kept as text: sites emit suffixes, "N/A" and localized numbers.
    pub rank: String,
    pub player_name: String,
    pub player_stat: String,
}

/// Collapse runs of whitespace the way rendered `innerText` reads.
pub fn clean_cell(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Map raw rows to records in page order. Rows too short for the adapter's
/// extraction rule are dropped before the `limit` is applied.
pub fn normalize(adapter: &SiteAdapter, rows: &[RawRow], limit: usize) -> Vec<LeaderboardRecord> {
    let min_cells = adapter.required_cells();
    rows.iter()
        .filter(|row| row.cells.len() >= min_cells)
        .take(limit)
        .map(|row| LeaderboardRecord {
            rank: row.cells[adapter.rank_cell].clone(),
            player_name: row.cells[adapter.name_cell].clone(),
            player_stat: adapter.stat.render(&row.cells),
        })
        .collect()
}
