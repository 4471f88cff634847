//! Server-side table queries over a frozen dataset snapshot.
//!
//! Paging, ordering and searching all operate on a session's view value, so page
//! boundaries stay consistent until the session refreshes.

use std::cmp::Reverse;

use serde::{Deserialize, Serialize};

use crate::domain::dataset::{Dataset, Row, cell_text};
use crate::domain::error::DomainError;

/// Columns carrying links rather than searchable text.
const UNSEARCHABLE_COLUMNS: &[&str] = &["url"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortOrder {
    pub column: String,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableQuery {
    /// Echoed back so the client can discard out-of-order responses.
    pub draw: u64,
    pub start: usize,
    /// Page size; `None` returns every row from `start`.
    pub length: Option<usize>,
    pub search: Option<String>,
    pub order: Option<SortOrder>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TablePage {
    pub draw: u64,
    pub records_total: usize,
    pub records_filtered: usize,
    pub data: Vec<Row>,
}

impl TableQuery {
    pub fn apply(&self, dataset: &Dataset) -> Result<TablePage, DomainError> {
        if let Some(order) = self.order.as_ref().filter(|o| !dataset.has_column(&o.column)) {
            return Err(DomainError::validation(format!(
                "unknown order column `{}`",
                order.column
            )));
        }

        let words = search_words(self.search.as_deref());
        let searchable: Vec<&str> = dataset
            .columns
            .iter()
            .map(String::as_str)
            .filter(|column| !UNSEARCHABLE_COLUMNS.contains(column))
            .collect();

        let mut filtered: Vec<&Row> = dataset
            .rows
            .iter()
            .filter(|row| matches_all(row, &searchable, &words))
            .collect();

        if let Some(order) = &self.order {
            // Both directions are stable: tied rows keep their snapshot order.
            let sort_key = |row: &&Row| cell_text(row, &order.column).to_lowercase();
            match order.direction {
                SortDirection::Asc => filtered.sort_by_cached_key(sort_key),
                SortDirection::Desc => filtered.sort_by_cached_key(|row| Reverse(sort_key(row))),
            }
        }

        let records_filtered = filtered.len();
        let data = filtered
            .into_iter()
            .skip(self.start)
            .take(self.length.unwrap_or(usize::MAX))
            .cloned()
            .collect();

        Ok(TablePage {
            draw: self.draw,
            records_total: dataset.len(),
            records_filtered,
            data,
        })
    }
}

fn search_words(search: Option<&str>) -> Vec<String> {
    search
        .unwrap_or_default()
        .split_whitespace()
        .map(str::to_lowercase)
        .collect()
}

fn matches_all(row: &Row, columns: &[&str], words: &[String]) -> bool {
    if words.is_empty() {
        return true;
    }
    let haystack = columns
        .iter()
        .map(|column| cell_text(row, column))
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    words.iter().all(|word| haystack.contains(word.as_str()))
}
