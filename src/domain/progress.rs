//! Persistent crawl checkpoint state.
//!
//! A category id lives in at most one of the two collections: it is either
//! still being drained (`category_pages` holds its resume cursor) or done
//! (`completed_categories`).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlProgress {
    #[serde(default)]
    pub completed_categories: BTreeSet<i64>,
    /// Next page to fetch for each category that is not yet complete.
    #[serde(default)]
    pub category_pages: BTreeMap<i64, u32>,
}

impl CrawlProgress {
    pub fn is_completed(&self, category_id: i64) -> bool {
        self.completed_categories.contains(&category_id)
    }

    pub fn next_page(&self, category_id: i64) -> Option<u32> {
        self.category_pages.get(&category_id).copied()
    }

    /// Page a run should start from for this category.
    pub fn resume_page(&self, category_id: i64) -> u32 {
        self.next_page(category_id).unwrap_or(1).max(1)
    }

    /// Moves the cursor forward. Returns whether anything changed; a cursor
    /// never moves backwards and a completed category is left alone.
    pub fn advance(&mut self, category_id: i64, next_page: u32) -> bool {
        if self.is_completed(category_id) {
            return false;
        }
        match self.category_pages.get(&category_id) {
            Some(&current) if current >= next_page => false,
            _ => {
                self.category_pages.insert(category_id, next_page);
                true
            }
        }
    }

    /// Marks the category drained. Returns whether anything changed.
    pub fn complete(&mut self, category_id: i64) -> bool {
        let removed = self.category_pages.remove(&category_id).is_some();
        let inserted = self.completed_categories.insert(category_id);
        removed || inserted
    }

    /// Repairs a hand-edited file where a completed id still has a cursor.
    pub fn normalize(&mut self) {
        let completed = &self.completed_categories;
        self.category_pages.retain(|id, _| !completed.contains(id));
    }
}
