//! Resume cursor for one category's pages.
//!
//! Pages finish in any order. The cursor is the lowest page that has not
//! finished yet (or one past the last page when all have), so a restart from
//! it never skips unfinished work. Failed pages stay unfinished.

use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    unfinished: BTreeSet<u32>,
    failed: BTreeSet<u32>,
    past_last: u32,
    reported: u32,
}

impl PageCursor {
    /// Tracks pages `first..=last`.
    pub fn new(first: u32, last: u32) -> Self {
        let last = last.max(first);
        Self {
            unfinished: (first..=last).collect(),
            failed: BTreeSet::new(),
            past_last: last.saturating_add(1),
            reported: first,
        }
    }

    /// Page a restart should begin with.
    pub fn position(&self) -> u32 {
        self.unfinished
            .first()
            .copied()
            .unwrap_or(self.past_last)
            .max(self.reported)
    }

    /// Records a processed page. Returns the new position when it moved.
    pub fn finish(&mut self, page: u32) -> Option<u32> {
        self.unfinished.remove(&page);
        self.failed.remove(&page);
        self.report()
    }

    /// Records a page that will have to be retried by a later run.
    pub fn fail(&mut self, page: u32) {
        if self.unfinished.contains(&page) {
            self.failed.insert(page);
        }
    }

    /// The listing ends at `page`; nothing above it needs fetching.
    pub fn end_at(&mut self, page: u32) -> Option<u32> {
        let above = page.saturating_add(1);
        self.unfinished.split_off(&above);
        self.failed.split_off(&above);
        self.past_last = self.past_last.min(above);
        self.finish(page)
    }

    pub fn failed_pages(&self) -> impl Iterator<Item = u32> + '_ {
        self.failed.iter().copied()
    }

    /// Every page is processed.
    pub fn is_drained(&self) -> bool {
        self.unfinished.is_empty()
    }

    fn report(&mut self) -> Option<u32> {
        let position = self.position();
        if position > self.reported {
            self.reported = position;
            Some(position)
        } else {
            None
        }
    }
}
