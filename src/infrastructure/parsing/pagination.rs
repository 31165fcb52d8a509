//! Page count detection.
//!
//! Listing pages link to their siblings as `.../page__N/`; the largest `N`
//! on any page of a category is its last page.

use regex::Regex;
use std::sync::LazyLock;

static PAGE_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"page__\s*([0-9]{1,9})").expect("page marker pattern is valid"));

/// Largest page number referenced in the markup, if any.
pub fn max_page_marker(html: &str) -> Option<u32> {
    PAGE_MARKER
        .captures_iter(html)
        .filter_map(|caps| caps[1].parse::<u32>().ok())
        .max()
}

/// Number of listing pages a category has, judged from one of its pages.
///
/// `0` means the category is empty: no markers and no listing cards.
/// A page with cards but no markers is the only page.
pub fn total_pages(html: &str, raw_items: usize) -> u32 {
    match max_page_marker(html) {
        Some(max) => max.max(1),
        None if raw_items > 0 => 1,
        None => 0,
    }
}
