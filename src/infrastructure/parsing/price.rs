//! Price normalization from free text.
//!
//! Finds the first digit run, allowing spaces and non-breaking spaces as
//! thousands separators, optionally followed by a two-digit fraction after
//! `.` or `,`. Anything else after the digits is ignored.

use regex::Regex;
use std::sync::LazyLock;

use crate::domain::Price;

static PRICE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([0-9][0-9\s\u{00A0}]*)(?:[.,]([0-9]{2}))?").expect("price pattern is valid")
});

/// Parses the first price-looking number in `text`; `None` when there is none.
pub fn normalize_price(text: &str) -> Option<Price> {
    let captures = PRICE_PATTERN.captures(text)?;
    let whole: String = captures
        .get(1)?
        .as_str()
        .chars()
        .filter(char::is_ascii_digit)
        .collect();
    let whole: i64 = whole.parse().ok()?;
    let fraction: u8 = captures
        .get(2)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0);
    Price::from_parts(whole, fraction)
}

/// Whether the text contains anything the normalizer would read as a price.
pub fn looks_like_price(text: &str) -> bool {
    PRICE_PATTERN.is_match(text)
}
