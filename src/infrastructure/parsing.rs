//! Listing page parsing
//!
//! Pages are scanned as a flat stream of tag events rather than built into a
//! DOM: catalog markup differs between categories in whitespace, nesting and
//! attribute presence, and a forgiving scan degrades per card instead of per
//! page.
//!
//! - [`events`]: tolerant tag/text lexer producing [`HtmlEvent`]s
//! - [`listing_parser`]: per-card state machine turning events into items
//! - [`pagination`]: page count from `page__N` markers
//! - [`price`]: fixed-point price normalization from free text

pub mod config;
pub mod events;
pub mod listing_parser;
pub mod pagination;
pub mod price;

pub use self::config::ListingSelectors;
pub use events::{HtmlEvent, OpenTag, tokenize};
pub use listing_parser::{ListingPage, ListingParser};
pub use pagination::total_pages;
pub use price::normalize_price;
