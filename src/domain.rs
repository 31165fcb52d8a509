//! Domain module - Core entities and value objects
//!
//! This module contains the value types every crawl component exchanges:
//! catalog categories, extracted product records, fixed-point prices,
//! egress endpoints and the persistent crawl checkpoint.
//!
//! Each module is its own file in the domain/ directory; public exports
//! are defined here for convenience.

pub mod category;
pub mod price;
pub mod product;
pub mod progress;
pub mod proxy;

pub use category::Category;
pub use price::Price;
pub use product::{Attribute, ListingItem, ProductRecord};
pub use progress::CrawlProgress;
pub use proxy::{Egress, ProxyEndpoint};
