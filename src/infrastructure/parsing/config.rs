//! Markup hints for listing extraction
//!
//! Class names are matched as substrings of the `class` attribute, the way
//! the catalog's BEM-style names are composed.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingSelectors {
    /// Class on the `<li>` that wraps one product card
    pub item_class: String,

    /// Attributes carrying the site's product id, first present wins
    pub item_id_attributes: Vec<String>,

    /// Optional short name carried on the card element itself
    pub item_name_attribute: String,

    /// `itemprop` value of the `<meta>` holding the full product name
    pub name_itemprop: String,

    /// Substring marking an element whose text is the price
    pub price_class: String,

    /// Class of the nested `<ul>` listing product characteristics
    pub attribute_list_class: String,

    /// Class of the card's primary link (short name + slug)
    pub link_class: String,

    /// Image source attributes in order of preference
    pub image_attributes: Vec<String>,

    /// Shortest free-text fragment accepted as a fallback name
    pub min_name_chars: usize,
}

impl Default for ListingSelectors {
    fn default() -> Self {
        Self {
            item_class: "listing-cards__item".to_string(),
            item_id_attributes: vec![
                "data-product-id".to_string(),
                "data-id".to_string(),
                "data-productid".to_string(),
            ],
            item_name_attribute: "data-product-name".to_string(),
            name_itemprop: "name".to_string(),
            price_class: "price".to_string(),
            attribute_list_class: "listing-cards__list".to_string(),
            link_class: "listing-cards__link".to_string(),
            image_attributes: vec![
                "data-src".to_string(),
                "src".to_string(),
                "data-original".to_string(),
            ],
            min_name_chars: 10,
        }
    }
}
