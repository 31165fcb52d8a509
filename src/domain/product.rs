use serde::{Deserialize, Serialize};

use super::{Category, Price};

/// One characteristic line of a listing card, split into key and value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub key: String,
    pub value: String,
}

impl Attribute {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A listing card that passed extraction: it has a name and a price.
/// Not yet bound to the category it was found under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingItem {
    pub external_id: String,
    pub display_name: String,
    pub short_name: String,
    pub price: Price,
    pub image_url: Option<String>,
    pub attributes: Vec<Attribute>,
    pub slug: Option<String>,
}

/// Product record handed to the storage sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRecord {
    /// Storage key. Never empty.
    pub sku: String,
    pub external_id: String,
    pub display_name: String,
    pub short_name: String,
    pub price: Option<Price>,
    pub image_url: Option<String>,
    pub attributes: Vec<Attribute>,
    pub slug: Option<String>,
    pub category_id: i64,
    pub category_slug: String,
}

impl ProductRecord {
    /// Binds a parsed card to its category. Returns `None` when the card has
    /// no usable storage key.
    pub fn from_listing(item: ListingItem, category: &Category) -> Option<Self> {
        let sku = item.display_name.trim().to_string();
        if sku.is_empty() {
            return None;
        }
        Some(Self {
            sku,
            external_id: item.external_id,
            display_name: item.display_name,
            short_name: item.short_name,
            price: Some(item.price),
            image_url: item.image_url,
            attributes: item.attributes,
            slug: item.slug,
            category_id: category.id,
            category_slug: category.slug.clone(),
        })
    }

    /// Attributes as the JSON array of `{key, value}` objects the store keeps.
    pub fn attributes_json(&self) -> String {
        serde_json::to_string(&self.attributes).unwrap_or_else(|_| "[]".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str) -> ListingItem {
        ListingItem {
            external_id: "1001".into(),
            display_name: name.into(),
            short_name: "Bolt".into(),
            price: Price::from_cents(1999),
            image_url: None,
            attributes: vec![Attribute::new("Diameter", "M8")],
            slug: Some("bolt-m8".into()),
        }
    }

    #[test]
    fn record_takes_sku_from_trimmed_name() {
        let category = Category::leaf(42, "bolty");
        let record = ProductRecord::from_listing(item("  Bolt M8x40 DIN 933 "), &category).unwrap();
        assert_eq!(record.sku, "Bolt M8x40 DIN 933");
        assert_eq!(record.category_id, 42);
        assert_eq!(record.category_slug, "bolty");
        assert_eq!(record.price, Some(Price::from_cents(1999)));
    }

    #[test]
    fn blank_name_has_no_record() {
        let category = Category::leaf(42, "bolty");
        assert!(ProductRecord::from_listing(item("   "), &category).is_none());
    }

    #[test]
    fn attributes_serialize_as_key_value_objects() {
        let category = Category::leaf(42, "bolty");
        let record = ProductRecord::from_listing(item("Bolt M8x40 DIN 933"), &category).unwrap();
        assert_eq!(record.attributes_json(), r#"[{"key":"Diameter","value":"M8"}]"#);
    }
}
