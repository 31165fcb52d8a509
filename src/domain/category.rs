use serde::{Deserialize, Serialize};

/// A node of the remote catalog taxonomy. Only leaf categories carry listings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub slug: String,
    #[serde(default = "default_leaf")]
    pub is_leaf: bool,
}

const fn default_leaf() -> bool {
    true
}

impl Category {
    pub fn leaf(id: i64, slug: impl Into<String>) -> Self {
        Self {
            id,
            slug: slug.into(),
            is_leaf: true,
        }
    }

    /// A category can be crawled when it is a leaf with a usable slug.
    pub fn is_crawlable(&self) -> bool {
        self.is_leaf && !self.slug.trim().is_empty()
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.slug, self.id)
    }
}
