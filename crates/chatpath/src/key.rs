//! Dialogue keys: `{language}-{category}-{item}`.

use std::fmt;

/// Item number that means "any row in the category".
pub const RANDOM_ITEM: u32 = 0;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeKey {
    pub language: String,
    pub category: String,
    pub item: u32,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("dialogue key {0:?} must look like language-category-item or category-item")]
    Shape(String),
    #[error("dialogue key {0:?} has a non-numeric item")]
    Item(String),
}

impl NodeKey {
    pub fn new(language: impl Into<String>, category: impl Into<String>, item: u32) -> Self {
        Self {
            language: language.into(),
            category: category.into(),
            item,
        }
    }

    /// Parse a full or two-part key. Two-part keys get `default_language`.
    pub fn parse(raw: &str, default_language: &str) -> Result<Self, KeyError> {
        let parts: Vec<&str> = raw.trim().split('-').map(str::trim).collect();
        let (language, category, item) = match parts.as_slice() {
            [language, category, item] => (*language, *category, *item),
            [category, item] => (default_language, *category, *item),
            _ => return Err(KeyError::Shape(raw.to_string())),
        };
        if language.is_empty() || category.is_empty() {
            return Err(KeyError::Shape(raw.to_string()));
        }
        let item = item.parse().map_err(|_| KeyError::Item(raw.to_string()))?;
        Ok(Self::new(language, category, item))
    }

    /// Whether this key picks a random row instead of a fixed one.
    pub fn is_random(&self) -> bool {
        self.item == RANDOM_ITEM
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.language, self.category, self.item)
    }
}
