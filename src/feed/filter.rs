use serde::{Deserialize, Serialize};

use crate::types::{Category, Deal};

/// Sentinel that disables category filtering.
pub const ALL_CATEGORIES: &str = "All";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CategoryFilter {
    #[default]
    All,
    Only(Category),
}

impl CategoryFilter {
    pub fn matches(&self, category: Category) -> bool {
        match self {
            CategoryFilter::All => true,
            CategoryFilter::Only(selected) => *selected == category,
        }
    }

    /// Storefront tab order: All, then every category.
    pub fn tabs() -> Vec<CategoryFilter> {
        std::iter::once(CategoryFilter::All)
            .chain(Category::ALL.into_iter().map(CategoryFilter::Only))
            .collect()
    }

    pub fn label(&self) -> &'static str {
        match self {
            CategoryFilter::All => "All Deals",
            CategoryFilter::Only(c) => c.label(),
        }
    }
}

impl std::fmt::Display for CategoryFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CategoryFilter::All => write!(f, "{ALL_CATEGORIES}"),
            CategoryFilter::Only(c) => write!(f, "{c}"),
        }
    }
}

impl std::str::FromStr for CategoryFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s == ALL_CATEGORIES {
            return Ok(CategoryFilter::All);
        }
        s.parse::<Category>().map(CategoryFilter::Only)
    }
}

impl Serialize for CategoryFilter {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CategoryFilter {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The two independent predicates of the storefront feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedFilter {
    #[serde(default)]
    pub category: CategoryFilter,
    /// Free-text search. Empty matches everything.
    #[serde(default, rename = "q")]
    pub query: String,
}

impl FeedFilter {
    pub fn new(category: CategoryFilter, query: impl Into<String>) -> Self {
        Self {
            category,
            query: query.into(),
        }
    }

    /// Category matches AND the lower-cased title contains the lower-cased query.
    pub fn matches(&self, deal: &Deal) -> bool {
        self.category.matches(deal.category)
            && (self.query.is_empty()
                || deal.title.to_lowercase().contains(&self.query.to_lowercase()))
    }
}

/// Visible subset of `deals`, in the order given.
pub fn apply(deals: &[Deal], filter: &FeedFilter) -> Vec<Deal> {
    deals.iter().filter(|d| filter.matches(d)).cloned().collect()
}
