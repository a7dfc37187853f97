use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Deal
// ---------------------------------------------------------------------------

/// One advertised discounted product listing, as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Deal {
    /// Opaque key assigned by the store on creation.
    pub id: String,
    pub title: String,
    pub price: f64,
    pub original_price: f64,
    pub platform: Platform,
    pub category: Category,
    pub image: String,
    pub link: String,
    pub verified: bool,
    pub trending_count: u32,
    /// Epoch ms, assigned by the store. Sole sort key (descending).
    pub created_at: i64,
    /// Absolute epoch ms. Fixed at publish time.
    pub expires_at: Option<i64>,
}

impl Deal {
    /// Percentage off the original price, rounded to the nearest integer.
    pub fn discount_percent(&self) -> i64 {
        if self.original_price <= 0.0 {
            return 0;
        }
        (((self.original_price - self.price) / self.original_price) * 100.0).round() as i64
    }
}

/// Everything the publishing flow supplies. `id` and `created_at` come from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewDeal {
    pub title: String,
    pub price: f64,
    pub original_price: f64,
    pub platform: Platform,
    pub category: Category,
    pub image: String,
    pub link: String,
    pub verified: bool,
    pub trending_count: u32,
    pub expires_at: Option<i64>,
}

// ---------------------------------------------------------------------------
// Category / Platform
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
pub enum Category {
    Tech,
    Fashion,
    Home,
    Beauty,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Tech,
        Category::Fashion,
        Category::Home,
        Category::Beauty,
    ];

    /// Storefront label; `Tech` is shown as "Electronics".
    pub fn label(&self) -> &'static str {
        match self {
            Category::Tech => "Electronics",
            Category::Fashion => "Fashion",
            Category::Home => "Home",
            Category::Beauty => "Beauty",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Category::Tech => "Tech",
            Category::Fashion => "Fashion",
            Category::Home => "Home",
            Category::Beauty => "Beauty",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Tech" => Ok(Category::Tech),
            "Fashion" => Ok(Category::Fashion),
            "Home" => Ok(Category::Home),
            "Beauty" => Ok(Category::Beauty),
            other => Err(format!("unknown category: {other}")),
        }
    }
}

/// Vendor name. Open-ended at the data layer; the publish form restricts it
/// to the configured platform list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct Platform(pub String);

impl Platform {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Full result set of the live "all deals by createdAt desc" query.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Store revision the snapshot was read at.
    pub revision: u64,
    pub deals: Vec<Deal>,
    /// Time spent reading the result set.
    pub loaded_in: std::time::Duration,
}

pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
