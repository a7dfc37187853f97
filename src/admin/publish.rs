use rand::Rng;
use serde::Deserialize;
use tracing::warn;
use url::Url;

use crate::admin::images::ImagePolicy;
use crate::config::{Config, TRENDING_MAX, TRENDING_MIN};
use crate::error::{AppError, Result};
use crate::types::{Category, NewDeal, Platform};

const MS_PER_HOUR: i64 = 3_600_000;

/// Body of `POST /admin/deals`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishRequest {
    pub title: String,
    pub price: f64,
    pub original_price: f64,
    pub platform: String,
    pub category: Category,
    pub image: String,
    pub link: String,
    /// Hours until the deal expires. Falls back to the configured default.
    pub expiry_hours: Option<u32>,
}

/// What the publish form accepts.
#[derive(Debug, Clone)]
pub struct PublishRules {
    pub platforms: Vec<String>,
    pub images: ImagePolicy,
    pub default_expiry_hours: u32,
}

impl PublishRules {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            platforms: cfg.platforms.clone(),
            images: ImagePolicy::new(cfg.image_hosts.as_slice()),
            default_expiry_hours: cfg.default_expiry_hours,
        }
    }
}

impl PublishRequest {
    /// Validate and stamp the request at `now_ms`. The result is always
    /// verified, carries a random trending count, and expires
    /// `expiry_hours` after `now_ms`.
    pub fn into_new_deal(self, rules: &PublishRules, now_ms: i64) -> Result<NewDeal> {
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err(invalid("title is required"));
        }
        for (name, amount) in [("price", self.price), ("originalPrice", self.original_price)] {
            if !amount.is_finite() || amount <= 0.0 {
                return Err(invalid(&format!("{name} must be a positive amount")));
            }
        }
        if self.price > self.original_price {
            warn!(
                title = %title,
                price = self.price,
                original_price = self.original_price,
                "Publishing deal priced above its original price"
            );
        }

        let platform = self.platform.trim();
        if !rules.platforms.iter().any(|p| p == platform) {
            return Err(invalid(&format!("unknown platform: {platform}")));
        }

        let image = self.image.trim().to_string();
        rules.images.check(&image).map_err(|e| invalid(&e.to_string()))?;

        let link = self.link.trim().to_string();
        if !is_web_link(&link) {
            return Err(invalid("link must be an http(s) URL"));
        }

        let hours = self.expiry_hours.unwrap_or(rules.default_expiry_hours);
        if hours == 0 {
            return Err(invalid("expiryHours must be at least 1"));
        }

        Ok(NewDeal {
            title,
            price: self.price,
            original_price: self.original_price,
            platform: Platform::new(platform),
            category: self.category,
            image,
            link,
            verified: true,
            trending_count: rand::thread_rng().gen_range(TRENDING_MIN..TRENDING_MAX),
            expires_at: Some(now_ms + i64::from(hours) * MS_PER_HOUR),
        })
    }
}

/// An absolute http(s) URL with a host.
fn is_web_link(link: &str) -> bool {
    match Url::parse(link) {
        Ok(url) => {
            matches!(url.scheme(), "http" | "https")
                && url.host_str().is_some_and(|h| !h.is_empty())
        }
        Err(_) => false,
    }
}

fn invalid(msg: &str) -> AppError {
    AppError::Validation(msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> PublishRules {
        PublishRules::from_config(&Config::default())
    }

    fn request() -> PublishRequest {
        PublishRequest {
            title: "  Smartphone X 5G ".to_string(),
            price: 14999.0,
            original_price: 19999.0,
            platform: "Flipkart".to_string(),
            category: Category::Tech,
            image: "https://rukminim2.flixcart.com/image/x.jpeg".to_string(),
            link: "https://fkrt.it/abc".to_string(),
            expiry_hours: Some(24),
        }
    }

    #[test]
    fn stamps_expiry_verified_and_trending() {
        let now = 1_700_000_000_000;
        let deal = request().into_new_deal(&rules(), now).unwrap();

        assert_eq!(deal.title, "Smartphone X 5G");
        assert_eq!(deal.expires_at, Some(now + 24 * 3_600_000));
        assert!(deal.verified);
        assert!((TRENDING_MIN..TRENDING_MAX).contains(&deal.trending_count));
        assert_eq!(deal.platform, Platform::new("Flipkart"));
    }

    #[test]
    fn missing_expiry_uses_default() {
        let now = 1_000;
        let mut req = request();
        req.expiry_hours = None;
        let mut rules = rules();
        rules.default_expiry_hours = 6;

        let deal = req.into_new_deal(&rules, now).unwrap();
        assert_eq!(deal.expires_at, Some(now + 6 * 3_600_000));
    }

    #[test]
    fn price_above_original_is_accepted() {
        let mut req = request();
        req.price = 25000.0;
        assert!(req.into_new_deal(&rules(), 0).is_ok());
    }

    #[test]
    fn rejects_invalid_fields() {
        let cases: Vec<Box<dyn Fn(&mut PublishRequest)>> = vec![
            Box::new(|r| r.title = "   ".to_string()),
            Box::new(|r| r.price = 0.0),
            Box::new(|r| r.original_price = f64::NAN),
            Box::new(|r| r.platform = "Meesho".to_string()),
            Box::new(|r| r.image = "https://cdn.example.com/x.jpg".to_string()),
            Box::new(|r| r.link = "javascript:alert(1)".to_string()),
            Box::new(|r| r.expiry_hours = Some(0)),
        ];
        for mutate in cases {
            let mut req = request();
            mutate(&mut req);
            assert!(matches!(
                req.into_new_deal(&rules(), 0),
                Err(AppError::Validation(_))
            ));
        }
    }

    #[test]
    fn rejects_links_without_a_host() {
        for link in ["https://", "http://", "https://?x", "https://<script>", "ftp://files.example.com/x"] {
            let mut req = request();
            req.link = link.to_string();
            assert!(
                matches!(req.into_new_deal(&rules(), 0), Err(AppError::Validation(_))),
                "{link} was accepted"
            );
        }
    }

    #[test]
    fn configured_platforms_extend_the_form() {
        let mut rules = rules();
        rules.platforms.push("Meesho".to_string());
        let mut req = request();
        req.platform = "Meesho".to_string();
        assert!(req.into_new_deal(&rules, 0).is_ok());
    }
}
