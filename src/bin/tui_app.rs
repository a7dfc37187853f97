use std::collections::HashMap;

use dealzo::api::feed_socket::FeedFrame;
use dealzo::api::routes::DealsResponse;
use dealzo::countdown::CountdownHandle;
use dealzo::feed::filter::{self, CategoryFilter, FeedFilter};
use dealzo::feed::FeedStatus;
use dealzo::types::Deal;

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

pub const SPECIAL_BADGE: &str = "✨ 2026 Special";
const SPECIAL_SLOTS: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionStatus {
    Connecting,
    Live,
    /// Server is up but its live feed is failing.
    Degraded(String),
    /// Server unreachable.
    Error(String),
}

impl From<FeedStatus> for ConnectionStatus {
    fn from(status: FeedStatus) -> Self {
        match status {
            FeedStatus::Connecting => ConnectionStatus::Connecting,
            FeedStatus::Live => ConnectionStatus::Live,
            FeedStatus::Degraded { message } => ConnectionStatus::Degraded(message),
        }
    }
}

pub struct AppState {
    pub base_url: String,
    pub status: ConnectionStatus,
    pub revision: u64,
    /// Mirror of the server feed, newest first.
    pub deals: Vec<Deal>,
    pub filter: FeedFilter,
    /// True while `/` search input has focus.
    pub searching: bool,
    pub selected: usize,
    /// One running countdown per mirrored deal id.
    countdowns: HashMap<String, CountdownHandle>,
    tabs: Vec<CategoryFilter>,
}

impl AppState {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            status: ConnectionStatus::Connecting,
            revision: 0,
            deals: Vec::new(),
            filter: FeedFilter::default(),
            searching: false,
            selected: 0,
            countdowns: HashMap::new(),
            tabs: CategoryFilter::tabs(),
        }
    }

    /// `ws://` URL of the live feed.
    pub fn feed_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let ws = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        format!("{ws}/feed/ws")
    }

    /// First paint from `GET /deals`, before the socket delivers anything.
    pub async fn bootstrap(&mut self, client: &reqwest::Client) {
        let url = format!("{}/deals", self.base_url);
        match client.get(&url).send().await {
            Ok(resp) => match resp.json::<DealsResponse>().await {
                Ok(body) => self.apply_frame(FeedFrame {
                    revision: body.revision,
                    status: body.status,
                    deals: body.deals.into_iter().map(|card| card.deal).collect(),
                }),
                Err(e) => self.status = ConnectionStatus::Error(format!("parse error: {e}")),
            },
            Err(e) => self.status = ConnectionStatus::Error(format!("{e}")),
        }
    }

    /// Ask the server to re-subscribe a degraded feed now.
    pub async fn request_retry(&mut self, client: &reqwest::Client) {
        let url = format!("{}/feed/retry", self.base_url);
        if let Err(e) = client.post(&url).send().await {
            self.status = ConnectionStatus::Error(format!("{e}"));
        }
    }

    /// Replace the mirror wholesale. The latest frame always wins; a restarted
    /// server starts counting revisions from zero again.
    pub fn apply_frame(&mut self, frame: FeedFrame) {
        self.revision = frame.revision;
        self.status = frame.status.into();
        self.deals = frame.deals;

        // Dropping a handle stops its timer.
        self.countdowns
            .retain(|id, _| self.deals.iter().any(|d| &d.id == id));
        for deal in &self.deals {
            self.countdowns
                .entry(deal.id.clone())
                .or_insert_with(|| CountdownHandle::spawn(deal.expires_at));
        }
        self.clamp_selection();
    }

    pub fn feed_lost(&mut self, reason: String) {
        self.status = ConnectionStatus::Error(reason);
    }

    pub fn visible(&self) -> Vec<Deal> {
        filter::apply(&self.deals, &self.filter)
    }

    /// The first few cards of the unfiltered "All" tab carry the special badge.
    pub fn is_special(&self, index: usize) -> bool {
        index < SPECIAL_SLOTS && self.filter.category == CategoryFilter::All
    }

    pub fn countdown_label(&self, id: &str) -> String {
        self.countdowns
            .get(id)
            .map(|c| c.label())
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub fn running_countdowns(&self) -> usize {
        self.countdowns.len()
    }

    pub fn tabs(&self) -> &[CategoryFilter] {
        &self.tabs
    }

    pub fn tab_index(&self) -> usize {
        self.tabs
            .iter()
            .position(|t| *t == self.filter.category)
            .unwrap_or(0)
    }

    pub fn next_tab(&mut self) {
        let i = (self.tab_index() + 1) % self.tabs.len();
        self.select_tab(i);
    }

    pub fn prev_tab(&mut self) {
        let i = (self.tab_index() + self.tabs.len() - 1) % self.tabs.len();
        self.select_tab(i);
    }

    fn select_tab(&mut self, i: usize) {
        if let Some(tab) = self.tabs.get(i) {
            self.filter.category = *tab;
            self.selected = 0;
        }
    }

    pub fn push_query(&mut self, c: char) {
        self.filter.query.push(c);
        self.selected = 0;
    }

    pub fn pop_query(&mut self) {
        self.filter.query.pop();
        self.selected = 0;
    }

    pub fn clear_query(&mut self) {
        self.filter.query.clear();
        self.searching = false;
        self.selected = 0;
    }

    pub fn select_next(&mut self) {
        self.selected += 1;
        self.clamp_selection();
    }

    pub fn select_prev(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    fn clamp_selection(&mut self) {
        let max = self.visible().len().saturating_sub(1);
        self.selected = self.selected.min(max);
    }
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

/// `₹14,999` style. Fractions are dropped.
pub fn format_price(v: f64) -> String {
    let whole = v.round().max(0.0) as u64;
    let digits = whole.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    format!("₹{out}")
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{head}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dealzo::types::{now_ms, Category, Platform};

    fn deal(id: &str, title: &str, category: Category) -> Deal {
        Deal {
            id: id.to_string(),
            title: title.to_string(),
            price: 999.0,
            original_price: 1999.0,
            platform: Platform::new("Amazon"),
            category,
            image: "https://via.placeholder.com/150".to_string(),
            link: "https://amzn.to/x".to_string(),
            verified: true,
            trending_count: 700,
            created_at: 0,
            expires_at: Some(now_ms() + 3_600_000),
        }
    }

    fn frame(revision: u64, deals: Vec<Deal>) -> FeedFrame {
        FeedFrame {
            revision,
            status: FeedStatus::Live,
            deals,
        }
    }

    #[tokio::test]
    async fn countdowns_follow_the_mirror() {
        let mut app = AppState::new("http://localhost:3000".to_string());
        app.apply_frame(frame(1, vec![deal("a", "A", Category::Tech), deal("b", "B", Category::Home)]));
        assert_eq!(app.running_countdowns(), 2);
        assert!(app.countdown_label("a").starts_with("0h 59m") || app.countdown_label("a").starts_with("1h 0m"));

        app.apply_frame(frame(2, vec![deal("b", "B", Category::Home)]));
        assert_eq!(app.running_countdowns(), 1);
        assert_eq!(app.countdown_label("a"), "");
        assert_eq!(app.status, ConnectionStatus::Live);
    }

    #[tokio::test]
    async fn frame_after_server_restart_replaces_the_mirror() {
        let mut app = AppState::new("http://localhost:3000".to_string());
        app.apply_frame(frame(7, vec![deal("old1", "A", Category::Tech), deal("old2", "B", Category::Home)]));
        app.feed_lost("feed closed".to_string());

        // Fresh server, revision counter back at zero.
        app.apply_frame(frame(0, vec![]));
        assert!(app.deals.is_empty());
        assert_eq!(app.revision, 0);
        assert_eq!(app.running_countdowns(), 0);

        app.apply_frame(frame(1, vec![deal("new", "C", Category::Beauty)]));
        let ids: Vec<_> = app.deals.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["new"]);
        assert_eq!(app.status, ConnectionStatus::Live);
    }

    #[tokio::test]
    async fn tabs_and_search_narrow_the_view() {
        let mut app = AppState::new("http://localhost:3000".to_string());
        app.apply_frame(frame(
            1,
            vec![
                deal("a", "Smartphone", Category::Tech),
                deal("b", "Phone Stand", Category::Home),
                deal("c", "Lipstick", Category::Beauty),
            ],
        ));

        app.next_tab();
        assert_eq!(app.filter.category, CategoryFilter::Only(Category::Tech));
        assert_eq!(app.visible().len(), 1);

        app.prev_tab();
        "phone".chars().for_each(|c| app.push_query(c));
        assert_eq!(app.visible().len(), 2);

        app.prev_tab();
        assert_eq!(app.filter.category, CategoryFilter::Only(Category::Beauty));
        assert!(app.visible().is_empty());

        app.clear_query();
        assert_eq!(app.visible().len(), 1);
    }

    #[tokio::test]
    async fn first_four_cards_on_all_are_special() {
        let mut app = AppState::new("http://localhost:3000".to_string());
        let deals = (0..6)
            .map(|i| deal(&i.to_string(), "Smartphone", Category::Tech))
            .collect();
        app.apply_frame(frame(1, deals));

        let special: Vec<bool> = (0..app.visible().len()).map(|i| app.is_special(i)).collect();
        assert_eq!(special, vec![true, true, true, true, false, false]);

        app.next_tab();
        assert_eq!(app.filter.category, CategoryFilter::Only(Category::Tech));
        assert!(!app.is_special(0));
    }

    #[test]
    fn feed_url_swaps_scheme() {
        let app = AppState::new("http://localhost:3000/".to_string());
        assert_eq!(app.feed_url(), "ws://localhost:3000/feed/ws");
        let app = AppState::new("https://dealzo.shop".to_string());
        assert_eq!(app.feed_url(), "wss://dealzo.shop/feed/ws");
    }

    #[test]
    fn prices_are_grouped() {
        assert_eq!(format_price(14999.0), "₹14,999");
        assert_eq!(format_price(999.4), "₹999");
        assert_eq!(format_price(1_234_567.0), "₹1,234,567");
        assert_eq!(truncate("Smartphone", 6), "Smart…");
    }
}
