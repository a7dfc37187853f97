pub mod filter;
pub mod synchronizer;

pub use filter::{CategoryFilter, FeedFilter};
pub use synchronizer::{FeedHandle, FeedState, FeedStatus, FeedSynchronizer};
