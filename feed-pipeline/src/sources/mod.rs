pub mod rss_feed;

pub use rss_feed::{load_feed_list, HttpFeedTransport};
