#[cfg(feature = "browser")]
pub mod browser;
pub mod feed;
pub mod fetcher;
pub mod robots;
pub mod static_page;

#[cfg(feature = "browser")]
pub use browser::BrowserRenderer;
pub use feed::FeedClient;
pub use fetcher::ReqwestFetcher;
pub use robots::RobotsClient;
pub use static_page::StaticPageRenderer;
