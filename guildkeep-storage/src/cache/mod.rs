//! Bounded caches for externally fetched data.
//!
//! [`BoundedCache`] is a plain TTL + capacity bounded map with a background
//! sweep. [`ReadThroughCache`] puts it in front of an [`ApiFetcher`] so that
//! repeated lookups of the same key do not hit the network.
//!
//! # Example
//!
//! ```ignore
//! let fetcher = Arc::new(HttpJsonFetcher::<PlayerStats>::new(
//!     "https://api.example.com/players/{key}",
//!     &HttpConfig::from_env(),
//! )?);
//! let cache = Arc::new(BoundedCache::from_config(&ApiCacheConfig::from_env()));
//! let sweeper = cache.start_sweeper(Duration::from_secs(60));
//! let stats = ReadThroughCache::new(cache, fetcher);
//!
//! let read = stats.get_or_fetch(&player_name).await?;
//! if read.was_cache_miss() {
//!     tracing::debug!("fetched fresh stats");
//! }
//! ```

pub mod bounded;
pub mod http;
pub mod read_through;
pub mod traits;

pub use bounded::{BoundedCache, SweeperHandle};
pub use http::HttpJsonFetcher;
pub use read_through::{CacheRead, ReadThroughCache};
pub use traits::{ApiFetcher, CacheStats};
