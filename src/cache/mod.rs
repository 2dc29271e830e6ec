//! Menu Cache
//!
//! In-process caching for the QR-menu web app:
//!
//! - **Response cache**: buffered HTTP responses keyed by method, path and query,
//!   tagged by the tables they render
//! - **Query cache**: query results keyed by query text, with table dependencies
//!
//! Both sit on a [`TtlStore`] with lazy expiry and a background [`SweeperHandle`].
//! The middleware in this module serves GET/HEAD requests from the response cache and
//! invalidates mapped tables after POST/PUT/DELETE/PATCH.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! response_ttl_seconds = 300
//! query_ttl_seconds = 600
//!
//! [[cache.invalidation]]
//! pattern = "/api/menus"
//! tables = ["menus", "menu_items"]
//!
//! [[cache.routes]]
//! pattern = "/api/menus"
//! tags = ["menus"]
//! ```

mod config;
mod invalidator;
pub mod keys;
mod lock;
mod middleware;
mod query;
mod registry;
mod response;
mod stats;
pub mod store;
mod sweeper;

pub use config::{CacheConfig, InvalidationRule, RouteTags};
pub use invalidator::{CacheInvalidator, Invalidated};
pub use middleware::{
    CacheState, X_CACHE, X_CACHE_DATE, cache_invalidation_layer, response_cache_layer,
};
pub use query::{QueryCache, QueryCacheStats};
pub use registry::TagIndex;
pub use response::{CachedResponse, ResponseCache, ResponseCacheStats};
pub use stats::CacheStats;
pub use store::{EntryInfo, TtlStore};
pub use sweeper::{Sweep, SweeperHandle};
