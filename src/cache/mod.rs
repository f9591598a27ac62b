//! HTTP response caching for offline support.
//!
//! This module provides:
//! - Named cache generations mapping request identity to stored responses
//! - The caching strategies (cache-first, network-first with cache, offline
//!   document or queue fallback) selected per resource class

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::{CacheEntry, CacheStorage, EntrySummary};
pub use traits::ResponseSource;
