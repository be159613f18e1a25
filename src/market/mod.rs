//! Marketplace resources, the origin client, and their cache adapters.

pub mod cache;
pub mod cached_client;
pub mod client;
pub mod types;

pub use cache::{CacheEnvironment, MarketQueryKey};
pub use cached_client::{CachedMarketplaceClient, MarketAction, MutationOutcome};
pub use client::{is_offline, MarketplaceApi, MarketplaceClient, OriginError};
