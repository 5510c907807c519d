//! Cache-backed access to the APIBAN IP blocklist.
//!
//! Answers "is this address listed?" and "what was listed since T?" against
//! the apiban.org feed without hitting the service on every call.
//!
//! # Stores
//!
//! - **[`OfficialStore`]** - Read-only client for the paginated apiban.org feed
//! - **[`RamCacheStore`]** - In-memory cache over any [`Store`], refreshed at
//!   most once per check interval
//!
//! # Example Configuration
//!
//! ```yaml
//! feed:
//!   api_key: "${APIBAN_API_KEY}"
//!   timeout_ms: 10000
//!
//! cache:
//!   min_upstream_check_interval_seconds: 180
//! ```

pub mod cache;
pub mod config;
pub mod store;

#[cfg(test)]
mod testing;

pub use cache::RamCacheStore;
pub use config::Config;
pub use store::official::OfficialStore;
pub use store::{Listing, NewListing, Store, StoreError};
