//! In-memory refreshing cache in front of an upstream store.

use crate::config::Config;
use crate::store::official::OfficialStore;
use crate::store::{default_start_timestamp, Listing, NewListing, Store, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::net::IpAddr;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Default minimum time between upstream checks.
pub const DEFAULT_MIN_UPSTREAM_CHECK_INTERVAL: Duration = Duration::from_secs(3 * 60);

/// Listings plus refresh bookkeeping. Always mutated together.
struct CacheState {
    /// Sorted by timestamp, oldest first.
    list: Vec<Listing>,
    /// Newest timestamp seen upstream; the next refresh starts here.
    last_upstream_timestamp: DateTime<Utc>,
    /// When upstream was last checked successfully.
    last_upstream_check: DateTime<Utc>,
}

impl CacheState {
    fn is_stale(&self, interval: Duration, now: DateTime<Utc>) -> bool {
        // A check time in the future means the clock moved; refresh.
        (now - self.last_upstream_check)
            .to_std()
            .map_or_else(|_| true, |elapsed| elapsed >= interval)
    }

    fn find(&self, ip: &IpAddr) -> Option<&Listing> {
        self.list.iter().find(|l| l.contains(ip))
    }
}

/// Insert into a time-ordered list unless an existing listing already covers
/// the address. Returns the stored listing.
fn insert_listing(
    list: &mut Vec<Listing>,
    entry: NewListing,
    now: DateTime<Utc>,
) -> Result<Listing, StoreError> {
    let addr = entry.network.addr();
    if addr.is_unspecified() {
        return Err(StoreError::InvalidInput("invalid IP address".to_string()));
    }

    if let Some(existing) = list.iter().find(|l| l.contains(&addr)) {
        return Ok(existing.clone());
    }

    let listing = entry.into_listing(now);
    let pos = list.partition_point(|l| l.timestamp <= listing.timestamp);
    list.insert(pos, listing.clone());
    Ok(listing)
}

/// Merge upstream listings into a copy of `list`. Returns the merged list and
/// the newest upstream timestamp, if any listing came back.
///
/// Listings the cache cannot hold are skipped but still move the watermark,
/// so the next refresh does not fetch them again.
fn merge(
    list: &[Listing],
    fetched: Vec<Listing>,
    now: DateTime<Utc>,
) -> Result<(Vec<Listing>, Option<DateTime<Utc>>), StoreError> {
    let mut merged = list.to_vec();
    let mut newest: Option<DateTime<Utc>> = None;

    for listing in fetched {
        newest = Some(newest.map_or(listing.timestamp, |n| n.max(listing.timestamp)));
        let network = listing.network;
        match insert_listing(&mut merged, listing.into(), now) {
            Ok(_) => {}
            Err(StoreError::InvalidInput(reason)) => {
                warn!(network = %network, reason = %reason, "Skipping unusable upstream listing");
            }
            Err(e) => {
                return Err(StoreError::Protocol(format!(
                    "failed to add {network} to list: {e}"
                )))
            }
        }
    }

    Ok((merged, newest))
}

/// Store that serves from memory and refills from an upstream store at most
/// once per check interval.
///
/// One lock covers the listings and both bookkeeping timestamps. A refresh
/// holds the write lock from the staleness check through the upstream call
/// to the merge, so refreshes never overlap and readers never see a
/// half-merged list.
#[doc(alias = "RefreshingCache")]
pub struct RamCacheStore<S = OfficialStore> {
    upstream: S,
    min_upstream_check_interval: Duration,
    state: RwLock<CacheState>,
}

impl RamCacheStore<OfficialStore> {
    /// Build a cache over the official feed from configuration.
    pub async fn from_config(config: &Config) -> Result<Self, StoreError> {
        let upstream = OfficialStore::new(config.feed.clone())?;
        Self::new(upstream, config.cache.min_upstream_check_interval()).await
    }
}

impl<S: Store> RamCacheStore<S> {
    /// Create a cache and seed it with a full listing from `upstream`.
    pub async fn new(upstream: S, min_upstream_check_interval: Duration) -> Result<Self, StoreError> {
        let seed = upstream.list().await?;
        let now = Utc::now();

        let (list, newest) = merge(&[], seed, now)?;
        let last_upstream_timestamp = newest.unwrap_or_else(default_start_timestamp);

        info!(
            listings = list.len(),
            interval_secs = min_upstream_check_interval.as_secs(),
            "Cache seeded from upstream"
        );

        Ok(Self {
            upstream,
            min_upstream_check_interval,
            state: RwLock::new(CacheState {
                list,
                last_upstream_timestamp,
                last_upstream_check: now,
            }),
        })
    }

    /// Refill from upstream if the check interval has elapsed.
    async fn refresh(&self) -> Result<(), StoreError> {
        if !self
            .state
            .read()
            .await
            .is_stale(self.min_upstream_check_interval, Utc::now())
        {
            return Ok(());
        }

        let mut state = self.state.write().await;

        // Another caller may have refreshed while we waited for the lock.
        if !state.is_stale(self.min_upstream_check_interval, Utc::now()) {
            debug!("Upstream refresh already done by a concurrent caller");
            return Ok(());
        }

        let fetched = self
            .upstream
            .list_from_time(state.last_upstream_timestamp)
            .await
            .inspect_err(|e| warn!(error = %e, "Upstream refresh failed"))?;

        let fetched_count = fetched.len();
        let now = Utc::now();
        let (list, newest) = merge(&state.list, fetched, now)?;
        let added = list.len() - state.list.len();

        state.list = list;
        if let Some(newest) = newest {
            state.last_upstream_timestamp = state.last_upstream_timestamp.max(newest);
        }
        state.last_upstream_check = now;

        debug!(
            fetched = fetched_count,
            added = added,
            total = state.list.len(),
            watermark = %state.last_upstream_timestamp,
            "Upstream refresh complete"
        );

        Ok(())
    }

    /// Number of cached listings, without refreshing.
    pub async fn len(&self) -> usize {
        self.state.read().await.list.len()
    }

    /// Check if the cache is empty, without refreshing.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl<S: Store> Store for RamCacheStore<S> {
    async fn add(&self, listing: NewListing) -> Result<Listing, StoreError> {
        let mut state = self.state.write().await;
        insert_listing(&mut state.list, listing, Utc::now())
    }

    async fn exists(&self, ip: IpAddr) -> Result<Option<Listing>, StoreError> {
        self.refresh().await?;

        let state = self.state.read().await;
        Ok(state.find(&ip).cloned())
    }

    async fn list(&self) -> Result<Vec<Listing>, StoreError> {
        self.refresh().await?;

        Ok(self.state.read().await.list.clone())
    }

    async fn list_from_time(&self, t: DateTime<Utc>) -> Result<Vec<Listing>, StoreError> {
        self.refresh().await?;

        let state = self.state.read().await;
        let start = state.list.partition_point(|l| l.timestamp <= t);
        Ok(state.list[start..].to_vec())
    }

    async fn remove(&self, id: &str) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.list.retain(|l| l.id != id);
        Ok(())
    }

    async fn reset(&self) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.list.clear();
        state.last_upstream_timestamp = default_start_timestamp();
        state.last_upstream_check = default_start_timestamp();
        Ok(())
    }
}
