//! Blocklist stores.

pub mod classify;
pub mod official;
pub mod transport;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use ipnet::IpNet;
use std::net::IpAddr;

/// One blocked address or subnet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    /// Identity within a store snapshot; the canonical network string for
    /// listings that came from the feed.
    pub id: String,

    /// When the entry became known upstream.
    pub timestamp: DateTime<Utc>,

    /// Blocked network. A single host is a host-length network.
    pub network: IpNet,
}

impl Listing {
    /// Build a listing for a single host, identified by its network string.
    pub fn for_host(ip: IpAddr, timestamp: DateTime<Utc>) -> Self {
        let network = IpNet::from(ip);
        Self {
            id: network.to_string(),
            timestamp,
            network,
        }
    }

    /// Check if this listing covers an address.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.network.contains(ip)
    }
}

/// Input to [`Store::add`]. Missing fields are filled in by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewListing {
    pub network: IpNet,
    pub id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl NewListing {
    /// Create an entry for a network with no id or timestamp.
    pub fn new(network: IpNet) -> Self {
        Self {
            network,
            id: None,
            timestamp: None,
        }
    }

    /// Parse an address or CIDR string.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(StoreError::InvalidInput("IP address is required".to_string()));
        }

        if let Ok(ip) = s.parse::<IpAddr>() {
            return Ok(Self::new(IpNet::from(ip)));
        }

        s.parse::<IpNet>()
            .map(Self::new)
            .map_err(|_| StoreError::InvalidInput(format!("invalid IP address or network: {s}")))
    }

    /// Set the id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Fill in defaults, stamping missing timestamps with `now`.
    pub(crate) fn into_listing(self, now: DateTime<Utc>) -> Listing {
        Listing {
            id: self.id.unwrap_or_else(|| self.network.to_string()),
            timestamp: self.timestamp.unwrap_or(now),
            network: self.network,
        }
    }
}

impl From<Listing> for NewListing {
    fn from(listing: Listing) -> Self {
        Self {
            network: listing.network,
            id: Some(listing.id),
            timestamp: Some(listing.timestamp),
        }
    }
}

/// Error from a store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Caller supplied a missing key or address.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Upstream answered, but in a way that breaks the feed contract.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Credential rejected.
    #[error("unauthorized by apiban.org: {url}")]
    Unauthorized { url: String },

    /// Upstream throttling; back off and retry.
    #[error("rate limit exceeded at apiban.org: {url}")]
    RateLimited { url: String },

    /// Any other non-success response.
    #[error("upstream error ({status} {reason}) from {url:?}")]
    Upstream {
        status: u16,
        reason: String,
        url: String,
    },

    /// Mutation attempted on a read-only store.
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    /// Request timed out.
    #[error("request timed out")]
    Timeout,

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[source] reqwest::Error),
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            StoreError::Timeout
        } else {
            StoreError::Http(e)
        }
    }
}

/// A source of blocklist entries.
///
/// Read-only backends return [`StoreError::Unsupported`] from `add`,
/// `remove` and `reset`.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a listing unless a listing already covers its address.
    async fn add(&self, listing: NewListing) -> Result<Listing, StoreError>;

    /// First listing whose network contains `ip`.
    async fn exists(&self, ip: IpAddr) -> Result<Option<Listing>, StoreError>;

    /// Every listing, oldest first.
    async fn list(&self) -> Result<Vec<Listing>, StoreError>;

    /// Listings with a timestamp strictly after `t`, oldest first.
    async fn list_from_time(&self, t: DateTime<Utc>) -> Result<Vec<Listing>, StoreError>;

    /// Delete every listing with this id.
    async fn remove(&self, id: &str) -> Result<(), StoreError>;

    /// Drop all state.
    async fn reset(&self) -> Result<(), StoreError>;
}

/// Default start of the recent history: one year ago.
pub fn default_start_timestamp() -> DateTime<Utc> {
    Utc::now() - Duration::days(365)
}
