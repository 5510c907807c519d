//! Store backed by the official apiban.org feed.

use super::classify::{classify, Endpoint, Page, Reply};
use super::transport::{FeedTransport, HttpTransport};
use super::{default_start_timestamp, Listing, NewListing, Store, StoreError};
use crate::config::FeedConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, warn};

/// Cursor that starts the banned listing at the beginning of history.
pub const START_OF_HISTORY_CURSOR: &str = "100";

/// Read-only store over the apiban.org feed.
///
/// Holds no listing state: every call goes to the network.
#[doc(alias = "RemoteFeedClient")]
pub struct OfficialStore<T = HttpTransport> {
    config: FeedConfig,
    transport: T,
}

impl OfficialStore<HttpTransport> {
    /// Create a store that talks HTTP to the configured feed.
    pub fn new(config: FeedConfig) -> Result<Self, StoreError> {
        let transport = HttpTransport::new(Duration::from_millis(config.timeout_ms))?;
        Self::with_transport(config, transport)
    }
}

impl<T: FeedTransport> OfficialStore<T> {
    /// Create a store over a caller-supplied transport.
    pub fn with_transport(config: FeedConfig, transport: T) -> Result<Self, StoreError> {
        if config.api_key.is_empty() {
            return Err(StoreError::InvalidInput("API key is required".to_string()));
        }

        Ok(Self { config, transport })
    }

    fn url(&self, endpoint: Endpoint, arg: &str) -> String {
        let path = match endpoint {
            Endpoint::Banned => "banned",
            Endpoint::Check => "check",
        };
        format!(
            "{}/{}/{}/{}",
            self.config.root_url.trim_end_matches('/'),
            self.config.api_key,
            path,
            arg
        )
    }

    async fn query(&self, endpoint: Endpoint, arg: &str) -> Result<Reply, StoreError> {
        let url = self.url(endpoint, arg);
        let response = self.transport.get(&url).await?;
        debug!(status = response.status, url = %url, "apiban.org reply");
        classify(endpoint, &response, &url)
    }

    async fn query_check(&self, ip: IpAddr) -> Result<Option<Page>, StoreError> {
        if ip.is_unspecified() {
            return Err(StoreError::InvalidInput("IP address is required".to_string()));
        }

        let addr = ip.to_string();
        let url = self.url(Endpoint::Check, &addr);

        match self.query(Endpoint::Check, &addr).await? {
            Reply::NotBlocked => Ok(None),
            Reply::Page(page) if page.addresses().iter().any(|a| a == &addr) => Ok(Some(page)),
            // A page that neither names the address nor says "not blocked"
            Reply::Page(_) | Reply::EndOfList => Err(StoreError::Upstream {
                status: 200,
                reason: "unrecognized check reply".to_string(),
                url,
            }),
        }
    }

    /// Ask the feed whether a single address is blocked.
    pub async fn check(&self, ip: IpAddr) -> Result<bool, StoreError> {
        Ok(self.query_check(ip).await?.is_some())
    }

    /// Fetch the banned list starting at a raw cursor, or at the start of
    /// history when none is given.
    pub async fn banned(&self, start_from: Option<&str>) -> Result<Vec<Listing>, StoreError> {
        let cursor = start_from
            .filter(|c| !c.is_empty())
            .unwrap_or(START_OF_HISTORY_CURSOR);
        self.list_from_cursor(cursor.to_string()).await
    }

    async fn list_from_cursor(&self, mut cursor: String) -> Result<Vec<Listing>, StoreError> {
        let mut out = Vec::new();

        for _ in 0..self.config.max_pages {
            let page = match self.query(Endpoint::Banned, &cursor).await? {
                Reply::Page(page) => page,
                Reply::EndOfList => {
                    debug!(cursor = %cursor, listings = out.len(), "Banned list complete");
                    return Ok(out);
                }
                Reply::NotBlocked => {
                    return Err(StoreError::Protocol(
                        "check reply received from banned endpoint".to_string(),
                    ))
                }
            };

            if page.id.is_empty() {
                return Err(StoreError::Protocol("empty cursor received".to_string()));
            }

            let timestamp = parse_cursor_timestamp(&page.id)?;

            for addr in page.addresses() {
                match addr.trim().parse::<IpAddr>() {
                    Ok(ip) => out.push(Listing::for_host(ip, timestamp)),
                    Err(e) => {
                        warn!(address = %addr, error = %e, "Skipping unparsable address");
                    }
                }
            }

            debug!(
                cursor = %page.id,
                addresses = page.addresses().len(),
                "Fetched banned page"
            );
            cursor = page.id;
        }

        Err(StoreError::Protocol(format!(
            "banned list did not end within {} pages",
            self.config.max_pages
        )))
    }
}

/// Parse a cursor as Unix seconds.
fn parse_cursor_timestamp(cursor: &str) -> Result<DateTime<Utc>, StoreError> {
    cursor
        .parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .ok_or_else(|| StoreError::Protocol(format!("failed to parse cursor {cursor:?} as timestamp")))
}

#[async_trait]
impl<T: FeedTransport> Store for OfficialStore<T> {
    async fn add(&self, _listing: NewListing) -> Result<Listing, StoreError> {
        Err(StoreError::Unsupported("add on the read-only apiban.org feed"))
    }

    async fn exists(&self, ip: IpAddr) -> Result<Option<Listing>, StoreError> {
        match self.query_check(ip).await? {
            Some(page) => {
                // Check replies need not carry a numeric ID; blocked is blocked.
                let timestamp = parse_cursor_timestamp(&page.id).unwrap_or_else(|_| Utc::now());
                Ok(Some(Listing::for_host(ip, timestamp)))
            }
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<Listing>, StoreError> {
        self.list_from_time(default_start_timestamp()).await
    }

    async fn list_from_time(&self, t: DateTime<Utc>) -> Result<Vec<Listing>, StoreError> {
        self.list_from_cursor(t.timestamp().to_string()).await
    }

    async fn remove(&self, _id: &str) -> Result<(), StoreError> {
        Err(StoreError::Unsupported("remove on the read-only apiban.org feed"))
    }

    async fn reset(&self) -> Result<(), StoreError> {
        Err(StoreError::Unsupported("reset on the read-only apiban.org feed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{feed_config, ScriptedTransport};

    fn create_store() -> (OfficialStore<ScriptedTransport>, ScriptedTransport) {
        let transport = ScriptedTransport::new();
        let store = OfficialStore::with_transport(feed_config(), transport.clone()).unwrap();
        (store, transport)
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_missing_key() {
        let mut config = feed_config();
        config.api_key = String::new();
        let result = OfficialStore::with_transport(config, ScriptedTransport::new());
        assert!(matches!(result, Err(StoreError::InvalidInput(_))));
    }

    #[test]
    fn test_url_layout() {
        let (store, _) = create_store();
        assert_eq!(
            store.url(Endpoint::Banned, "100"),
            "http://feed.test/api/testKey/banned/100"
        );
        assert_eq!(
            store.url(Endpoint::Check, "1.2.3.4"),
            "http://feed.test/api/testKey/check/1.2.3.4"
        );
    }

    #[tokio::test]
    async fn test_first_page_is_end_of_list() {
        let (store, transport) = create_store();
        transport.push(200, r#"{"ID":"none"}"#);

        let listings = store.banned(None).await.unwrap();
        assert!(listings.is_empty());
        assert_eq!(
            transport.requests(),
            ["http://feed.test/api/testKey/banned/100"]
        );
    }

    #[tokio::test]
    async fn test_single_page_then_end() {
        let (store, transport) = create_store();
        transport
            .push(200, r#"{"ID":"150","ipaddress":["1.2.3.4"]}"#)
            .push(200, r#"{"ID":"none"}"#);

        let listings = store.list_from_time(at(100)).await.unwrap();
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].network.to_string(), "1.2.3.4/32");
        assert_eq!(listings[0].id, "1.2.3.4/32");
        assert_eq!(listings[0].timestamp, at(150));

        assert_eq!(
            transport.requests(),
            [
                "http://feed.test/api/testKey/banned/100",
                "http://feed.test/api/testKey/banned/150",
            ]
        );
    }

    #[tokio::test]
    async fn test_pages_accumulate_in_order() {
        let (store, transport) = create_store();
        transport
            .push(200, r#"{"ID":"200","ipaddress":["1.2.3.251","1.2.3.252"]}"#)
            .push(200, r#"{"ID":"300","ipaddress":["5.6.7.8","not-an-ip"]}"#)
            .push(400, r#"{"ipaddress":["no new bans"],"ID":"none"}"#);

        let listings = store.banned(Some("1234")).await.unwrap();
        let networks: Vec<String> = listings.iter().map(|l| l.network.to_string()).collect();
        assert_eq!(networks, ["1.2.3.251/32", "1.2.3.252/32", "5.6.7.8/32"]);
        assert!(listings.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert_eq!(listings[2].timestamp, at(300));
        assert_eq!(transport.requests()[0], "http://feed.test/api/testKey/banned/1234");
    }

    #[tokio::test]
    async fn test_empty_cursor() {
        let (store, transport) = create_store();
        transport.push(200, "{}");

        let err = store.banned(None).await.unwrap_err();
        assert!(matches!(err, StoreError::Protocol(ref msg) if msg == "empty cursor received"));
    }

    #[tokio::test]
    async fn test_unparsable_cursor() {
        let (store, transport) = create_store();
        transport.push(200, r#"{"ID":"abc","ipaddress":["1.2.3.4"]}"#);

        let err = store.banned(None).await.unwrap_err();
        assert!(matches!(err, StoreError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_unauthorized_drops_partial_results() {
        let (store, transport) = create_store();
        transport
            .push(200, r#"{"ID":"150","ipaddress":["1.2.3.4"]}"#)
            .push(401, r#"{"ID":"unauthorized"}"#);

        let err = store.banned(None).await.unwrap_err();
        assert!(matches!(err, StoreError::Unauthorized { .. }));
    }

    #[tokio::test]
    async fn test_server_error() {
        let (store, transport) = create_store();
        transport.push(500, "");

        match store.banned(None).await.unwrap_err() {
            StoreError::Upstream { status, reason, url } => {
                assert_eq!(status, 500);
                assert_eq!(reason, "Internal Server Error");
                assert_eq!(url, "http://feed.test/api/testKey/banned/100");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_page_limit() {
        let transport = ScriptedTransport::new();
        let mut config = feed_config();
        config.max_pages = 2;
        let store = OfficialStore::with_transport(config, transport.clone()).unwrap();
        transport
            .push(200, r#"{"ID":"100","ipaddress":["1.2.3.4"]}"#)
            .push(200, r#"{"ID":"100","ipaddress":["1.2.3.4"]}"#);

        let err = store.banned(None).await.unwrap_err();
        assert!(matches!(err, StoreError::Protocol(_)));
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test]
    async fn test_check_blocked() {
        let (store, transport) = create_store();
        transport.push(200, r#"{"ipaddress":["1.2.3.251"], "ID":"987654321"}"#);

        assert!(store.check("1.2.3.251".parse().unwrap()).await.unwrap());
        assert_eq!(
            transport.requests(),
            ["http://feed.test/api/testKey/check/1.2.3.251"]
        );
    }

    #[tokio::test]
    async fn test_check_not_blocked_via_400() {
        let (store, transport) = create_store();
        transport.push(400, r#"{"ipaddress":["not blocked"], "ID":"none"}"#);

        assert!(!store.check("1.2.3.254".parse().unwrap()).await.unwrap());
    }

    #[tokio::test]
    async fn test_check_rate_limited() {
        let (store, transport) = create_store();
        transport.push(429, r#"{"ipaddress":"rate limit exceeded"}"#);

        let err = store.check("1.2.3.251".parse().unwrap()).await.unwrap_err();
        assert!(matches!(err, StoreError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn test_check_unknown_key() {
        let (store, transport) = create_store();
        transport.push(404, "");

        let err = store.check("1.2.3.251".parse().unwrap()).await.unwrap_err();
        assert!(matches!(err, StoreError::Upstream { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_check_unrecognized_body() {
        let (store, transport) = create_store();
        transport.push(200, r#"{"ipaddress":["9.9.9.9"], "ID":"1"}"#);

        let err = store.check("1.2.3.251".parse().unwrap()).await.unwrap_err();
        assert!(matches!(err, StoreError::Upstream { .. }));
    }

    #[tokio::test]
    async fn test_check_unspecified_address() {
        let (store, transport) = create_store();

        let err = store.check("0.0.0.0".parse().unwrap()).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(_)));
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_exists() {
        let (store, transport) = create_store();
        transport
            .push(200, r#"{"ipaddress":["1.2.3.251"], "ID":"987654321"}"#)
            .push(400, r#"{"ipaddress":["not blocked"], "ID":"none"}"#);

        let listing = store.exists("1.2.3.251".parse().unwrap()).await.unwrap().unwrap();
        assert_eq!(listing.id, "1.2.3.251/32");
        assert_eq!(listing.timestamp, at(987_654_321));

        assert!(store.exists("1.2.3.254".parse().unwrap()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_exists_without_numeric_id() {
        let (store, transport) = create_store();
        transport
            .push(200, r#"{"ipaddress":["1.2.3.251"], "ID":"none"}"#)
            .push(200, r#"{"ipaddress":["1.2.3.251"], "ID":"none"}"#);

        let before = Utc::now();
        let listing = store.exists("1.2.3.251".parse().unwrap()).await.unwrap().unwrap();
        assert_eq!(listing.id, "1.2.3.251/32");
        assert!(listing.timestamp >= before);

        // Agrees with check on the same reply.
        assert!(store.check("1.2.3.251".parse().unwrap()).await.unwrap());
    }

    #[tokio::test]
    async fn test_mutation_unsupported() {
        let (store, transport) = create_store();

        let listing = NewListing::parse("1.2.3.4").unwrap();
        assert!(matches!(store.add(listing).await, Err(StoreError::Unsupported(_))));
        assert!(matches!(store.remove("1.2.3.4/32").await, Err(StoreError::Unsupported(_))));
        assert!(matches!(store.reset().await, Err(StoreError::Unsupported(_))));
        assert_eq!(transport.request_count(), 0);
    }
}
