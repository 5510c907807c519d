//! Reply classification for the apiban.org feed.
//!
//! The feed reuses HTTP 400 for end-of-list, not-blocked, bad credentials and
//! throttling, so the status code alone says little. Each reply is matched
//! against [`RULES`], first match wins, using the status and the markers in
//! the JSON body. Anything no rule claims is a hard error.

use super::transport::FeedResponse;
use super::StoreError;
use serde::Deserialize;

/// Cursor value marking the end of the list.
pub const END_OF_LIST_ID: &str = "none";

/// Address marker: the queried address is not listed.
pub const NOT_BLOCKED: &str = "not blocked";

/// Address marker: nothing new since the requested cursor.
pub const NO_NEW_BANS: &str = "no new bans";

/// ID marker: the key was rejected.
pub const UNAUTHORIZED_ID: &str = "unauthorized";

/// Address marker: the key is being throttled.
pub const RATE_LIMIT_EXCEEDED: &str = "rate limit exceeded";

/// One page of the feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Page {
    /// Cursor of the next page, or a sentinel.
    #[serde(rename = "ID", default)]
    pub id: String,

    /// Listed addresses, or a sentinel. Absent and `null` both mean none.
    #[serde(rename = "ipaddress", default)]
    addresses: Option<Addresses>,
}

impl Page {
    pub fn addresses(&self) -> &[String] {
        match &self.addresses {
            Some(Addresses::Many(list)) => list,
            Some(Addresses::One(one)) => std::slice::from_ref(one),
            None => &[],
        }
    }

    fn first_address(&self) -> Option<&str> {
        self.addresses().first().map(String::as_str)
    }
}

/// Error bodies carry a bare string where pages carry an array.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
enum Addresses {
    Many(Vec<String>),
    One(String),
}

/// Feed endpoint a reply came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Banned,
    Check,
}

#[derive(Debug, Clone, Copy)]
enum Scope {
    Any,
    Only(Endpoint),
}

impl Scope {
    fn matches(self, endpoint: Endpoint) -> bool {
        match self {
            Scope::Any => true,
            Scope::Only(e) => e == endpoint,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum StatusMatch {
    Exact(u16),
    Success,
    ClientError,
}

impl StatusMatch {
    fn matches(self, status: u16) -> bool {
        match self {
            StatusMatch::Exact(code) => code == status,
            StatusMatch::Success => (200..300).contains(&status),
            StatusMatch::ClientError => (400..500).contains(&status),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Marker {
    Any,
    Id(&'static str),
    Address(&'static str),
}

impl Marker {
    fn matches(self, page: Option<&Page>) -> bool {
        match self {
            Marker::Any => true,
            Marker::Id(id) => page.is_some_and(|p| p.id == id),
            Marker::Address(addr) => page.and_then(Page::first_address) == Some(addr),
        }
    }
}

/// What a matched reply means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A data page.
    Continue,
    /// The list is complete.
    EndOfList,
    /// The queried address is not listed.
    NotBlocked,
    Unauthorized,
    RateLimited,
}

#[derive(Debug, Clone, Copy)]
struct Rule {
    scope: Scope,
    status: StatusMatch,
    marker: Marker,
    outcome: Outcome,
}

const fn rule(scope: Scope, status: StatusMatch, marker: Marker, outcome: Outcome) -> Rule {
    Rule {
        scope,
        status,
        marker,
        outcome,
    }
}

/// The decision table. Order matters: the catch-all success row is last.
const RULES: &[Rule] = &[
    rule(Scope::Any, StatusMatch::Exact(401), Marker::Any, Outcome::Unauthorized),
    rule(Scope::Any, StatusMatch::Exact(429), Marker::Any, Outcome::RateLimited),
    rule(
        Scope::Any,
        StatusMatch::ClientError,
        Marker::Id(UNAUTHORIZED_ID),
        Outcome::Unauthorized,
    ),
    rule(
        Scope::Any,
        StatusMatch::ClientError,
        Marker::Address(RATE_LIMIT_EXCEEDED),
        Outcome::RateLimited,
    ),
    rule(
        Scope::Only(Endpoint::Banned),
        StatusMatch::Success,
        Marker::Id(END_OF_LIST_ID),
        Outcome::EndOfList,
    ),
    rule(
        Scope::Only(Endpoint::Banned),
        StatusMatch::Exact(400),
        Marker::Address(NO_NEW_BANS),
        Outcome::EndOfList,
    ),
    rule(
        Scope::Only(Endpoint::Check),
        StatusMatch::Success,
        Marker::Address(NOT_BLOCKED),
        Outcome::NotBlocked,
    ),
    rule(
        Scope::Only(Endpoint::Check),
        StatusMatch::ClientError,
        Marker::Address(NOT_BLOCKED),
        Outcome::NotBlocked,
    ),
    rule(Scope::Any, StatusMatch::Success, Marker::Any, Outcome::Continue),
];

/// A classified reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Page(Page),
    EndOfList,
    NotBlocked,
}

/// Classify a raw reply from `endpoint`, requested from `url`.
pub fn classify(endpoint: Endpoint, response: &FeedResponse, url: &str) -> Result<Reply, StoreError> {
    let decoded = serde_json::from_str::<Page>(&response.body);
    let page = decoded.as_ref().ok();

    let outcome = RULES
        .iter()
        .find(|r| {
            r.scope.matches(endpoint) && r.status.matches(response.status) && r.marker.matches(page)
        })
        .map(|r| r.outcome);

    match outcome {
        Some(Outcome::Continue) => decoded.map(Reply::Page).map_err(|e| {
            StoreError::Protocol(format!("failed to decode server response from {url:?}: {e}"))
        }),
        Some(Outcome::EndOfList) => Ok(Reply::EndOfList),
        Some(Outcome::NotBlocked) => Ok(Reply::NotBlocked),
        Some(Outcome::Unauthorized) => Err(StoreError::Unauthorized {
            url: url.to_string(),
        }),
        Some(Outcome::RateLimited) => Err(StoreError::RateLimited {
            url: url.to_string(),
        }),
        None => Err(StoreError::Upstream {
            status: response.status,
            reason: response.reason().to_string(),
            url: url.to_string(),
        }),
    }
}
