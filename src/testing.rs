//! Test doubles shared by the unit tests.

use crate::config::FeedConfig;
use crate::store::transport::{FeedResponse, FeedTransport};
use crate::store::StoreError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Feed config pointing at a host nothing resolves.
pub fn feed_config() -> FeedConfig {
    FeedConfig {
        api_key: "testKey".to_string(),
        root_url: "http://feed.test/api/".to_string(),
        ..FeedConfig::default()
    }
}

#[derive(Default)]
struct Script {
    replies: VecDeque<FeedResponse>,
    requests: Vec<String>,
}

/// Transport that replays queued replies in order and records every URL.
///
/// Panics when asked for more replies than were queued, so an unexpected
/// upstream request fails the test.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply.
    pub fn push(&self, status: u16, body: &str) -> &Self {
        self.script
            .lock()
            .unwrap()
            .replies
            .push_back(FeedResponse::new(status, body));
        self
    }

    /// URLs requested so far.
    pub fn requests(&self) -> Vec<String> {
        self.script.lock().unwrap().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.script.lock().unwrap().requests.len()
    }
}

#[async_trait]
impl FeedTransport for ScriptedTransport {
    async fn get(&self, url: &str) -> Result<FeedResponse, StoreError> {
        let mut script = self.script.lock().unwrap();
        script.requests.push(url.to_string());
        let reply = script.replies.pop_front();
        Ok(reply.unwrap_or_else(|| panic!("no scripted reply for {url}")))
    }
}
