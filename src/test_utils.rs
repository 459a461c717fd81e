//! Test utilities for scripting upstream HTTP replies.
//!
//! [`ScriptedTransport`] plays back canned replies per URL pattern and records every request,
//! so the real pagination, backoff and forecast code paths run against it unchanged.

use crate::transport::{HttpReply, Transport};
use anyhow::Result;
use async_trait::async_trait;
use reqwest::header::{HeaderValue, RETRY_AFTER};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

/// A request observed by a [`ScriptedTransport`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: &'static str,
    /// The URL followed by `?k=v&...` for any query pairs, unencoded.
    pub line: String,
    pub body: Option<Value>,
}

struct Route {
    pattern: String,
    replies: VecDeque<HttpReply>,
}

/// A [`Transport`] that answers from scripted replies.
///
/// A request is routed to the longest registered pattern contained in its request line.
/// Each route answers with its replies in order; an exhausted or missing route answers 404.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, pattern: &str, replies: impl IntoIterator<Item = HttpReply>) -> Self {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Route {
                pattern: pattern.to_string(),
                replies: replies.into_iter().collect(),
            });
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of recorded requests whose line contains `pattern`.
    pub fn count_matching(&self, pattern: &str) -> usize {
        self.requests()
            .iter()
            .filter(|request| request.line.contains(pattern))
            .count()
    }

    fn answer(&self, method: &'static str, line: String, body: Option<Value>) -> HttpReply {
        let reply = {
            let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
            routes
                .iter_mut()
                .filter(|route| line.contains(&route.pattern))
                .max_by_key(|route| route.pattern.len())
                .and_then(|route| route.replies.pop_front())
        };

        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedRequest { method, line, body });

        reply.unwrap_or_else(|| HttpReply::new(StatusCode::NOT_FOUND, r#"{"message":"Not Found"}"#))
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<HttpReply> {
        let line = if query.is_empty() {
            url.to_string()
        } else {
            let pairs: Vec<String> = query.iter().map(|(k, v)| format!("{k}={v}")).collect();
            format!("{url}?{}", pairs.join("&"))
        };
        Ok(self.answer("GET", line, None))
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<HttpReply> {
        Ok(self.answer("POST", url.to_string(), Some(body.clone())))
    }
}

/// A 200 reply with a JSON body.
pub fn ok_json(body: Value) -> HttpReply {
    HttpReply::new(StatusCode::OK, body.to_string())
}

/// A 200 search reply carrying `items`.
pub fn search_page(items: Vec<Value>) -> HttpReply {
    ok_json(json!({ "total_count": items.len(), "items": items }))
}

/// A 429 reply, optionally carrying a `retry-after` header in seconds.
pub fn rate_limited(retry_after_secs: Option<u64>) -> HttpReply {
    let mut reply = HttpReply::new(
        StatusCode::TOO_MANY_REQUESTS,
        r#"{"message":"API rate limit exceeded"}"#,
    );
    if let Some(secs) = retry_after_secs {
        reply
            .headers
            .insert(RETRY_AFTER, HeaderValue::from(secs));
    }
    reply
}

/// A search item shaped like the GitHub issue search API.
pub fn issue_json(number: u64, created_at: &str, closed_at: Option<&str>) -> Value {
    json!({
        "id": 1000 + number,
        "number": number,
        "title": format!("Issue {number}"),
        "state": if closed_at.is_some() { "closed" } else { "open" },
        "created_at": created_at,
        "closed_at": closed_at,
        "labels": [{ "name": "bug" }],
        "user": { "login": "octocat" },
    })
}
