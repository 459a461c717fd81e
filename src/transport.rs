//! The HTTP seam between the fetchers and the network.
//!
//! Fetchers depend on [`Transport`] rather than on reqwest directly so that status codes and
//! headers stay visible to the rate-limit logic, and so tests can script upstream replies.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

const USER_AGENT: &str = concat!("issueflow/", env!("CARGO_PKG_VERSION"));

/// A fully-read HTTP response.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpReply {
    pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Issues a GET request. Non-2xx statuses are returned, not raised.
    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<HttpReply>;

    /// Issues a POST request with a JSON body. Non-2xx statuses are returned, not raised.
    async fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<HttpReply>;
}

/// Production transport backed by a shared reqwest client.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Builds a client that sends the GitHub media type and, when given, a bearer token
    /// on every request.
    pub fn new(token: Option<&str>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        if let Some(token) = token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()?;

        Ok(Self { client })
    }

    async fn read(response: reqwest::Response) -> Result<HttpReply> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();
        Ok(HttpReply {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<HttpReply> {
        let response = self.client.get(url).query(query).send().await?;
        Self::read(response).await
    }

    async fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<HttpReply> {
        let response = self.client.post(url).json(body).send().await?;
        Self::read(response).await
    }
}
