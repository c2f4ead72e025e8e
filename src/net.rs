//! Request/response types and the network fetcher used on cache misses.

use std::collections::BTreeMap;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::config::NetworkConfig;

/// Errors raised while performing a live fetch.
#[derive(Error, Debug, Clone)]
pub enum FetchError {
  #[error("Network error: {0}")]
  Network(String),

  #[error("Invalid request: {0}")]
  InvalidRequest(String),
}

/// An intercepted resource request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub url: Url,
  pub method: String,
  pub headers: BTreeMap<String, String>,
}

impl Request {
  pub fn get(url: Url) -> Self {
    Self {
      url,
      method: "GET".to_string(),
      headers: BTreeMap::new(),
    }
  }

  /// Builder-style header insertion.
  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self
      .headers
      .insert(name.to_ascii_lowercase(), value.to_string());
    self
  }
}

/// A captured response: status, headers and the full body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub headers: BTreeMap<String, String>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: BTreeMap::new(),
      body: body.into(),
    }
  }

  /// 2xx status.
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// Something that can perform a live network fetch.
pub trait Fetcher: Send + Sync {
  fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response, FetchError>>;
}

/// Fetcher backed by a shared `reqwest` client.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new(config: &NetworkConfig) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .user_agent(config.user_agent.clone())
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }

  async fn execute(&self, request: &Request) -> Result<Response, FetchError> {
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
      .map_err(|e| FetchError::InvalidRequest(format!("{}: {}", request.method, e)))?;

    let mut builder = self.client.request(method, request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| FetchError::Network(format!("{}: {}", request.url, e)))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| FetchError::Network(format!("Failed to read body of {}: {}", request.url, e)))?;

    Ok(Response {
      status,
      headers,
      body: body.to_vec(),
    })
  }
}

impl Fetcher for HttpFetcher {
  fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response, FetchError>> {
    self.execute(request).boxed()
  }
}
