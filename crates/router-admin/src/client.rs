//! Reusable admin client handle for one router
//!
//! A `RouterClient` is the value kept in the client cache. It owns the HTTP
//! client used to reach one router's admin endpoint and a closed flag that is
//! set when the cache releases it. Closing only retires the handle: the cache
//! never hands it out again, but a refresh already bound to it (for example
//! one queued behind the concurrency limit when a sweep lands) still runs.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::Deserialize;
use tracing::debug;

use crate::{AdminError, Result};

/// Path of the mount table refresh endpoint on a router admin server.
pub const REFRESH_PATH: &str = "/admin/mount-table/refresh";

/// Body returned by the refresh endpoint.
#[derive(Debug, Deserialize)]
struct RefreshResponse {
    refreshed: bool,
}

/// Admin client bound to one router address.
#[derive(Debug)]
pub struct RouterClient {
    address: String,
    base_url: String,
    http: reqwest::Client,
    closed: AtomicBool,
}

impl RouterClient {
    /// Create a client for `address`, sending requests to `base_url`.
    pub fn new(address: impl Into<String>, base_url: impl Into<String>, http: reqwest::Client) -> Self {
        let base_url = base_url.into();
        Self {
            address: address.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            closed: AtomicBool::new(false),
        }
    }

    /// Create a client whose base URL is derived from a `host:port` address.
    /// Addresses that already carry an http(s) scheme are used as-is.
    pub fn for_address(address: &str, http: reqwest::Client) -> Self {
        let base_url = if address.starts_with("http://") || address.starts_with("https://") {
            address.to_string()
        } else {
            format!("http://{address}")
        };
        Self::new(address, base_url, http)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Release the handle. Closing twice is an error.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(AdminError::Closed(self.address.clone()));
        }
        debug!(address = %self.address, "router client closed");
        Ok(())
    }

    /// POST a mount table refresh to the router and report whether it applied.
    pub async fn refresh_mount_table(&self) -> Result<bool> {
        if self.is_closed() {
            debug!(address = %self.address, "refreshing through a retired router client");
        }

        let url = format!("{}{REFRESH_PATH}", self.base_url);
        let response = self
            .http
            .post(&url)
            .send()
            .await
            .map_err(|e| AdminError::Request {
                address: self.address.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            return Err(AdminError::Status {
                address: self.address.clone(),
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await.map_err(|e| AdminError::Request {
            address: self.address.clone(),
            message: e.to_string(),
        })?;
        let body: RefreshResponse =
            serde_json::from_slice(&bytes).map_err(|e| AdminError::InvalidResponse {
                address: self.address.clone(),
                message: e.to_string(),
            })?;

        debug!(address = %self.address, refreshed = body.refreshed, "mount table refresh answered");
        Ok(body.refreshed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn for_address_adds_http_scheme() {
        let client = RouterClient::for_address("10.0.0.2:8111", reqwest::Client::new());
        assert_eq!(client.address(), "10.0.0.2:8111");
        assert_eq!(client.base_url(), "http://10.0.0.2:8111");
    }

    #[test]
    fn for_address_keeps_existing_scheme() {
        let client = RouterClient::for_address("https://router-a:8111/", reqwest::Client::new());
        assert_eq!(client.base_url(), "https://router-a:8111");
    }

    #[test]
    fn close_twice_fails() {
        let client = RouterClient::for_address("r1:8111", reqwest::Client::new());
        assert!(!client.is_closed());
        client.close().unwrap();
        assert!(client.is_closed());
        assert!(matches!(client.close(), Err(AdminError::Closed(addr)) if addr == "r1:8111"));
    }

    #[tokio::test]
    async fn closed_client_still_reaches_router() {
        let client = RouterClient::for_address("127.0.0.1:1", reqwest::Client::new());
        client.close().unwrap();
        let err = client.refresh_mount_table().await.unwrap_err();
        assert!(matches!(err, AdminError::Request { .. }), "got: {err:?}");
    }
}
