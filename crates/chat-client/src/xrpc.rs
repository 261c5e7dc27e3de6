//! XRPC transport for the chat service
//!
//! Chat endpoints are plain XRPC calls routed through the user's PDS with an
//! `atproto-proxy` header naming the chat service. This module provides the
//! request/response types and the `reqwest`-backed client that executes them.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use reqwest::{Client as ReqwestClient, Response as ReqwestResponse};

use crate::error::{ChatApiError, Result};

/// Proxy target for the Bluesky chat service
pub const DEFAULT_CHAT_PROXY: &str = "did:web:api.bsky.chat#bsky_chat";

// =============================================================================
// Request Types
// =============================================================================

/// HTTP method for XRPC requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// GET request (used for queries)
    Get,
    /// POST request (used for procedures)
    Post,
}

impl HttpMethod {
    /// Method name as sent on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

/// A request to a single XRPC endpoint
#[derive(Debug, Clone)]
pub struct XrpcRequest {
    /// HTTP method
    pub method: HttpMethod,
    /// NSID path (e.g., "chat.bsky.convo.listConvos")
    pub nsid: String,
    /// Query parameters, in insertion order
    pub params: Vec<(String, String)>,
    /// JSON body (procedures only)
    pub body: Option<Vec<u8>>,
}

impl XrpcRequest {
    /// Create a new GET request (query)
    pub fn query(nsid: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            nsid: nsid.into(),
            params: Vec::new(),
            body: None,
        }
    }

    /// Create a new POST request (procedure)
    pub fn procedure(nsid: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Post,
            nsid: nsid.into(),
            params: Vec::new(),
            body: None,
        }
    }

    /// Add a query parameter
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Set the request body from JSON
    pub fn json_body<T: Serialize>(mut self, value: &T) -> Result<Self> {
        let body =
            serde_json::to_vec(value).map_err(|e| ChatApiError::InvalidRequest(e.to_string()))?;
        self.body = Some(body);
        Ok(self)
    }
}

/// Successful XRPC response
#[derive(Debug, Clone)]
pub struct XrpcResponse<T> {
    /// HTTP status code
    pub status: u16,
    /// Decoded body
    pub data: T,
}

/// Standard XRPC error body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XrpcErrorResponse {
    /// Error code
    pub error: String,
    /// Error message
    #[serde(default)]
    pub message: String,
}

// =============================================================================
// Client Configuration
// =============================================================================

/// Configuration for the XRPC client
#[derive(Debug, Clone)]
pub struct XrpcClientConfig {
    /// Base service URL of the user's PDS (e.g., "https://bsky.social")
    pub service_url: String,
    /// Request timeout
    pub timeout: Duration,
    /// User agent string
    pub user_agent: String,
    /// Bearer token for the signed-in account
    pub access_token: Option<String>,
    /// Value of the `atproto-proxy` header, if chat calls are proxied
    pub proxy: Option<String>,
}

impl Default for XrpcClientConfig {
    fn default() -> Self {
        Self {
            service_url: "https://bsky.social".to_string(),
            timeout: Duration::from_secs(30),
            user_agent: format!("dm-sync/{}", env!("CARGO_PKG_VERSION")),
            access_token: None,
            proxy: Some(DEFAULT_CHAT_PROXY.to_string()),
        }
    }
}

impl XrpcClientConfig {
    /// Create a new config with a service URL
    pub fn new(service_url: impl Into<String>) -> Self {
        Self {
            service_url: service_url.into(),
            ..Default::default()
        }
    }

    /// Set the timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the user agent
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set the bearer token
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Set or remove the `atproto-proxy` header
    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }
}

// =============================================================================
// Client
// =============================================================================

/// XRPC client for chat endpoints
#[derive(Debug, Clone)]
pub struct XrpcClient {
    client: ReqwestClient,
    config: XrpcClientConfig,
}

impl XrpcClient {
    /// Create a new XRPC client
    pub fn new(config: XrpcClientConfig) -> Self {
        let client = ReqwestClient::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .expect("Failed to build HTTP client");

        Self { client, config }
    }

    /// Execute a request and decode the JSON response body
    pub async fn call<T>(&self, request: XrpcRequest) -> Result<XrpcResponse<T>>
    where
        T: for<'de> Deserialize<'de>,
    {
        let url = format!(
            "{}/xrpc/{}",
            self.config.service_url.trim_end_matches('/'),
            request.nsid
        );

        let mut req = match request.method {
            HttpMethod::Get => self.client.get(&url),
            HttpMethod::Post => self.client.post(&url),
        };

        if !request.params.is_empty() {
            req = req.query(&request.params);
        }
        if let Some(token) = &self.config.access_token {
            req = req.bearer_auth(token);
        }
        if let Some(proxy) = &self.config.proxy {
            req = req.header("atproto-proxy", proxy);
        }
        if let Some(body) = request.body {
            req = req.header("Content-Type", "application/json").body(body);
        }

        tracing::trace!(nsid = %request.nsid, method = request.method.as_str(), "xrpc request");

        let response = req.send().await.map_err(|e| ChatApiError::from_reqwest(&e))?;
        self.parse_response(response).await
    }

    async fn parse_response<T>(&self, response: ReqwestResponse) -> Result<XrpcResponse<T>>
    where
        T: for<'de> Deserialize<'de>,
    {
        let status = response.status();
        let body = response.text().await.map_err(|e| ChatApiError::from_reqwest(&e))?;

        if !status.is_success() {
            return Err(match serde_json::from_str::<XrpcErrorResponse>(&body) {
                Ok(error_response) => ChatApiError::xrpc(
                    status.as_u16(),
                    error_response.error,
                    error_response.message,
                ),
                Err(_) => ChatApiError::xrpc(
                    status.as_u16(),
                    "Unknown",
                    format!("HTTP {}: {}", status.as_u16(), body),
                ),
            });
        }

        let data: T = serde_json::from_str(&body)
            .map_err(|e| ChatApiError::Decode(format!("Failed to parse JSON: {}", e)))?;

        Ok(XrpcResponse {
            status: status.as_u16(),
            data,
        })
    }

    /// Get the client configuration
    pub fn config(&self) -> &XrpcClientConfig {
        &self.config
    }
}
