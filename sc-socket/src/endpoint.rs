//! Endpoint description and its encoding into a WebSocket request.

use std::collections::BTreeMap;

use url::Url;

use sc_core::config::ServerConfig;
use sc_core::constants::CONNECT_PATH;
use sc_core::error::{ScError, ScResult};

/// Immutable description of the socket endpoint to connect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Path relative to the server address.
    pub path: String,
    /// Additional query parameters.
    pub query_items: BTreeMap<String, String>,
    /// Additional request headers.
    pub headers: BTreeMap<String, String>,
}

impl Endpoint {
    /// Endpoint at `path` with no extra parameters.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query_items: BTreeMap::new(),
            headers: BTreeMap::new(),
        }
    }

    /// The default real-time endpoint.
    pub fn connect() -> Self {
        Self::new(CONNECT_PATH)
    }

    pub fn with_query_item(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_items.insert(name.into(), value.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// A fully resolved WebSocket request.
///
/// Two requests are equal when their URL and headers are equal; the socket
/// manager reuses its engine only for an equal request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsRequest {
    /// Absolute `ws://` or `wss://` URL.
    pub url: String,
    /// Headers in the order they are sent.
    pub headers: Vec<(String, String)>,
}

impl WsRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }

    /// Value of the first header named `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Resolves an [`Endpoint`] into a [`WsRequest`].
pub trait RequestEncoder: Send + Sync {
    fn encode_request(&self, endpoint: &Endpoint) -> ScResult<WsRequest>;
}

/// Encoder that authenticates with an API key and an optional user token.
#[derive(Debug, Clone)]
pub struct DefaultRequestEncoder {
    base_url: String,
    api_key: String,
    user_token: Option<String>,
    custom_headers: BTreeMap<String, String>,
}

impl DefaultRequestEncoder {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            user_token: None,
            custom_headers: BTreeMap::new(),
        }
    }

    /// Authenticate as a user with a JWT.
    pub fn with_user_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.user_token = (!token.is_empty()).then_some(token);
        self
    }

    /// Send an extra header with every request.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_headers.insert(name.into(), value.into());
        self
    }

    /// Build an encoder from the server section of the app config.
    pub fn from_server_config(config: &ServerConfig) -> Self {
        let mut encoder = Self::new(config.address.clone(), config.api_key.clone())
            .with_user_token(config.user_token.clone());
        encoder.custom_headers = config.custom_headers.clone();
        encoder
    }

    fn base_url(&self) -> ScResult<Url> {
        if self.base_url.is_empty() {
            return Err(ScError::MissingConfig("server address".into()));
        }
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ScError::RequestEncoding(format!("invalid server address: {e}")))?;

        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(ScError::RequestEncoding(format!(
                    "unsupported scheme: {other}"
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| ScError::RequestEncoding(format!("cannot switch scheme to {scheme}")))?;
        Ok(url)
    }
}

impl RequestEncoder for DefaultRequestEncoder {
    fn encode_request(&self, endpoint: &Endpoint) -> ScResult<WsRequest> {
        let mut url = self.base_url()?;

        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                ScError::RequestEncoding("server address cannot be a base".into())
            })?;
            segments
                .pop_if_empty()
                .extend(endpoint.path.split('/').filter(|s| !s.is_empty()));
        }

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("api_key", &self.api_key);
            let auth_type = if self.user_token.is_some() { "jwt" } else { "anonymous" };
            query.append_pair("stream-auth-type", auth_type);
            for (name, value) in &endpoint.query_items {
                query.append_pair(name, value);
            }
        }

        let mut headers = Vec::new();
        if let Some(token) = &self.user_token {
            headers.push(("Authorization".to_string(), token.clone()));
        }
        for (name, value) in self.custom_headers.iter().chain(&endpoint.headers) {
            headers.push((name.clone(), value.clone()));
        }

        Ok(WsRequest {
            url: url.to_string(),
            headers,
        })
    }
}
