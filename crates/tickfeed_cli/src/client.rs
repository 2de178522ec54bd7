//! Blocking reqwest transport for the follower.

use crate::error::CliError;
use std::time::Duration;
use tickfeed_engine::{Headers, HttpClient, HttpResponse};
use url::Url;

/// Sends follower requests to one server with an optional basic-auth login.
#[derive(Debug)]
pub struct ReqwestClient {
    origin: String,
    client: reqwest::blocking::Client,
    credentials: Option<(String, Option<String>)>,
}

impl ReqwestClient {
    /// Creates a client for the server at `url`. Only the origin is kept;
    /// request paths are absolute.
    pub fn new(url: &Url, timeout: Duration) -> Result<Self, CliError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(concat!("tickfeed/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            origin: url.origin().ascii_serialization(),
            client,
            credentials: None,
        })
    }

    /// Authenticates every request with basic auth.
    pub fn with_basic_auth(mut self, username: String, password: Option<String>) -> Self {
        self.credentials = Some((username, password));
        self
    }

    /// Returns the scheme, host and port requests go to.
    pub fn origin(&self) -> &str {
        &self.origin
    }
}

impl HttpClient for ReqwestClient {
    fn get(&self, path: &str) -> Result<HttpResponse, String> {
        let mut request = self.client.get(format!("{}{}", self.origin, path));
        if let Some((username, password)) = &self.credentials {
            request = request.basic_auth(username, password.as_deref());
        }

        let response = request.send().map_err(|e| e.to_string())?;
        let status = response.status().as_u16();
        let headers: Headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.bytes().map_err(|e| e.to_string())?.to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
