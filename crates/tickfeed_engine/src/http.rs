//! HTTP transport abstraction.
//!
//! The follower only needs "GET path, get back status, headers and body".
//! Connection pooling, TLS, authentication and timeouts belong to the
//! [`HttpClient`] implementation.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tickfeed_protocol::{Tick, LAST_INCLUDED_HEADER};

/// Response headers, keyed by lowercase name.
pub type Headers = HashMap<String, String>;

/// A complete HTTP response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code; `0` for a transport failure.
    pub status: u16,
    /// Response headers.
    pub headers: Headers,
    /// Raw body bytes.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates an empty response with a status.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    /// Creates a status `0` response describing a transport failure.
    pub fn transport_failure(message: impl Into<String>) -> Self {
        Self::new(0).with_body(message.into())
    }

    /// Adds a header. Names are stored lowercase.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Sets the body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Looks up a header, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual transport (reqwest, hyper,
/// ureq, ...). An `Err` means no response was received; the follower treats
/// it as status `0`.
pub trait HttpClient: Send + Sync {
    /// Sends a GET request for `path` and returns the full response.
    fn get(&self, path: &str) -> Result<HttpResponse, String>;
}

impl<C: HttpClient + ?Sized> HttpClient for Arc<C> {
    fn get(&self, path: &str) -> Result<HttpResponse, String> {
        (**self).get(path)
    }
}

impl<C: HttpClient + ?Sized> HttpClient for Box<C> {
    fn get(&self, path: &str) -> Result<HttpResponse, String> {
        (**self).get(path)
    }
}

type Scripted = Result<HttpResponse, String>;

/// A scripted client for tests.
///
/// Logger-state and logger-follow requests each pop from their own queue.
/// An exhausted follow queue answers with an empty tail; an exhausted state
/// queue answers with a transport failure. Every requested path is recorded.
#[derive(Debug, Default)]
pub struct MockHttpClient {
    state_responses: Mutex<VecDeque<Scripted>>,
    follow_responses: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<String>>,
}

impl MockHttpClient {
    /// Creates a client with empty scripts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a logger-state response.
    pub fn push_state(&self, response: HttpResponse) {
        self.state_responses.lock().push_back(Ok(response));
    }

    /// Queues a successful logger-state response for `tick`.
    pub fn push_state_tick(&self, tick: u64) {
        self.push_state(Self::state_response(tick));
    }

    /// Queues a logger-follow response.
    pub fn push_follow(&self, response: HttpResponse) {
        self.follow_responses.lock().push_back(Ok(response));
    }

    /// Queues a transport failure for the next follow request.
    pub fn push_follow_failure(&self, message: impl Into<String>) {
        self.follow_responses.lock().push_back(Err(message.into()));
    }

    /// Returns every requested path, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    /// Returns the paths of follow requests only.
    pub fn follow_requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .filter(|p| p.contains("/logger-follow"))
            .cloned()
            .collect()
    }

    /// Returns the number of scripted follow responses not yet consumed.
    pub fn pending_follow(&self) -> usize {
        self.follow_responses.lock().len()
    }

    /// Builds a logger-state body for `tick`.
    pub fn state_response(tick: u64) -> HttpResponse {
        HttpResponse::new(200).with_body(format!(
            r#"{{"state":{{"running":true,"lastLogTick":"{tick}"}},"server":{{"version":"3.11.0"}}}}"#
        ))
    }

    /// Builds a follow response carrying `records` up to `last_included`.
    pub fn follow_response(last_included: u64, records: &[&str]) -> HttpResponse {
        let mut body = records.join("\n");
        if !body.is_empty() {
            body.push('\n');
        }
        HttpResponse::new(200)
            .with_header(LAST_INCLUDED_HEADER, Tick::from(last_included).to_string())
            .with_body(body)
    }

    /// Builds an empty-tail follow response.
    pub fn empty_tail() -> HttpResponse {
        HttpResponse::new(204).with_header(LAST_INCLUDED_HEADER, "0")
    }
}

impl HttpClient for MockHttpClient {
    fn get(&self, path: &str) -> Result<HttpResponse, String> {
        self.requests.lock().push(path.to_string());

        if path.contains("/logger-state") {
            self.state_responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err("no scripted logger-state response".into()))
        } else if path.contains("/logger-follow") {
            self.follow_responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(Self::empty_tail()))
        } else {
            Ok(HttpResponse::new(404))
        }
    }
}
