//! HTTP dispatch boundary
//!
//! The engine treats transports as a black box: method, URL and parameters
//! in, status and body out. Anything failing below that line surfaces as
//! [`Error::Http`].

use apiplan_core::{Error, Method};
use serde_json::Value;

/// One outgoing request, fully assembled.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub form: Vec<(String, String)>,
    pub body: Option<Value>,
}

/// Status and raw body of the server's answer.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
}

pub trait Transport {
    fn send(&mut self, request: &Request) -> Result<Response, Error>;
}

/// Blocking HTTP client.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    /// # Errors
    ///
    /// Returns `Error::Http` if the client cannot be built.
    pub fn new() -> Result<Self, Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| Error::http(e.to_string()))?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn send(&mut self, request: &Request) -> Result<Response, Error> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Put => reqwest::Method::PUT,
            Method::Post => reqwest::Method::POST,
            Method::Delete => reqwest::Method::DELETE,
            Method::Head => reqwest::Method::HEAD,
            Method::Patch => reqwest::Method::PATCH,
            Method::Options => reqwest::Method::OPTIONS,
        };
        let mut req = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            req = req.header(name, value);
        }
        if !request.query.is_empty() {
            req = req.query(&request.query);
        }
        if !request.form.is_empty() {
            req = req.form(&request.form);
        } else if let Some(body) = &request.body {
            req = req.json(body);
        }
        let resp = req.send().map_err(|e| Error::http(e.to_string()))?;
        let status = resp.status().as_u16();
        let body = resp.bytes().map_err(|e| Error::http(e.to_string()))?.to_vec();
        Ok(Response { status, body })
    }
}
