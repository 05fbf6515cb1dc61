use std::collections::BTreeMap;
use std::future::Future;

use reqwest::{header, Method, Url};
use serde::Serialize;
use serde_json::Value;

use super::TransportError;
use crate::auth::AuthArtifacts;

/// One call to forward to the remote API.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    /// Path relative to the API base, e.g. `/project`
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    /// JSON bodies are sent as JSON; a JSON string is sent as raw text.
    pub body: Option<Value>,
}

impl ProxyRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Add a query parameter, skipping empty values.
    pub fn param(mut self, key: &str, value: impl ToString) -> Self {
        let value = value.to_string();
        if !value.is_empty() {
            self.query.push((key.to_string(), value));
        }
        self
    }
}

/// What came back from the remote, passed to the caller as-is.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProxyResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
}

impl ProxyResponse {
    /// The remote's "session invalid" convention is a plain 401.
    pub fn is_auth_rejected(&self) -> bool {
        self.status == 401
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub(crate) async fn from_response(response: reqwest::Response) -> Result<Self, TransportError> {
        let status = response.status().as_u16();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let is_json = headers
            .get(header::CONTENT_TYPE.as_str())
            .map(|ct| ct.starts_with("application/json"))
            .unwrap_or(false);

        let text = response.text().await?;
        let body = if is_json {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        } else {
            Value::String(text)
        };

        Ok(Self {
            status,
            headers,
            body,
        })
    }
}

/// Issues calls to the remote API with a session's artifacts attached.
///
/// Per-call timeouts and TLS policy belong to the implementation.
pub trait Transport: Send + Sync + 'static {
    /// Absolute URL the request would be sent to; checked against the host guard first.
    fn target_url(&self, request: &ProxyRequest) -> Result<Url, TransportError>;

    fn forward(
        &self,
        artifacts: &AuthArtifacts,
        request: &ProxyRequest,
    ) -> impl Future<Output = Result<ProxyResponse, TransportError>> + Send;
}

/// `host[:port]` of a URL, the form the host guard compares.
pub fn host_of(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_skips_empty() {
        let request = ProxyRequest::get("/project")
            .param("Fields", "Id,Name")
            .param("OrderBy", "")
            .param("MaxObjects", 50);
        assert_eq!(
            request.query,
            vec![
                ("Fields".to_string(), "Id,Name".to_string()),
                ("MaxObjects".to_string(), "50".to_string()),
            ]
        );
    }

    #[test]
    fn test_host_of() {
        let url = Url::parse("https://ca1.p6.oraclecloud.com/metrolinx/p6ws/restapi/obs").unwrap();
        assert_eq!(host_of(&url), "ca1.p6.oraclecloud.com");

        let url = Url::parse("http://localhost:8206/p6ws/restapi").unwrap();
        assert_eq!(host_of(&url), "localhost:8206");
    }

    #[test]
    fn test_auth_rejected_is_401_only() {
        let response = |status| ProxyResponse {
            status,
            headers: BTreeMap::new(),
            body: Value::Null,
        };
        assert!(response(401).is_auth_rejected());
        assert!(!response(403).is_auth_rejected());
        assert!(!response(500).is_auth_rejected());
        assert!(response(204).is_success());
    }
}
