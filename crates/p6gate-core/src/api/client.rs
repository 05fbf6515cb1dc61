//! HTTP client for the Primavera P6 REST API.
//!
//! `P6Client` is both the login adapter used by the session manager and the
//! transport that forwards proxied calls with a session's cookies attached.

use std::time::Duration;

use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Url};
use serde_json::Value;
use tracing::{debug, warn};

use super::error::truncate_body;
use super::transport::{ProxyRequest, ProxyResponse, Transport};
use super::TransportError;
use crate::auth::{AuthAdapter, AuthArtifacts, AuthError, Credentials, ProbeResult};
use crate::config::Config;

/// Response headers that may carry the session token after login
const TOKEN_HEADERS: [&str; 2] = ["AuthToken", "X-Auth-Token"];

/// JSON body keys that may carry the session token after login
const TOKEN_BODY_KEYS: [&str; 3] = ["AuthToken", "authToken", "token"];

/// Request headers owned by the session; callers cannot override them.
const SESSION_HEADERS: [&str; 2] = ["cookie", "authtoken"];

/// API client for P6.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct P6Client {
    client: Client,
    base_url: String,
    accept: String,
    version: Option<String>,
    probe_path: String,
}

impl P6Client {
    pub fn new(config: &Config) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(Duration::from_secs_f64(config.request_timeout_secs))
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            accept: config.accept.clone(),
            version: config.version.clone().filter(|v| !v.is_empty()),
            probe_path: config.probe_path.clone(),
        })
    }

    /// `{base}{/path}` with the query appended.
    pub fn build_url(&self, path: &str, query: &[(String, String)]) -> Result<Url, TransportError> {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        let mut url = Url::parse(&format!("{}{}", self.base_url, path))
            .map_err(|e| TransportError::InvalidRequest(format!("bad target URL: {}", e)))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    /// Headers for a call made with `artifacts`, merged over caller extras.
    fn session_headers(
        &self,
        artifacts: &AuthArtifacts,
        extra: &[(String, String)],
    ) -> Result<HeaderMap, TransportError> {
        let mut headers = HeaderMap::new();

        for (name, value) in extra {
            if SESSION_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
                debug!(header = %name, "Ignoring caller-supplied session header");
                continue;
            }
            headers.insert(header_name(name)?, header_value(value)?);
        }

        if !headers.contains_key(header::ACCEPT) {
            headers.insert(header::ACCEPT, header_value(&self.accept)?);
        }
        if let Some(ref version) = self.version {
            headers.insert(HeaderName::from_static("version"), header_value(version)?);
        }
        if !artifacts.cookies.is_empty() {
            headers.insert(header::COOKIE, header_value(&artifacts.cookies)?);
        }
        if let Some(ref token) = artifacts.auth_token {
            headers.insert(HeaderName::from_static("authtoken"), header_value(token)?);
        }
        Ok(headers)
    }

    /// POST credentials to `/login` and collect the session cookies and token.
    async fn login(&self, credentials: &Credentials) -> Result<AuthArtifacts, AuthError> {
        let mut url = self.build_url("/login", &[])?;
        url.query_pairs_mut()
            .append_pair("DatabaseName", &credentials.database_name);

        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static("username"), header_value(&credentials.username)?);
        headers.insert(HeaderName::from_static("password"), header_value(&credentials.password)?);
        headers.insert(header::ACCEPT, header_value(&self.accept)?);
        if let Some(ref version) = self.version {
            headers.insert(HeaderName::from_static("version"), header_value(version)?);
        }

        let response = self
            .client
            .post(url)
            .headers(headers)
            .send()
            .await
            .map_err(TransportError::from)?;

        let status = response.status();
        if status.as_u16() >= 400 {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                reason: truncate_body(&body),
            });
        }

        let cookies = extract_cookies(response.headers());
        let header_token = TOKEN_HEADERS
            .iter()
            .find_map(|name| response.headers().get(*name))
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let is_json = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("application/json"))
            .unwrap_or(false);

        let auth_token = match header_token {
            Some(token) => Some(token),
            None if is_json => {
                let body = response.text().await.map_err(TransportError::from)?;
                token_from_body(&body)
            }
            None => None,
        };

        let artifacts = AuthArtifacts::new(cookies, auth_token);
        if artifacts.is_empty() {
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                reason: "login response carried no session cookie or token".to_string(),
            });
        }
        debug!(database = %credentials.database_name, "Login accepted");
        Ok(artifacts)
    }
}

impl AuthAdapter for P6Client {
    async fn submit_credentials(
        &self,
        credentials: &Credentials,
    ) -> Result<AuthArtifacts, AuthError> {
        self.login(credentials).await
    }

    async fn probe(&self, artifacts: &AuthArtifacts) -> ProbeResult {
        let request = match self
            .build_url(&self.probe_path, &[])
            .and_then(|url| Ok((url, self.session_headers(artifacts, &[])?)))
        {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Cannot build probe request");
                return ProbeResult::Unknown;
            }
        };

        match self.client.get(request.0).headers(request.1).send().await {
            Ok(response) if response.status().is_success() => ProbeResult::Valid,
            Ok(response) if response.status().as_u16() == 401 => ProbeResult::Expired,
            Ok(response) => {
                debug!(status = %response.status(), "Probe returned inconclusive status");
                ProbeResult::Unknown
            }
            Err(e) => {
                warn!(error = %e, "Probe request failed");
                ProbeResult::Unknown
            }
        }
    }
}

impl Transport for P6Client {
    fn target_url(&self, request: &ProxyRequest) -> Result<Url, TransportError> {
        self.build_url(&request.path, &request.query)
    }

    async fn forward(
        &self,
        artifacts: &AuthArtifacts,
        request: &ProxyRequest,
    ) -> Result<ProxyResponse, TransportError> {
        let url = self.target_url(request)?;
        let headers = self.session_headers(artifacts, &request.headers)?;

        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .headers(headers);
        builder = match &request.body {
            Some(Value::String(raw)) => builder.body(raw.clone()),
            Some(json) => builder.json(json),
            None => builder,
        };

        let response = builder.send().await?;
        debug!(method = %request.method, path = %request.path, status = %response.status(), "Forwarded request");
        ProxyResponse::from_response(response).await
    }
}

fn header_name(name: &str) -> Result<HeaderName, TransportError> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| TransportError::InvalidRequest(format!("invalid header name: {}", name)))
}

fn header_value(value: &str) -> Result<HeaderValue, TransportError> {
    HeaderValue::from_str(value)
        .map_err(|_| TransportError::InvalidRequest("invalid header value".to_string()))
}

/// `name=value` pairs from every `Set-Cookie`, joined the way a `Cookie` header expects.
fn extract_cookies(headers: &HeaderMap) -> String {
    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|cookie| cookie.split(';').next())
        .map(str::trim)
        .filter(|pair| pair.contains('='))
        .collect::<Vec<_>>()
        .join("; ")
}

fn token_from_body(body: &str) -> Option<String> {
    let json: Value = serde_json::from_str(body).ok()?;
    TOKEN_BODY_KEYS
        .iter()
        .find_map(|key| json.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

// ============================================================================
// Tests
// ============================================================================
