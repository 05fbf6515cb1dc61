//! Proxy facade: the operations a client of the broker actually calls.
//!
//! Every forwarded call goes through the same path: method check, host
//! guard, session resolution, then the forward itself under
//! [`SessionManager::with_auto_renew`].

use std::collections::BTreeMap;
use std::sync::Arc;

use reqwest::Method;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::api::{host_of, HostGuard, ProxyRequest, ProxyResponse, Transport, TransportError};
use crate::auth::{AuthAdapter, Credentials, ProbeResult, SessionSummary};
use crate::error::BrokerError;
use crate::lifecycle::{Forwarded, LoginOutcome, SessionManager, SessionPolicy};

const OBS_FIELDS: &str = "CreateDate,CreateUser,Description,GUID,LastUpdateDate,LastUpdateUser,Name,ObjectId,ParentObjectId,SequenceNumber";
const PROJECT_FIELDS: &str = "Id,Code,Name,StartDate,FinishDate,GUID,Status";
const PROJECT_BY_OBS_FIELDS: &str = "Id,Code,Name,StartDate,FinishDate,GUID,Status,OBSObjectId";

const OBS_FIND_LIMIT: u32 = 50;
const PROJECTS_BY_OBS_LIMIT: u32 = 100;

/// A generic proxied call as a client submits it.
#[derive(Debug, Clone, Deserialize)]
pub struct CallRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default = "default_method")]
    pub method: String,
    /// Path relative to the API base, e.g. `/project`
    pub path: String,
    /// Array values become repeated parameters.
    #[serde(default)]
    pub query: Map<String, Value>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<Value>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl CallRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            session_id: None,
            method: method.into(),
            path: path.into(),
            query: Map::new(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    fn into_proxy_request(self) -> Result<(Option<String>, ProxyRequest), BrokerError> {
        let method = parse_method(&self.method)?;
        let request = ProxyRequest {
            method,
            path: self.path,
            query: query_pairs(&self.query),
            headers: self.headers.into_iter().collect(),
            body: self.body,
        };
        Ok((self.session_id, request))
    }
}

/// Optional overrides for the helper queries; unset fields use each helper's defaults.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub fields: Option<String>,
    pub order_by: Option<String>,
    pub limit: Option<u32>,
}

/// Which OBS node `projects_by_obs` should look under.
#[derive(Debug, Clone)]
pub enum ObsRef {
    Name(String),
    ObjectId(String),
}

pub struct Proxy<A, T> {
    manager: SessionManager<A>,
    transport: Arc<T>,
    guard: HostGuard,
    policy: SessionPolicy,
}

impl<A: AuthAdapter, T: Transport> Proxy<A, T> {
    pub fn new(
        manager: SessionManager<A>,
        transport: Arc<T>,
        guard: HostGuard,
        policy: SessionPolicy,
    ) -> Self {
        Self {
            manager,
            transport,
            guard,
            policy,
        }
    }

    pub fn manager(&self) -> &SessionManager<A> {
        &self.manager
    }

    pub async fn login(
        &self,
        credentials: Credentials,
        remember: bool,
    ) -> Result<LoginOutcome, BrokerError> {
        self.manager.authenticate(credentials, remember).await
    }

    /// Unlike `invalidate`, an unknown id is reported as `SessionNotFound`.
    pub fn logout(&self, session_id: &str) -> Result<(), BrokerError> {
        if self.manager.invalidate(session_id)? {
            Ok(())
        } else {
            Err(BrokerError::SessionNotFound(Some(session_id.to_string())))
        }
    }

    pub fn logout_all(&self) -> Result<usize, BrokerError> {
        self.manager.invalidate_all()
    }

    pub fn sessions(&self) -> Vec<SessionSummary> {
        self.manager.sessions()
    }

    pub fn active_session(&self) -> Result<SessionSummary, BrokerError> {
        self.manager
            .active_session()
            .ok_or(BrokerError::NoActiveSession)
    }

    /// Probe `session_id`, or the session auto mode would pick.
    pub async fn probe(&self, session_id: Option<&str>) -> Result<ProbeResult, BrokerError> {
        match session_id.filter(|id| !id.is_empty()) {
            Some(id) => self.manager.probe(id).await,
            None => {
                let active = self.active_session()?;
                self.manager.probe(&active.session_id).await
            }
        }
    }

    pub async fn call(&self, request: CallRequest) -> Result<ProxyResponse, BrokerError> {
        let (session_id, request) = request.into_proxy_request()?;
        self.forward(session_id.as_deref(), request).await
    }

    /// Forward one request, renewing the session once if the remote answers 401.
    pub async fn forward(
        &self,
        session_id: Option<&str>,
        request: ProxyRequest,
    ) -> Result<ProxyResponse, BrokerError> {
        let url = self.transport.target_url(&request).map_err(|e| match e {
            TransportError::InvalidRequest(msg) => BrokerError::InvalidRequest(msg),
            other => BrokerError::Transport(other),
        })?;
        if !self.guard.is_permitted_url(&url) {
            return Err(BrokerError::ForbiddenTarget(host_of(&url)));
        }

        let session = self.manager.resolve(session_id, self.policy)?;
        debug!(id = %session.id, method = %request.method, path = %request.path, "Forwarding");

        let transport = self.transport.as_ref();
        let request = &request;
        self.manager
            .with_auto_renew(session, |artifacts| async move {
                let response = transport.forward(&artifacts, request).await?;
                if response.is_auth_rejected() {
                    Ok(Forwarded::AuthRejected)
                } else {
                    Ok(Forwarded::Completed(response))
                }
            })
            .await
    }

    /// OBS nodes whose name is exactly `name`.
    pub async fn obs_by_name(
        &self,
        session_id: Option<&str>,
        name: &str,
        options: ListOptions,
    ) -> Result<ProxyResponse, BrokerError> {
        let request = ProxyRequest::get("/obs")
            .param("Filter", format!("Name='{}'", escape_literal(name)))
            .param("Fields", options.fields.as_deref().unwrap_or(OBS_FIELDS))
            .param("OrderBy", options.order_by.unwrap_or_default())
            .param("MaxObjects", limit_param(options.limit));
        self.forward(session_id, request).await
    }

    /// OBS nodes whose name contains `q`.
    pub async fn obs_find(
        &self,
        session_id: Option<&str>,
        q: &str,
        options: ListOptions,
    ) -> Result<ProxyResponse, BrokerError> {
        let request = ProxyRequest::get("/obs")
            .param("Filter", format!("Name LIKE '%{}%'", escape_literal(q)))
            .param("Fields", options.fields.as_deref().unwrap_or(OBS_FIELDS))
            .param("OrderBy", options.order_by.as_deref().unwrap_or("Name"))
            .param("MaxObjects", limit_param(options.limit.or(Some(OBS_FIND_LIMIT))));
        self.forward(session_id, request).await
    }

    /// Projects, optionally narrowed by a raw P6 filter expression.
    pub async fn projects_list(
        &self,
        session_id: Option<&str>,
        filter: Option<&str>,
        options: ListOptions,
    ) -> Result<ProxyResponse, BrokerError> {
        let request = ProxyRequest::get("/project")
            .param("Fields", options.fields.as_deref().unwrap_or(PROJECT_FIELDS))
            .param("OrderBy", options.order_by.unwrap_or_default())
            .param("Filter", filter.unwrap_or_default())
            .param("MaxObjects", limit_param(options.limit));
        self.forward(session_id, request).await
    }

    /// Projects under one OBS node. A name is first resolved to its ObjectId.
    ///
    /// Both requests go through the same session. An error status from the
    /// name lookup is returned as the response.
    pub async fn projects_by_obs(
        &self,
        session_id: Option<&str>,
        obs: ObsRef,
        options: ListOptions,
    ) -> Result<ProxyResponse, BrokerError> {
        if matches!(&obs, ObsRef::ObjectId(id) if id.trim().is_empty()) {
            return Err(BrokerError::InvalidRequest("Provide obs_name or obs_id".to_string()));
        }
        let pinned = self.manager.resolve(session_id, self.policy)?.id;
        let session_id = Some(pinned.as_str());

        let object_id = match obs {
            ObsRef::ObjectId(id) => id,
            ObsRef::Name(name) => {
                let lookup = ProxyRequest::get("/obs")
                    .param("Filter", format!("Name='{}'", escape_literal(&name)))
                    .param("Fields", "Name,ObjectId")
                    .param("MaxObjects", 1);
                let response = self.forward(session_id, lookup).await?;
                if response.status >= 400 {
                    return Ok(response);
                }
                first_object_id(&response.body)?
                    .ok_or_else(|| BrokerError::NotFound(format!("OBS '{}' not found", name)))?
            }
        };

        let request = ProxyRequest::get("/project")
            .param("Fields", options.fields.as_deref().unwrap_or(PROJECT_BY_OBS_FIELDS))
            .param("OrderBy", options.order_by.as_deref().unwrap_or("Name"))
            .param("Filter", format!("OBSObjectId='{}'", escape_literal(&object_id)))
            .param(
                "MaxObjects",
                limit_param(options.limit.or(Some(PROJECTS_BY_OBS_LIMIT))),
            );
        self.forward(session_id, request).await
    }
}

fn parse_method(method: &str) -> Result<Method, BrokerError> {
    match method.trim().to_ascii_uppercase().as_str() {
        "GET" => Ok(Method::GET),
        "POST" => Ok(Method::POST),
        "PUT" => Ok(Method::PUT),
        "PATCH" => Ok(Method::PATCH),
        "DELETE" => Ok(Method::DELETE),
        other => Err(BrokerError::InvalidRequest(format!(
            "Unsupported method: {}",
            other
        ))),
    }
}

fn query_pairs(query: &Map<String, Value>) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for (key, value) in query {
        match value {
            Value::Null => {}
            Value::Array(items) => {
                for item in items {
                    if let Some(text) = scalar_text(item) {
                        pairs.push((key.clone(), text));
                    }
                }
            }
            other => {
                if let Some(text) = scalar_text(other) {
                    pairs.push((key.clone(), text));
                }
            }
        }
    }
    pairs
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// P6 filter literals are single-quoted; a quote inside is doubled.
fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

fn limit_param(limit: Option<u32>) -> String {
    limit.filter(|l| *l > 0).map(|l| l.to_string()).unwrap_or_default()
}

/// `ObjectId` of the first element of an OBS listing, which may arrive as JSON or as text.
fn first_object_id(body: &Value) -> Result<Option<String>, BrokerError> {
    let parse_error = || {
        BrokerError::Transport(TransportError::InvalidResponse(
            "Failed to parse OBS response".to_string(),
        ))
    };

    let parsed;
    let items = match body {
        Value::Array(items) => items,
        Value::String(text) => {
            parsed = serde_json::from_str::<Value>(text).map_err(|_| parse_error())?;
            parsed.as_array().ok_or_else(parse_error)?
        }
        _ => return Err(parse_error()),
    };

    let Some(first) = items.first() else {
        return Ok(None);
    };
    match first.get("ObjectId") {
        Some(Value::String(id)) => Ok(Some(id.clone())),
        Some(Value::Number(id)) => Ok(Some(id.to_string())),
        _ => Err(parse_error()),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use reqwest::Url;
    use serde_json::json;

    use crate::auth::{AuthArtifacts, AuthError, Session};
    use crate::store::SessionStore;

    const BASE: &str = "https://p6.example.com/p6ws/restapi";

    /// Accepts password `p`, issuing `JSESSIONID=s<n>` for the n-th login.
    struct FakeAdapter {
        logins: AtomicUsize,
    }

    impl AuthAdapter for FakeAdapter {
        async fn submit_credentials(
            &self,
            credentials: &Credentials,
        ) -> Result<AuthArtifacts, AuthError> {
            if credentials.password != "p" {
                return Err(AuthError::Rejected {
                    status: 401,
                    reason: "Invalid user".to_string(),
                });
            }
            let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(AuthArtifacts::new(format!("JSESSIONID=s{}", n), None))
        }

        async fn probe(&self, _artifacts: &AuthArtifacts) -> ProbeResult {
            ProbeResult::Valid
        }
    }

    type Responder = Box<dyn Fn(&AuthArtifacts, &ProxyRequest) -> ProxyResponse + Send + Sync>;

    struct FakeTransport {
        seen: Mutex<Vec<(String, ProxyRequest)>>,
        respond: Responder,
    }

    impl FakeTransport {
        fn new(respond: Responder) -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
                respond,
            }
        }

        fn seen(&self) -> Vec<(String, ProxyRequest)> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl Transport for FakeTransport {
        fn target_url(&self, request: &ProxyRequest) -> Result<Url, TransportError> {
            Url::parse(&format!("{}{}", BASE, request.path))
                .map_err(|e| TransportError::InvalidRequest(e.to_string()))
        }

        async fn forward(
            &self,
            artifacts: &AuthArtifacts,
            request: &ProxyRequest,
        ) -> Result<ProxyResponse, TransportError> {
            self.seen
                .lock()
                .unwrap()
                .push((artifacts.cookies.clone(), request.clone()));
            Ok((self.respond)(artifacts, request))
        }
    }

    fn response(status: u16, body: Value) -> ProxyResponse {
        ProxyResponse {
            status,
            headers: BTreeMap::new(),
            body,
        }
    }

    fn ok_echo() -> Responder {
        Box::new(|_, request| response(200, json!({ "path": request.path })))
    }

    fn proxy_with(
        respond: Responder,
        allowed_host: &str,
    ) -> (Proxy<FakeAdapter, FakeTransport>, Arc<FakeTransport>) {
        let transport = Arc::new(FakeTransport::new(respond));
        let manager = SessionManager::new(
            Arc::new(SessionStore::in_memory()),
            Arc::new(FakeAdapter {
                logins: AtomicUsize::new(0),
            }),
        );
        let proxy = Proxy::new(
            manager,
            Arc::clone(&transport),
            HostGuard::new(allowed_host),
            SessionPolicy::default(),
        );
        (proxy, transport)
    }

    async fn logged_in(respond: Responder) -> (Proxy<FakeAdapter, FakeTransport>, Arc<FakeTransport>) {
        let (proxy, transport) = proxy_with(respond, "p6.example.com");
        proxy
            .login(Credentials::new("a", "p", "D"), true)
            .await
            .unwrap();
        (proxy, transport)
    }

    fn query_value<'a>(request: &'a ProxyRequest, key: &str) -> Option<&'a str> {
        request
            .query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[tokio::test]
    async fn test_call_uses_latest_session() {
        let (proxy, transport) = logged_in(ok_echo()).await;

        let mut request = CallRequest::new("get", "/project");
        request.query.insert("Fields".into(), json!("Id,Name"));
        request.query.insert("ObjectId".into(), json!([1, 2]));
        request.query.insert("Skip".into(), Value::Null);
        let response = proxy.call(request).await.unwrap();

        assert_eq!(response.status, 200);
        let seen = transport.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "JSESSIONID=s1");
        assert_eq!(seen[0].1.method, Method::GET);
        assert_eq!(
            seen[0].1.query,
            vec![
                ("Fields".to_string(), "Id,Name".to_string()),
                ("ObjectId".to_string(), "1".to_string()),
                ("ObjectId".to_string(), "2".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_call_rejects_unsupported_method() {
        let (proxy, transport) = logged_in(ok_echo()).await;
        let result = proxy.call(CallRequest::new("TRACE", "/project")).await;
        assert!(matches!(result, Err(BrokerError::InvalidRequest(_))));
        assert!(transport.seen().is_empty());
    }

    #[tokio::test]
    async fn test_forbidden_host_never_forwards() {
        let (proxy, transport) = proxy_with(ok_echo(), "other.example.com");
        proxy
            .login(Credentials::new("a", "p", "D"), true)
            .await
            .unwrap();

        let result = proxy.call(CallRequest::new("GET", "/project")).await;
        assert!(matches!(result, Err(BrokerError::ForbiddenTarget(host)) if host == "p6.example.com"));
        assert!(transport.seen().is_empty());
    }

    #[tokio::test]
    async fn test_call_without_login() {
        let (proxy, _) = proxy_with(ok_echo(), "p6.example.com");
        let result = proxy.call(CallRequest::new("GET", "/project")).await;
        assert!(matches!(result, Err(BrokerError::NoActiveSession)));
    }

    #[tokio::test]
    async fn test_call_renews_on_401() {
        let (proxy, transport) = logged_in(Box::new(|artifacts, _| {
            if artifacts.cookies == "JSESSIONID=s1" {
                response(401, json!("Session expired"))
            } else {
                response(200, json!([]))
            }
        }))
        .await;

        let response = proxy.call(CallRequest::new("GET", "/project")).await.unwrap();
        assert_eq!(response.status, 200);

        let cookies: Vec<String> = transport.seen().into_iter().map(|(c, _)| c).collect();
        assert_eq!(cookies, vec!["JSESSIONID=s1", "JSESSIONID=s2"]);
    }

    #[tokio::test]
    async fn test_non_auth_errors_pass_through() {
        let (proxy, transport) = logged_in(Box::new(|_, _| response(403, json!("Forbidden")))).await;
        let response = proxy.call(CallRequest::new("GET", "/project")).await.unwrap();
        assert_eq!(response.status, 403);
        assert_eq!(transport.seen().len(), 1);
    }

    #[tokio::test]
    async fn test_logout_unknown_session() {
        let (proxy, _) = logged_in(ok_echo()).await;
        assert!(matches!(
            proxy.logout("nope"),
            Err(BrokerError::SessionNotFound(Some(_)))
        ));

        let id = proxy.active_session().unwrap().session_id;
        proxy.logout(&id).unwrap();
        assert!(matches!(proxy.active_session(), Err(BrokerError::NoActiveSession)));
    }

    #[tokio::test]
    async fn test_probe_defaults_to_active_session() {
        let (proxy, _) = proxy_with(ok_echo(), "p6.example.com");
        assert!(matches!(proxy.probe(None).await, Err(BrokerError::NoActiveSession)));

        proxy
            .login(Credentials::new("a", "p", "D"), false)
            .await
            .unwrap();
        assert_eq!(proxy.probe(None).await.unwrap(), ProbeResult::Valid);
    }

    #[tokio::test]
    async fn test_obs_find_defaults_and_escaping() {
        let (proxy, transport) = logged_in(ok_echo()).await;
        proxy
            .obs_find(None, "O'Brien", ListOptions::default())
            .await
            .unwrap();

        let (_, request) = &transport.seen()[0];
        assert_eq!(request.path, "/obs");
        assert_eq!(query_value(request, "Filter"), Some("Name LIKE '%O''Brien%'"));
        assert_eq!(query_value(request, "Fields"), Some(OBS_FIELDS));
        assert_eq!(query_value(request, "OrderBy"), Some("Name"));
        assert_eq!(query_value(request, "MaxObjects"), Some("50"));
    }

    #[tokio::test]
    async fn test_projects_list_omits_empty_params() {
        let (proxy, transport) = logged_in(ok_echo()).await;
        proxy
            .projects_list(None, None, ListOptions::default())
            .await
            .unwrap();

        let (_, request) = &transport.seen()[0];
        assert_eq!(request.path, "/project");
        assert_eq!(query_value(request, "Fields"), Some(PROJECT_FIELDS));
        assert!(query_value(request, "Filter").is_none());
        assert!(query_value(request, "OrderBy").is_none());
        assert!(query_value(request, "MaxObjects").is_none());
    }

    #[tokio::test]
    async fn test_projects_by_obs_name_lookup() {
        let (proxy, transport) = logged_in(Box::new(|_, request| {
            if request.path == "/obs" {
                response(200, json!([{ "Name": "Ops", "ObjectId": 4711 }]))
            } else {
                response(200, json!([{ "Id": "P1" }]))
            }
        }))
        .await;

        let result = proxy
            .projects_by_obs(None, ObsRef::Name("Ops".into()), ListOptions::default())
            .await
            .unwrap();
        assert_eq!(result.body, json!([{ "Id": "P1" }]));

        let seen = transport.seen();
        assert_eq!(seen.len(), 2);
        assert_eq!(query_value(&seen[0].1, "Filter"), Some("Name='Ops'"));
        assert_eq!(query_value(&seen[0].1, "MaxObjects"), Some("1"));
        assert_eq!(query_value(&seen[1].1, "Filter"), Some("OBSObjectId='4711'"));
        assert_eq!(query_value(&seen[1].1, "Fields"), Some(PROJECT_BY_OBS_FIELDS));
        assert_eq!(query_value(&seen[1].1, "MaxObjects"), Some("100"));
    }

    #[tokio::test]
    async fn test_projects_by_obs_unknown_name() {
        let (proxy, transport) = logged_in(Box::new(|_, _| response(200, json!([])))).await;
        let result = proxy
            .projects_by_obs(None, ObsRef::Name("Nope".into()), ListOptions::default())
            .await;
        assert!(matches!(result, Err(BrokerError::NotFound(_))));
        assert_eq!(transport.seen().len(), 1);
    }

    #[tokio::test]
    async fn test_projects_by_obs_lookup_error_returned() {
        let (proxy, transport) = logged_in(Box::new(|_, _| response(500, json!("boom")))).await;
        let result = proxy
            .projects_by_obs(None, ObsRef::Name("Ops".into()), ListOptions::default())
            .await
            .unwrap();
        assert_eq!(result.status, 500);
        assert_eq!(transport.seen().len(), 1);
    }

    #[tokio::test]
    async fn test_projects_by_obs_requires_reference() {
        let (proxy, transport) = logged_in(ok_echo()).await;
        let result = proxy
            .projects_by_obs(None, ObsRef::ObjectId(" ".into()), ListOptions::default())
            .await;
        assert!(matches!(result, Err(BrokerError::InvalidRequest(_))));
        assert!(transport.seen().is_empty());
    }

    #[tokio::test]
    async fn test_projects_by_obs_keeps_one_session() {
        let store = Arc::new(SessionStore::in_memory());
        let intruder = Arc::clone(&store);
        // A login landing between the two requests becomes the newest session
        let transport = Arc::new(FakeTransport::new(Box::new(move |_, request| {
            if request.path == "/obs" {
                let late = Session::new(
                    "late".to_string(),
                    AuthArtifacts::new("JSESSIONID=late", None),
                    None,
                    None,
                );
                intruder.put(late).unwrap();
                response(200, json!([{ "ObjectId": "9" }]))
            } else {
                response(200, json!([]))
            }
        })));
        let manager = SessionManager::new(
            store,
            Arc::new(FakeAdapter {
                logins: AtomicUsize::new(0),
            }),
        );
        let proxy = Proxy::new(
            manager,
            Arc::clone(&transport),
            HostGuard::new("p6.example.com"),
            SessionPolicy::default(),
        );
        proxy
            .login(Credentials::new("a", "p", "D"), true)
            .await
            .unwrap();

        proxy
            .projects_by_obs(None, ObsRef::Name("Ops".into()), ListOptions::default())
            .await
            .unwrap();

        let cookies: Vec<String> = transport.seen().into_iter().map(|(c, _)| c).collect();
        assert_eq!(cookies, vec!["JSESSIONID=s1", "JSESSIONID=s1"]);
    }

    #[tokio::test]
    async fn test_allowed_host_with_default_port() {
        let (proxy, transport) = proxy_with(ok_echo(), "p6.example.com:443");
        proxy
            .login(Credentials::new("a", "p", "D"), true)
            .await
            .unwrap();

        let response = proxy.call(CallRequest::new("GET", "/project")).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(transport.seen().len(), 1);
    }

    #[test]
    fn test_first_object_id() {
        assert_eq!(
            first_object_id(&json!([{ "ObjectId": "12" }])).unwrap().as_deref(),
            Some("12")
        );
        assert_eq!(
            first_object_id(&json!(r#"[{"ObjectId": 7}]"#)).unwrap().as_deref(),
            Some("7")
        );
        assert_eq!(first_object_id(&json!([])).unwrap(), None);
        assert!(first_object_id(&json!("<html>")).is_err());
        assert!(first_object_id(&json!([{ "Name": "x" }])).is_err());
    }

    #[test]
    fn test_call_request_from_json() {
        let request: CallRequest = serde_json::from_str(r#"{"path": "/obs"}"#).unwrap();
        assert_eq!(request.method, "GET");
        assert!(request.session_id.is_none());
        assert!(request.query.is_empty());
    }
}
