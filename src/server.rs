//! Mock registry and request dispatcher.

use crate::config::{EngineSettings, Header, MockConfiguration, MockRule, MockServerConfig};
use crate::error::MockError;
use crate::log::{LoggedRequest, LoggedResponse, MockServerLog, RequestLog};
use crate::matcher::PathPattern;
use crate::request::{OutgoingRequest, RequestContext};
use crate::template::{TemplateContext, TemplateEngine};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Synthetic response handed back to the request-sending component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: HashMap<String, String>,
    /// Parsed JSON when the body text is valid JSON, otherwise a JSON string
    pub body: Value,
    /// Milliseconds from dispatch start to completion
    pub time: u64,
    /// Byte length of the body text
    pub size: usize,
}

/// Reason phrase for the status codes the host tool displays.
pub fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

fn parse_body(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// Hook the request-sending component calls before going to the network.
#[async_trait]
pub trait RequestInterceptor: Send + Sync {
    /// Return a response to short-circuit the request, or `None` to let it
    /// through.
    async fn intercept(&self, request: &OutgoingRequest) -> Option<MockResponse>;
}

#[derive(Debug, Default)]
struct Registry {
    mocks: Vec<Arc<MockConfiguration>>,
    active: Option<Arc<MockConfiguration>>,
}

impl Registry {
    /// Replace the mock with the same id, or append.
    fn insert(&mut self, mock: Arc<MockConfiguration>) {
        match self.mocks.iter_mut().find(|m| m.id == mock.id) {
            Some(existing) => *existing = mock,
            None => self.mocks.push(mock),
        }
    }
}

/// Mock server engine.
///
/// Owns the mock catalog, the single active mock and the request log. The
/// host constructs one and shares it with whatever sends requests.
pub struct MockServer {
    settings: EngineSettings,
    template_engine: TemplateEngine,
    registry: RwLock<Registry>,
    log: RequestLog,
    /// Total requests dispatched.
    requests_total: AtomicU64,
    /// Requests answered with a mock response.
    requests_mocked: AtomicU64,
}

impl MockServer {
    /// Create an empty mock server.
    pub fn new(settings: EngineSettings) -> Self {
        let log = RequestLog::new(settings.log_capacity);
        Self {
            settings,
            template_engine: TemplateEngine::new(),
            registry: RwLock::new(Registry::default()),
            log,
            requests_total: AtomicU64::new(0),
            requests_mocked: AtomicU64::new(0),
        }
    }

    /// Create a mock server from a loaded configuration, activating its
    /// `active` mock if one is named.
    pub fn from_config(config: MockServerConfig) -> Result<Self, MockError> {
        let server = Self::new(config.settings);
        for mock in config.mocks {
            server.upsert_mock(mock);
        }
        if let Some(id) = &config.active {
            server.activate(id)?;
        }

        info!(
            mocks = server.mocks().len(),
            active = ?config.active,
            "Mock server initialized"
        );
        Ok(server)
    }

    fn registry(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn registry_mut(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// All known mocks, in insertion order.
    pub fn mocks(&self) -> Vec<Arc<MockConfiguration>> {
        self.registry().mocks.clone()
    }

    pub fn mock(&self, id: &str) -> Option<Arc<MockConfiguration>> {
        self.registry().mocks.iter().find(|m| m.id == id).cloned()
    }

    /// Insert a mock, or replace the one with the same id. Replacing the
    /// active mock makes the new version active.
    pub fn upsert_mock(&self, mock: MockConfiguration) {
        let mock = Arc::new(mock);
        let mut registry = self.registry_mut();
        registry.insert(Arc::clone(&mock));

        if registry.active.as_ref().is_some_and(|a| a.id == mock.id) {
            registry.active = Some(mock);
        }
    }

    /// Delete a mock. Deleting the active mock deactivates it.
    pub fn remove_mock(&self, id: &str) -> Option<Arc<MockConfiguration>> {
        let mut registry = self.registry_mut();
        let index = registry.mocks.iter().position(|m| m.id == id)?;
        let removed = registry.mocks.remove(index);

        if registry.active.as_ref().is_some_and(|a| a.id == id) {
            registry.active = None;
            info!(mock_id = %id, "Active mock deleted, mock server inactive");
        }
        Some(removed)
    }

    /// Make the mock with `id` the only active mock.
    pub fn activate(&self, id: &str) -> Result<(), MockError> {
        let mut registry = self.registry_mut();
        let mock = registry
            .mocks
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| MockError::UnknownMock(id.to_string()))?;

        if let Some(previous) = registry.active.replace(Arc::clone(&mock)) {
            if previous.id != mock.id {
                debug!(mock_id = %previous.id, "Mock deactivated");
            }
        }
        info!(mock_id = %mock.id, path = %mock.path, method = %mock.method, "Mock activated");
        Ok(())
    }

    pub fn deactivate(&self) {
        if let Some(previous) = self.registry_mut().active.take() {
            info!(mock_id = %previous.id, "Mock deactivated");
        }
    }

    /// Activate `mock` (adding or replacing it in the catalog), or deactivate
    /// when `None`.
    pub fn set_active_mock(&self, mock: Option<MockConfiguration>) {
        match mock {
            Some(mock) => {
                let mock = Arc::new(mock);
                let mut registry = self.registry_mut();
                registry.insert(Arc::clone(&mock));
                info!(mock_id = %mock.id, path = %mock.path, method = %mock.method, "Mock activated");
                registry.active = Some(mock);
            }
            None => self.deactivate(),
        }
    }

    pub fn active_mock(&self) -> Option<Arc<MockConfiguration>> {
        self.registry().active.clone()
    }

    /// Logged requests, newest first.
    pub fn logs(&self) -> Vec<MockServerLog> {
        self.log.entries()
    }

    pub fn clear_logs(&self) {
        self.log.clear();
    }

    /// Get total requests dispatched.
    pub fn total_requests(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    /// Get total requests answered by a mock.
    pub fn total_mocked(&self) -> u64 {
        self.requests_mocked.load(Ordering::Relaxed)
    }

    /// Dispatch a request against the active mock.
    ///
    /// Returns `None` when no mock is active or the active mock does not
    /// match, in which case the caller should perform the real request.
    pub async fn handle(
        &self,
        url: &str,
        method: &str,
        headers: &[Header],
        body: Option<&str>,
    ) -> Option<MockResponse> {
        let started = Instant::now();
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        let mock = self.active_mock()?;
        let request = RequestContext::new(url, headers, body);

        if !self.matches_endpoint(&mock, method, request.path()) {
            if self.settings.log_unmatched {
                debug!(
                    mock_id = %mock.id,
                    method = %method,
                    path = %request.path(),
                    "Request does not match active mock"
                );
            }
            return None;
        }

        let matched_rule = mock.rules.iter().find(|rule| {
            let hit = rule.condition.matches(&request);
            debug!(rule_id = %rule.id, hit, "Evaluated rule");
            hit
        });

        let (status, response_headers, body_text, rule) = match matched_rule {
            Some(rule) => {
                delay(rule.response.delay, &mock.id).await;
                (
                    rule.response.status_code,
                    &rule.response.headers,
                    rule.response.body.clone(),
                    Some(rule),
                )
            }
            None => {
                delay(mock.delay, &mock.id).await;
                (mock.status_code, &mock.headers, self.default_body(&mock, &request), None)
            }
        };

        let response = MockResponse {
            status,
            status_text: status_text(status).to_string(),
            headers: response_headers
                .iter()
                .map(|h| (h.key.clone(), h.value.clone()))
                .collect(),
            body: parse_body(&body_text),
            time: elapsed_ms(started),
            size: body_text.len(),
        };

        self.requests_mocked.fetch_add(1, Ordering::Relaxed);
        if self.settings.log_matches {
            info!(
                mock_id = %mock.id,
                rule_id = rule.map(|r| r.id.as_str()),
                method = %method,
                path = %request.path(),
                status,
                "Request mocked"
            );
        }

        self.record(&mock, rule, url, method, headers, body, response_headers, body_text, &response);
        Some(response)
    }

    fn matches_endpoint(&self, mock: &MockConfiguration, method: &str, path: &str) -> bool {
        if mock.method != method {
            return false;
        }
        match PathPattern::compile(&mock.path) {
            Ok(pattern) => pattern.is_match(path),
            Err(e) => {
                warn!(mock_id = %mock.id, error = %e, "Mock path pattern rejected");
                false
            }
        }
    }

    /// Default body text: the expanded template when dynamic responses are on
    /// and a template is set, otherwise the static body.
    fn default_body(&self, mock: &MockConfiguration, request: &RequestContext) -> String {
        let template = mock
            .response_template
            .as_deref()
            .filter(|t| mock.dynamic_response && !t.is_empty());

        match template {
            Some(template) => {
                let ctx = TemplateContext::new(request, &mock.path);
                self.template_engine.expand(template, &ctx)
            }
            None => mock.body.clone(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        mock: &MockConfiguration,
        rule: Option<&MockRule>,
        url: &str,
        method: &str,
        headers: &[Header],
        body: Option<&str>,
        response_headers: &[Header],
        body_text: String,
        response: &MockResponse,
    ) {
        self.log.push(MockServerLog {
            id: uuid::Uuid::new_v4(),
            timestamp: Utc::now(),
            request: LoggedRequest {
                method: method.to_string(),
                url: url.to_string(),
                headers: headers.to_vec(),
                body: body.map(String::from),
            },
            response: LoggedResponse {
                status: response.status,
                headers: response_headers.to_vec(),
                body: body_text,
            },
            mock_id: mock.id.clone(),
            mock_name: mock.name.clone(),
            rule_id: rule.map(|r| r.id.clone()),
            rule_name: rule.map(|r| r.name.clone()),
            latency_ms: response.time,
        });
    }
}

impl Default for MockServer {
    fn default() -> Self {
        Self::new(EngineSettings::default())
    }
}

#[async_trait]
impl RequestInterceptor for MockServer {
    async fn intercept(&self, request: &OutgoingRequest) -> Option<MockResponse> {
        self.handle(
            &request.url,
            &request.method,
            &request.headers,
            request.body.as_deref(),
        )
        .await
    }
}

async fn delay(delay_ms: u64, mock_id: &str) {
    if delay_ms > 0 {
        debug!(mock_id = %mock_id, delay_ms, "Applying delay");
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConditionOperator, ConditionSource, RuleCondition, RuleResponse};

    fn users_mock() -> MockConfiguration {
        MockConfiguration {
            id: "users".to_string(),
            name: "Users".to_string(),
            path: "/api/users/:id".to_string(),
            method: "GET".to_string(),
            status_code: 200,
            delay: 0,
            headers: vec![Header::new("Content-Type", "application/json")],
            body: r#"{"id": 1, "name": "static"}"#.to_string(),
            rules: Vec::new(),
            dynamic_response: false,
            response_template: None,
        }
    }

    fn rule(id: &str, source: ConditionSource, value: &str, status: u16, body: &str) -> MockRule {
        MockRule {
            id: id.to_string(),
            name: format!("rule {}", id),
            condition: RuleCondition {
                source,
                value: value.to_string(),
                operator: ConditionOperator::Equals,
            },
            response: RuleResponse {
                status_code: status,
                headers: vec![Header::new("X-Rule", id)],
                body: body.to_string(),
                delay: 0,
            },
        }
    }

    fn server_with(mock: MockConfiguration) -> MockServer {
        let server = MockServer::default();
        server.set_active_mock(Some(mock));
        server
    }

    #[tokio::test]
    async fn test_no_active_mock() {
        let server = MockServer::default();
        server.upsert_mock(users_mock());

        assert!(server.handle("http://localhost/api/users/1", "GET", &[], None).await.is_none());
        assert!(server.handle("not a url", "POST", &[], Some("{}")).await.is_none());
        assert!(server.logs().is_empty());
        assert_eq!(server.total_requests(), 2);
        assert_eq!(server.total_mocked(), 0);
    }

    #[tokio::test]
    async fn test_method_and_path_mismatch() {
        let server = server_with(users_mock());

        assert!(server.handle("http://localhost/api/users/1", "POST", &[], None).await.is_none());
        assert!(server.handle("http://localhost/api/users/1", "get", &[], None).await.is_none());
        assert!(server.handle("http://localhost/api/orders/1", "GET", &[], None).await.is_none());
        assert!(server.logs().is_empty());
    }

    #[tokio::test]
    async fn test_static_default_response() {
        let server = server_with(users_mock());

        let response = server
            .handle("http://localhost/api/users/42", "GET", &[], None)
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.status_text, "OK");
        assert_eq!(response.body, serde_json::json!({"id": 1, "name": "static"}));
        assert_eq!(response.size, r#"{"id": 1, "name": "static"}"#.len());
        assert_eq!(response.headers.get("Content-Type").map(String::as_str), Some("application/json"));

        let logs = server.logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].mock_id, "users");
        assert!(logs[0].rule_id.is_none());
    }

    #[tokio::test]
    async fn test_non_json_body_is_string() {
        let mut mock = users_mock();
        mock.body = "plain text".to_string();
        mock.status_code = 418;
        let server = server_with(mock);

        let response = server
            .handle("http://localhost/api/users/1", "GET", &[], None)
            .await
            .unwrap();
        assert_eq!(response.body, Value::String("plain text".to_string()));
        assert_eq!(response.status_text, "Unknown");
    }

    #[tokio::test]
    async fn test_rules_first_match_wins() {
        let mut mock = users_mock();
        mock.rules = vec![
            rule("first", ConditionSource::Query { key: "role".to_string() }, "admin", 403, "denied"),
            rule("second", ConditionSource::Query { key: "role".to_string() }, "admin", 500, "never"),
            rule(
                "header",
                ConditionSource::Header { key: "X-Debug".to_string() },
                "1",
                201,
                r#"{"debug": true}"#,
            ),
        ];
        let server = server_with(mock);

        let response = server
            .handle("http://localhost/api/users/1?role=admin", "GET", &[], None)
            .await
            .unwrap();
        assert_eq!(response.status, 403);
        assert_eq!(response.status_text, "Forbidden");
        assert_eq!(response.body, Value::String("denied".to_string()));
        assert_eq!(response.headers.get("X-Rule").map(String::as_str), Some("first"));

        let headers = vec![Header::new("x-debug", "1")];
        let response = server
            .handle("http://localhost/api/users/1", "GET", &headers, None)
            .await
            .unwrap();
        assert_eq!(response.status, 201);
        assert_eq!(response.body, serde_json::json!({"debug": true}));

        let response = server
            .handle("http://localhost/api/users/1?role=guest", "GET", &[], None)
            .await
            .unwrap();
        assert_eq!(response.status, 200);

        let logs = server.logs();
        assert_eq!(logs[0].rule_id, None);
        assert_eq!(logs[1].rule_id.as_deref(), Some("header"));
        assert_eq!(logs[2].rule_id.as_deref(), Some("first"));
        assert_eq!(logs[2].rule_name.as_deref(), Some("rule first"));
        assert_eq!(logs[2].response.body, "denied");
    }

    #[tokio::test]
    async fn test_dynamic_response() {
        let mut mock = users_mock();
        mock.dynamic_response = true;
        mock.response_template =
            Some(r#"{"id": "{{path.id}}", "q": "{{query.q}}", "n": {{random.number(7,7)}}}"#.to_string());
        let server = server_with(mock);

        let response = server
            .handle("http://localhost/api/users/42?q=search", "GET", &[], None)
            .await
            .unwrap();
        assert_eq!(response.body, serde_json::json!({"id": "42", "q": "search", "n": 7}));
        assert_eq!(server.logs()[0].response.body, r#"{"id": "42", "q": "search", "n": 7}"#);
    }

    #[tokio::test]
    async fn test_dynamic_without_template_uses_body() {
        let mut mock = users_mock();
        mock.dynamic_response = true;
        mock.response_template = Some(String::new());
        let server = server_with(mock);

        let response = server
            .handle("http://localhost/api/users/1", "GET", &[], None)
            .await
            .unwrap();
        assert_eq!(response.body["name"], "static");
    }

    #[tokio::test]
    async fn test_broken_template_degrades_to_text() {
        let mut mock = users_mock();
        mock.dynamic_response = true;
        mock.response_template = Some("{{random.number(9,1)}} {broken".to_string());
        let server = server_with(mock);

        let response = server
            .handle("http://localhost/api/users/1", "GET", &[], None)
            .await
            .unwrap();
        assert_eq!(response.body, Value::String("{{random.number(9,1)}} {broken".to_string()));
    }

    #[tokio::test]
    async fn test_invalid_condition_regex_degrades() {
        let mut mock = users_mock();
        mock.path = "/api/users/*".to_string();
        mock.rules = vec![MockRule {
            condition: RuleCondition {
                source: ConditionSource::Path,
                value: "([bad".to_string(),
                operator: ConditionOperator::Regex,
            },
            ..rule("regex", ConditionSource::Path, "", 500, "")
        }];
        let server = server_with(mock);

        let response = server
            .handle("http://localhost/api/users/1", "GET", &[], None)
            .await
            .unwrap();
        assert_eq!(response.status, 200);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delays_reflected_in_time() {
        let mut mock = users_mock();
        mock.delay = 300;
        let mut slow = rule("slow", ConditionSource::Query { key: "slow".to_string() }, "1", 200, "");
        slow.response.delay = 50;
        mock.rules = vec![slow];
        let server = server_with(mock);

        let response = server
            .handle("http://localhost/api/users/1", "GET", &[], None)
            .await
            .unwrap();
        assert_eq!(response.time, 300);
        assert_eq!(server.logs()[0].latency_ms, 300);

        let response = server
            .handle("http://localhost/api/users/1?slow=1", "GET", &[], None)
            .await
            .unwrap();
        assert_eq!(response.time, 50);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_delays_do_not_serialize() {
        let mut mock = users_mock();
        mock.delay = 200;
        let server = server_with(mock);

        let started = Instant::now();
        let (a, b) = tokio::join!(
            server.handle("http://localhost/api/users/1", "GET", &[], None),
            server.handle("http://localhost/api/users/2", "GET", &[], None),
        );

        assert_eq!(a.unwrap().time, 200);
        assert_eq!(b.unwrap().time, 200);
        assert_eq!(started.elapsed(), Duration::from_millis(200));
        assert_eq!(server.logs().len(), 2);
    }

    #[tokio::test]
    async fn test_log_capacity() {
        let server = server_with(users_mock());

        for n in 1..=101 {
            let url = format!("http://localhost/api/users/{}", n);
            assert!(server.handle(&url, "GET", &[], None).await.is_some());
        }

        let logs = server.logs();
        assert_eq!(logs.len(), 100);
        assert_eq!(logs[0].request.url, "http://localhost/api/users/101");
        assert_eq!(logs[99].request.url, "http://localhost/api/users/2");
        assert!(logs.iter().all(|e| e.request.url != "http://localhost/api/users/1"));

        server.clear_logs();
        assert!(server.logs().is_empty());
    }

    #[test]
    fn test_activation_is_exclusive() {
        let server = MockServer::default();
        let mut other = users_mock();
        other.id = "orders".to_string();
        server.upsert_mock(users_mock());
        server.upsert_mock(other);

        server.activate("users").unwrap();
        server.activate("orders").unwrap();
        assert_eq!(server.active_mock().unwrap().id, "orders");

        assert!(matches!(server.activate("missing"), Err(MockError::UnknownMock(_))));
        assert_eq!(server.active_mock().unwrap().id, "orders");

        server.deactivate();
        assert!(server.active_mock().is_none());
    }

    #[test]
    fn test_remove_active_mock_deactivates() {
        let server = server_with(users_mock());
        assert!(server.remove_mock("users").is_some());
        assert!(server.active_mock().is_none());
        assert!(server.mocks().is_empty());
        assert!(server.remove_mock("users").is_none());
    }

    #[test]
    fn test_upsert_refreshes_active_mock() {
        let server = server_with(users_mock());
        let mut edited = users_mock();
        edited.status_code = 201;
        server.upsert_mock(edited);

        assert_eq!(server.mocks().len(), 1);
        assert_eq!(server.active_mock().unwrap().status_code, 201);
    }

    #[test]
    fn test_from_config() {
        let config = MockServerConfig {
            mocks: vec![users_mock()],
            active: Some("users".to_string()),
            settings: EngineSettings {
                log_capacity: 5,
                ..EngineSettings::default()
            },
        };
        let server = MockServer::from_config(config).unwrap();
        assert_eq!(server.active_mock().unwrap().id, "users");
        assert_eq!(server.settings().log_capacity, 5);

        let response = tokio_test::block_on(server.handle("/api/users/3", "GET", &[], None));
        assert!(response.is_some());
    }

    #[tokio::test]
    async fn test_intercept() {
        let server = server_with(users_mock());
        let interceptor: &dyn RequestInterceptor = &server;
        let request = OutgoingRequest {
            method: "GET".to_string(),
            url: "https://api.example.com/api/users/9".to_string(),
            headers: vec![Header::new("Accept", "application/json")],
            body: None,
            content_type: None,
        };

        let response = interceptor.intercept(&request).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(server.logs()[0].request.headers, request.headers);
    }

    #[test]
    fn test_status_text() {
        assert_eq!(status_text(201), "Created");
        assert_eq!(status_text(204), "No Content");
        assert_eq!(status_text(503), "Service Unavailable");
        assert_eq!(status_text(299), "Unknown");
    }
}
