//! HTTP executor
//!
//! Runs actions that carry an HTTP(S) route, either explicit in control
//! metadata or inferred from the `target` entry point. The verb comes from
//! the route when set, otherwise from the action type.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::result::codes;
use super::{ExecutionContext, ExecutionError, ExecutionResult, Executor};
use crate::action::SemanticScheduledAction;
use crate::duration_millis;

/// Maximum number of body bytes copied into error details
const ERROR_BODY_LIMIT: usize = 2048;

/// HTTP executor configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpExecutorConfig {
    /// Timeout for the whole request
    #[serde(with = "duration_millis")]
    pub timeout: Duration,

    pub user_agent: String,
}

impl Default for HttpExecutorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: format!("schemaflow/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpExecutorConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// Executes actions as HTTP requests
pub struct HttpExecutor {
    client: Client,
    config: HttpExecutorConfig,
}

impl std::fmt::Debug for HttpExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpExecutor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl HttpExecutor {
    pub const NAME: &'static str = "http";

    /// Create an executor; fails only if the TLS backend cannot be initialized
    pub fn new(config: HttpExecutorConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client, config })
    }

    /// HTTP verb for an action: explicit route method, then the action type
    pub fn method_for(action: &SemanticScheduledAction) -> String {
        if let Some(method) = action.routing_method() {
            return method.to_uppercase();
        }
        verb_for_type(action.action_type()).to_string()
    }

    async fn send(
        &self,
        action: &SemanticScheduledAction,
        url: &str,
    ) -> Result<ExecutionResult, ExecutionError> {
        let method_name = Self::method_for(action);
        let method = Method::from_bytes(method_name.as_bytes()).map_err(|_| {
            ExecutionError::new(
                codes::INVALID_ACTION,
                format!("invalid HTTP method {method_name}"),
            )
        })?;

        let mut request = self
            .client
            .request(method.clone(), url)
            .header("X-Action-Id", action.identifier());
        if method != Method::GET && method != Method::HEAD {
            if let Some(body) = &action.action.object {
                request = request.json(body);
            }
        }

        tracing::debug!(method = %method, url, "sending HTTP request");

        let response = request.send().await.map_err(|e| transport_error(&e, url))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| transport_error(&e, url))?;

        if status.is_success() {
            Ok(ExecutionResult::completed(body)
                .with_metadata("status_code", status.as_u16())
                .with_metadata("method", method.as_str())
                .with_metadata("url", url))
        } else {
            Err(ExecutionError::new(
                codes::http_status(status.as_u16()),
                format!("{method} {url} returned {status}"),
            )
            .with_details(json!({
                "status_code": status.as_u16(),
                "body": truncate(&body, ERROR_BODY_LIMIT),
            })))
        }
    }
}

#[async_trait]
impl Executor for HttpExecutor {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn can_handle(&self, action: &SemanticScheduledAction) -> bool {
        action
            .routing_url()
            .is_some_and(|url| url.starts_with("http://") || url.starts_with("https://"))
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        action: &SemanticScheduledAction,
    ) -> Result<ExecutionResult, ExecutionError> {
        let url = action.routing_url().ok_or_else(|| {
            ExecutionError::new(codes::INVALID_ACTION, "action has no routing URL")
        })?;

        tokio::select! {
            _ = ctx.cancelled() => Err(ExecutionError::cancelled()),
            result = self.send(action, &url) => result,
        }
    }
}

/// Conventional verb for a schema.org action type
fn verb_for_type(action_type: &str) -> &'static str {
    match action_type {
        "SearchAction" | "FindAction" | "ViewAction" | "ReadAction" | "CheckAction"
        | "DownloadAction" => "GET",
        "UpdateAction" | "ReplaceAction" => "PUT",
        "DeleteAction" => "DELETE",
        _ => "POST",
    }
}

fn transport_error(err: &reqwest::Error, url: &str) -> ExecutionError {
    let code = if err.is_timeout() {
        codes::HTTP_TIMEOUT
    } else {
        codes::HTTP_TRANSPORT
    };
    ExecutionError::new(code, format!("request to {url} failed: {err}"))
}

fn truncate(body: &str, limit: usize) -> &str {
    if body.len() <= limit {
        return body;
    }
    let mut end = limit;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ControlMetadata;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn executor() -> HttpExecutor {
        HttpExecutor::new(HttpExecutorConfig::default().with_timeout(Duration::from_secs(5))).unwrap()
    }

    fn routed(action_type: &str, url: String) -> SemanticScheduledAction {
        SemanticScheduledAction::new(action_type, "call").with_target(json!({
            "@type": "EntryPoint",
            "urlTemplate": url
        }))
    }

    #[test]
    fn test_method_mapping() {
        let search = routed("SearchAction", "https://x".into());
        assert_eq!(HttpExecutor::method_for(&search), "GET");

        let delete = routed("DeleteAction", "https://x".into());
        assert_eq!(HttpExecutor::method_for(&delete), "DELETE");

        let create = routed("CreateAction", "https://x".into());
        assert_eq!(HttpExecutor::method_for(&create), "POST");

        let explicit = SemanticScheduledAction::new("SearchAction", "s")
            .with_control(ControlMetadata::new().with_route("https://x", Some("patch")));
        assert_eq!(HttpExecutor::method_for(&explicit), "PATCH");
    }

    #[test]
    fn test_can_handle_requires_http_route() {
        let executor = executor();
        assert!(executor.can_handle(&routed("Action", "https://example.com".into())));
        assert!(!executor.can_handle(&routed("Action", "file:///tmp/x".into())));
        assert!(!executor.can_handle(&SemanticScheduledAction::new("Action", "none")));
    }

    #[tokio::test]
    async fn test_success_returns_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/render"))
            .and(header("X-Action-Id", "call"))
            .and(body_json(json!({"video": 42})))
            .respond_with(ResponseTemplate::new(201).set_body_string("queued"))
            .expect(1)
            .mount(&server)
            .await;

        let action = routed("CreateAction", format!("{}/render", server.uri()))
            .with_object(json!({"video": 42}));
        let result = executor()
            .execute(&ExecutionContext::new(), &action)
            .await
            .unwrap();

        assert_eq!(result.output, "queued");
        assert_eq!(result.metadata["status_code"], 201);
        assert_eq!(result.metadata["method"], "POST");
    }

    #[tokio::test]
    async fn test_non_2xx_is_failure_with_status_code() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("nope"))
            .mount(&server)
            .await;

        let action = routed("SearchAction", format!("{}/missing", server.uri()));
        let err = executor()
            .execute(&ExecutionContext::new(), &action)
            .await
            .unwrap_err();

        assert_eq!(err.code, "HTTP_404");
        assert_eq!(err.details.as_ref().unwrap()["body"], "nope");
    }

    #[tokio::test]
    async fn test_transport_error() {
        // Nothing listens on port 9 of localhost in test environments
        let action = routed("SearchAction", "http://127.0.0.1:9/unreachable".into());
        let err = executor()
            .execute(&ExecutionContext::new(), &action)
            .await
            .unwrap_err();

        assert!(err.code == codes::HTTP_TRANSPORT || err.code == codes::HTTP_TIMEOUT);
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let executor =
            HttpExecutor::new(HttpExecutorConfig::default().with_timeout(Duration::from_millis(100)))
                .unwrap();
        let action = routed("SearchAction", format!("{}/slow", server.uri()));
        let err = executor
            .execute(&ExecutionContext::new(), &action)
            .await
            .unwrap_err();

        assert_eq!(err.code, codes::HTTP_TIMEOUT);
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        let body = "é".repeat(10);
        let cut = truncate(&body, 5);
        assert_eq!(cut.len(), 4);
    }
}
