//! One instrumented request per call.

use std::collections::BTreeMap;

use async_trait::async_trait;
use http::{HeaderName, HeaderValue, Method};
use log::{debug, warn};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::domain::{Attempt, AttemptOutcome, Timeline};
use crate::error::{ConntraceError, Result};
use crate::trace::{BufferedClientTrace, ComposedTrace, LogTrace};
use crate::transport::{Request, Transport};

/// Performs one attempt and classifies it. Never fails: errors become the outcome.
#[async_trait]
pub trait AttemptExecutor: Send {
    async fn execute(&mut self, attempt: u64, cancel: &CancellationToken) -> Attempt;
}

/// The configured request, validated anew for each attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTemplate {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
}

impl RequestTemplate {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn build(&self) -> Result<Request> {
        let method = Method::from_bytes(self.method.trim().to_ascii_uppercase().as_bytes())
            .map_err(|e| ConntraceError::InvalidRequest(format!("method {:?}: {}", self.method, e)))?;
        let url = Url::parse(&self.url).map_err(|e| ConntraceError::InvalidRequest(format!("url {:?}: {}", self.url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConntraceError::InvalidRequest(format!(
                "url {:?}: scheme must be http or https",
                self.url
            )));
        }
        if url.host().is_none() {
            return Err(ConntraceError::InvalidRequest(format!("url {:?}: missing host", self.url)));
        }

        let mut request = Request::new(method, url);
        for (name, value) in &self.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ConntraceError::InvalidRequest(format!("header name {name:?}: {e}")))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|e| ConntraceError::InvalidRequest(format!("header {name}: {e}")))?;
            request.headers.append(header_name, header_value);
        }
        request.body = self.body.as_ref().map(|body| body.clone().into_bytes());
        Ok(request)
    }
}

/// Sends the template through a shared [`Transport`], recording every lifecycle event.
pub struct InstrumentedExecutor {
    transport: Transport,
    template: RequestTemplate,
}

impl InstrumentedExecutor {
    pub fn new(transport: Transport, template: RequestTemplate) -> Self {
        Self { transport, template }
    }
}

#[async_trait]
impl AttemptExecutor for InstrumentedExecutor {
    async fn execute(&mut self, attempt: u64, cancel: &CancellationToken) -> Attempt {
        let request = match self.template.build() {
            Ok(request) => request,
            Err(e) => {
                warn!("attempt {}: request setup failed: {}", attempt, e);
                return Attempt::new(Timeline::new(), AttemptOutcome::SetupFailure(e.to_string()));
            }
        };

        let mut recorder = BufferedClientTrace::new();
        let mut log_trace = LogTrace::new(attempt);
        let result = {
            let mut trace = ComposedTrace::new(&mut recorder, &mut log_trace);
            self.transport.round_trip(&request, &mut trace, cancel).await
        };

        let outcome = match result {
            Ok(response) => {
                debug!(
                    "attempt {}: {} with {} body bytes (discarded)",
                    attempt, response.status, response.body_len
                );
                AttemptOutcome::completed(response.status)
            }
            Err(e) => AttemptOutcome::TransportFailure(e),
        };
        Attempt::new(recorder.into_timeline(), outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ProxyConfig, TransportConfig};

    #[test]
    fn test_template_builds_request() {
        let mut template = RequestTemplate::get("https://update.traefik.io/repos/traefik/traefik/releases");
        template.method = "post".to_string();
        template.headers.insert("x-probe".to_string(), "1".to_string());
        template.body = Some("{}".to_string());

        let request = template.build().unwrap();
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.url.host_str(), Some("update.traefik.io"));
        assert_eq!(request.headers["x-probe"], "1");
        assert_eq!(request.body.as_deref(), Some(b"{}".as_slice()));
    }

    #[test]
    fn test_template_rejects_bad_parts() {
        assert!(RequestTemplate::get("not a url").build().is_err());
        assert!(RequestTemplate::get("ftp://example.com/").build().is_err());

        let mut bad_method = RequestTemplate::get("http://example.com/");
        bad_method.method = "GE T".to_string();
        assert!(matches!(bad_method.build(), Err(ConntraceError::InvalidRequest(_))));

        let mut bad_header = RequestTemplate::get("http://example.com/");
        bad_header.headers.insert("bad header".to_string(), "x".to_string());
        assert!(matches!(bad_header.build(), Err(ConntraceError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_setup_failure_has_empty_timeline() {
        let transport = Transport::new(TransportConfig::default(), ProxyConfig::none()).unwrap();
        let mut executor = InstrumentedExecutor::new(transport, RequestTemplate::get("::::"));
        let attempt = executor.execute(1, &CancellationToken::new()).await;

        assert!(matches!(attempt.outcome, AttemptOutcome::SetupFailure(_)));
        assert!(attempt.timeline.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_attempt_is_a_transport_failure() {
        let transport = Transport::new(TransportConfig::default(), ProxyConfig::none()).unwrap();
        let mut executor = InstrumentedExecutor::new(transport, RequestTemplate::get("http://127.0.0.1:9/"));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let attempt = executor.execute(1, &cancel).await;

        assert!(attempt.outcome.is_transport_failure());
        assert_eq!(attempt.outcome.error_kind(), Some(crate::transport::TransportErrorKind::Cancelled));
    }
}
