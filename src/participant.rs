//! Outbound HTTP calls to participant endpoints, and the outcome
//! classification spec.md §4.3 step 3 requires.
//!
//! Grounded in `webhooks::dispatcher::run_sender`'s request/response shape,
//! simplified to a direct call/await (no channel hop) since Try/Confirm/Cancel
//! calls within one transaction are strictly sequential, not fanned out.

use crate::types::{CallOutcome, HttpMethod, ResponseEnvelope};
use std::time::Duration;
use tracing::{debug, instrument};

/// Thin wrapper over `reqwest::Client`. Cloned cheaply (an `Arc` internally),
/// shared across the Orchestrator, Reconciler, and background Confirm/Cancel
/// tasks.
#[derive(Clone)]
pub struct ParticipantClient {
    http: reqwest::Client,
}

impl ParticipantClient {
    pub fn new() -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self { http })
    }

    /// Issues one Try/Confirm/Cancel call and classifies the result into one
    /// of the four outcomes spec.md §4.3 names. Headers and body are
    /// forwarded verbatim from the inbound request (spec.md §6).
    #[instrument(skip(self, body, headers), fields(url = %url, method = %method))]
    pub async fn call(
        &self,
        url: &str,
        method: HttpMethod,
        headers: &[(String, String)],
        body: &[u8],
        timeout: Duration,
    ) -> CallOutcome {
        let mut request = self.http.request(method.as_reqwest(), url).timeout(timeout).body(body.to_vec());
        for (name, value) in headers {
            request = request.header(name, value);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                debug!("transport failure: {}", e);
                return CallOutcome::TransportFailed {
                    raw: Vec::new(),
                    error: e.to_string(),
                };
            }
        };

        let raw = match response.bytes().await {
            Ok(bytes) => bytes.to_vec(),
            Err(e) => {
                return CallOutcome::TransportFailed {
                    raw: Vec::new(),
                    error: e.to_string(),
                };
            }
        };

        match serde_json::from_slice::<ResponseEnvelope>(&raw) {
            Ok(envelope) if envelope.is_success() => CallOutcome::Success { raw, envelope },
            Ok(envelope) => CallOutcome::DomainFailed { raw, envelope },
            Err(e) => CallOutcome::Unparseable { raw, error: e.to_string() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method as method_matcher;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn classifies_success_envelope() {
        let server = MockServer::start().await;
        Mock::given(method_matcher("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"code": 0, "msg": "ok"})))
            .mount(&server)
            .await;

        let client = ParticipantClient::new().unwrap();
        let outcome = client
            .call(&server.uri(), HttpMethod::Post, &[], b"{}", Duration::from_secs(1))
            .await;
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn classifies_domain_failure() {
        let server = MockServer::start().await;
        Mock::given(method_matcher("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"code": 7, "msg": "no stock"})))
            .mount(&server)
            .await;

        let client = ParticipantClient::new().unwrap();
        let outcome = client
            .call(&server.uri(), HttpMethod::Post, &[], b"{}", Duration::from_secs(1))
            .await;
        assert!(matches!(outcome, CallOutcome::DomainFailed { .. }));
        assert_eq!(outcome.reason(), "no stock");
    }

    #[tokio::test]
    async fn classifies_unparseable_reply() {
        let server = MockServer::start().await;
        Mock::given(method_matcher("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = ParticipantClient::new().unwrap();
        let outcome = client
            .call(&server.uri(), HttpMethod::Post, &[], b"{}", Duration::from_secs(1))
            .await;
        assert!(matches!(outcome, CallOutcome::Unparseable { .. }));
    }

    #[tokio::test]
    async fn classifies_transport_failure() {
        let client = ParticipantClient::new().unwrap();
        let outcome = client
            .call("http://127.0.0.1:1", HttpMethod::Post, &[], b"{}", Duration::from_millis(200))
            .await;
        assert!(matches!(outcome, CallOutcome::TransportFailed { .. }));
    }
}
