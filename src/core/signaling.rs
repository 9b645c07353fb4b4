//! Signaling collaborator interface.
//!
//! Connection setup requires exactly one exchange: the locally generated
//! session description goes out, the remote-generated answer comes back.
//! The core treats this as a single request/response call with no retry -
//! a failed exchange is fatal to the session instance.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::core::error::{SessionError, SessionResult};
use crate::utils::endpoint::validate_signaling_url;

/// Env var holding the signaling relay URL.
pub const SIGNALING_URL_ENV: &str = "VOXLINK_SIGNALING_URL";

/// Env var holding the relay bearer credential, if the relay requires one.
pub const SIGNALING_TOKEN_ENV: &str = "VOXLINK_SIGNALING_TOKEN";

/// Env var overriding the model requested at signaling time.
pub const MODEL_ENV: &str = "VOXLINK_MODEL";

/// Exchanges session descriptions with the remote provider.
#[async_trait]
pub trait SignalingClient: Send + Sync {
    /// Hand the local description to the relay; receive the remote answer.
    async fn exchange(&self, local_sdp: &str) -> SessionResult<String>;
}

#[derive(Debug, Serialize)]
struct OfferPayload<'a> {
    sdp: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct AnswerPayload {
    sdp: String,
    #[serde(rename = "type")]
    kind: String,
}

/// HTTP signaling relay client.
///
/// POSTs `{"sdp": ..., "type": "offer"}` to the configured endpoint and
/// expects `{"sdp": ..., "type": "answer"}` back.
pub struct HttpSignaling {
    endpoint: Url,
    token: Option<String>,
    model: String,
    client: reqwest::Client,
}

impl HttpSignaling {
    /// Create a client for the given relay endpoint (HTTPS, or HTTP to
    /// loopback for local relays).
    pub fn new(endpoint: &str, token: Option<String>) -> SessionResult<Self> {
        let endpoint = validate_signaling_url(endpoint)
            .map_err(|e| SessionError::InvalidConfiguration(e.to_string()))?;
        Ok(Self {
            endpoint,
            token,
            model: crate::config::DEFAULT_MODEL.to_string(),
            client: reqwest::Client::new(),
        })
    }

    /// Request a specific model at signaling time.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Build from `VOXLINK_SIGNALING_URL` / `VOXLINK_SIGNALING_TOKEN` /
    /// `VOXLINK_MODEL`, loading a `.env` file when present.
    pub fn from_env() -> SessionResult<Self> {
        dotenvy::dotenv().ok();
        let endpoint = std::env::var(SIGNALING_URL_ENV).map_err(|_| {
            SessionError::InvalidConfiguration(format!("{SIGNALING_URL_ENV} is not set"))
        })?;
        let token = std::env::var(SIGNALING_TOKEN_ENV).ok();
        let client = Self::new(&endpoint, token)?;
        Ok(match std::env::var(MODEL_ENV) {
            Ok(model) => client.with_model(model),
            Err(_) => client,
        })
    }
}

#[async_trait]
impl SignalingClient for HttpSignaling {
    async fn exchange(&self, local_sdp: &str) -> SessionResult<String> {
        let payload = OfferPayload {
            sdp: local_sdp,
            kind: "offer",
        };

        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("model", &self.model);

        let mut request = self.client.post(url).json(&payload);
        if let Some(ref token) = self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SessionError::Signaling(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SessionError::Signaling(format!(
                "relay rejected the offer with {status}"
            )));
        }

        let answer: AnswerPayload = response
            .json()
            .await
            .map_err(|e| SessionError::Signaling(format!("invalid answer payload: {e}")))?;

        if !answer.kind.eq_ignore_ascii_case("answer") {
            return Err(SessionError::Signaling(format!(
                "unexpected description type from relay: {}",
                answer.kind
            )));
        }

        Ok(answer.sdp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_rejects_plain_http_endpoint() {
        let result = HttpSignaling::new("http://relay.example.com/session", None);
        assert!(matches!(
            result,
            Err(SessionError::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn test_exchange_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/session"))
            .and(query_param("model", "gpt-4o-mini-realtime-preview"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(serde_json::json!({ "type": "offer" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sdp": "v=0 answer",
                "type": "answer",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let signaling = HttpSignaling::new(
            &format!("{}/session", server.uri()),
            Some("secret".to_string()),
        )
        .unwrap()
        .with_model("gpt-4o-mini-realtime-preview");

        let answer = signaling.exchange("v=0 offer").await.unwrap();
        assert_eq!(answer, "v=0 answer");
    }

    #[tokio::test]
    async fn test_exchange_surfaces_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let signaling = HttpSignaling::new(&server.uri(), None).unwrap();
        let err = signaling.exchange("v=0 offer").await.unwrap_err();
        assert!(matches!(err, SessionError::Signaling(_)));
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn test_exchange_rejects_wrong_description_type() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sdp": "v=0",
                "type": "offer",
            })))
            .mount(&server)
            .await;

        let signaling = HttpSignaling::new(&server.uri(), None).unwrap();
        let err = signaling.exchange("v=0 offer").await.unwrap_err();
        assert!(err.to_string().contains("unexpected description type"));
    }
}
