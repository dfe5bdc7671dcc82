//! Lighting passthrough.
//!
//! The colour value from chat is forwarded untouched; the lights service does
//! all parsing of names and hex codes.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// Response bodies quoted back into chat are cut to this many characters.
const MAX_BODY_CHARS: usize = 120;

#[derive(Debug, Error)]
pub enum LightsError {
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("{0}")]
    Request(#[from] reqwest::Error),
}

/// Sets the room lights.
#[async_trait]
pub trait Lights: Send + Sync {
    async fn set_colour(&self, value: &str) -> Result<(), LightsError>;
}

/// HTTP client for the local lights API.
#[derive(Clone, Debug)]
pub struct LightsClient {
    endpoint: String,
    http: Client,
}

impl LightsClient {
    pub fn new(base_url: &str) -> Result<Self, LightsError> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            endpoint: format!("{}/set_colour", base_url.trim_end_matches('/')),
            http,
        })
    }
}

#[async_trait]
impl Lights for LightsClient {
    async fn set_colour(&self, value: &str) -> Result<(), LightsError> {
        // Both spellings, so either server schema accepts it.
        let body = json!({"colour": value, "color": value});
        let response = self.http.post(&self.endpoint).json(&body).send().await?;

        let status = response.status();
        if status.as_u16() >= 400 {
            let text = response.text().await.unwrap_or_default();
            return Err(LightsError::Status {
                status: status.as_u16(),
                body: text.chars().take(MAX_BODY_CHARS).collect(),
            });
        }
        debug!(%value, "Lights updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_json, method, path},
    };

    use super::*;

    #[tokio::test]
    async fn posts_both_keys_verbatim() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/set_colour"))
            .and(body_json(json!({"colour": "Rebecca Purple", "color": "Rebecca Purple"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = LightsClient::new(&format!("{}/", server.uri())).unwrap();
        client.set_colour("Rebecca Purple").await.unwrap();
    }

    #[tokio::test]
    async fn error_status_quotes_truncated_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/set_colour"))
            .respond_with(ResponseTemplate::new(400).set_body_string("x".repeat(300)))
            .mount(&server)
            .await;

        let client = LightsClient::new(&server.uri()).unwrap();
        let err = client.set_colour("nope").await.unwrap_err();
        assert_eq!(err.to_string(), format!("HTTP 400: {}", "x".repeat(120)));
    }
}
