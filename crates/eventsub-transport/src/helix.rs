//! Helix REST gateway.
//!
//! [`EventSubApi`] is the seam the session manager and the bot talk to;
//! [`HelixClient`] is its HTTP implementation.

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::{
    auth::{Authentication, HelixAuth},
    error::{TransportError, TransportResult},
    websocket::Subscription,
};

/// Default Helix base URL.
pub const HELIX_BASE_URL: &str = "https://api.twitch.tv/helix";

/// Helix accepts at most this many `login` parameters per users request.
const USERS_BATCH_SIZE: usize = 100;

/// Keep error bodies in logs short.
const MAX_ERROR_BODY: usize = 512;

/// REST operations used by the session and the bot.
#[async_trait]
pub trait EventSubApi: Send + Sync + 'static {
    /// Resolve a single login to its user id.
    async fn lookup_user_id(&self, login: &str) -> TransportResult<String>;

    /// Resolve many logins. Keys of the returned map are lower-cased logins.
    async fn lookup_user_ids(&self, logins: &[String]) -> TransportResult<HashMap<String, String>>;

    /// Create a WebSocket-transport subscription bound to `session_id`.
    async fn create_subscription(
        &self,
        session_id: &str,
        subscription: &Subscription,
    ) -> TransportResult<()>;

    /// Post a chat message.
    async fn send_chat_message(&self, message: &OutgoingChatMessage) -> TransportResult<()>;
}

/// Body of a send-chat-message request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OutgoingChatMessage {
    pub broadcaster_id: String,
    pub sender_id: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_parent_message_id: Option<String>,
}

/// Configuration for the Helix client.
#[derive(Debug, Clone)]
pub struct HelixConfig {
    /// Base URL for all requests
    pub base_url: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// User agent string
    pub user_agent: String,
}

impl Default for HelixConfig {
    fn default() -> Self {
        Self::new(HELIX_BASE_URL)
    }
}

impl HelixConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(10),
            user_agent: concat!("eventsub-transport/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }

    /// Set the request timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> TransportResult<()> {
        if self.base_url.is_empty() {
            return Err(TransportError::config("Base URL cannot be empty"));
        }
        if self.timeout.is_zero() {
            return Err(TransportError::config("Timeout cannot be zero"));
        }
        url::Url::parse(&self.base_url)
            .map_err(|e| TransportError::config(format!("Invalid base URL: {e}")))?;
        Ok(())
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[derive(Deserialize)]
struct DataResponse<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Deserialize)]
struct HelixUser {
    id: String,
    login: String,
}

#[derive(Deserialize)]
struct SentMessage {
    #[serde(default)]
    message_id: Option<String>,
    is_sent: bool,
    #[serde(default)]
    drop_reason: Option<DropReason>,
}

#[derive(Deserialize)]
struct DropReason {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Helix client.
#[derive(Clone, Debug)]
pub struct HelixClient<A = HelixAuth> {
    config: HelixConfig,
    client: Client,
    auth: A,
}

impl<A: Authentication> HelixClient<A> {
    pub fn new(config: HelixConfig, auth: A) -> TransportResult<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()?;
        Ok(Self {
            config,
            client,
            auth,
        })
    }

    async fn fetch_users(&self, logins: &[String]) -> TransportResult<Vec<HelixUser>> {
        let query: Vec<(&str, &str)> = logins.iter().map(|l| ("login", l.as_str())).collect();
        let request = self
            .client
            .get(self.config.endpoint("users"))
            .query(&query);
        let response = check_status(self.auth.authenticate(request).send().await?, "users").await?;
        let body: DataResponse<HelixUser> = response.json().await?;
        Ok(body.data)
    }
}

#[async_trait]
impl<A> EventSubApi for HelixClient<A>
where
    A: Authentication + 'static,
{
    async fn lookup_user_id(&self, login: &str) -> TransportResult<String> {
        let users = self.fetch_users(&[login.to_string()]).await?;
        users
            .into_iter()
            .next()
            .map(|user| user.id)
            .ok_or_else(|| TransportError::rejected(format!("User not found: {login}")))
    }

    async fn lookup_user_ids(&self, logins: &[String]) -> TransportResult<HashMap<String, String>> {
        let mut ids = HashMap::with_capacity(logins.len());
        for batch in logins.chunks(USERS_BATCH_SIZE) {
            for user in self.fetch_users(batch).await? {
                ids.insert(user.login.to_lowercase(), user.id);
            }
        }

        let missing: Vec<&str> = logins
            .iter()
            .filter(|login| !ids.contains_key(&login.to_lowercase()))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(TransportError::rejected(format!(
                "These logins were not found: {}",
                missing.join(", ")
            )));
        }
        Ok(ids)
    }

    async fn create_subscription(
        &self,
        session_id: &str,
        subscription: &Subscription,
    ) -> TransportResult<()> {
        let body = json!({
            "type": subscription.kind,
            "version": subscription.version,
            "condition": subscription.condition,
            "transport": {"method": "websocket", "session_id": session_id},
        });
        let request = self
            .client
            .post(self.config.endpoint("eventsub/subscriptions"))
            .json(&body);
        check_status(
            self.auth.authenticate(request).send().await?,
            "create subscription",
        )
        .await?;
        Ok(())
    }

    async fn send_chat_message(&self, message: &OutgoingChatMessage) -> TransportResult<()> {
        let request = self
            .client
            .post(self.config.endpoint("chat/messages"))
            .json(message);
        let response = check_status(
            self.auth.authenticate(request).send().await?,
            "send chat message",
        )
        .await?;

        let body: DataResponse<SentMessage> = response.json().await?;
        match body.data.into_iter().next() {
            Some(SentMessage {
                is_sent: false,
                drop_reason,
                ..
            }) => {
                let reason = drop_reason
                    .map(|r| format!("{}: {}", r.code, r.message))
                    .unwrap_or_else(|| "message dropped".to_string());
                Err(TransportError::rejected(reason))
            }
            Some(sent) => {
                debug!(message_id = ?sent.message_id, "Chat message sent");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

pub(crate) async fn check_status(response: Response, context: &str) -> TransportResult<Response> {
    let status = response.status();
    if status.is_success() || status.is_informational() || status.is_redirection() {
        return Ok(response);
    }

    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let cut = (0..=MAX_ERROR_BODY)
            .rev()
            .find(|i| body.is_char_boundary(*i))
            .unwrap_or(0);
        body.truncate(cut);
    }

    if status == StatusCode::UNAUTHORIZED {
        return Err(TransportError::unauthorized(format!("{context}: {body}")));
    }
    Err(TransportError::api(status, body))
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_json, header, method, path, query_param},
    };

    use super::*;

    async fn client_for(server: &MockServer) -> HelixClient {
        HelixClient::new(HelixConfig::new(server.uri()), HelixAuth::new("cid", "tok")).unwrap()
    }

    #[test]
    fn config_validation() {
        assert!(HelixConfig::default().validate().is_ok());
        assert!(HelixConfig::new("").validate().is_err());
        assert!(HelixConfig::new("not a url").validate().is_err());
        assert!(
            HelixConfig::new("https://x.test")
                .timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn chat_message_omits_absent_reply_id() {
        let message = OutgoingChatMessage {
            broadcaster_id: "1".into(),
            sender_id: "2".into(),
            message: "hi".into(),
            reply_parent_message_id: None,
        };
        let value = serde_json::to_value(&message).unwrap();
        assert!(value.get("reply_parent_message_id").is_none());
    }

    #[tokio::test]
    async fn lookup_user_id_sends_auth_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users"))
            .and(query_param("login", "alice"))
            .and(header("authorization", "Bearer tok"))
            .and(header("client-id", "cid"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"data": [{"id": "42", "login": "alice"}]})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        assert_eq!(client.lookup_user_id("alice").await.unwrap(), "42");
    }

    #[tokio::test]
    async fn lookup_user_id_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.lookup_user_id("ghost").await.unwrap_err();
        assert!(matches!(err, TransportError::Rejected { .. }));
    }

    #[tokio::test]
    async fn lookup_user_ids_reports_missing_logins() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"data": [{"id": "1", "login": "Alice"}]})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client
            .lookup_user_ids(&["alice".to_string(), "bob".to_string()])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("bob"));
        assert!(!err.to_string().contains("alice"));
    }

    #[tokio::test]
    async fn lookup_user_ids_batches_requests() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .expect(2)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let logins: Vec<String> = (0..150).map(|i| format!("user{i}")).collect();
        assert!(client.lookup_user_ids(&logins).await.is_err());
    }

    #[tokio::test]
    async fn create_subscription_posts_websocket_transport() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/eventsub/subscriptions"))
            .and(body_json(json!({
                "type": "channel.chat.message",
                "version": "1",
                "condition": {"broadcaster_user_id": "1", "user_id": "2"},
                "transport": {"method": "websocket", "session_id": "sess"}
            })))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({"data": []})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        client
            .create_subscription("sess", &Subscription::chat_message("1", "2"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unauthorized_maps_to_unauthorized_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/eventsub/subscriptions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid token"))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client
            .create_subscription("sess", &Subscription::chat_message("1", "2"))
            .await
            .unwrap_err();
        assert!(err.is_unauthorized());
    }

    #[tokio::test]
    async fn other_client_errors_map_to_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/messages"))
            .respond_with(ResponseTemplate::new(422).set_body_string("too long"))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client
            .send_chat_message(&OutgoingChatMessage {
                broadcaster_id: "1".into(),
                sender_id: "2".into(),
                message: "x".into(),
                reply_parent_message_id: Some("parent".into()),
            })
            .await
            .unwrap_err();
        match err {
            TransportError::Api { status, body } => {
                assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
                assert_eq!(body, "too long");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn dropped_message_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/messages"))
            .and(body_json(json!({
                "broadcaster_id": "1",
                "sender_id": "2",
                "message": "hi",
                "reply_parent_message_id": "parent"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{
                    "message_id": "",
                    "is_sent": false,
                    "drop_reason": {"code": "msg_duplicate", "message": "duplicate"}
                }]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client
            .send_chat_message(&OutgoingChatMessage {
                broadcaster_id: "1".into(),
                sender_id: "2".into(),
                message: "hi".into(),
                reply_parent_message_id: Some("parent".into()),
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Rejected: msg_duplicate: duplicate");
    }
}
