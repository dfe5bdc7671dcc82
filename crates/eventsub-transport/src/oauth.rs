//! Device-code OAuth flow against the Twitch identity service.
//!
//! Used to obtain and maintain the bot's user access token without a redirect
//! server: [`OAuthClient::start_device_flow`] returns a code for the user to
//! enter, [`OAuthClient::wait_for_token`] polls until it is approved.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use crate::{
    auth::{Authentication, BearerAuth},
    error::{TransportError, TransportResult},
    helix::check_status,
};

/// Identity service base URL.
pub const ID_BASE_URL: &str = "https://id.twitch.tv/oauth2";

/// Scopes a chat bot needs.
pub const DEFAULT_SCOPES: &str = "user:read:chat user:write:chat user:bot";

const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Added to the poll interval on every `slow_down` answer.
const SLOW_DOWN_STEP: Duration = Duration::from_secs(2);

/// A pending device authorization.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct DeviceAuthorization {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    /// Seconds between polls.
    #[serde(default = "default_interval")]
    pub interval: u64,
    /// Seconds until the device code expires.
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
}

fn default_interval() -> u64 {
    5
}

fn default_expires_in() -> u64 {
    600
}

/// Tokens returned by a successful grant.
#[derive(Clone, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Vec<String>,
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("scope", &self.scope)
            .finish()
    }
}

/// Result of a single token poll.
#[derive(Debug)]
pub enum PollOutcome {
    /// The user has not acted yet.
    Pending,
    /// Poll less often.
    SlowDown,
    Granted(TokenSet),
}

#[derive(Deserialize)]
struct OAuthErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl OAuthErrorBody {
    fn code(&self) -> Option<&str> {
        self.error.as_deref().or(self.message.as_deref())
    }
}

/// Client for the identity service.
#[derive(Clone, Debug)]
pub struct OAuthClient {
    base_url: String,
    client_id: String,
    http: Client,
}

impl OAuthClient {
    pub fn new(base_url: impl Into<String>, client_id: impl Into<String>) -> TransportResult<Self> {
        let client_id = client_id.into();
        if client_id.trim().is_empty() {
            return Err(TransportError::config("Client id cannot be empty"));
        }
        let http = Client::builder().timeout(Duration::from_secs(15)).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client_id,
            http,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Request a device code for `scopes` (space separated).
    pub async fn start_device_flow(&self, scopes: &str) -> TransportResult<DeviceAuthorization> {
        let response = self
            .http
            .post(self.endpoint("device"))
            .form(&[("client_id", self.client_id.as_str()), ("scopes", scopes)])
            .send()
            .await?;
        let response = check_status(response, "device start").await?;
        Ok(response.json().await?)
    }

    /// Poll the token endpoint once.
    pub async fn poll_token(&self, device_code: &str) -> TransportResult<PollOutcome> {
        let response = self
            .http
            .post(self.endpoint("token"))
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("grant_type", DEVICE_CODE_GRANT),
                ("device_code", device_code),
            ])
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::OK {
            return Ok(PollOutcome::Granted(response.json().await?));
        }

        let text = response.text().await.unwrap_or_default();
        let code = serde_json::from_str::<OAuthErrorBody>(&text)
            .ok()
            .and_then(|body| body.code().map(str::to_string));
        match code.as_deref() {
            Some("authorization_pending") => Ok(PollOutcome::Pending),
            Some("slow_down") => Ok(PollOutcome::SlowDown),
            Some(reason @ ("access_denied" | "expired_token")) => {
                Err(TransportError::rejected(reason))
            }
            _ => Err(TransportError::api(status, text)),
        }
    }

    /// Poll until the user approves, the code expires, or the flow is refused.
    ///
    /// Unexpected poll errors are logged and polling continues until the
    /// device code expires.
    pub async fn wait_for_token(
        &self,
        authorization: &DeviceAuthorization,
    ) -> TransportResult<TokenSet> {
        let expires_in = Duration::from_secs(authorization.expires_in);
        let deadline = Instant::now() + expires_in;
        let mut interval = Duration::from_secs(authorization.interval);

        while Instant::now() < deadline {
            sleep(interval).await;
            match self.poll_token(&authorization.device_code).await {
                Ok(PollOutcome::Granted(tokens)) => return Ok(tokens),
                Ok(PollOutcome::Pending) => debug!("Authorization pending"),
                Ok(PollOutcome::SlowDown) => {
                    interval += SLOW_DOWN_STEP;
                    debug!(?interval, "Slowing down token polling");
                }
                Err(err @ TransportError::Rejected { .. }) => return Err(err),
                Err(err) => warn!(error = %err, "Token poll failed"),
            }
        }

        Err(TransportError::timeout(expires_in))
    }

    /// Exchange a refresh token. The old refresh token is kept if the
    /// response does not rotate it.
    pub async fn refresh(&self, refresh_token: &str) -> TransportResult<TokenSet> {
        let response = self
            .http
            .post(self.endpoint("token"))
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await?;
        let response = check_status(response, "refresh").await?;

        let mut tokens: TokenSet = response.json().await?;
        if tokens.refresh_token.is_none() {
            tokens.refresh_token = Some(refresh_token.to_string());
        }
        Ok(tokens)
    }

    /// Describe `access_token`. 401 means the token is no longer valid.
    pub async fn validate(&self, access_token: &str) -> TransportResult<serde_json::Value> {
        let request = self.http.get(self.endpoint("validate"));
        let response = BearerAuth::new(access_token)
            .authenticate(request)
            .send()
            .await?;
        let response = check_status(response, "validate").await?;
        Ok(response.json().await?)
    }
}
