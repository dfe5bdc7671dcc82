//! Request authentication for the Helix and identity APIs.

use std::fmt;

use reqwest::RequestBuilder;

/// Authentication applied to every outgoing REST request.
pub trait Authentication: Send + Sync + fmt::Debug {
    /// Attach credentials to the request.
    fn authenticate(&self, request: RequestBuilder) -> RequestBuilder;
}

/// No authentication
#[derive(Debug, Clone, Default)]
pub struct NoAuth;

impl Authentication for NoAuth {
    fn authenticate(&self, request: RequestBuilder) -> RequestBuilder {
        request
    }
}

/// Bearer token authentication
#[derive(Clone)]
pub struct BearerAuth {
    token: String,
}

impl BearerAuth {
    /// Create a new bearer token authentication.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl fmt::Debug for BearerAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerAuth")
            .field("token", &"<redacted>")
            .finish()
    }
}

impl Authentication for BearerAuth {
    fn authenticate(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(&self.token)
    }
}

/// User access token plus the application's client id, as Helix expects.
#[derive(Clone, Debug)]
pub struct HelixAuth {
    client_id: String,
    bearer: BearerAuth,
}

impl HelixAuth {
    pub fn new(client_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            bearer: BearerAuth::new(access_token),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

impl Authentication for HelixAuth {
    fn authenticate(&self, request: RequestBuilder) -> RequestBuilder {
        self.bearer
            .authenticate(request)
            .header("Client-Id", &self.client_id)
    }
}
