//! Declared subscriptions, replayed against every new session.
//!
//! EventSub ties subscriptions to the WebSocket session that created them, so
//! the registry is the single source of truth and is re-submitted in full
//! (never diffed) whenever a welcome frame arrives.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{info, warn};

use crate::{
    error::{TransportError, TransportResult},
    helix::EventSubApi,
};

/// Subscription type for chat messages.
pub const CHANNEL_CHAT_MESSAGE: &str = "channel.chat.message";

/// One declared interest in an event category.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Subscription {
    #[serde(rename = "type")]
    pub kind: String,
    pub version: String,
    pub condition: BTreeMap<String, String>,
}

impl Subscription {
    pub fn new(
        kind: impl Into<String>,
        version: impl Into<String>,
        condition: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        Self {
            kind: kind.into(),
            version: version.into(),
            condition: condition.into_iter().collect(),
        }
    }

    /// `channel.chat.message` v1 for one broadcaster, read as `user_id`.
    pub fn chat_message(broadcaster_id: &str, user_id: &str) -> Self {
        Self::new(
            CHANNEL_CHAT_MESSAGE,
            "1",
            [
                ("broadcaster_user_id".to_string(), broadcaster_id.to_string()),
                ("user_id".to_string(), user_id.to_string()),
            ],
        )
    }
}

/// Outcome of replaying the registry against one session.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SubmitReport {
    pub created: usize,
    pub rejected: usize,
}

/// The immutable set of desired subscriptions.
#[derive(Debug, Default, Clone)]
pub struct SubscriptionRegistry {
    entries: Vec<Subscription>,
}

impl SubscriptionRegistry {
    pub fn new(entries: Vec<Subscription>) -> Self {
        Self { entries }
    }

    /// One chat subscription per broadcaster, with the bot as subscriber.
    pub fn for_chat_channels<'a>(
        broadcaster_ids: impl IntoIterator<Item = &'a str>,
        bot_user_id: &str,
    ) -> Self {
        Self::new(
            broadcaster_ids
                .into_iter()
                .map(|id| Subscription::chat_message(id, bot_user_id))
                .collect(),
        )
    }

    pub fn entries(&self) -> &[Subscription] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Submit every entry, in order, against `session_id`.
    ///
    /// Each attempt is independent: a rejected subscription is logged and the
    /// rest are still submitted. An unauthorized response aborts immediately
    /// with the error, since no other attempt can succeed either.
    pub async fn submit_all<A>(&self, api: &A, session_id: &str) -> TransportResult<SubmitReport>
    where
        A: EventSubApi + ?Sized,
    {
        let mut report = SubmitReport::default();

        for subscription in &self.entries {
            match api.create_subscription(session_id, subscription).await {
                Ok(()) => {
                    report.created += 1;
                    info!(
                        kind = %subscription.kind,
                        condition = ?subscription.condition,
                        "Subscribed"
                    );
                }
                Err(err @ TransportError::Unauthorized { .. }) => return Err(err),
                Err(err) => {
                    report.rejected += 1;
                    warn!(
                        kind = %subscription.kind,
                        condition = ?subscription.condition,
                        error = %err,
                        "Subscription rejected"
                    );
                }
            }
        }

        Ok(report)
    }
}
