//! Outbound chat path.
//!
//! Every reply passes through one [`SendThrottle`], whichever channel it is
//! for. A rejected send is logged and dropped; an unauthorized one is
//! returned to the caller, which stops the bot.

use std::{sync::Arc, time::Duration};

use eventsub_transport::{
    TransportError, TransportResult,
    helix::{EventSubApi, OutgoingChatMessage},
    rate_limit::SendThrottle,
};
use tracing::{debug, warn};

pub struct Outbound<A: ?Sized> {
    api: Arc<A>,
    sender_id: String,
    throttle: SendThrottle,
}

impl<A: ?Sized> std::fmt::Debug for Outbound<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbound")
            .field("sender_id", &self.sender_id)
            .field("throttle", &self.throttle)
            .finish_non_exhaustive()
    }
}

impl<A> Outbound<A>
where
    A: EventSubApi + ?Sized,
{
    pub fn new(api: Arc<A>, sender_id: impl Into<String>, min_interval: Duration) -> Self {
        Self {
            api,
            sender_id: sender_id.into(),
            throttle: SendThrottle::new(min_interval),
        }
    }

    /// Send `text` to a channel, threaded under `reply_to` when given.
    ///
    /// Only [`TransportError::Unauthorized`] is returned; other failures are
    /// logged and the message is dropped.
    pub async fn send(
        &self,
        broadcaster_id: &str,
        text: &str,
        reply_to: Option<&str>,
    ) -> TransportResult<()> {
        let message = OutgoingChatMessage {
            broadcaster_id: broadcaster_id.to_string(),
            sender_id: self.sender_id.clone(),
            message: text.to_string(),
            reply_parent_message_id: reply_to.map(str::to_string),
        };

        let result = self
            .throttle
            .run(|| self.api.send_chat_message(&message))
            .await;

        match result {
            Ok(()) => {
                debug!(%broadcaster_id, "Reply sent");
                Ok(())
            }
            Err(err @ TransportError::Unauthorized { .. }) => Err(err),
            Err(err) => {
                warn!(%broadcaster_id, error = %err, "Send failed, dropping reply");
                Ok(())
            }
        }
    }
}
