//! Routes notifications to the command processor.
//!
//! Only `channel.chat.message` notifications are of interest; everything else
//! is logged and dropped.

use eventsub_transport::websocket::{CHANNEL_CHAT_MESSAGE, Notification};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

/// A chat message decoded from a notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    pub broadcaster_id: String,
    /// Display name, or login when the display name is empty.
    pub chatter: Option<String>,
    /// Reply-correlation token.
    pub message_id: Option<String>,
    /// Plain text of all fragments, in order.
    pub text: String,
}

#[derive(Deserialize)]
struct ChatEvent {
    broadcaster_user_id: String,
    #[serde(default)]
    chatter_user_name: Option<String>,
    #[serde(default)]
    chatter_user_login: Option<String>,
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    message: MessageBody,
}

#[derive(Default, Deserialize)]
struct MessageBody {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    fragments: Vec<Fragment>,
}

#[derive(Deserialize)]
struct Fragment {
    // Every fragment type (text, emote, mention, cheermote) carries its text.
    #[serde(default)]
    text: Option<String>,
}

impl MessageBody {
    fn plain_text(self) -> String {
        if self.fragments.is_empty() {
            return self.text.unwrap_or_default();
        }
        self.fragments
            .into_iter()
            .filter_map(|fragment| fragment.text)
            .collect()
    }
}

impl ChatMessage {
    /// Decode a `channel.chat.message` event payload.
    pub fn from_event(event: &Value) -> Result<Self, serde_json::Error> {
        let event = ChatEvent::deserialize(event)?;
        let chatter = event
            .chatter_user_name
            .filter(|name| !name.is_empty())
            .or(event.chatter_user_login.filter(|login| !login.is_empty()));

        Ok(Self {
            broadcaster_id: event.broadcaster_user_id,
            chatter,
            message_id: event.message_id,
            text: event.message.plain_text(),
        })
    }
}

/// Extract the chat message carried by `notification`, if it is one.
pub fn dispatch(notification: &Notification) -> Option<ChatMessage> {
    if notification.kind() != CHANNEL_CHAT_MESSAGE {
        debug!(kind = notification.kind(), "Ignoring notification");
        return None;
    }

    match ChatMessage::from_event(&notification.event) {
        Ok(message) => Some(message),
        Err(err) => {
            warn!(error = %err, "Dropping malformed chat notification");
            None
        }
    }
}
