//! # EventSub Transport
//!
//! Protocol plumbing for Twitch EventSub over WebSocket.
//!
//! - [`websocket`]: session state machine, frame model, subscription registry
//! - [`helix`]: the REST gateway ([`EventSubApi`]) and its HTTP client
//! - [`oauth`]: device-code OAuth flow
//! - [`rate_limit`]: the outbound send throttle
//! - [`reconnect`]: reconnect delay policies
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use eventsub_transport::{
//!     auth::HelixAuth,
//!     helix::{HelixClient, HelixConfig, HELIX_BASE_URL},
//!     reconnect::FixedBackoff,
//!     websocket::{Event, Session, SessionConfig, SubscriptionRegistry},
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let api = Arc::new(HelixClient::new(
//!         HelixConfig::new(HELIX_BASE_URL),
//!         HelixAuth::new("client-id", "token"),
//!     )?);
//!     let registry = SubscriptionRegistry::for_chat_channels(["1234"], "5678");
//!
//!     let (handle, mut events) =
//!         Session::start(SessionConfig::default(), api, registry, FixedBackoff::default())?;
//!
//!     while let Some(event) = events.next().await {
//!         if let Event::Notification(notification) = event {
//!             println!("{}: {}", notification.kind(), notification.event);
//!         }
//!     }
//!     handle.closed().await;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod error;
pub mod helix;
pub mod oauth;
pub mod rate_limit;
pub mod reconnect;
pub mod websocket;

pub use error::{TransportError, TransportResult};
pub use helix::{EventSubApi, HelixClient, HelixConfig, OutgoingChatMessage};
pub use rate_limit::SendThrottle;
pub use websocket::{Event, Session, SessionConfig, SessionHandle, SessionStream};
