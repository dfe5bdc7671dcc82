//! EventSub WebSocket session.
//!
//! The session task owns one connection at a time and drives it through the
//! handshake, replays the [`SubscriptionRegistry`] against every new session,
//! and reconnects on failure or when the server asks it to move.
//!
//! ```text
//! ┌───────────────┐  ctrl   ┌──────────────┐   ws    ┌──────────────┐
//! │ SessionHandle │────────▶│ session task │◀───────▶│   EventSub   │
//! │    (Clone)    │         │ (background) │         │    server    │
//! └───────────────┘         └──────┬───────┘         └──────────────┘
//!                                  │ events            ▲
//!                                  ▼                   │ REST
//!                         ┌───────────────┐     ┌──────┴───────┐
//!                         │ SessionStream │     │ EventSubApi  │
//!                         └───────────────┘     └──────────────┘
//! ```
//!
//! # Module Structure
//!
//! - `config`: session configuration
//! - `frame`: envelope parsing into [`Frame`]s
//! - `subscription`: the subscription registry
//! - `transport`: the underlying WebSocket connection
//! - `session`: the state machine and its background task

mod config;
mod frame;
mod session;
mod subscription;
mod transport;

pub use config::{EVENTSUB_WS_URL, SessionConfig};
pub use frame::{Frame, Notification, SessionInfo, SubscriptionInfo};
pub use session::{
    ConnectionEpoch, ControlCommand, Event, Session, SessionHandle, SessionState, SessionStream,
};
pub use subscription::{CHANNEL_CHAT_MESSAGE, SubmitReport, Subscription, SubscriptionRegistry};
pub use transport::WsTransport;
