//! # EventSub Bot
//!
//! A multi-channel chat bot on top of [`eventsub_transport`]: chat
//! notifications are decoded by the [`dispatcher`], turned into replies by
//! the [`commands`] processor and sent through the rate-limited [`outbound`]
//! path.

pub mod auth;
pub mod bot;
pub mod channels;
pub mod commands;
pub mod config;
pub mod dispatcher;
pub mod env_file;
pub mod lights;
pub mod outbound;
pub mod prize;

pub use bot::{Bot, BotError, Identity};
pub use config::{Cli, Settings};
