//! Command-line and environment configuration.
//!
//! Everything is read once through clap (with environment fallbacks, after
//! `.env` has been loaded) and converted into an owned [`Settings`] that the
//! rest of the bot borrows.

use std::{path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand, ValueEnum};
use eventsub_transport::{
    helix::HELIX_BASE_URL,
    oauth::{DEFAULT_SCOPES, ID_BASE_URL},
    reconnect::{ExponentialBackoff, FixedBackoff, ReconnectPolicy},
    websocket::{EVENTSUB_WS_URL, SessionConfig},
};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing env: {}", .0.join(", "))]
    Missing(Vec<&'static str>),

    #[error("Invalid {field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

#[derive(Debug, Parser)]
#[command(name = "eventsub-bot")]
#[command(about = "Twitch chat bot over EventSub WebSocket", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the bot (default)
    Run,
    /// Obtain or maintain the bot's user access token
    Auth {
        #[command(subcommand)]
        action: AuthAction,

        #[command(flatten)]
        args: AuthArgs,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub enum AuthAction {
    /// Start the device-code flow and wait for approval
    Start {
        /// Space-separated scopes to request
        #[arg(long, env = "SCOPES", default_value = DEFAULT_SCOPES)]
        scopes: String,
    },
    /// Exchange BOT_REFRESH_TOKEN for a new access token
    Refresh,
    /// Show what the current access token grants
    Validate,
}

#[derive(Debug, Clone, Args)]
pub struct AuthArgs {
    #[arg(long, env = "TWITCH_CLIENT_ID", hide_env_values = true)]
    pub client_id: Option<String>,

    #[arg(long, env = "BOT_USER_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    #[arg(long, env = "BOT_REFRESH_TOKEN", hide_env_values = true)]
    pub refresh_token: Option<String>,

    /// Identity service base URL
    #[arg(long, env = "TWITCH_ID_BASE", default_value = ID_BASE_URL)]
    pub id_base: String,

    /// File that receives the new tokens
    #[arg(long, default_value = ".env")]
    pub env_file: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReconnectStrategy {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    #[arg(long, env = "TWITCH_CLIENT_ID", hide_env_values = true)]
    pub client_id: Option<String>,

    #[arg(long, env = "BOT_USER_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// The bot account's login
    #[arg(long, env = "BOT_LOGIN")]
    pub bot_login: Option<String>,

    /// Comma-separated channel logins to join
    #[arg(long, env = "BROADCASTER_LOGINS")]
    pub broadcaster_logins: Option<String>,

    /// Base URL of the local lights API
    #[arg(long, env = "LIGHTS_API_BASE", default_value = "http://localhost:5000")]
    pub lights_api_base: String,

    /// Word list used by !prize
    #[arg(long, env = "PRIZE_WORDS", default_value = "prize_words.json")]
    pub prize_words: PathBuf,

    #[arg(long, env = "EVENTSUB_WS_URL", default_value = EVENTSUB_WS_URL)]
    pub eventsub_ws_url: String,

    #[arg(long, env = "HELIX_BASE", default_value = HELIX_BASE_URL)]
    pub helix_base: String,

    /// Minimum gap between two chat sends
    #[arg(long, env = "MIN_SEND_INTERVAL_MS", default_value_t = 1200)]
    pub min_send_interval_ms: u64,

    /// Global cooldown of !lights after a successful change
    #[arg(long, env = "LIGHTS_COOLDOWN_SECS", default_value_t = 300)]
    pub lights_cooldown_secs: u64,

    /// Delay before reconnecting (initial delay for exponential backoff)
    #[arg(long, env = "RECONNECT_DELAY_MS", default_value_t = 2000)]
    pub reconnect_delay_ms: u64,

    #[arg(
        long,
        env = "RECONNECT_STRATEGY",
        value_enum,
        default_value_t = ReconnectStrategy::Fixed
    )]
    pub reconnect_strategy: ReconnectStrategy,

    /// How long to wait for the welcome frame
    #[arg(long, env = "WELCOME_TIMEOUT_SECS", default_value_t = 10)]
    pub welcome_timeout_secs: u64,

    /// Do not reconnect when keepalives stop arriving
    #[arg(long)]
    pub no_keepalive_watchdog: bool,
}

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub client_id: String,
    pub access_token: String,
    pub bot_login: String,
    pub broadcaster_logins: Vec<String>,
    pub lights_api_base: String,
    pub prize_words: PathBuf,
    pub eventsub_ws_url: String,
    pub helix_base: String,
    pub min_send_interval: Duration,
    pub lights_cooldown: Duration,
    pub reconnect_delay: Duration,
    pub reconnect_strategy: ReconnectStrategy,
    pub welcome_timeout: Duration,
    pub keepalive_watchdog: bool,
}

impl Settings {
    /// Session configuration for the EventSub connection.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::new(&self.eventsub_ws_url)
            .welcome_timeout(self.welcome_timeout)
            .keepalive_watchdog(self.keepalive_watchdog)
    }

    pub fn reconnect_policy(&self) -> Box<dyn ReconnectPolicy> {
        match self.reconnect_strategy {
            ReconnectStrategy::Fixed => Box::new(FixedBackoff::new(self.reconnect_delay)),
            ReconnectStrategy::Exponential => Box::new(self.exponential_backoff()),
        }
    }

    fn exponential_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_delay: self.reconnect_delay,
            max_delay: ExponentialBackoff::default()
                .max_delay
                .max(self.reconnect_delay),
            ..Default::default()
        }
    }
}

impl TryFrom<RunArgs> for Settings {
    type Error = ConfigError;

    fn try_from(args: RunArgs) -> Result<Self, Self::Error> {
        let client_id = non_empty(args.client_id);
        let access_token = non_empty(args.access_token);
        let bot_login = non_empty(args.bot_login).map(|login| login.to_lowercase());
        let broadcaster_logins = parse_logins(args.broadcaster_logins.as_deref().unwrap_or(""));

        let mut missing = Vec::new();
        if client_id.is_none() {
            missing.push("TWITCH_CLIENT_ID");
        }
        if access_token.is_none() {
            missing.push("BOT_USER_ACCESS_TOKEN");
        }
        if bot_login.is_none() {
            missing.push("BOT_LOGIN");
        }
        if broadcaster_logins.is_empty() {
            missing.push("BROADCASTER_LOGINS");
        }
        let (Some(client_id), Some(access_token), Some(bot_login)) =
            (client_id, access_token, bot_login)
        else {
            return Err(ConfigError::Missing(missing));
        };
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        if args.min_send_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "min-send-interval-ms",
                message: "must be > 0".to_string(),
            });
        }
        if args.reconnect_delay_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "reconnect-delay-ms",
                message: "must be > 0".to_string(),
            });
        }
        if args.welcome_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "welcome-timeout-secs",
                message: "must be > 0".to_string(),
            });
        }

        let settings = Self {
            client_id,
            access_token,
            bot_login,
            broadcaster_logins,
            lights_api_base: args.lights_api_base.trim_end_matches('/').to_string(),
            prize_words: args.prize_words,
            eventsub_ws_url: args.eventsub_ws_url,
            helix_base: args.helix_base,
            min_send_interval: Duration::from_millis(args.min_send_interval_ms),
            lights_cooldown: Duration::from_secs(args.lights_cooldown_secs),
            reconnect_delay: Duration::from_millis(args.reconnect_delay_ms),
            reconnect_strategy: args.reconnect_strategy,
            welcome_timeout: Duration::from_secs(args.welcome_timeout_secs),
            keepalive_watchdog: !args.no_keepalive_watchdog,
        };

        settings
            .session_config()
            .validate()
            .map_err(|message| ConfigError::Invalid {
                field: "eventsub-ws-url",
                message,
            })?;
        if settings.reconnect_strategy == ReconnectStrategy::Exponential {
            settings
                .exponential_backoff()
                .validate()
                .map_err(|message| ConfigError::Invalid {
                    field: "reconnect-delay-ms",
                    message,
                })?;
        }
        Ok(settings)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Split a comma-separated login list: trimmed, lower-cased, empty entries
/// and repeats dropped, order kept.
pub fn parse_logins(raw: &str) -> Vec<String> {
    let mut logins: Vec<String> = Vec::new();
    for login in raw.split(',').map(|s| s.trim().to_lowercase()) {
        if !login.is_empty() && !logins.contains(&login) {
            logins.push(login);
        }
    }
    logins
}
