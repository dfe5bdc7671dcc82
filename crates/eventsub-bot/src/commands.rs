//! Chat command parsing and execution.
//!
//! Only text starting with `!` is considered. The command word is matched
//! case-insensitively; arguments are passed on exactly as typed.

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{lights::Lights, prize::PrizeGenerator};

pub const GREETING: &str = "Hey there! o/";
pub const HELP_TEXT: &str = "Commands: !hello, !echo <text>, !lights <colour>, !prize [user] [count]";
pub const LIGHTS_USAGE: &str = "Usage: !lights <colour name or #hex>";

/// Default global cooldown of `!lights`.
pub const LIGHTS_COOLDOWN: Duration = Duration::from_secs(300);

/// Inclusive bounds on the number of prizes per `!prize`.
pub const MIN_PRIZES: u64 = 1;
pub const MAX_PRIZES: u64 = 5;

const SIGIL: char = '!';

/// A recognized command with its arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command<'a> {
    Hello,
    Echo(&'a str),
    Help,
    /// Colour value, empty when missing.
    Lights(&'a str),
    Prize(PrizeRequest),
    Unknown(&'a str),
}

/// Who gets prizes, and how many.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrizeRequest {
    pub recipient: String,
    pub count: u64,
}

impl<'a> Command<'a> {
    /// Parse chat text. Returns `None` for ordinary chat.
    pub fn parse(text: &'a str, chatter: Option<&str>) -> Option<Self> {
        let text = text.trim();
        if !text.starts_with(SIGIL) {
            return None;
        }

        let (word, rest) = match text.find(char::is_whitespace) {
            Some(end) => (&text[..end], &text[end..]),
            None => (text, ""),
        };
        let command = match word.to_lowercase().as_str() {
            "!hello" => Self::Hello,
            // Only the single separator is dropped; the rest is echoed as typed.
            "!echo" => Self::Echo(rest.strip_prefix(char::is_whitespace).unwrap_or(rest)),
            "!help" => Self::Help,
            "!lights" => Self::Lights(rest.trim()),
            "!prize" => Self::Prize(PrizeRequest::parse(rest, chatter)),
            _ => Self::Unknown(word),
        };
        Some(command)
    }
}

impl PrizeRequest {
    /// `[count]` or `<recipient> [count]`. The recipient defaults to the
    /// chatter and the count is clamped to `MIN_PRIZES..=MAX_PRIZES`.
    pub fn parse(args: &str, chatter: Option<&str>) -> Self {
        let mut recipient = chatter
            .filter(|c| !c.is_empty())
            .unwrap_or("someone")
            .to_string();
        let mut count = MIN_PRIZES;

        let mut parts = args.split_whitespace();
        if let Some(first) = parts.next() {
            if let Some(n) = parse_count(first) {
                count = n;
            } else {
                let named = first.trim_start_matches('@');
                if !named.is_empty() {
                    recipient = named.to_string();
                }
                if let Some(n) = parts.next().and_then(parse_count) {
                    count = n;
                }
            }
        }

        Self {
            recipient,
            count: count.clamp(MIN_PRIZES, MAX_PRIZES),
        }
    }
}

/// All-digit arguments are counts; values too large for `u64` saturate.
fn parse_count(arg: &str) -> Option<u64> {
    if arg.is_empty() || !arg.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(arg.parse().unwrap_or(u64::MAX))
}

/// Identifies one cooldown clock: a command, optionally narrowed to a scope
/// such as a channel or user.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CooldownKey {
    pub command: &'static str,
    pub scope: Option<String>,
}

impl CooldownKey {
    pub fn global(command: &'static str) -> Self {
        Self {
            command,
            scope: None,
        }
    }

    pub fn scoped(command: &'static str, scope: impl Into<String>) -> Self {
        Self {
            command,
            scope: Some(scope.into()),
        }
    }
}

/// Last-fired times on the monotonic clock.
#[derive(Debug, Default)]
pub struct Cooldowns {
    last_fired: HashMap<CooldownKey, Instant>,
}

impl Cooldowns {
    /// Time left before `key` may fire again, or `None` if it may fire now.
    pub fn remaining(&self, key: &CooldownKey, window: Duration, now: Instant) -> Option<Duration> {
        let last = self.last_fired.get(key)?;
        let elapsed = now.saturating_duration_since(*last);
        window.checked_sub(elapsed).filter(|left| !left.is_zero())
    }

    pub fn record(&mut self, key: CooldownKey, at: Instant) {
        self.last_fired.insert(key, at);
    }
}

/// Renders a remaining cooldown as whole minutes and seconds.
pub fn format_remaining(remaining: Duration) -> String {
    let secs = remaining.as_secs();
    format!("{}m {}s", secs / 60, secs % 60)
}

/// Turns commands into at most one reply, calling the lights service for
/// `!lights`.
pub struct CommandProcessor {
    lights: Arc<dyn Lights>,
    prizes: Arc<dyn PrizeGenerator>,
    lights_cooldown: Duration,
    cooldowns: Cooldowns,
}

impl std::fmt::Debug for CommandProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandProcessor")
            .field("lights_cooldown", &self.lights_cooldown)
            .field("cooldowns", &self.cooldowns)
            .finish_non_exhaustive()
    }
}

impl CommandProcessor {
    pub fn new(lights: Arc<dyn Lights>, prizes: Arc<dyn PrizeGenerator>) -> Self {
        Self {
            lights,
            prizes,
            lights_cooldown: LIGHTS_COOLDOWN,
            cooldowns: Cooldowns::default(),
        }
    }

    #[must_use]
    pub fn lights_cooldown(mut self, cooldown: Duration) -> Self {
        self.lights_cooldown = cooldown;
        self
    }

    /// Handle one chat message. Returns the reply text, if any.
    pub async fn handle(&mut self, text: &str, chatter: Option<&str>) -> Option<String> {
        let command = Command::parse(text, chatter)?;
        debug!(?command, "Command");

        match command {
            Command::Hello => Some(GREETING.to_string()),
            Command::Echo(text) => Some(text.to_string()),
            Command::Help => Some(HELP_TEXT.to_string()),
            Command::Lights(value) => Some(self.lights(value).await),
            Command::Prize(request) => Some(self.prize(&request)),
            Command::Unknown(word) => {
                debug!(command = word, "Ignoring unknown command");
                None
            }
        }
    }

    async fn lights(&mut self, value: &str) -> String {
        if value.is_empty() {
            return LIGHTS_USAGE.to_string();
        }

        let key = CooldownKey::global("lights");
        let now = Instant::now();
        if let Some(left) = self.cooldowns.remaining(&key, self.lights_cooldown, now) {
            return format!("Lights cooldown: try again in {}", format_remaining(left));
        }

        match self.lights.set_colour(value).await {
            Ok(()) => {
                // Only a successful change starts the cooldown.
                self.cooldowns.record(key, now);
                info!(%value, "Lights set");
                format!("Lights set to {value}")
            }
            Err(err) => {
                warn!(%value, error = %err, "Lights call failed");
                format!("Lights error: {err}")
            }
        }
    }

    fn prize(&self, request: &PrizeRequest) -> String {
        let prizes: Vec<String> = (0..request.count).map(|_| self.prizes.phrase()).collect();
        match prizes.as_slice() {
            [single] => format!("{} receives a prize: {single}", request.recipient),
            _ => format!("{} receives prizes: {}", request.recipient, prizes.join("; ")),
        }
    }
}
