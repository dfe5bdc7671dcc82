//! Resolved channels.

use std::collections::HashMap;

/// A monitored channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Channel {
    pub login: String,
    pub broadcaster_id: String,
}

/// Bidirectional login ↔ broadcaster id map, fixed after startup.
#[derive(Clone, Debug, Default)]
pub struct ChannelDirectory {
    channels: Vec<Channel>,
    by_id: HashMap<String, usize>,
    by_login: HashMap<String, usize>,
}

impl ChannelDirectory {
    pub fn new(channels: impl IntoIterator<Item = Channel>) -> Self {
        let mut directory = Self::default();
        for channel in channels {
            let index = directory.channels.len();
            directory.by_id.insert(channel.broadcaster_id.clone(), index);
            directory.by_login.insert(channel.login.clone(), index);
            directory.channels.push(channel);
        }
        directory
    }

    /// Build from the configured logins and the ids the API returned for
    /// them, keeping the configured order. Logins without an id are skipped.
    pub fn from_lookup(logins: &[String], ids: &HashMap<String, String>) -> Self {
        Self::new(logins.iter().filter_map(|login| {
            ids.get(&login.to_lowercase()).map(|id| Channel {
                login: login.to_lowercase(),
                broadcaster_id: id.clone(),
            })
        }))
    }

    pub fn login_for(&self, broadcaster_id: &str) -> Option<&str> {
        self.by_id
            .get(broadcaster_id)
            .map(|&index| self.channels[index].login.as_str())
    }

    pub fn id_for(&self, login: &str) -> Option<&str> {
        self.by_login
            .get(&login.to_lowercase())
            .map(|&index| self.channels[index].broadcaster_id.as_str())
    }

    /// Human-readable name for a broadcaster id, falling back to the id.
    pub fn display_name<'a>(&'a self, broadcaster_id: &'a str) -> &'a str {
        self.login_for(broadcaster_id).unwrap_or(broadcaster_id)
    }

    pub fn broadcaster_ids(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(|c| c.broadcaster_id.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
