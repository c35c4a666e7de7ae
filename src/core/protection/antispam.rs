// Message-flood detection, tracked per user per channel.

use super::protection_models::AntispamLimits;
use super::protection_service::IncomingMessage;
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SpamKey {
    guild_id: u64,
    user_id: u64,
    channel_id: u64,
}

#[derive(Debug, Clone)]
struct SpamState {
    message_ids: Vec<u64>,
    last_message_time: DateTime<Utc>,
    duplicate_count: u32,
    last_content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpamVerdict {
    Clean,
    Spam {
        /// Messages sent inside the window, oldest first. The message that
        /// opened the window is not included.
        message_ids: Vec<u64>,
        duplicate_count: u32,
    },
}

#[derive(Default)]
pub struct SpamTracker {
    states: DashMap<SpamKey, SpamState>,
}

impl SpamTracker {
    pub fn new() -> Self {
        Self {
            states: DashMap::new(),
        }
    }

    pub fn observe(
        &self,
        message: &IncomingMessage<'_>,
        limits: &AntispamLimits,
        now: DateTime<Utc>,
    ) -> SpamVerdict {
        let key = SpamKey {
            guild_id: message.guild_id,
            user_id: message.author_id,
            channel_id: message.channel_id,
        };
        let content = message.content.to_lowercase();

        // First message only opens the window.
        let mut state = match self.states.entry(key) {
            Entry::Occupied(entry) => entry.into_ref(),
            Entry::Vacant(entry) => {
                entry.insert(SpamState {
                    message_ids: Vec::new(),
                    last_message_time: now,
                    duplicate_count: 1,
                    last_content: content,
                });
                return SpamVerdict::Clean;
            }
        };

        let window = Duration::milliseconds(limits.time_window as i64);
        if now - state.last_message_time > window {
            state.message_ids.clear();
            state.duplicate_count = 1;
            state.last_content = content;
        } else {
            state.message_ids.push(message.message_id);
            if content == state.last_content {
                state.duplicate_count += 1;
            } else {
                state.duplicate_count = 1;
                state.last_content = content;
            }

            if state.message_ids.len() >= limits.message_limit as usize
                || state.duplicate_count >= limits.duplicate_limit
            {
                let verdict = SpamVerdict::Spam {
                    message_ids: std::mem::take(&mut state.message_ids),
                    duplicate_count: state.duplicate_count,
                };
                drop(state);
                self.states.remove(&key);
                return verdict;
            }
        }

        state.last_message_time = now;
        SpamVerdict::Clean
    }

    pub fn guild_ids(&self) -> HashSet<u64> {
        self.states.iter().map(|entry| entry.key().guild_id).collect()
    }

    /// Drop state for conversations idle for longer than `idle(guild)`.
    pub fn sweep(&self, now: DateTime<Utc>, idle: impl Fn(u64) -> Duration) -> usize {
        let before = self.states.len();
        self.states
            .retain(|key, s| now - s.last_message_time < idle(key.guild_id));
        before - self.states.len()
    }
}
