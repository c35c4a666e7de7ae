// Sliding-window action counter shared by every rate-limited protection module.
//
// One table for all modules; a bucket is keyed by guild, module and actor so
// an actor's channel activity never leaks into their role activity.

use super::protection_models::{ActionKind, ActorBucket, ProtectionModule};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BucketKey {
    pub guild_id: u64,
    pub module: ProtectionModule,
    pub actor_id: u64,
}

/// Result of counting one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackOutcome {
    pub count: u32,
    pub limit: Option<u32>,
    pub violated: bool,
}

#[derive(Default)]
pub struct ActionTracker {
    buckets: DashMap<BucketKey, ActorBucket>,
}

impl ActionTracker {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }

    /// Count one `kind` action by `actor_id` at `now`.
    ///
    /// The bucket is created lazily, and zeroed before counting when
    /// `now - last_reset >= window`. A violation is reported whenever the new
    /// count reaches `limit`; the counter is left as is, so every further
    /// action in the same window reports a violation again.
    pub fn record(
        &self,
        guild_id: u64,
        actor_id: u64,
        kind: ActionKind,
        window: Duration,
        limit: Option<u32>,
        now: DateTime<Utc>,
    ) -> TrackOutcome {
        let module = kind.module();
        let key = BucketKey {
            guild_id,
            module,
            actor_id,
        };

        // The entry guard holds the shard lock, so reset + increment is atomic
        // for this key even with concurrent events for the same actor.
        let mut bucket = self
            .buckets
            .entry(key)
            .or_insert_with(|| ActorBucket::new(module, now));

        if now - bucket.last_reset >= window {
            *bucket = ActorBucket::new(module, now);
        }

        let counter = bucket.counters.entry(kind).or_insert(0);
        *counter += 1;
        let count = *counter;

        TrackOutcome {
            count,
            limit,
            violated: limit.is_some_and(|l| count >= l),
        }
    }

    pub fn bucket(&self, guild_id: u64, module: ProtectionModule, actor_id: u64) -> Option<ActorBucket> {
        self.buckets
            .get(&BucketKey {
                guild_id,
                module,
                actor_id,
            })
            .map(|b| b.clone())
    }

    /// Drop every bucket of an actor in a guild. Returns how many were removed.
    pub fn forget_actor(&self, guild_id: u64, actor_id: u64) -> usize {
        let before = self.buckets.len();
        self.buckets
            .retain(|key, _| !(key.guild_id == guild_id && key.actor_id == actor_id));
        before - self.buckets.len()
    }

    /// Guilds that currently own at least one bucket.
    pub fn guild_ids(&self) -> HashSet<u64> {
        self.buckets.iter().map(|entry| entry.key().guild_id).collect()
    }

    /// Evict buckets whose window started longer ago than
    /// `retention(guild, module)`. Modules without a retention (not configured
    /// in that guild) are evicted outright.
    pub fn sweep(
        &self,
        now: DateTime<Utc>,
        retention: impl Fn(u64, ProtectionModule) -> Option<Duration>,
    ) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|key, bucket| match retention(key.guild_id, key.module) {
            Some(keep_for) => now - bucket.last_reset < keep_for,
            None => false,
        });
        before - self.buckets.len()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
