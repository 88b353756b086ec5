use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Sliding-window limiter keyed by sender.
///
/// Process-local and lost on restart. Two requests from the same sender racing on
/// different tasks may both be admitted at the boundary.
#[derive(Debug, Default)]
pub struct RateLimiter {
    windows: DashMap<String, VecDeque<Instant>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    pub count: u32,
    pub limit: u32,
    pub remaining: u32,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(&self, sender: &str, limit: u32, window: Duration) -> bool {
        self.allow_at(sender, limit, window, Instant::now())
    }

    /// Records an accepted message at `now` and returns true when fewer than
    /// `limit` messages were accepted within the preceding `window`.
    pub fn allow_at(&self, sender: &str, limit: u32, window: Duration, now: Instant) -> bool {
        let mut entry = self.windows.entry(sender.to_string()).or_default();
        prune(&mut entry, window, now);
        if entry.len() >= limit as usize {
            return false;
        }
        entry.push_back(now);
        true
    }

    pub fn status(&self, sender: &str, limit: u32, window: Duration) -> RateLimitStatus {
        self.status_at(sender, limit, window, Instant::now())
    }

    pub fn status_at(&self, sender: &str, limit: u32, window: Duration, now: Instant) -> RateLimitStatus {
        let count = self
            .windows
            .get(sender)
            .map(|q| q.iter().filter(|t| now.saturating_duration_since(**t) < window).count())
            .unwrap_or(0);
        let count = u32::try_from(count).unwrap_or(u32::MAX);
        RateLimitStatus {
            count,
            limit,
            remaining: limit.saturating_sub(count),
        }
    }

    pub fn sweep(&self, window: Duration) -> usize {
        self.sweep_at(window, Instant::now())
    }

    /// Drops senders with no accepted message inside the window. Returns how many
    /// were removed.
    pub fn sweep_at(&self, window: Duration, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, q| {
            prune(q, window, now);
            !q.is_empty()
        });
        before.saturating_sub(self.windows.len())
    }

    pub fn tracked_senders(&self) -> usize {
        self.windows.len()
    }

    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        window: Duration,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("rate limit sweeper stopping");
                        return;
                    }
                    _ = ticker.tick() => {
                        let removed = self.sweep(window);
                        tracing::debug!(removed, tracked = self.tracked_senders(), "rate limit sweep");
                    }
                }
            }
        })
    }
}

fn prune(queue: &mut VecDeque<Instant>, window: Duration, now: Instant) {
    while queue
        .front()
        .is_some_and(|t| now.saturating_duration_since(*t) >= window)
    {
        queue.pop_front();
    }
}
