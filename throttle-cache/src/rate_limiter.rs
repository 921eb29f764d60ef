use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::SystemTime;

use dashmap::DashMap;

use crate::clock::Clock;
use crate::window::BanPolicy;
use crate::window::ThrottleWindow;

/// Why a client was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    Banned { retry_after: Duration },
}

/// A per-client fixed-window limiter.
///
/// Every client gets its own counter, stamped with the window it counts for.
/// A counter from an older window starts over the next time its client is
/// seen, and the shared window end only moves forward when a request observes
/// that the window has passed. There is no background timer. Like any fixed
/// window it lets a client spend its quota at the end of one window and again
/// at the start of the next.
///
/// A counter is reset and incremented under its map shard lock, so admission
/// never waits on anything other than a map shard.
#[derive(Debug)]
pub struct RateLimiter {
    settings: ThrottleWindow,
    clock: Arc<dyn Clock>,
    counters: DashMap<String, Counter>,
    bans: DashMap<String, SystemTime>,
    /// Nanoseconds from the interval root.
    window_end: AtomicU64,
}

#[derive(Debug, Default)]
struct Counter {
    window_end: u64,
    requests: usize,
}

impl Counter {
    /// Counts one request in the window ending at `window_end`, returning how
    /// many came before it in that window.
    fn hit(&mut self, window_end: u64) -> usize {
        if self.window_end < window_end {
            self.window_end = window_end;
            self.requests = 0;
        }
        let previous = self.requests;
        self.requests = previous.saturating_add(1);
        previous
    }
}

impl RateLimiter {
    /// Creates a limiter whose first window is the one containing "now".
    pub fn new(settings: ThrottleWindow, clock: Arc<dyn Clock>) -> Self {
        let now = settings.offset_of(clock.now());
        let window_end = settings.window_end(now);
        Self {
            settings,
            clock,
            counters: DashMap::new(),
            bans: DashMap::new(),
            window_end: AtomicU64::new(window_end),
        }
    }

    pub fn settings(&self) -> &ThrottleWindow {
        &self.settings
    }

    /// Counts one request from `client` and decides whether it may proceed.
    ///
    /// Going over the quota records a ban expiring `ban_duration` from now,
    /// replacing any earlier one.
    pub fn process(&self, client: &str) -> ControlFlow<Reason> {
        let wall_now = self.clock.now();
        let now = self.settings.offset_of(wall_now);
        let window_end = self.roll_window(now);

        if self.settings.ban_policy() == BanPolicy::Enforced
            && let Some(until) = self.active_ban(client, wall_now)
        {
            let window_left = Duration::from_nanos(window_end.saturating_sub(now));
            let ban_left = until.duration_since(wall_now).unwrap_or_default();
            return ControlFlow::Break(Reason::Banned {
                retry_after: window_left.max(ban_left),
            });
        }

        let existing = self
            .counters
            .get_mut(client)
            .map(|mut counter| counter.hit(window_end));
        let previous = match existing {
            Some(previous) => previous,
            None => self
                .counters
                .entry(client.to_owned())
                .or_default()
                .hit(window_end),
        };

        if previous < self.settings.max_requests_per_client().get() {
            return ControlFlow::Continue(());
        }

        let until = wall_now + self.settings.ban_duration();
        self.bans.insert(client.to_owned(), until);

        let window_left = Duration::from_nanos(window_end.saturating_sub(now));
        let retry_after = match self.settings.ban_policy() {
            BanPolicy::Advisory => window_left,
            BanPolicy::Enforced => window_left.max(self.settings.ban_duration()),
        };
        tracing::debug!(client, ?retry_after, "client banned");

        ControlFlow::Break(Reason::Banned { retry_after })
    }

    /// `true` if `client` may proceed. Counts the request either way.
    pub fn allow(&self, client: &str) -> bool {
        self.process(client).is_continue()
    }

    /// Requests counted for `client` in the current window.
    pub fn request_count(&self, client: &str) -> usize {
        let window_end = self.window_end.load(Ordering::Acquire);
        self.counters
            .get(client)
            .filter(|counter| counter.window_end >= window_end)
            .map_or(0, |counter| counter.requests)
    }

    /// When the last ban recorded for `client` runs out, if it has one.
    pub fn ban_expiry(&self, client: &str) -> Option<SystemTime> {
        self.bans.get(client).map(|until| *until)
    }

    /// End of the window as of the last request that looked at it.
    pub fn window_end(&self) -> SystemTime {
        self.settings.interval_root()
            + Duration::from_nanos(self.window_end.load(Ordering::Acquire))
    }

    /// Moves to a fresh window if `now` is past the current one and returns
    /// the window end that applies to `now`.
    ///
    /// Counters are reset lazily by [`Counter::hit`]. The request that moves
    /// the window only sweeps out counters and bans that can no longer matter.
    fn roll_window(&self, now: u64) -> u64 {
        let window_end = self.window_end.load(Ordering::Acquire);
        if now <= window_end {
            return window_end;
        }

        let next_end = self.settings.window_end(now);
        match self.window_end.compare_exchange(
            window_end,
            next_end,
            Ordering::SeqCst,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                self.counters
                    .retain(|_, counter| counter.window_end >= next_end);
                let wall_now = self.clock.now();
                self.bans.retain(|_, until| *until > wall_now);
                tracing::debug!(
                    window_end = ?self.window_end(),
                    "throttle window rolled over"
                );
                next_end
            }
            // Another request rolled it first.
            Err(current) => current,
        }
    }

    fn active_ban(&self, client: &str, now: SystemTime) -> Option<SystemTime> {
        let until = self.ban_expiry(client)?;
        if now < until {
            return Some(until);
        }
        self.bans.remove_if(client, |_, until| *until <= now);
        None
    }
}
