use std::num::NonZeroUsize;
use std::time::Duration;
use std::time::SystemTime;

use serde::Deserialize;

use crate::error::ConfigError;

/// What a recorded ban actually does.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BanPolicy {
    /// Bans are bookkeeping only. Admission depends on the window count
    /// alone, so a rollover lets a banned client straight back in.
    #[default]
    Advisory,
    /// A client is denied until its ban expires, across window rollovers.
    Enforced,
}

/// Fixed-window throttle settings.
///
/// Windows are `interval` long and aligned on `interval_root`, so every
/// client shares the same boundaries. A live `ThrottleWindow` always has a
/// non-zero interval.
///
/// ```rust
/// use throttle_cache::ThrottleWindow;
///
/// let window: ThrottleWindow = serde_json::from_str(
///     r#"{
///         "interval": "1m",
///         "interval_root": "1970-01-01T00:00:00Z",
///         "max_requests_per_client": 2,
///         "ban_duration": "1m"
///     }"#,
/// )
/// .unwrap();
/// assert_eq!(window.max_requests_per_client().get(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawThrottleWindow")]
pub struct ThrottleWindow {
    interval: Duration,
    interval_root: SystemTime,
    max_requests_per_client: NonZeroUsize,
    ban_duration: Duration,
    ban_policy: BanPolicy,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawThrottleWindow {
    #[serde(with = "humantime_serde")]
    interval: Duration,
    #[serde(with = "humantime_serde")]
    interval_root: SystemTime,
    max_requests_per_client: NonZeroUsize,
    #[serde(with = "humantime_serde")]
    ban_duration: Duration,
    #[serde(default)]
    ban_policy: BanPolicy,
}

impl TryFrom<RawThrottleWindow> for ThrottleWindow {
    type Error = ConfigError;

    fn try_from(raw: RawThrottleWindow) -> Result<Self, Self::Error> {
        Ok(Self::new(
            raw.interval,
            raw.interval_root,
            raw.max_requests_per_client,
            raw.ban_duration,
        )?
        .with_ban_policy(raw.ban_policy))
    }
}

impl ThrottleWindow {
    /// Creates settings with the [`BanPolicy::Advisory`] policy.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroInterval`] if `interval` is zero.
    pub fn new(
        interval: Duration,
        interval_root: SystemTime,
        max_requests_per_client: NonZeroUsize,
        ban_duration: Duration,
    ) -> Result<Self, ConfigError> {
        if interval.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }
        Ok(Self {
            interval,
            interval_root,
            max_requests_per_client,
            ban_duration,
            ban_policy: BanPolicy::Advisory,
        })
    }

    pub fn with_ban_policy(mut self, ban_policy: BanPolicy) -> Self {
        self.ban_policy = ban_policy;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn interval_root(&self) -> SystemTime {
        self.interval_root
    }

    pub fn max_requests_per_client(&self) -> NonZeroUsize {
        self.max_requests_per_client
    }

    pub fn ban_duration(&self) -> Duration {
        self.ban_duration
    }

    pub fn ban_policy(&self) -> BanPolicy {
        self.ban_policy
    }

    /// Nanoseconds from the root to `now`. Times before the root clamp to 0.
    pub(crate) fn offset_of(&self, now: SystemTime) -> u64 {
        now.duration_since(self.interval_root)
            .map(|elapsed| elapsed.as_nanos().min(u64::MAX as u128) as u64)
            .unwrap_or(0)
    }

    /// End of the window containing `offset`, in nanoseconds from the root.
    pub(crate) fn window_end(&self, offset: u64) -> u64 {
        let length = self.interval_nanos();
        (offset - offset % length).saturating_add(length)
    }

    pub(crate) fn interval_nanos(&self) -> u64 {
        // Never zero: `new` rejects an empty interval.
        (self.interval.as_nanos().min(u64::MAX as u128) as u64).max(1)
    }
}
