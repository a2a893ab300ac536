//! Per-channel alarm rate limit

use std::collections::HashMap;
use std::time::{Duration, Instant};

use vigil_backend::Channel;

/// Last alarm instant per channel. A channel is cooling down until `window`
/// has passed since its last alarm attempt, delivered or not.
#[derive(Debug)]
pub struct Cooldown {
    window: Duration,
    last_alarm: HashMap<Channel, Instant>,
}

impl Cooldown {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_alarm: HashMap::new(),
        }
    }

    /// Time left in the channel's window, if any
    pub fn remaining(&self, channel: &Channel, now: Instant) -> Option<Duration> {
        let last = self.last_alarm.get(channel)?;
        let elapsed = now.saturating_duration_since(*last);
        (elapsed < self.window).then(|| self.window - elapsed)
    }

    pub fn record(&mut self, channel: &Channel, at: Instant) {
        self.last_alarm.insert(channel.clone(), at);
    }

    /// Forget channels whose window has passed
    pub fn prune(&mut self, now: Instant) {
        let window = self.window;
        self.last_alarm
            .retain(|_, last| now.saturating_duration_since(*last) < window);
    }
}
