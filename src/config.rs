/// Tuning knobs of the tracker loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Delay between GPS polls while waiting for a fix.
    pub fix_poll_interval_ms: u32,
    /// Gives up on the fix after this many polls. `None` waits forever.
    pub max_fix_polls: Option<u32>,
    /// Keep draining the command queue while waiting for a fix.
    pub drain_while_acquiring: bool,
    /// Delay between attempts to bring up a peripheral that failed `begin()`.
    pub init_retry_ms: u32,
}

impl TrackerConfig {
    pub const DEFAULT: TrackerConfig = TrackerConfig {
        fix_poll_interval_ms: 1000,
        max_fix_polls: None,
        drain_while_acquiring: true,
        init_retry_ms: 1000,
    };

    pub const fn with_fix_poll_interval_ms(mut self, ms: u32) -> Self {
        self.fix_poll_interval_ms = ms;
        self
    }

    pub const fn with_max_fix_polls(mut self, polls: Option<u32>) -> Self {
        self.max_fix_polls = polls;
        self
    }

    pub const fn with_drain_while_acquiring(mut self, drain: bool) -> Self {
        self.drain_while_acquiring = drain;
        self
    }

    pub const fn with_init_retry_ms(mut self, ms: u32) -> Self {
        self.init_retry_ms = ms;
        self
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
