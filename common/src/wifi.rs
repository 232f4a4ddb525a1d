use log::{info, warn};

use crate::{config::TimingConfig, error::WifiError, platform::Delay, types::ConnectionState};

pub trait WifiLink {
    fn begin_connect(&mut self) -> Result<(), WifiError>;
    fn is_connected(&mut self) -> bool;
}

pub struct WifiSession<L> {
    link: L,
    poll_ms: u32,
    max_attempts: u32,
    state: ConnectionState,
}

impl<L: WifiLink> WifiSession<L> {
    pub fn new(link: L, timing: &TimingConfig) -> Self {
        Self {
            link,
            poll_ms: timing.wifi_poll_ms,
            max_attempts: timing.wifi_max_attempts,
            state: ConnectionState::Disconnected,
        }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&mut self) -> bool {
        let connected = self.link.is_connected();
        self.state = if connected {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        };
        connected
    }

    // Failure is reported, not retried.
    pub fn connect<D: Delay>(&mut self, delay: &mut D) -> ConnectionState {
        if self.link.is_connected() {
            self.state = ConnectionState::Connected;
            return self.state;
        }

        self.state = ConnectionState::Connecting;
        if let Err(err) = self.link.begin_connect() {
            warn!("wifi connect could not start: {err}");
            self.state = ConnectionState::Disconnected;
            return self.state;
        }

        for attempt in 1..=self.max_attempts {
            delay.delay_ms(self.poll_ms);
            if self.link.is_connected() {
                info!("wifi connected after {attempt} poll(s)");
                self.state = ConnectionState::Connected;
                return self.state;
            }
        }

        warn!(
            "wifi not connected after {} polls ({} ms)",
            self.max_attempts,
            self.max_attempts.saturating_mul(self.poll_ms)
        );
        self.state = ConnectionState::Disconnected;
        self.state
    }
}

#[derive(Debug, Clone)]
pub struct LivenessTimer {
    interval_ms: u32,
    last_ms: u32,
}

impl LivenessTimer {
    pub fn new(interval_ms: u32, now_ms: u32) -> Self {
        Self {
            interval_ms,
            last_ms: now_ms,
        }
    }

    pub fn due(&mut self, now_ms: u32) -> bool {
        if now_ms.wrapping_sub(self.last_ms) >= self.interval_ms {
            self.last_ms = now_ms;
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self, now_ms: u32) {
        self.last_ms = now_ms;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    #[derive(Default)]
    pub(crate) struct ScriptedLink {
        pub up: bool,
        pub connect_after: Option<u32>,
        pub joining: bool,
        pub polls_since_begin: u32,
        pub begin_calls: u32,
        pub refuse: bool,
    }

    impl WifiLink for ScriptedLink {
        fn begin_connect(&mut self) -> Result<(), WifiError> {
            self.begin_calls += 1;
            self.polls_since_begin = 0;
            if self.refuse {
                return Err(WifiError("radio off".into()));
            }
            self.joining = true;
            Ok(())
        }

        fn is_connected(&mut self) -> bool {
            if self.joining {
                self.polls_since_begin += 1;
                if let Some(after) = self.connect_after {
                    if self.polls_since_begin > after {
                        self.up = true;
                        self.joining = false;
                    }
                }
            }
            self.up
        }
    }

    #[derive(Default)]
    pub(crate) struct RecordingDelay {
        pub total_ms: u64,
    }

    impl Delay for RecordingDelay {
        fn delay_ms(&mut self, ms: u32) {
            self.total_ms += u64::from(ms);
        }
    }

    #[test]
    fn already_connected_skips_join() {
        let link = ScriptedLink {
            up: true,
            ..Default::default()
        };
        let mut session = WifiSession::new(link, &TimingConfig::default());
        let mut delay = RecordingDelay::default();

        assert_eq!(session.connect(&mut delay), ConnectionState::Connected);
        assert_eq!(session.link().begin_calls, 0);
        assert_eq!(delay.total_ms, 0);
    }

    #[test]
    fn connects_within_retry_budget() {
        let link = ScriptedLink {
            connect_after: Some(3),
            ..Default::default()
        };
        let mut session = WifiSession::new(link, &TimingConfig::default());
        let mut delay = RecordingDelay::default();

        assert_eq!(session.connect(&mut delay), ConnectionState::Connected);
        assert!(delay.total_ms <= 10_000);
    }

    #[test]
    fn gives_up_after_twenty_polls() {
        let mut session = WifiSession::new(ScriptedLink::default(), &TimingConfig::default());
        let mut delay = RecordingDelay::default();

        assert_eq!(session.connect(&mut delay), ConnectionState::Disconnected);
        assert_eq!(delay.total_ms, 20 * 500);
        assert_eq!(session.link().begin_calls, 1);
    }

    #[test]
    fn refused_join_fails_fast() {
        let link = ScriptedLink {
            refuse: true,
            ..Default::default()
        };
        let mut session = WifiSession::new(link, &TimingConfig::default());
        let mut delay = RecordingDelay::default();

        assert_eq!(session.connect(&mut delay), ConnectionState::Disconnected);
        assert_eq!(delay.total_ms, 0);
    }

    #[test]
    fn liveness_timer_fires_every_interval() {
        let mut timer = LivenessTimer::new(30_000, 0);

        assert!(!timer.due(29_999));
        assert!(timer.due(30_000));
        assert!(!timer.due(45_000));
        assert!(timer.due(60_000));
    }

    #[test]
    fn liveness_timer_handles_wraparound() {
        let mut timer = LivenessTimer::new(30_000, u32::MAX - 1_000);

        assert!(!timer.due(10_000));
        assert!(timer.due(29_000));
    }
}
