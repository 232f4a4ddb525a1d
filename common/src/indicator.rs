use log::{debug, warn};

use crate::{config::TimingConfig, error::LedError, platform::Delay, types::SystemStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Led {
    Ready,
    Success,
    Error,
}

impl Led {
    pub const ALL: [Led; 3] = [Led::Ready, Led::Success, Led::Error];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

pub trait LedBank {
    fn set(&mut self, led: Led, on: bool) -> Result<(), LedError>;
}

pub struct StatusIndicator<B> {
    leds: B,
    success_pulse_ms: u32,
    failure_pulse_ms: u32,
    startup_blink_ms: u32,
    status: SystemStatus,
}

impl<B: LedBank> StatusIndicator<B> {
    pub fn new(leds: B, timing: &TimingConfig) -> Self {
        Self {
            leds,
            success_pulse_ms: timing.success_pulse_ms,
            failure_pulse_ms: timing.failure_pulse_ms,
            startup_blink_ms: timing.startup_blink_ms,
            status: SystemStatus::NotReady,
        }
    }

    pub fn leds(&self) -> &B {
        &self.leds
    }

    pub fn status(&self) -> SystemStatus {
        self.status
    }

    pub fn show(&mut self, status: SystemStatus) {
        debug!("indicator -> {status:?}");
        self.status = status;
        match status {
            SystemStatus::NotReady => {
                self.drive(Led::Ready, false);
                self.drive(Led::Error, false);
            }
            SystemStatus::Ready => {
                self.drive(Led::Error, false);
                self.drive(Led::Ready, true);
            }
            SystemStatus::Error => {
                self.drive(Led::Ready, false);
                self.drive(Led::Error, true);
            }
        }
    }

    pub fn pulse<D: Delay>(&mut self, led: Led, duration_ms: u32, delay: &mut D) {
        self.drive(led, true);
        delay.delay_ms(duration_ms);
        self.drive(led, false);
    }

    pub fn pulse_success<D: Delay>(&mut self, delay: &mut D) {
        self.pulse(Led::Success, self.success_pulse_ms, delay);
    }

    pub fn pulse_failure<D: Delay>(&mut self, delay: &mut D) {
        self.pulse(Led::Error, self.failure_pulse_ms, delay);
        if self.status == SystemStatus::Error {
            self.drive(Led::Error, true);
        }
    }

    pub fn blink_startup<D: Delay>(&mut self, delay: &mut D) {
        self.pulse(Led::Ready, self.startup_blink_ms, delay);
    }

    pub fn all_off(&mut self) {
        for led in Led::ALL {
            self.drive(led, false);
        }
        self.status = SystemStatus::NotReady;
    }

    fn drive(&mut self, led: Led, on: bool) {
        if let Err(err) = self.leds.set(led, on) {
            warn!("{} led: {err}", led.as_str());
        }
    }
}
