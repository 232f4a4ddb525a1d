use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::scene::SceneCommand;

pub const LIFX_BASE_URL: &str = "https://api.lifx.com/v1";
pub const LIFX_TOKEN_LEN: usize = 64;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifxConfig {
    pub token: String,
    pub base_url: String,
    pub selector: String,
    pub timeout_ms: u64,
}

impl Default for LifxConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            base_url: LIFX_BASE_URL.to_string(),
            selector: "all".to_string(),
            timeout_ms: 10_000,
        }
    }
}

impl LifxConfig {
    pub fn sanitize(&mut self) {
        self.token = self.token.trim().to_string();
        self.base_url = self.base_url.trim().trim_end_matches('/').to_string();
        if self.base_url.is_empty() {
            self.base_url = LIFX_BASE_URL.to_string();
        }
        self.selector = self.selector.trim().to_string();
        if self.selector.is_empty() {
            self.selector = "all".to_string();
        }
        self.timeout_ms = self.timeout_ms.clamp(1_000, 60_000);
    }

    pub fn has_valid_token(&self) -> bool {
        self.token.len() == LIFX_TOKEN_LEN
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonAction {
    #[default]
    ApplyScene,
    TogglePower,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    pub debounce_ms: u32,
    pub wifi_check_interval_ms: u32,
    pub wifi_poll_ms: u32,
    pub wifi_max_attempts: u32,
    pub success_pulse_ms: u32,
    pub failure_pulse_ms: u32,
    pub startup_blink_ms: u32,
    /// Periodic re-check after a failed startup availability check. `None`
    /// keeps the device parked until reset.
    #[serde(default)]
    pub availability_retry_ms: Option<u32>,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 200,
            wifi_check_interval_ms: 30_000,
            wifi_poll_ms: 500,
            wifi_max_attempts: 20,
            success_pulse_ms: 200,
            failure_pulse_ms: 1_000,
            startup_blink_ms: 200,
            availability_retry_ms: None,
        }
    }
}

impl TimingConfig {
    pub fn sanitize(&mut self) {
        self.debounce_ms = self.debounce_ms.clamp(10, 2_000);
        self.wifi_check_interval_ms = self.wifi_check_interval_ms.max(1_000);
        self.wifi_poll_ms = self.wifi_poll_ms.clamp(50, 5_000);
        self.wifi_max_attempts = self.wifi_max_attempts.clamp(1, 100);
        self.success_pulse_ms = self.success_pulse_ms.clamp(10, 10_000);
        self.failure_pulse_ms = self.failure_pulse_ms.clamp(10, 10_000);
        self.startup_blink_ms = self.startup_blink_ms.clamp(10, 10_000);
        self.availability_retry_ms = self.availability_retry_ms.map(|ms| ms.max(5_000));
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinConfig {
    pub button: i32,
    pub ready_led: i32,
    pub error_led: i32,
    pub success_led: i32,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            button: 4,
            ready_led: 2,
            error_led: 5,
            success_led: 18,
        }
    }
}

// GPIO34..=39 are input-only without pulls.
const MAX_IO_PIN: i32 = 33;

impl PinConfig {
    fn roles(&self) -> [(&'static str, i32); 4] {
        [
            ("button", self.button),
            ("ready led", self.ready_led),
            ("error led", self.error_led),
            ("success led", self.success_led),
        ]
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let roles = self.roles();
        for (index, &(role, pin)) in roles.iter().enumerate() {
            let reason = match pin {
                6..=11 => Some("is wired to the SPI flash"),
                20 | 24 | 28..=31 => Some("does not exist"),
                0..=MAX_IO_PIN => None,
                _ => Some("is not a usable I/O pin"),
            };
            if let Some(reason) = reason {
                return Err(ConfigError::InvalidPin { role, pin, reason });
            }
            if let Some(&(first, _)) = roles[..index].iter().find(|(_, other)| *other == pin) {
                return Err(ConfigError::DuplicatePin {
                    pin,
                    first,
                    second: role,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub lifx: LifxConfig,
    #[serde(default)]
    pub scene: SceneCommand,
    #[serde(default)]
    pub action: ButtonAction,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub pins: PinConfig,
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.lifx.sanitize();
        self.scene.sanitize();
        self.timing.sanitize();
    }

    pub fn apply_build_secrets(
        &mut self,
        wifi_ssid: Option<&str>,
        wifi_pass: Option<&str>,
        lifx_token: Option<&str>,
    ) {
        if self.network.wifi_ssid.is_empty() {
            if let Some(ssid) = wifi_ssid {
                self.network.wifi_ssid = ssid.to_string();
            }
        }
        if self.network.wifi_pass.is_empty() {
            if let Some(pass) = wifi_pass {
                self.network.wifi_pass = pass.to_string();
            }
        }
        if self.lifx.token.is_empty() {
            if let Some(token) = lifx_token {
                self.lifx.token = token.to_string();
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RuntimeConfigView {
    #[serde(rename = "wifiSsid")]
    pub wifi_ssid: String,
    #[serde(rename = "wifiPassSet")]
    pub wifi_pass_set: bool,
    #[serde(rename = "lifxTokenSet")]
    pub lifx_token_set: bool,
    #[serde(rename = "lifxBaseUrl")]
    pub lifx_base_url: String,
    pub selector: String,
    pub action: ButtonAction,
    pub scene: SceneCommand,
}

impl From<&RuntimeConfig> for RuntimeConfigView {
    fn from(runtime: &RuntimeConfig) -> Self {
        Self {
            wifi_ssid: runtime.network.wifi_ssid.clone(),
            wifi_pass_set: !runtime.network.wifi_pass.is_empty(),
            lifx_token_set: !runtime.lifx.token.is_empty(),
            lifx_base_url: runtime.lifx.base_url.clone(),
            selector: runtime.lifx.selector.clone(),
            action: runtime.action,
            scene: runtime.scene.clone(),
        }
    }
}
