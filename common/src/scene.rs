use serde::{Deserialize, Serialize};

use crate::error::LifxError;

pub const SUNSET_COLOR: &str = "#f08d24";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Power {
    On,
    Off,
}

impl Power {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Self::On => Self::Off,
            Self::Off => Self::On,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneCommand {
    pub power: Power,
    pub color: String,
    pub brightness: f32,
    /// Fade duration in seconds.
    pub duration: f32,
}

impl Default for SceneCommand {
    fn default() -> Self {
        Self::sunset()
    }
}

impl SceneCommand {
    pub fn sunset() -> Self {
        Self {
            power: Power::On,
            color: SUNSET_COLOR.to_string(),
            brightness: 1.0,
            duration: 2.0,
        }
    }

    pub fn sanitize(&mut self) {
        self.brightness = self.brightness.clamp(0.0, 1.0);
        self.duration = self.duration.clamp(0.0, 3_600.0);
        if self.color.trim().is_empty() {
            self.color = SUNSET_COLOR.to_string();
        }
    }

    pub fn validate(&self) -> Result<(), LifxError> {
        if self.color.trim().is_empty() {
            return Err(LifxError::InvalidScene("color cannot be empty"));
        }
        if !(0.0..=1.0).contains(&self.brightness) {
            return Err(LifxError::InvalidScene("brightness must be between 0 and 1"));
        }
        if !self.duration.is_finite() || self.duration < 0.0 {
            return Err(LifxError::InvalidScene("duration must be >= 0"));
        }
        Ok(())
    }

    pub fn to_body(&self) -> Result<Vec<u8>, LifxError> {
        self.validate()?;
        Ok(serde_json::to_vec(self)?)
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PowerCommand {
    pub power: Power,
}
